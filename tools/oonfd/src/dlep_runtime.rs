// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-interface transport glue binding an [`oonfd_dlep::interface::DlepInterface`]
//! to the daemon's shared [`oonfd_core::io::ReadinessLoop`] and
//! [`oonfd_core::timer::TimerEngine`].
//!
//! `oonfd-dlep` owns the protocol state machine and its own sockets but
//! not a `mio::Poll` (there is one shared readiness loop for the whole
//! process); this module is the token bookkeeping and socket-level I/O
//! the daemon binary supplies in exchange: an accept/read loop trimmed
//! to single-threaded, direct calls.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};

use oonfd_core::config::DlepInterfaceConfig;
use oonfd_core::io::ReadinessLoop;

use oonfd_dlep::interface::{DlepEvent, DlepInterface};
use oonfd_dlep::session::SessionAction;
use oonfd_dlep::wire::DLEP_DISCOVERY_PORT;

const READ_BUF: usize = 4096;

/// What a registered [`Token`] refers to, for one interface.
#[derive(Debug, Clone, Copy)]
enum TokenKind {
    Udp,
    Listener,
    Session(SocketAddr),
}

/// Everything the daemon needs to drive one configured DLEP interface.
pub struct InterfaceRuntime {
    pub iface: DlepInterface,
    pub name: String,
    discovery_mc_addr: SocketAddr,
    connect_target: Option<SocketAddr>,
    listener: Option<TcpListener>,
    tokens: HashMap<Token, TokenKind>,
    next_token: usize,
    pub discovery_interval_ms: u64,
}

impl InterfaceRuntime {
    pub fn new(cfg: &DlepInterfaceConfig, io: &mut ReadinessLoop, token_base: usize) -> io::Result<Self> {
        let mut iface = DlepInterface::new(cfg)?;
        let mut next_token = token_base;

        let udp_token = Token(next_token);
        next_token += 1;
        io.register(&mut iface.udp, udp_token, Interest::READABLE)?;

        let mut tokens = HashMap::new();
        tokens.insert(udp_token, TokenKind::Udp);

        let listener = if cfg.radio {
            cfg.session_port.map(|port| -> io::Result<TcpListener> {
                let bind_ip = cfg.session_bindto.as_deref().unwrap_or("0.0.0.0");
                let addr: SocketAddr = format!("{bind_ip}:{port}")
                    .parse()
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad session_bindto"))?;
                TcpListener::bind(addr)
            })
        } else {
            None
        };
        let mut listener = listener.transpose()?;
        if let Some(listener) = listener.as_mut() {
            let listener_token = Token(next_token);
            next_token += 1;
            io.register(listener, listener_token, Interest::READABLE)?;
            tokens.insert(listener_token, TokenKind::Listener);
        }

        let connect_target = cfg
            .connect_to
            .as_deref()
            .map(|ip| format!("{}:{}", ip, cfg.connect_to_port.unwrap_or(DLEP_DISCOVERY_PORT)))
            .and_then(|s| s.parse().ok());

        let discovery_mc_addr: SocketAddr = format!("{}:{}", cfg.discovery_mc_v4, cfg.discovery_port)
            .parse()
            .unwrap_or_else(|_| ([224, 0, 0, 117], DLEP_DISCOVERY_PORT).into());

        Ok(Self {
            iface,
            name: cfg.name.clone(),
            discovery_mc_addr,
            connect_target,
            listener,
            tokens,
            next_token,
            discovery_interval_ms: cfg.discovery_interval_ms,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    pub fn owns(&self, token: Token) -> bool {
        self.tokens.contains_key(&token)
    }

    /// Router-side periodic re-send of Peer-Discovery while unconnected.
    pub fn tick_discovery(&mut self) {
        let _ = self.iface.send_periodic_discovery(self.discovery_mc_addr);
    }

    /// Heartbeat sweep; flushes any due heartbeat bytes and tears down
    /// sessions that lost heartbeat.
    pub fn tick_heartbeats(&mut self, now: u64, io: &mut ReadinessLoop) {
        let lost = self.iface.tick_heartbeats(now);
        for remote in lost {
            self.forget_session(remote, io);
        }
        self.flush_all_sessions(io);
    }

    fn flush_all_sessions(&mut self, io: &mut ReadinessLoop) {
        let remotes: Vec<SocketAddr> = self.iface.sessions.iter().map(|e| *e.key()).collect();
        for remote in remotes {
            self.flush_session(remote, io);
        }
    }

    fn flush_session(&mut self, remote: SocketAddr, io: &mut ReadinessLoop) {
        let Some(mut entry) = self.iface.sessions.get_mut(&remote) else { return };
        if entry.out.is_empty() {
            return;
        }
        match entry.stream.write(&entry.out) {
            Ok(n) => {
                entry.out.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => {
                drop(entry);
                self.forget_session(remote, io);
                return;
            }
        }
        if !entry.out.is_empty() {
            if let Some(token) = self.token_of(remote) {
                let _ = io.reregister(&mut entry.stream, token, Interest::READABLE | Interest::WRITABLE);
            }
        }
    }

    fn token_of(&self, remote: SocketAddr) -> Option<Token> {
        self.tokens.iter().find_map(|(t, k)| match k {
            TokenKind::Session(addr) if *addr == remote => Some(*t),
            _ => None,
        })
    }

    fn forget_session(&mut self, remote: SocketAddr, io: &mut ReadinessLoop) {
        if let Some(token) = self.token_of(remote) {
            if let Some(mut entry) = self.iface.sessions.get_mut(&remote) {
                let _ = io.deregister(&mut entry.stream, token);
            }
            self.tokens.remove(&token);
        }
        self.iface.sessions.remove(&remote);
    }

    /// Handle a readiness event for a token known to belong to this
    /// interface.
    pub fn handle_readiness(
        &mut self,
        token: Token,
        readable: bool,
        writable: bool,
        now: u64,
        io: &mut ReadinessLoop,
    ) -> io::Result<()> {
        match self.tokens.get(&token).copied() {
            Some(TokenKind::Udp) => {
                if readable {
                    self.drain_udp(now, io)?;
                }
            }
            Some(TokenKind::Listener) => {
                if readable {
                    self.accept_sessions(now, io)?;
                }
            }
            Some(TokenKind::Session(remote)) => {
                if readable {
                    self.read_session(remote, now, io);
                }
                if writable {
                    self.flush_session(remote, io);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn drain_udp(&mut self, now: u64, io: &mut ReadinessLoop) -> io::Result<()> {
        let mut buf = [0u8; READ_BUF];
        loop {
            match self.iface.udp.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Some(DlepEvent::ConnectTo(offer_from)) = self.iface.on_udp_datagram(&buf[..n], from, now)? {
                        let target = self.connect_target.unwrap_or(offer_from);
                        self.connect_to(target, now, io);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn connect_to(&mut self, target: SocketAddr, now: u64, io: &mut ReadinessLoop) {
        let Ok(mut stream) = TcpStream::connect(target) else { return };
        let token = self.alloc_token();
        if io.register(&mut stream, token, Interest::READABLE | Interest::WRITABLE).is_err() {
            return;
        }
        self.tokens.insert(token, TokenKind::Session(target));
        let _ = self.iface.add_tcp_session(target, stream, now);
        self.flush_session(target, io);
    }

    fn accept_sessions(&mut self, now: u64, io: &mut ReadinessLoop) -> io::Result<()> {
        loop {
            // The accept call itself only borrows `self.listener`; binding
            // its *result* (rather than holding the listener reference
            // across the match arms) lets the arms freely borrow the rest
            // of `self` again.
            let accepted = match self.listener.as_mut() {
                Some(listener) => listener.accept(),
                None => return Ok(()),
            };
            match accepted {
                Ok((mut stream, remote)) => {
                    let token = self.alloc_token();
                    if io.register(&mut stream, token, Interest::READABLE).is_err() {
                        continue;
                    }
                    self.tokens.insert(token, TokenKind::Session(remote));
                    let _ = self.iface.add_tcp_session(remote, stream, now);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn read_session(&mut self, remote: SocketAddr, now: u64, io: &mut ReadinessLoop) {
        let mut buf = [0u8; READ_BUF];
        let n = {
            let Some(mut entry) = self.iface.sessions.get_mut(&remote) else { return };
            match entry.stream.read(&mut buf) {
                Ok(0) => {
                    drop(entry);
                    self.forget_session(remote, io);
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    drop(entry);
                    self.forget_session(remote, io);
                    return;
                }
            }
        };
        let actions: Vec<SessionAction> = self.iface.on_tcp_data(remote, &buf[..n], now);
        let ended = actions.iter().any(|a| a.ended);
        self.flush_session(remote, io);
        if ended {
            self.forget_session(remote, io);
        }
    }

    /// Send Session-Termination to every live peer, for the shutdown
    /// farewell window (graceful two-phase shutdown).
    pub fn terminate_all_sessions(&mut self, io: &mut ReadinessLoop) {
        let remotes: Vec<SocketAddr> = self.iface.sessions.iter().map(|e| *e.key()).collect();
        for remote in remotes {
            if let Some(mut entry) = self.iface.sessions.get_mut(&remote) {
                let term = entry.session.build_termination("daemon shutting down");
                entry.out.extend_from_slice(&term.encode());
            }
            self.flush_session(remote, io);
        }
    }
}
