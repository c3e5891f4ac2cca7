// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLEP interface: UDP discovery socket plus a TCP session tree keyed by
//! remote socket.
//!
//! The UDP buffer always carries the magic prefix between flushes,
//! loopback datagrams (source == local socket) are dropped, and
//! `udp_mode` gates whether the discovery socket is even listened on.
//! The session tree is a `dashmap::DashMap` keyed by remote socket.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use dashmap::DashMap;
use mio::net::{TcpStream, UdpSocket};
use socket2::{Domain, Protocol, Socket, Type};

use oonfd_core::config::{DlepInterfaceConfig, UdpMode};

use crate::session::{PeerState, Session, SessionAction};
use crate::wire::{strip_udp_prefix, with_udp_prefix, Signal, SignalType};

/// A single TCP-backed DLEP session: the socket, the protocol state
/// machine, and its own per-session outgoing buffer.
pub struct TcpSessionEntry {
    pub stream: TcpStream,
    pub session: Session,
    pub out: Vec<u8>,
}

/// Something the transport/event-loop glue (the daemon binary) must act
/// on after a `DlepInterface` method returns.
#[derive(Debug)]
pub enum DlepEvent {
    /// Router side: a Peer-Offer was accepted; open a TCP connection to
    /// `target` and hand the resulting stream to
    /// [`DlepInterface::add_tcp_session`].
    ConnectTo(SocketAddr),
    /// A session ended; the caller should deregister its token/stream.
    SessionEnded(SocketAddr),
}

pub struct DlepInterface {
    pub name: String,
    pub radio: bool,
    pub udp_mode: UdpMode,
    pub udp: UdpSocket,
    pub local_addr: SocketAddr,
    /// Between flushes this always starts with [`crate::wire::DLEP_MAGIC`].
    udp_out: Vec<u8>,
    /// Interface-embedded discovery-role session.
    pub discovery: Session,
    pub sessions: DashMap<SocketAddr, TcpSessionEntry>,
}

impl DlepInterface {
    pub fn new(cfg: &DlepInterfaceConfig) -> io::Result<Self> {
        let bind_addr: SocketAddr = cfg
            .discovery_bindto
            .as_deref()
            .unwrap_or("0.0.0.0")
            .parse()
            .map(|ip| SocketAddr::new(ip, cfg.discovery_port))
            .unwrap_or_else(|_| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), cfg.discovery_port));

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())?;

        let mcast: Ipv4Addr = cfg.discovery_mc_v4.parse().unwrap_or(Ipv4Addr::new(224, 0, 0, 117));
        // Best-effort: a missing multicast-capable interface should not
        // fail interface construction; skip interfaces that can't join.
        let _ = socket.join_multicast_v4(&mcast, &Ipv4Addr::UNSPECIFIED);
        let _ = socket.set_multicast_loop_v4(false);

        let std_socket: std::net::UdpSocket = socket.into();
        let local_addr = std_socket.local_addr()?;
        let udp = UdpSocket::from_std(std_socket);

        let mut udp_out = Vec::new();
        udp_out.extend_from_slice(crate::wire::DLEP_MAGIC);

        let discovery = Session::new_discovery(
            cfg.radio,
            cfg.peer_type.clone(),
            cfg.heartbeat_interval_ms,
            cfg.lid_length,
        );

        Ok(Self {
            name: cfg.name.clone(),
            radio: cfg.radio,
            udp_mode: cfg.udp_mode,
            udp,
            local_addr,
            udp_out,
            discovery,
            sessions: DashMap::new(),
        })
    }

    /// Whether the discovery socket should currently be serviced, per the
    /// configured UDP-mode policy.
    pub fn should_listen_udp(&self) -> bool {
        match self.udp_mode {
            UdpMode::None => false,
            UdpMode::SingleSession => self.sessions.is_empty(),
            UdpMode::Always => true,
        }
    }

    /// Clear the outgoing UDP buffer back to just the magic prefix, after
    /// a flush.
    fn reset_udp_out(&mut self) {
        self.udp_out.clear();
        self.udp_out.extend_from_slice(crate::wire::DLEP_MAGIC);
    }

    fn queue_udp_signal(&mut self, signal: &Signal) {
        self.udp_out.extend_from_slice(&signal.encode());
    }

    /// Drain the outgoing UDP buffer, returning the framed datagram to
    /// send, if anything beyond the bare prefix has accumulated.
    pub fn take_udp_datagram(&mut self) -> Option<Vec<u8>> {
        if self.udp_out.len() <= crate::wire::DLEP_MAGIC.len() {
            return None;
        }
        let framed = std::mem::take(&mut self.udp_out);
        self.reset_udp_out();
        Some(framed)
    }

    /// Handle one incoming UDP datagram: strips the prefix, rejects
    /// loopback and unknown-signature datagrams, decodes the signal,
    /// drives the discovery session, and queues any unicast reply.
    pub fn on_udp_datagram(&mut self, buf: &[u8], from: SocketAddr, now: u64) -> io::Result<Option<DlepEvent>> {
        if !self.should_listen_udp() || from == self.local_addr {
            return Ok(None);
        }
        let Ok(stripped) = strip_udp_prefix(buf) else {
            return Ok(None);
        };
        let Ok((signal, _consumed)) = Signal::decode(stripped) else {
            return Ok(None);
        };

        let action = self
            .discovery
            .on_signal(now, &signal)
            .unwrap_or_else(|_| SessionAction { reply: None, ended: true });

        if let Some(reply) = &action.reply {
            self.queue_udp_signal(reply);
            self.udp.send_to(&with_udp_prefix(&self.udp_out[crate::wire::DLEP_MAGIC.len()..]), from)?;
            self.reset_udp_out();
        }

        if !self.radio && signal.signal_type == SignalType::PEER_OFFER {
            return Ok(Some(DlepEvent::ConnectTo(from)));
        }
        Ok(None)
    }

    /// Router side: periodically re-send Peer-Discovery while
    /// `NotConnected`.
    pub fn send_periodic_discovery(&mut self, multicast_addr: SocketAddr) -> io::Result<()> {
        if self.discovery.state != PeerState::NotConnected || self.radio {
            return Ok(());
        }
        let signal = self.discovery.build_peer_discovery();
        self.queue_udp_signal(&signal);
        let framed = std::mem::take(&mut self.udp_out);
        self.reset_udp_out();
        self.udp.send_to(&framed, multicast_addr)?;
        Ok(())
    }

    /// Register a new TCP-backed session (router: after connecting to an
    /// offered endpoint; radio: after accepting an inbound connection).
    pub fn add_tcp_session(&mut self, remote: SocketAddr, stream: TcpStream, now: u64) -> io::Result<()> {
        let session = Session::new_tcp(
            self.radio,
            self.discovery.peer_type.clone(),
            self.discovery.heartbeat_interval_ms,
            self.discovery.configured_lid_length,
            now,
        );
        let mut entry = TcpSessionEntry { stream, session, out: Vec::new() };
        if !self.radio {
            // Router immediately sends Session-Initialization once connected.
            let init = entry.session.build_session_init();
            entry.out.extend_from_slice(&init.encode());
        }
        self.sessions.insert(remote, entry);
        Ok(())
    }

    /// Process bytes read from a TCP session's stream, which may contain
    /// zero or more complete signals.
    pub fn on_tcp_data(&mut self, remote: SocketAddr, data: &[u8], now: u64) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let mut offset = 0usize;
        let mut ended = false;
        if let Some(mut entry) = self.sessions.get_mut(&remote) {
            while offset < data.len() {
                match Signal::decode(&data[offset..]) {
                    Ok((signal, consumed)) => {
                        offset += consumed;
                        match entry.session.on_signal(now, &signal) {
                            Ok(action) => {
                                if let Some(reply) = &action.reply {
                                    entry.out.extend_from_slice(&reply.encode());
                                }
                                ended |= action.ended;
                                actions.push(action);
                            }
                            Err(_) => {
                                ended = true;
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        }
        if ended {
            self.sessions.remove(&remote);
        }
        actions
    }

    /// Heartbeat + loss-detection sweep over every TCP session, run from
    /// the daemon's timer tick.
    pub fn tick_heartbeats(&mut self, now: u64) -> Vec<SocketAddr> {
        let mut lost = Vec::new();
        for mut entry in self.sessions.iter_mut() {
            if entry.session.heartbeat_lost(now) {
                lost.push(*entry.key());
                continue;
            }
            if entry.session.heartbeat_due(now) {
                let hb = entry.session.build_heartbeat(now);
                entry.out.extend_from_slice(&hb.encode());
            }
        }
        for remote in &lost {
            self.sessions.remove(remote);
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oonfd_core::config::DlepInterfaceConfig;

    fn cfg(radio: bool) -> DlepInterfaceConfig {
        DlepInterfaceConfig {
            name: "wlan0".into(),
            radio,
            discovery_port: 0,
            ..Default::default()
        }
    }

    #[test]
    fn should_listen_udp_respects_single_session_mode() {
        let mut iface = DlepInterface::new(&cfg(true)).unwrap();
        iface.udp_mode = UdpMode::SingleSession;
        assert!(iface.should_listen_udp());
    }

    #[test]
    fn should_not_listen_when_udp_mode_none() {
        let mut iface = DlepInterface::new(&cfg(true)).unwrap();
        iface.udp_mode = UdpMode::None;
        assert!(!iface.should_listen_udp());
    }

    #[test]
    fn udp_out_starts_with_magic_prefix() {
        let iface = DlepInterface::new(&cfg(true)).unwrap();
        assert_eq!(&iface.udp_out[..4], crate::wire::DLEP_MAGIC);
    }
}
