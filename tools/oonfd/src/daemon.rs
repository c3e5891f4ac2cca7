// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Top-level daemon: subsystem registry, clock/timer/readiness loop, and
//! the two-phase graceful shutdown. A 500ms farewell window lets
//! in-flight Session-Termination signals flush before the process
//! exits.
//!
//! Shutdown follows the signal-driven flag idiom common to long-running
//! Unix daemons: a signal handler may only touch an `AtomicBool`;
//! everything else happens on the next loop iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use oonfd_core::clock::Clock;
use oonfd_core::config::DaemonConfig;
use oonfd_core::icv::{CryptRegistry, HashRegistry};
use oonfd_core::io::{Readiness, ReadinessLoop};
use oonfd_core::sigpolicy::SignaturePolicy;
use oonfd_core::subsystem::SubsystemRegistry;
use oonfd_core::timer::{TimerDisposition, TimerEngine};

use crate::dlep_runtime::InterfaceRuntime;
use crate::lifecycle::{DlepSubsystem, MeshSubsystem, Rfc5444Subsystem, SignatureSubsystem};
use crate::mesh_runtime::MeshInterfaceRuntime;
use crate::signing;

/// The farewell window after `initiate_shutdown` before the process
/// exits, regardless of whether every session acknowledged termination.
const SHUTDOWN_FAREWELL: Duration = Duration::from_millis(500);

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate_signal(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    // SAFETY: `on_terminate_signal` only touches an `AtomicBool`, which is
    // async-signal-safe; `signal(2)` itself requires no other precondition
    // here.
    unsafe {
        libc::signal(libc::SIGINT, on_terminate_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_terminate_signal as libc::sighandler_t);
    }
}

/// State threaded through every timer callback: every configured DLEP and
/// mesh interface, plus the signature machinery both sign and verify
/// against.
struct DaemonState {
    interfaces: Vec<InterfaceRuntime>,
    meshes: Vec<MeshInterfaceRuntime>,
    hashes: HashRegistry,
    crypts: CryptRegistry,
    signatures: SignaturePolicy,
}

pub struct Daemon {
    clock: Clock,
    io: ReadinessLoop,
    timers: TimerEngine<DaemonState>,
    registry: SubsystemRegistry,
    state: DaemonState,
}

impl Daemon {
    pub fn build(cfg: &DaemonConfig) -> std::io::Result<Self> {
        let clock = Clock::init().map_err(|e| std::io::Error::other(e.to_string()))?;
        let mut io = ReadinessLoop::new()?;
        let mut timers: TimerEngine<DaemonState> = TimerEngine::default();

        let mut interfaces = Vec::with_capacity(cfg.dlep.len());
        for (i, dlep_cfg) in cfg.dlep.iter().enumerate() {
            let token_base = 16 + i * 64;
            interfaces.push(InterfaceRuntime::new(dlep_cfg, &mut io, token_base)?);
        }

        let mesh_token_base = 16 + cfg.dlep.len() * 64;
        let mut meshes = Vec::with_capacity(cfg.mesh.len());
        for (i, mesh_cfg) in cfg.mesh.iter().enumerate() {
            let token_base = mesh_token_base + i * 4;
            meshes.push(MeshInterfaceRuntime::new(mesh_cfg, &mut io, token_base)?);
        }

        let (hashes, crypts, signatures) = signing::build(&cfg.signature);

        let discovery_class = timers.add_class("dlep-discovery", true, |state: &mut DaemonState, _id| {
            for iface in &mut state.interfaces {
                iface.tick_discovery();
            }
            TimerDisposition::Continue
        });
        let hello_class = timers.add_class("mesh-hello", true, |state: &mut DaemonState, _id| {
            for mesh in &mut state.meshes {
                mesh.tick_hello(&state.signatures);
            }
            TimerDisposition::Continue
        });
        let tc_class = timers.add_class("mesh-tc", true, |state: &mut DaemonState, _id| {
            for mesh in &mut state.meshes {
                mesh.tick_tc(&state.signatures);
            }
            TimerDisposition::Continue
        });

        let mut registry = SubsystemRegistry::new();
        registry.register(Box::new(Rfc5444Subsystem)).ok();
        registry.register(Box::new(SignatureSubsystem::new(cfg.signature.len()))).ok();
        registry
            .register(Box::new(DlepSubsystem::new(interfaces.iter().map(|i| i.name.clone()).collect())))
            .ok();
        registry
            .register(Box::new(MeshSubsystem::new(meshes.iter().map(|m| m.name.clone()).collect())))
            .ok();
        registry.start_all().map_err(|(e, res)| {
            std::io::Error::other(format!("subsystem startup failed: {e}; {res:?}"))
        })?;

        let now = clock.now();
        let discovery_timer = timers.new_timer(discovery_class, 10);
        timers.start(discovery_timer, now, 1000, 1000);
        for mesh_cfg in &cfg.mesh {
            let hello_timer = timers.new_timer(hello_class, 10);
            timers.start(hello_timer, now, mesh_cfg.hello_interval_ms, mesh_cfg.hello_interval_ms);
            let tc_timer = timers.new_timer(tc_class, 10);
            timers.start(tc_timer, now, mesh_cfg.tc_interval_ms, mesh_cfg.tc_interval_ms);
        }
        // Heartbeat/prune ticking needs per-interface access to `io` (DLEP)
        // or per-interface state not worth threading through a second
        // generic parameter (mesh stale-neighbor pruning); the main loop
        // below drives both directly every iteration at a fixed 1s cadence
        // instead of through `timers`.

        let state = DaemonState { interfaces, meshes, hashes, crypts, signatures };

        install_signal_handlers();

        Ok(Self { clock, io, timers, registry, state })
    }

    /// Run until a SIGINT/SIGTERM is observed, then perform the two-phase
    /// shutdown and return.
    pub fn run(&mut self) -> std::io::Result<()> {
        let mut events: Vec<Readiness> = Vec::new();
        let mut last_heartbeat_tick_ms = self.clock.now();

        loop {
            if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                break;
            }

            self.clock.update().map_err(|e| std::io::Error::other(e.to_string()))?;
            let now = self.clock.now();
            self.timers.walk(now, &mut self.state);

            if now.saturating_sub(last_heartbeat_tick_ms) >= 1000 {
                last_heartbeat_tick_ms = now;
                for iface in &mut self.state.interfaces {
                    iface.tick_heartbeats(now, &mut self.io);
                }
                for mesh in &mut self.state.meshes {
                    mesh.prune_stale(now);
                }
            }

            let next = self.timers.next_event();
            let timeout = if next == u64::MAX {
                oonfd_core::io::DEFAULT_POLL_TIMEOUT
            } else {
                Duration::from_millis(self.clock.relative(next).min(1000))
            };

            self.io.poll(Some(timeout), &mut events)?;
            for ev in &events {
                let mut handled = false;
                for iface in &mut self.state.interfaces {
                    if iface.owns(ev.token) {
                        iface.handle_readiness(ev.token, ev.readable, ev.writable, now, &mut self.io)?;
                        handled = true;
                        break;
                    }
                }
                if handled {
                    continue;
                }
                for mesh in &mut self.state.meshes {
                    if mesh.owns(ev.token) {
                        mesh.handle_readiness(
                            ev.token,
                            ev.readable,
                            now,
                            &self.state.hashes,
                            &self.state.crypts,
                            &self.state.signatures,
                        )?;
                        break;
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(&mut self) {
        log::info!(target: "oonfd::daemon", "shutdown requested, entering farewell window");
        self.registry.shutdown_all();
        for iface in &mut self.state.interfaces {
            iface.terminate_all_sessions(&mut self.io);
        }
        std::thread::sleep(SHUTDOWN_FAREWELL);
        log::info!(target: "oonfd::daemon", "shutdown complete");
    }
}
