// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! oonfd - OLSRv2 / NHDP mesh routing daemon with RFC 5444 framing,
//! RFC 7182 signing and DLEP radio/router session support.
//!
//! Wires the protocol engine in `oonfd-core`/`oonfd-dlep` to a concrete
//! process: load and validate `[[dlep]]`/`[[signature]]` configuration,
//! register the daemon's subsystems in dependency order, and drive the
//! shared readiness loop and timer engine until a termination signal
//! arrives.

mod cli;
mod daemon;
mod dlep_runtime;
mod lifecycle;
mod mesh_runtime;
mod signing;

use clap::Parser;

use oonfd_core::config::DaemonConfig;

fn main() {
    let args = cli::Args::parse();

    let cfg = match DaemonConfig::from_file(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("oonfd: failed to load {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("oonfd: invalid configuration: {e}");
        std::process::exit(1);
    }

    let log_level = args.log_level.as_deref().unwrap_or(&cfg.global.log_level);
    oonfd_core::logging::init_with_env_override(log_level);

    if args.check_config {
        println!(
            "oonfd: configuration OK ({} DLEP interface(s), {} mesh interface(s))",
            cfg.dlep.len(),
            cfg.mesh.len()
        );
        return;
    }

    if !args.foreground {
        log::info!(target: "oonfd::daemon", "running attached to the terminal (no detach support in this build)");
    }

    let mut daemon = match daemon::Daemon::build(&cfg) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("oonfd: failed to start: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = daemon.run() {
        eprintln!("oonfd: event loop failed: {e}");
        std::process::exit(1);
    }
}
