// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command-line entry point: startup flags for a long-running daemon
//! process, parsed with `clap::Parser`.

use std::path::PathBuf;

use clap::Parser;

/// oonfd - OLSRv2 / NHDP mesh routing daemon
#[derive(Parser, Debug)]
#[command(name = "oonfd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the daemon's YAML configuration document.
    #[arg(short, long, default_value = "/etc/oonfd/oonfd.yaml")]
    pub config: PathBuf,

    /// Stay attached to the controlling terminal instead of detaching.
    #[arg(short, long, default_value_t = false)]
    pub foreground: bool,

    /// Override `[global] log_level` from the config file.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Parse and validate the configuration, then exit without starting
    /// any subsystem.
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}
