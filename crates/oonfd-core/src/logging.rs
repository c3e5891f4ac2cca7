// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-subsystem logging source setup: every subsystem without
//! `no_logging` gets a dedicated logging target allocated.
//!
//! Each subsystem gets a `log` target string (`"oonfd::<name>"`) rather
//! than a process-wide enum, so subsystems loaded dynamically don't need
//! a recompile to get a new log source. The sink setup (`env_logger`)
//! keeps "what to log" (a level filter) separate from "where it goes"
//! (the installed `log::Log` implementation).

/// The `log` target string for a subsystem named `name`, e.g. `"oonfd::<name>"`.
pub fn target_for(name: &str) -> String {
    format!("oonfd::{name}")
}

/// Initialize the process-wide logging sink from a level name (as read
/// from `[global] log_level` in the daemon config). Safe to call once;
/// a second call is a no-op (mirrors `env_logger`'s `try_init`
/// "already initialized" handling).
pub fn init(level: &str) {
    let filter = parse_level(level);
    let _ = env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp_millis()
        .try_init();
}

/// Initialize from `RUST_LOG` if set, else fall back to `default_level`.
pub fn init_with_env_override(default_level: &str) {
    let filter = parse_level(default_level);
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter.to_string()),
    )
    .format_timestamp_millis()
    .try_init();
}

fn parse_level(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_for_namespaces_under_oonfd() {
        assert_eq!(target_for("duplicate_set"), "oonfd::duplicate_set");
    }

    #[test]
    fn parse_level_defaults_to_info_for_unknown_strings() {
        assert_eq!(parse_level("bogus"), log::LevelFilter::Info);
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
    }
}
