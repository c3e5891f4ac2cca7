// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic millisecond clock, start-anchored.
//!
//! The cached `now()` value is the sole time source seen by the rest of the
//! system, so one readiness-loop iteration observes one consistent "now".
//! Not `Sync`: the runtime is single-threaded cooperative.

use crate::error::PlatformError;

/// Saturation point for [`Clock::to_clock_string`].
///
/// A naive `HH:MM:SS.mmm` formatter over a 64-bit millisecond duration
/// would silently overflow past roughly `2^55` ms. Instead the formatted
/// string saturates at this bound and appends `"+"` to signal truncation,
/// rather than emit a misleading wrapped value.
pub const CLOCK_STRING_SATURATION_MS: u64 = 1u64 << 55;

/// Monotonic millisecond clock, captured relative to a start anchor.
#[derive(Debug)]
pub struct Clock {
    start_anchor_ns: u64,
    now_ms: u64,
}

impl Clock {
    /// Capture the platform monotonic clock as the start anchor.
    ///
    /// Fails if no monotonic source is available.
    pub fn init() -> Result<Self, PlatformError> {
        let anchor = read_monotonic_ns()?;
        Ok(Self {
            start_anchor_ns: anchor,
            now_ms: 0,
        })
    }

    /// Refresh the cached "now" to `platform_monotonic - start_anchor`.
    ///
    /// Fails if the clock read fails.
    pub fn update(&mut self) -> Result<(), PlatformError> {
        let raw = read_monotonic_ns()?;
        let elapsed_ns = raw.saturating_sub(self.start_anchor_ns);
        self.now_ms = elapsed_ns / 1_000_000;
        Ok(())
    }

    /// The cached "now", in milliseconds since the start anchor.
    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// `now() + rel`.
    pub fn absolute(&self, rel: u64) -> u64 {
        self.now_ms.saturating_add(rel)
    }

    /// `deadline - now()`, saturating at 0 if the deadline is in the past.
    pub fn relative(&self, deadline: u64) -> u64 {
        deadline.saturating_sub(self.now_ms)
    }

    /// Format a millisecond duration as `HH:MM:SS.mmm`, saturating (with a
    /// trailing `+`) instead of wrapping past
    /// [`CLOCK_STRING_SATURATION_MS`].
    pub fn to_clock_string(duration_ms: u64) -> String {
        let (ms, saturated) = if duration_ms > CLOCK_STRING_SATURATION_MS {
            (CLOCK_STRING_SATURATION_MS, true)
        } else {
            (duration_ms, false)
        };

        let millis = ms % 1000;
        let total_secs = ms / 1000;
        let secs = total_secs % 60;
        let total_mins = total_secs / 60;
        let mins = total_mins % 60;
        let hours = total_mins / 60;

        let mut s = format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}");
        if saturated {
            s.push('+');
        }
        s
    }
}

#[cfg(not(target_os = "linux"))]
fn read_monotonic_ns() -> Result<u64, PlatformError> {
    use std::time::Instant;
    // Fallback for non-Linux test/build environments: relies on a
    // process-lifetime monotonic instant rather than CLOCK_MONOTONIC.
    thread_local! {
        static START: Instant = Instant::now();
    }
    Ok(START.with(|s| s.elapsed().as_nanos() as u64))
}

#[cfg(target_os = "linux")]
fn read_monotonic_ns() -> Result<u64, PlatformError> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, fully-initialized timespec and CLOCK_MONOTONIC
    // is always a recognized clock id on Linux.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Err(PlatformError::ClockUnavailable(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    let ns = (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64);
    Ok(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_update_is_monotonic() {
        let mut clock = Clock::init().unwrap();
        let t0 = clock.now();
        clock.update().unwrap();
        let t1 = clock.now();
        assert!(t1 >= t0);
    }

    #[test]
    fn absolute_and_relative_round_trip() {
        let mut clock = Clock::init().unwrap();
        clock.update().unwrap();
        let deadline = clock.absolute(500);
        assert!(clock.relative(deadline) <= 500);
    }

    #[test]
    fn relative_saturates_at_zero_in_the_past() {
        let mut clock = Clock::init().unwrap();
        clock.update().unwrap();
        assert_eq!(clock.relative(0), 0);
    }

    #[test]
    fn clock_string_formats_hms() {
        assert_eq!(Clock::to_clock_string(0), "00:00:00.000");
        assert_eq!(Clock::to_clock_string(61_001), "00:01:01.001");
        assert_eq!(Clock::to_clock_string(3_661_000), "01:01:01.000");
    }

    #[test]
    fn clock_string_saturates_instead_of_wrapping() {
        let s = Clock::to_clock_string(u64::MAX);
        assert!(s.ends_with('+'));
    }
}
