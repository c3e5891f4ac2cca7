// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error kinds shared across the core.
//!
//! Parsing errors drop the minimal scope (address / message / packet) named
//! by the error and the caller continues; composition errors abandon the
//! in-flight message and keep the previously flushed prefix; session errors
//! close exactly one session; platform errors never crash the process.

use std::fmt;

/// Malformed or truncated RFC 5444 wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes remained than the field being read requires.
    Truncated { needed: usize, available: usize },
    /// Packet header version field was not 0.
    UnknownVersion(u8),
    /// A TLV or address-block flag combination is not permitted by RFC 5444.
    IllegalFlags { context: &'static str, flags: u8 },
    /// Declared total length did not match the bytes actually consumed.
    LengthMismatch { declared: usize, actual: usize },
    /// An address block declared zero addresses.
    EmptyAddressBlock,
    /// A TLV or address prefix length exceeded `addrlen * 8`.
    PrefixOverrun { prefix_len: u8, max_bits: u16 },
    /// A non-repeatable TLV type appeared more than once in one TLV block.
    DuplicateTlv(u8),
    /// A multi-index TLV referenced an address index past the address block.
    IndexOutOfRange { index: u8, block_len: u8 },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated input: needed {needed} bytes, {available} available")
            }
            Self::UnknownVersion(v) => write!(f, "unknown packet version {v} (expected 0)"),
            Self::IllegalFlags { context, flags } => {
                write!(f, "illegal flag combination 0x{flags:02x} in {context}")
            }
            Self::LengthMismatch { declared, actual } => {
                write!(f, "declared length {declared} does not match actual {actual}")
            }
            Self::EmptyAddressBlock => write!(f, "address block declares zero addresses"),
            Self::PrefixOverrun { prefix_len, max_bits } => {
                write!(f, "prefix length {prefix_len} exceeds {max_bits} bits")
            }
            Self::DuplicateTlv(t) => write!(f, "non-repeatable TLV type {t} appeared twice"),
            Self::IndexOutOfRange { index, block_len } => {
                write!(f, "TLV index {index} out of range for block of {block_len} addresses")
            }
        }
    }
}

impl std::error::Error for WireError {}

/// A local signature policy decision on an inbound message or packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// Continue parsing, ignoring this signature's verdict.
    Skip,
    /// Drop the message or packet outright.
    Drop,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "signature policy: skip"),
            Self::Drop => write!(f, "signature policy: drop"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// Composition-time resource exhaustion or platform primitive failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Out of memory composing pending address/TLV lists for a message.
    OutOfMemory,
    /// File descriptor creation failed.
    FdCreation(String),
    /// No random source was available to seed timer jitter.
    RandomUnavailable,
    /// A provider-declared message is larger than every registered target MTU.
    MessageTooLarge { message_bytes: usize, mtu: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory composing message"),
            Self::FdCreation(msg) => write!(f, "file descriptor creation failed: {msg}"),
            Self::RandomUnavailable => write!(f, "random source unavailable"),
            Self::MessageTooLarge { message_bytes, mtu } => {
                write!(f, "message of {message_bytes} bytes exceeds target MTU {mtu}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Operating-system adapter failure (clock, socket, ioctl).
///
/// Logged at warn and the caller's operation aborts; the failing subsystem
/// marks itself degraded. Never crashes the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The monotonic clock source could not be read.
    ClockUnavailable(String),
    /// Binding a socket to a local address failed.
    SocketBind(String),
    /// An ioctl (tunnel install, interface query) failed.
    Ioctl(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClockUnavailable(msg) => write!(f, "clock read failed: {msg}"),
            Self::SocketBind(msg) => write!(f, "socket bind failed: {msg}"),
            Self::Ioctl(msg) => write!(f, "ioctl failed: {msg}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// DLEP session-layer failure. Always terminates exactly one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A signal arrived that `restrict_signal` did not name as acceptable.
    UnexpectedSignal { expected: &'static str, got: &'static str },
    /// No Heartbeat arrived within twice the negotiated heartbeat interval.
    HeartbeatLost,
    /// Peer proposed an extension set incompatible with ours.
    IncompatibleExtension(u16),
    /// An RFC 7182 ICV failed to validate.
    IcvMismatch,
    /// Peer requested an LID length above the implementation maximum.
    LidLengthDenied { requested: u8, max: u8 },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedSignal { expected, got } => {
                write!(f, "unexpected signal {got}, expected {expected}")
            }
            Self::HeartbeatLost => write!(f, "heartbeat lost"),
            Self::IncompatibleExtension(id) => write!(f, "incompatible extension {id}"),
            Self::IcvMismatch => write!(f, "icv-mismatch"),
            Self::LidLengthDenied { requested, max } => {
                write!(f, "requested LID length {requested} exceeds maximum {max}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Umbrella error for call sites that can surface any core error kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Wire(WireError),
    Policy(PolicyError),
    Resource(ResourceError),
    Platform(PlatformError),
    Session(SessionError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire(e) => write!(f, "{e}"),
            Self::Policy(e) => write!(f, "{e}"),
            Self::Resource(e) => write!(f, "{e}"),
            Self::Platform(e) => write!(f, "{e}"),
            Self::Session(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<WireError> for CoreError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}
impl From<PolicyError> for CoreError {
    fn from(e: PolicyError) -> Self {
        Self::Policy(e)
    }
}
impl From<ResourceError> for CoreError {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}
impl From<PlatformError> for CoreError {
    fn from(e: PlatformError) -> Self {
        Self::Platform(e)
    }
}
impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        Self::Session(e)
    }
}
