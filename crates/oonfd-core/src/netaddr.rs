// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Address family-polymorphic network address: a discriminated union over
//! {v4, v6, mac48, eui64, unspec}.

use std::fmt;

/// Maximum address length in bytes (IPv6 / EUI-64).
pub const MAX_ADDR_LEN: usize = 16;

/// A network address carrying its family-tagged bytes and a prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetAddr {
    V4 { bytes: [u8; 4], prefix_len: u8 },
    V6 { bytes: [u8; 16], prefix_len: u8 },
    Mac48 { bytes: [u8; 6] },
    Eui64 { bytes: [u8; 8] },
    Unspec,
}

impl NetAddr {
    pub fn v4(bytes: [u8; 4], prefix_len: u8) -> Self {
        Self::V4 { bytes, prefix_len }
    }

    pub fn v6(bytes: [u8; 16], prefix_len: u8) -> Self {
        Self::V6 { bytes, prefix_len }
    }

    pub fn mac48(bytes: [u8; 6]) -> Self {
        Self::Mac48 { bytes }
    }

    /// The address's wire length in bytes (`addrlen` on the wire).
    pub fn addr_len(&self) -> usize {
        match self {
            Self::V4 { .. } => 4,
            Self::V6 { .. } => 16,
            Self::Mac48 { .. } => 6,
            Self::Eui64 { .. } => 8,
            Self::Unspec => 0,
        }
    }

    /// Address bytes, most significant byte first.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::V4 { bytes, .. } => bytes.as_slice(),
            Self::V6 { bytes, .. } => bytes.as_slice(),
            Self::Mac48 { bytes } => bytes.as_slice(),
            Self::Eui64 { bytes } => bytes.as_slice(),
            Self::Unspec => &[],
        }
    }

    /// Prefix length in bits, if this family carries one.
    pub fn prefix_len(&self) -> Option<u8> {
        match self {
            Self::V4 { prefix_len, .. } | Self::V6 { prefix_len, .. } => Some(*prefix_len),
            _ => None,
        }
    }

    /// Build a `NetAddr` of the given `addr_len` from raw bytes (used when
    /// reconstructing addresses from RFC 5444 address blocks, which only
    /// know the wire length, not the family).
    pub fn from_bytes(addr_len: usize, bytes: &[u8], prefix_len: u8) -> Option<Self> {
        match addr_len {
            0 => Some(Self::Unspec),
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(bytes.get(..4)?);
                Some(Self::v4(b, prefix_len))
            }
            6 => {
                let mut b = [0u8; 6];
                b.copy_from_slice(bytes.get(..6)?);
                Some(Self::mac48(b))
            }
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(bytes.get(..8)?);
                Some(Self::Eui64 { bytes: b })
            }
            16 => {
                let mut b = [0u8; 16];
                b.copy_from_slice(bytes.get(..16)?);
                Some(Self::v6(b, prefix_len))
            }
            _ => None,
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 { bytes, prefix_len } => {
                write!(f, "{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])?;
                if *prefix_len != 32 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
            Self::V6 { bytes, prefix_len } => {
                let groups: Vec<String> = bytes
                    .chunks(2)
                    .map(|c| format!("{:02x}{:02x}", c[0], c[1]))
                    .collect();
                write!(f, "{}", groups.join(":"))?;
                if *prefix_len != 128 {
                    write!(f, "/{prefix_len}")?;
                }
                Ok(())
            }
            Self::Mac48 { bytes } => {
                let parts: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, "{}", parts.join(":"))
            }
            Self::Eui64 { bytes } => {
                let parts: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, "{}", parts.join(":"))
            }
            Self::Unspec => write!(f, "-"),
        }
    }
}
