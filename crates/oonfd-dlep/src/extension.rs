// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLEP extension identifiers and negotiation. Extensions include
//! "base metric", "base IP", "L1 statistics", "L2 statistics", "radio
//! attributes" and "link-identifier (LID)", each registering its id and
//! a data-item list against a shared extension registry.
//!
//! IANA's "DLEP Extension Type Values" registry only reserves a handful
//! of values (Credit Windowing, Multi-Hop Forwarding); the extensions
//! here are local allocations, not IANA-registered ones, so the ids
//! below are this implementation's own private-use allocation.

use std::fmt;

/// A negotiable DLEP extension id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtensionId(pub u16);

impl ExtensionId {
    pub const BASE_METRIC: Self = Self(1);
    pub const BASE_IP: Self = Self(2);
    pub const L1_STATISTICS: Self = Self(3);
    pub const L2_STATISTICS: Self = Self(4);
    pub const RADIO_ATTRIBUTES: Self = Self(5);
    pub const LID: Self = Self(6);

    pub fn name(self) -> &'static str {
        match self {
            Self::BASE_METRIC => "base-metric",
            Self::BASE_IP => "base-ip",
            Self::L1_STATISTICS => "l1-statistics",
            Self::L2_STATISTICS => "l2-statistics",
            Self::RADIO_ATTRIBUTES => "radio-attributes",
            Self::LID => "lid",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ExtensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// The full set of extensions this implementation knows how to speak,
/// in the order a Session-Initialization / -Ack Extensions-Supported
/// data item lists them.
pub const ALL_EXTENSIONS: &[ExtensionId] = &[
    ExtensionId::BASE_METRIC,
    ExtensionId::BASE_IP,
    ExtensionId::L1_STATISTICS,
    ExtensionId::L2_STATISTICS,
    ExtensionId::RADIO_ATTRIBUTES,
    ExtensionId::LID,
];

/// Intersect a locally supported extension list with a peer-advertised
/// one, preserving local order.
pub fn negotiate(local: &[ExtensionId], peer_advertised: &[u16]) -> Vec<ExtensionId> {
    local.iter().copied().filter(|ext| peer_advertised.contains(&ext.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_keeps_local_order_and_drops_unsupported() {
        let peer = vec![ExtensionId::LID.0, ExtensionId::BASE_METRIC.0, 9999];
        let negotiated = negotiate(ALL_EXTENSIONS, &peer);
        assert_eq!(negotiated, vec![ExtensionId::BASE_METRIC, ExtensionId::LID]);
    }

    #[test]
    fn negotiate_is_empty_when_no_overlap() {
        assert!(negotiate(ALL_EXTENSIONS, &[9999]).is_empty());
    }
}
