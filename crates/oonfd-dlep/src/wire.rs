// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLEP (RFC 8175) signal and data-item wire codec, using the same
//! bounds-checked cursor idiom as `oonfd_core::rfc5444::reader`.
//!
//! A DLEP signal is `signal-type (u16) || length (u16) || data items`; a
//! data item is `item-type (u16) || length (u16) || value`. Every
//! multi-byte integer is network byte order.

use std::fmt;

/// The four-byte magic string every UDP discovery datagram is prefixed
/// with.
pub const DLEP_MAGIC: &[u8; 4] = b"DLEP";

/// IANA well-known DLEP discovery port.
pub const DLEP_DISCOVERY_PORT: u16 = 854;

/// IANA well-known DLEP IPv4 discovery multicast address.
pub const DLEP_DISCOVERY_MC_V4: &str = "224.0.0.117";

/// IANA well-known DLEP IPv6 discovery multicast address.
pub const DLEP_DISCOVERY_MC_V6: &str = "FF02::1E";

/// DLEP signal type codes (IANA "DLEP Signals" registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SignalType(pub u16);

impl SignalType {
    pub const PEER_DISCOVERY: Self = Self(1);
    pub const PEER_OFFER: Self = Self(2);
    pub const SESSION_INITIALIZATION: Self = Self(3);
    pub const SESSION_INITIALIZATION_ACK: Self = Self(4);
    pub const SESSION_UPDATE: Self = Self(5);
    pub const SESSION_UPDATE_RESPONSE: Self = Self(6);
    pub const SESSION_TERMINATION: Self = Self(7);
    pub const SESSION_TERMINATION_RESPONSE: Self = Self(8);
    pub const DESTINATION_UP: Self = Self(9);
    pub const DESTINATION_UP_ACK: Self = Self(10);
    pub const DESTINATION_DOWN: Self = Self(11);
    pub const DESTINATION_DOWN_ACK: Self = Self(12);
    pub const DESTINATION_UPDATE: Self = Self(13);
    pub const LINK_CHARACTERISTICS_REQUEST: Self = Self(14);
    pub const LINK_CHARACTERISTICS_ACK: Self = Self(15);
    pub const HEARTBEAT: Self = Self(16);

    pub fn name(self) -> &'static str {
        match self {
            Self::PEER_DISCOVERY => "Peer-Discovery",
            Self::PEER_OFFER => "Peer-Offer",
            Self::SESSION_INITIALIZATION => "Session-Initialization",
            Self::SESSION_INITIALIZATION_ACK => "Session-Initialization-Ack",
            Self::SESSION_UPDATE => "Session-Update",
            Self::SESSION_UPDATE_RESPONSE => "Session-Update-Response",
            Self::SESSION_TERMINATION => "Session-Termination",
            Self::SESSION_TERMINATION_RESPONSE => "Session-Termination-Response",
            Self::DESTINATION_UP => "Destination-Up",
            Self::DESTINATION_UP_ACK => "Destination-Up-Ack",
            Self::DESTINATION_DOWN => "Destination-Down",
            Self::DESTINATION_DOWN_ACK => "Destination-Down-Ack",
            Self::DESTINATION_UPDATE => "Destination-Update",
            Self::LINK_CHARACTERISTICS_REQUEST => "Link-Characteristics-Request",
            Self::LINK_CHARACTERISTICS_ACK => "Link-Characteristics-Ack",
            Self::HEARTBEAT => "Heartbeat",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// DLEP data item type codes (IANA "DLEP Data Items" registry) plus the
/// Link Identifier (LID) extension item, which occupies a private-use
/// code the local extension registry owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemType(pub u16);

impl ItemType {
    pub const STATUS: Self = Self(1);
    pub const IPV4_CONNECTION_POINT: Self = Self(2);
    pub const IPV6_CONNECTION_POINT: Self = Self(3);
    pub const PEER_TYPE: Self = Self(4);
    pub const HEARTBEAT_INTERVAL: Self = Self(5);
    pub const EXTENSIONS_SUPPORTED: Self = Self(6);
    pub const MAC_ADDRESS: Self = Self(7);
    pub const IPV4_ADDRESS: Self = Self(8);
    pub const IPV4_ATTACHED_SUBNET: Self = Self(9);
    pub const IPV6_ADDRESS: Self = Self(10);
    pub const IPV6_ATTACHED_SUBNET: Self = Self(11);
    pub const MDRR: Self = Self(12);
    pub const MDRT: Self = Self(13);
    pub const CDRR: Self = Self(14);
    pub const CDRT: Self = Self(15);
    pub const LATENCY: Self = Self(16);
    pub const RESOURCES: Self = Self(17);
    pub const RLQR: Self = Self(18);
    pub const RLQT: Self = Self(19);
    pub const MTU: Self = Self(20);
    /// Private-use item carrying the negotiated LID length, present on
    /// Session-Initialization-Ack once the LID extension is active.
    pub const LID_LENGTH: Self = Self(65408);
    /// Private-use item carrying a per-destination LID byte string,
    /// mandatory on every destination signal once LID is negotiated.
    pub const LID: Self = Self(65409);
}

/// DLEP Status data item code (first byte of a Status data item's value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u8);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const UNKNOWN_MESSAGE: Self = Self(1);
    pub const INVALID_DATA: Self = Self(2);
    pub const UNEXPECTED_MESSAGE: Self = Self(3);
    pub const REQUEST_DENIED: Self = Self(4);
    pub const TIMED_OUT: Self = Self(5);
}

/// A decoded or to-be-encoded DLEP data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub item_type: ItemType,
    pub value: Vec<u8>,
}

impl DataItem {
    pub fn new(item_type: ItemType, value: impl Into<Vec<u8>>) -> Self {
        Self { item_type, value: value.into() }
    }

    pub fn status(code: StatusCode, text: &str) -> Self {
        let mut value = vec![code.0];
        value.extend_from_slice(text.as_bytes());
        Self::new(ItemType::STATUS, value)
    }

    pub fn peer_type(name: &str) -> Self {
        Self::new(ItemType::PEER_TYPE, name.as_bytes().to_vec())
    }

    pub fn heartbeat_interval(ms: u32) -> Self {
        // Interval carried in seconds per RFC 8175; the session core keeps
        // milliseconds internally.
        let secs = u16::try_from((ms / 1000).max(1)).unwrap_or(u16::MAX);
        Self::new(ItemType::HEARTBEAT_INTERVAL, secs.to_be_bytes().to_vec())
    }

    pub fn extensions_supported(ids: &[u16]) -> Self {
        let mut value = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            value.extend_from_slice(&id.to_be_bytes());
        }
        Self::new(ItemType::EXTENSIONS_SUPPORTED, value)
    }

    pub fn lid_length(len: u8) -> Self {
        Self::new(ItemType::LID_LENGTH, vec![len])
    }

    pub fn lid(bytes: &[u8]) -> Self {
        Self::new(ItemType::LID, bytes.to_vec())
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.item_type.0.to_be_bytes());
        let len = u16::try_from(self.value.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.value[..len as usize]);
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        if self.item_type == ItemType::STATUS {
            self.value.first().map(|b| StatusCode(*b))
        } else {
            None
        }
    }
}

/// A decoded or to-be-encoded DLEP signal: type plus an ordered list of
/// data items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub signal_type: SignalType,
    pub items: Vec<DataItem>,
}

impl Signal {
    pub fn new(signal_type: SignalType) -> Self {
        Self { signal_type, items: Vec::new() }
    }

    pub fn with_item(mut self, item: DataItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn item(&self, item_type: ItemType) -> Option<&DataItem> {
        self.items.iter().find(|i| i.item_type == item_type)
    }

    /// Serialize signal-type + length + items. Does not include the UDP
    /// magic prefix; callers prepend that for datagrams.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for item in &self.items {
            item.encode(&mut body);
        }
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&self.signal_type.0.to_be_bytes());
        let len = u16::try_from(body.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&body[..len as usize]);
        out
    }

    /// Decode exactly one signal from the front of `buf`, returning the
    /// signal and the number of bytes consumed. Bounds-checked on every
    /// read, mirroring `oonfd_core::rfc5444::reader`'s cursor discipline.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        if buf.len() < 4 {
            return Err(WireError::Truncated { needed: 4, available: buf.len() });
        }
        let signal_type = SignalType(u16::from_be_bytes([buf[0], buf[1]]));
        let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if buf.len() < 4 + len {
            return Err(WireError::Truncated { needed: 4 + len, available: buf.len() });
        }
        let mut items = Vec::new();
        let mut cursor = 0usize;
        let body = &buf[4..4 + len];
        while cursor < body.len() {
            if body.len() - cursor < 4 {
                return Err(WireError::Truncated { needed: 4, available: body.len() - cursor });
            }
            let item_type = ItemType(u16::from_be_bytes([body[cursor], body[cursor + 1]]));
            let item_len = u16::from_be_bytes([body[cursor + 2], body[cursor + 3]]) as usize;
            cursor += 4;
            if body.len() - cursor < item_len {
                return Err(WireError::Truncated { needed: item_len, available: body.len() - cursor });
            }
            items.push(DataItem::new(item_type, body[cursor..cursor + item_len].to_vec()));
            cursor += item_len;
        }
        Ok((Self { signal_type, items }, 4 + len))
    }
}

/// Malformed or truncated DLEP wire data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    Truncated { needed: usize, available: usize },
    BadMagic,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "truncated DLEP signal: needed {needed} bytes, {available} available")
            }
            Self::BadMagic => write!(f, "UDP datagram missing DLEP magic prefix"),
        }
    }
}

impl std::error::Error for WireError {}

/// Strip the four-byte magic prefix from an incoming UDP datagram.
pub fn strip_udp_prefix(buf: &[u8]) -> Result<&[u8], WireError> {
    if buf.len() < DLEP_MAGIC.len() || &buf[..DLEP_MAGIC.len()] != DLEP_MAGIC {
        return Err(WireError::BadMagic);
    }
    Ok(&buf[DLEP_MAGIC.len()..])
}

/// Prepend the four-byte magic prefix for an outgoing UDP datagram.
pub fn with_udp_prefix(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DLEP_MAGIC.len() + body.len());
    out.extend_from_slice(DLEP_MAGIC);
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_round_trips_through_encode_decode() {
        let sig = Signal::new(SignalType::PEER_DISCOVERY).with_item(DataItem::peer_type("oonfd"));
        let bytes = sig.encode();
        let (decoded, consumed) = Signal::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, sig);
    }

    #[test]
    fn decode_reports_truncated_header() {
        let err = Signal::decode(&[0, 1]).unwrap_err();
        assert_eq!(err, WireError::Truncated { needed: 4, available: 2 });
    }

    #[test]
    fn decode_reports_truncated_body() {
        // claims 10 bytes of body, provides none
        let buf = [0u8, 1, 0, 10];
        let err = Signal::decode(&buf).unwrap_err();
        assert_eq!(err, WireError::Truncated { needed: 14, available: 4 });
    }

    #[test]
    fn udp_prefix_round_trips() {
        let body = b"hello";
        let framed = with_udp_prefix(body);
        assert_eq!(strip_udp_prefix(&framed).unwrap(), body);
    }

    #[test]
    fn strip_udp_prefix_rejects_unknown_signature() {
        assert_eq!(strip_udp_prefix(b"XXXXhello").unwrap_err(), WireError::BadMagic);
    }

    #[test]
    fn session_init_ack_carries_lid_length_item() {
        let sig = Signal::new(SignalType::SESSION_INITIALIZATION_ACK)
            .with_item(DataItem::status(StatusCode::SUCCESS, ""))
            .with_item(DataItem::lid_length(6));
        let bytes = sig.encode();
        let (decoded, _) = Signal::decode(&bytes).unwrap();
        assert_eq!(decoded.item(ItemType::LID_LENGTH).unwrap().value, vec![6]);
    }
}
