// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLEP session state machine, built around a `restrict_signal` handshake
//! gate: while a session is mid-handshake only one signal type is
//! accepted and any other causes an immediate Session-Termination.
//!
//! One `Session` value plays both roles: the interface-embedded UDP
//! discovery session and a per-remote TCP session held in the
//! interface's session tree. Which role a given `Session` is playing is
//! a property of how it is driven (the discovery session never receives
//! a TCP-only signal), not a separate type.

use std::collections::HashMap;

use oonfd_core::error::SessionError;

use crate::extension::{negotiate, ExtensionId, ALL_EXTENSIONS};
use crate::wire::{DataItem, ItemType, Signal, SignalType, StatusCode};

/// The DLEP peer state machine's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    NotConnected,
    Initialisation,
    Initialised,
    Terminated,
}

/// A link identifier, opaque bytes of the negotiated length.
pub type Lid = Vec<u8>;

/// What the caller (interface/transport glue) must do after feeding a
/// signal to [`Session::on_signal`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionAction {
    /// Signal to send back to the peer, if any.
    pub reply: Option<Signal>,
    /// Set once the session has moved to [`PeerState::Terminated`]; the
    /// caller should invoke its `cb_end_session` equivalent and tear the
    /// transport down.
    pub ended: bool,
}

impl SessionAction {
    fn reply(signal: Signal) -> Self {
        Self { reply: Some(signal), ended: false }
    }
    fn terminated(signal: Signal) -> Self {
        Self { reply: Some(signal), ended: true }
    }
    fn none() -> Self {
        Self::default()
    }
}

/// DLEP session core.
pub struct Session {
    pub radio: bool,
    pub peer_type: String,
    pub heartbeat_interval_ms: u64,
    pub configured_lid_length: u8,
    pub max_lid_length: u8,
    pub state: PeerState,
    /// The single signal type currently acceptable; `None` once
    /// [`PeerState::Initialised`] is reached.
    restrict_signal: Option<SignalType>,
    pub negotiated_extensions: Vec<ExtensionId>,
    pub negotiated_lid_length: Option<u8>,
    /// (MAC, LID) -> neighbor lookup key, populated from Destination-Up
    /// signals once LID is negotiated.
    lid_table: HashMap<([u8; 6], Lid), ()>,
    last_heartbeat_sent_ms: u64,
    last_activity_ms: u64,
}

impl Session {
    /// Construct the interface-embedded discovery-role session: radio
    /// restricts to Peer-Discovery, router to Peer-Offer.
    pub fn new_discovery(radio: bool, peer_type: String, heartbeat_interval_ms: u64, lid_length: u8) -> Self {
        Self {
            radio,
            peer_type,
            heartbeat_interval_ms,
            configured_lid_length: lid_length,
            max_lid_length: crate::MAX_LID_LENGTH,
            state: PeerState::NotConnected,
            restrict_signal: Some(if radio { SignalType::PEER_DISCOVERY } else { SignalType::PEER_OFFER }),
            negotiated_extensions: Vec::new(),
            negotiated_lid_length: None,
            lid_table: HashMap::new(),
            last_heartbeat_sent_ms: 0,
            last_activity_ms: 0,
        }
    }

    /// Construct a per-remote TCP session after a Peer-Offer was
    /// accepted (router) or a TCP connection was accepted (radio).
    pub fn new_tcp(radio: bool, peer_type: String, heartbeat_interval_ms: u64, lid_length: u8, now: u64) -> Self {
        let mut s = Self::new_discovery(radio, peer_type, heartbeat_interval_ms, lid_length);
        s.state = PeerState::Initialisation;
        s.restrict_signal =
            Some(if radio { SignalType::SESSION_INITIALIZATION } else { SignalType::SESSION_INITIALIZATION_ACK });
        s.last_activity_ms = now;
        s
    }

    pub fn is_terminated(&self) -> bool {
        self.state == PeerState::Terminated
    }

    /// Router side: build the first signal of the TCP handshake, sent
    /// immediately once the connection completes.
    pub fn build_session_init(&self) -> Signal {
        Signal::new(SignalType::SESSION_INITIALIZATION)
            .with_item(DataItem::heartbeat_interval(self.heartbeat_interval_ms as u32))
            .with_item(DataItem::peer_type(&self.peer_type))
            .with_item(DataItem::extensions_supported(
                &ALL_EXTENSIONS.iter().map(|e| e.0).collect::<Vec<_>>(),
            ))
    }

    /// Router side: the periodic Peer-Discovery signal.
    pub fn build_peer_discovery(&self) -> Signal {
        Signal::new(SignalType::PEER_DISCOVERY).with_item(DataItem::peer_type(&self.peer_type))
    }

    /// Record that activity (any accepted signal) happened at `now`, for
    /// heartbeat-loss detection.
    fn touch(&mut self, now: u64) {
        self.last_activity_ms = now;
    }

    /// Whether no Heartbeat (or other signal) has arrived within 2x the
    /// negotiated heartbeat interval.
    pub fn heartbeat_lost(&self, now: u64) -> bool {
        self.state == PeerState::Initialised
            && now.saturating_sub(self.last_activity_ms) >= 2 * self.heartbeat_interval_ms
    }

    /// Whether it is time to send another Heartbeat.
    pub fn heartbeat_due(&self, now: u64) -> bool {
        self.state == PeerState::Initialised
            && now.saturating_sub(self.last_heartbeat_sent_ms) >= self.heartbeat_interval_ms
    }

    pub fn build_heartbeat(&mut self, now: u64) -> Signal {
        self.last_heartbeat_sent_ms = now;
        Signal::new(SignalType::HEARTBEAT)
    }

    pub fn build_termination(&mut self, reason: &str) -> Signal {
        self.state = PeerState::Terminated;
        Signal::new(SignalType::SESSION_TERMINATION).with_item(DataItem::status(StatusCode::UNEXPECTED_MESSAGE, reason))
    }

    /// Record a (MAC, LID) pair from an accepted Destination-Up.
    pub fn remember_lid(&mut self, mac: [u8; 6], lid: Lid) {
        self.lid_table.insert((mac, lid), ());
    }

    pub fn knows_lid(&self, mac: [u8; 6], lid: &[u8]) -> bool {
        self.lid_table.contains_key(&(mac, lid.to_vec()))
    }

    /// Feed one received signal through the state machine. Returns the
    /// action the transport layer should take.
    pub fn on_signal(&mut self, now: u64, signal: &Signal) -> Result<SessionAction, SessionError> {
        if self.state == PeerState::Terminated {
            return Ok(SessionAction::none());
        }

        if let Some(expected) = self.restrict_signal {
            if signal.signal_type != expected {
                // Any signal other than `restrict_signal` causes an immediate
                // Session-Termination (SessionError::UnexpectedSignal names
                // the condition; the wire-visible effect is this signal).
                let term = self.build_termination("unexpected signal");
                return Ok(SessionAction::terminated(term));
            }
        }

        self.touch(now);

        match (self.state, signal.signal_type) {
            (PeerState::NotConnected, SignalType::PEER_DISCOVERY) if self.radio => {
                let offer = Signal::new(SignalType::PEER_OFFER).with_item(DataItem::peer_type(&self.peer_type));
                Ok(SessionAction::reply(offer))
            }
            (PeerState::NotConnected, SignalType::PEER_OFFER) if !self.radio => {
                // Router: open TCP to the offered endpoint. That socket
                // action lives in `interface`; here we just note the
                // session is moving into the handshake.
                self.state = PeerState::Initialisation;
                self.restrict_signal = Some(SignalType::SESSION_INITIALIZATION_ACK);
                Ok(SessionAction::none())
            }
            (PeerState::Initialisation, SignalType::SESSION_INITIALIZATION) if self.radio => {
                let peer_exts = extensions_supported_of(signal);
                if let Some(requested_len) = lid_length_requested(signal) {
                    if requested_len > self.max_lid_length {
                        // An LID length larger than the implementation maximum
                        // forces Session-Termination with status "request
                        // denied" (SessionError::LidLengthDenied is the
                        // caller-facing kind; the wire reply is the
                        // termination signal itself).
                        let term = Signal::new(SignalType::SESSION_TERMINATION)
                            .with_item(DataItem::status(StatusCode::REQUEST_DENIED, "lid length"));
                        self.state = PeerState::Terminated;
                        return Ok(SessionAction::terminated(term));
                    }
                }
                self.negotiated_extensions = negotiate(ALL_EXTENSIONS, &peer_exts);
                let mut ack = Signal::new(SignalType::SESSION_INITIALIZATION_ACK)
                    .with_item(DataItem::status(StatusCode::SUCCESS, ""))
                    .with_item(DataItem::peer_type(&self.peer_type))
                    .with_item(DataItem::extensions_supported(
                        &self.negotiated_extensions.iter().map(|e| e.0).collect::<Vec<_>>(),
                    ));
                if self.negotiated_extensions.contains(&ExtensionId::LID) {
                    self.negotiated_lid_length = Some(self.configured_lid_length);
                    ack = ack.with_item(DataItem::lid_length(self.configured_lid_length));
                }
                self.state = PeerState::Initialised;
                self.restrict_signal = None;
                Ok(SessionAction::reply(ack))
            }
            (PeerState::Initialisation, SignalType::SESSION_INITIALIZATION_ACK) if !self.radio => {
                if signal.item(ItemType::STATUS).and_then(DataItem::status_code) != Some(StatusCode::SUCCESS) {
                    let term = self.build_termination("peer rejected session initialization");
                    return Ok(SessionAction::terminated(term));
                }
                let peer_exts = extensions_supported_of(signal);
                self.negotiated_extensions = negotiate(ALL_EXTENSIONS, &peer_exts);
                if self.negotiated_extensions.contains(&ExtensionId::LID) {
                    self.negotiated_lid_length = signal.item(ItemType::LID_LENGTH).and_then(|i| i.value.first().copied());
                }
                self.state = PeerState::Initialised;
                self.restrict_signal = None;
                Ok(SessionAction::none())
            }
            (PeerState::Initialised, SignalType::HEARTBEAT) => Ok(SessionAction::none()),
            (PeerState::Initialised, SignalType::SESSION_TERMINATION) => {
                self.state = PeerState::Terminated;
                let ack = Signal::new(SignalType::SESSION_TERMINATION_RESPONSE);
                Ok(SessionAction::terminated(ack))
            }
            (PeerState::Initialised, _) => Ok(SessionAction::none()),
            _ => {
                let term = self.build_termination("unexpected signal for current state");
                Ok(SessionAction::terminated(term))
            }
        }
    }
}

fn extensions_supported_of(signal: &Signal) -> Vec<u16> {
    signal
        .item(ItemType::EXTENSIONS_SUPPORTED)
        .map(|item| item.value.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
        .unwrap_or_default()
}

fn lid_length_requested(signal: &Signal) -> Option<u8> {
    signal.item(ItemType::LID_LENGTH).and_then(|i| i.value.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radio_replies_peer_offer_to_peer_discovery() {
        let mut session = Session::new_discovery(true, "oonfd".into(), 5000, 4);
        let discovery = Signal::new(SignalType::PEER_DISCOVERY).with_item(DataItem::peer_type("router"));
        let action = session.on_signal(0, &discovery).unwrap();
        assert_eq!(action.reply.unwrap().signal_type, SignalType::PEER_OFFER);
        assert!(!action.ended);
    }

    #[test]
    fn router_moves_to_initialisation_on_peer_offer() {
        let mut session = Session::new_discovery(false, "oonfd".into(), 5000, 4);
        let offer = Signal::new(SignalType::PEER_OFFER).with_item(DataItem::peer_type("radio"));
        session.on_signal(0, &offer).unwrap();
        assert_eq!(session.state, PeerState::Initialisation);
    }

    #[test]
    fn full_handshake_negotiates_lid_and_reaches_initialised() {
        let mut router = Session::new_tcp(false, "router".into(), 5000, 6, 0);
        let mut radio = Session::new_tcp(true, "radio".into(), 5000, 6, 0);

        let init = router.build_session_init();
        let radio_action = radio.on_signal(0, &init).unwrap();
        assert_eq!(radio.state, PeerState::Initialised);
        let ack = radio_action.reply.unwrap();
        assert_eq!(ack.signal_type, SignalType::SESSION_INITIALIZATION_ACK);

        let router_action = router.on_signal(0, &ack).unwrap();
        assert!(router_action.reply.is_none());
        assert_eq!(router.state, PeerState::Initialised);
        assert_eq!(router.negotiated_lid_length, Some(6));
        assert_eq!(radio.negotiated_lid_length, Some(6));
    }

    #[test]
    fn unexpected_signal_terminates_session() {
        let mut session = Session::new_tcp(true, "radio".into(), 5000, 4, 0);
        let wrong = Signal::new(SignalType::HEARTBEAT);
        let action = session.on_signal(0, &wrong).unwrap();
        assert!(action.ended);
        assert_eq!(session.state, PeerState::Terminated);
    }

    #[test]
    fn lid_length_over_maximum_is_denied() {
        let mut radio = Session::new_tcp(true, "radio".into(), 5000, 4, 0);
        let init = Signal::new(SignalType::SESSION_INITIALIZATION)
            .with_item(DataItem::peer_type("router"))
            .with_item(DataItem::lid_length(255))
            .with_item(DataItem::extensions_supported(&[ExtensionId::LID.0]));
        let action = radio.on_signal(0, &init).unwrap();
        assert!(action.ended);
    }

    #[test]
    fn heartbeat_loss_detected_after_two_intervals() {
        let mut session = Session::new_tcp(true, "radio".into(), 1000, 4, 0);
        session.state = PeerState::Initialised;
        session.restrict_signal = None;
        assert!(!session.heartbeat_lost(1500));
        assert!(session.heartbeat_lost(2500));
    }

    #[test]
    fn session_termination_acks_and_ends() {
        let mut session = Session::new_tcp(true, "radio".into(), 1000, 4, 0);
        session.state = PeerState::Initialised;
        session.restrict_signal = None;
        let term = Signal::new(SignalType::SESSION_TERMINATION);
        let action = session.on_signal(100, &term).unwrap();
        assert!(action.ended);
        assert_eq!(action.reply.unwrap().signal_type, SignalType::SESSION_TERMINATION_RESPONSE);
    }
}
