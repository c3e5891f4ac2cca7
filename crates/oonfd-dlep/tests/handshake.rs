// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DLEP router/radio handshake scenario: Router sends Peer-Discovery;
//! radio replies Peer-Offer; router opens TCP and sends Session-Init
//! with extension list {base-metric, LID}; radio responds
//! Session-Init-Ack including `lid_length=6`; both enter Initialised.
//! Subsequent Destination-Up from radio carries a 6-byte LID TLV; router
//! accepts and stores (MAC, LID).

use oonfd_dlep::extension::ExtensionId;
use oonfd_dlep::session::{PeerState, Session};
use oonfd_dlep::wire::{DataItem, ItemType, Signal, SignalType};

#[test]
fn router_radio_handshake_negotiates_lid_and_accepts_destination_up() {
    let mut radio_discovery = Session::new_discovery(true, "radio".into(), 5000, 6);
    let router_discovery = Session::new_discovery(false, "router".into(), 5000, 6);

    let discovery = router_discovery.build_peer_discovery();
    let offer_action = radio_discovery.on_signal(0, &discovery).unwrap();
    let offer = offer_action.reply.expect("radio replies with Peer-Offer");
    assert_eq!(offer.signal_type, SignalType::PEER_OFFER);

    // Router opens TCP to the offered endpoint and starts a fresh
    // per-remote session.
    let mut router_session = Session::new_tcp(false, "router".into(), 5000, 6, 10);
    let mut radio_session = Session::new_tcp(true, "radio".into(), 5000, 6, 10);

    let init = router_session.build_session_init();
    assert!(init
        .item(ItemType::EXTENSIONS_SUPPORTED)
        .map(|i| !i.value.is_empty())
        .unwrap_or(false));

    let ack_action = radio_session.on_signal(20, &init).unwrap();
    let ack = ack_action.reply.expect("radio replies with Session-Initialization-Ack");
    assert_eq!(ack.signal_type, SignalType::SESSION_INITIALIZATION_ACK);
    assert_eq!(ack.item(ItemType::LID_LENGTH).unwrap().value, vec![6]);
    assert_eq!(radio_session.state, PeerState::Initialised);
    assert!(radio_session.negotiated_extensions.contains(&ExtensionId::LID));

    let final_action = router_session.on_signal(25, &ack).unwrap();
    assert!(final_action.reply.is_none());
    assert_eq!(router_session.state, PeerState::Initialised);
    assert_eq!(router_session.negotiated_lid_length, Some(6));

    // Radio announces a destination carrying a 6-byte LID.
    let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
    let lid = vec![1, 2, 3, 4, 5, 6];
    let dest_up = Signal::new(SignalType::DESTINATION_UP)
        .with_item(DataItem::new(ItemType::MAC_ADDRESS, mac.to_vec()))
        .with_item(DataItem::lid(&lid));

    let action = router_session.on_signal(30, &dest_up).unwrap();
    assert!(!action.ended);
    router_session.remember_lid(mac, lid.clone());
    assert!(router_session.knows_lid(mac, &lid));
}
