// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-module wire codec scenarios: a packet writer feeding a real
//! packet reader, exercising properties that span `rfc5444::writer` and
//! `rfc5444::reader` rather than either in isolation.

use std::cell::RefCell;
use std::rc::Rc;

use oonfd_core::netaddr::NetAddr;
use oonfd_core::rfc5444::{
    compose_message, ConsumerResult, MessageBuilder, MessageConsumer, MessageHeader,
    MessageProvider, PacketReader, ParsedTlv, PacketWriter,
};

/// An empty packet (no messages queued) is exactly one zero byte: version
/// 0, no packet flags set, no sequence number.
#[test]
fn empty_packet_is_exactly_one_zero_byte() {
    let writer = PacketWriter::new(1500);
    let packets = writer.write_packets(&[], None).unwrap();
    assert_eq!(packets, vec![vec![0x00]]);

    let mut reader = PacketReader::new();
    reader.parse(&packets[0]).unwrap();
}

struct ThreeAddressProvider;

impl MessageProvider for ThreeAddressProvider {
    fn msg_type(&self) -> u8 {
        1
    }
    fn add_message_header(&mut self, _msg: &mut MessageBuilder) {}
    fn add_addresses(&mut self, msg: &mut MessageBuilder) {
        for last in [101u8, 102, 103] {
            let h = msg.add_address(NetAddr::v4([10, 1, 0, last], 32), true);
            msg.add_addrtlv(h, 3, &[0x01], false);
        }
    }
}

struct RecordingConsumer {
    seen: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
}

impl MessageConsumer for RecordingConsumer {
    fn start(&mut self, _header: &MessageHeader<'_>) -> ConsumerResult {
        ConsumerResult::Okay
    }
    fn address(&mut self, addr: &NetAddr, tlvs: &[ParsedTlv<'_>]) -> ConsumerResult {
        let value = tlvs
            .iter()
            .find(|t| t.tlv_type == 3)
            .and_then(|t| t.value)
            .unwrap_or(&[])
            .to_vec();
        self.seen.borrow_mut().push((addr.to_string(), value));
        ConsumerResult::Okay
    }
}

/// Three addresses sharing a prefix compress into one address block on
/// the wire, and a real reader recovers the same (address, TLV-value)
/// pairs the provider contributed, independent of on-wire order (spec
/// universal property: address compression is lossless).
#[test]
fn three_addresses_compress_and_round_trip_through_reader() {
    let mut provider = ThreeAddressProvider;
    let message = compose_message(&mut provider, 4, 1500, &mut []).unwrap();

    let writer = PacketWriter::new(1500);
    let packets = writer.write_packets(&[message], None).unwrap();
    assert_eq!(packets.len(), 1);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let mut reader = PacketReader::new();
    reader.add_message_consumer(Box::new(RecordingConsumer { seen: seen.clone() }));
    reader.parse(&packets[0]).unwrap();

    let mut got = seen.borrow().clone();
    got.sort();
    let mut want = vec![
        ("10.1.0.101".to_string(), vec![0x01]),
        ("10.1.0.102".to_string(), vec![0x01]),
        ("10.1.0.103".to_string(), vec![0x01]),
    ];
    want.sort();
    assert_eq!(got, want);
}

struct HeaderFieldProvider;

impl MessageProvider for HeaderFieldProvider {
    fn msg_type(&self) -> u8 {
        2
    }
    fn add_message_header(&mut self, msg: &mut MessageBuilder) {
        msg.set_originator(NetAddr::v4([192, 168, 0, 1], 32));
        msg.set_hop_limit(5);
        msg.set_hop_count(1);
        msg.set_seqno(42);
    }
}

struct HeaderFieldConsumer {
    seen: Rc<RefCell<Option<(NetAddr, u8, u8, u16)>>>,
}

impl MessageConsumer for HeaderFieldConsumer {
    fn start(&mut self, header: &MessageHeader<'_>) -> ConsumerResult {
        *self.seen.borrow_mut() = Some((
            header.originator.unwrap(),
            header.hop_limit.unwrap(),
            header.hop_count.unwrap(),
            header.seqno.unwrap(),
        ));
        ConsumerResult::Okay
    }
}

/// Optional message header fields (originator, hop-limit, hop-count,
/// sequence number) round-trip through a packet write/parse cycle.
#[test]
fn optional_message_header_fields_round_trip() {
    let mut provider = HeaderFieldProvider;
    let message = compose_message(&mut provider, 4, 1500, &mut []).unwrap();

    let writer = PacketWriter::new(1500);
    let packets = writer.write_packets(&[message], Some(7)).unwrap();

    let seen = Rc::new(RefCell::new(None));
    let mut reader = PacketReader::new();
    reader.add_message_consumer(Box::new(HeaderFieldConsumer { seen: seen.clone() }));
    reader.parse(&packets[0]).unwrap();

    let (originator, hop_limit, hop_count, seqno) = seen.borrow().unwrap();
    assert_eq!(originator, NetAddr::v4([192, 168, 0, 1], 32));
    assert_eq!(hop_limit, 5);
    assert_eq!(hop_count, 1);
    assert_eq!(seqno, 42);
}

/// A packet sequence number, when requested, round-trips to the reader's
/// packet header.
#[test]
fn packet_sequence_number_round_trips() {
    let writer = PacketWriter::new(1500);
    let packets = writer.write_packets(&[], Some(0xabcd)).unwrap();

    struct SeqnoConsumer {
        seen: Rc<RefCell<Option<u16>>>,
    }
    impl oonfd_core::rfc5444::PacketConsumer for SeqnoConsumer {
        fn start(&mut self, header: &oonfd_core::rfc5444::PacketHeader) -> ConsumerResult {
            *self.seen.borrow_mut() = header.seqno;
            ConsumerResult::Okay
        }
    }

    let seen = Rc::new(RefCell::new(None));
    let mut reader = PacketReader::new();
    reader.add_packet_consumer(Box::new(SeqnoConsumer { seen: seen.clone() }));
    reader.parse(&packets[0]).unwrap();
    assert_eq!(*seen.borrow(), Some(0xabcd));
}
