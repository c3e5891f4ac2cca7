// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

//! Writer/reader hot-path benchmarks for the RFC 5444 codec: message
//! composition with address compression, and the matching packet parse.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use oonfd_core::netaddr::NetAddr;
use oonfd_core::rfc5444::{
    compose_message, ConsumerResult, MessageBuilder, MessageConsumer, MessageProvider,
    PacketReader, PacketWriter,
};

struct HelloProvider {
    neighbor_count: usize,
}

impl MessageProvider for HelloProvider {
    fn msg_type(&self) -> u8 {
        1
    }

    fn add_message_header(&mut self, msg: &mut MessageBuilder) {
        msg.set_hop_limit(1);
        msg.set_seqno(1);
    }

    fn add_addresses(&mut self, msg: &mut MessageBuilder) {
        for i in 0..self.neighbor_count {
            let last = (i % 254) as u8 + 1;
            let handle = msg.add_address(NetAddr::v4([10, 0, 0, last], 32), true);
            msg.add_addrtlv(handle, 2, &[0x01], false);
        }
    }
}

struct CountingConsumer {
    addresses: usize,
}

impl MessageConsumer for CountingConsumer {
    fn address(&mut self, _addr: &NetAddr, _tlvs: &[oonfd_core::rfc5444::ParsedTlv<'_>]) -> ConsumerResult {
        self.addresses += 1;
        ConsumerResult::Okay
    }
}

fn bench_compose_hello(c: &mut Criterion) {
    let mut group = c.benchmark_group("rfc5444_compose");
    for neighbors in [1usize, 8, 32, 128] {
        group.throughput(Throughput::Elements(neighbors as u64));
        group.bench_with_input(
            BenchmarkId::new("hello_neighbors", neighbors),
            &neighbors,
            |b, &neighbors| {
                b.iter(|| {
                    let mut provider = HelloProvider { neighbor_count: neighbors };
                    let message = compose_message(&mut provider, 4, 1500, &mut []).unwrap();
                    black_box(message);
                });
            },
        );
    }
    group.finish();
}

fn bench_write_packets(c: &mut Criterion) {
    let mut provider = HelloProvider { neighbor_count: 32 };
    let message = compose_message(&mut provider, 4, 1500, &mut []).unwrap();
    let writer = PacketWriter::new(1500);

    c.bench_function("rfc5444_write_packets_32_neighbors", |b| {
        b.iter(|| {
            let packets = writer.write_packets(black_box(&[message.clone()]), Some(1)).unwrap();
            black_box(packets);
        });
    });
}

fn bench_parse_packet(c: &mut Criterion) {
    let mut provider = HelloProvider { neighbor_count: 32 };
    let message = compose_message(&mut provider, 4, 1500, &mut []).unwrap();
    let writer = PacketWriter::new(1500);
    let packets = writer.write_packets(&[message], Some(1)).unwrap();
    let packet = &packets[0];

    c.bench_function("rfc5444_parse_packet_32_neighbors", |b| {
        b.iter(|| {
            let mut reader = PacketReader::new();
            reader.add_message_consumer(Box::new(CountingConsumer { addresses: 0 }));
            reader.parse(black_box(packet)).unwrap();
        });
    });
}

criterion_group!(codec_benches, bench_compose_hello, bench_write_packets, bench_parse_packet);
criterion_main!(codec_benches);
