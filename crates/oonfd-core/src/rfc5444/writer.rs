// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 5444 packet writer: content providers contribute a message's
//! header fields, TLVs and addresses; the writer orders the accumulated
//! addresses, splits them into compression runs, coalesces address TLVs
//! per run, then serializes, fragmenting across an MTU and running
//! signing hooks before each message's length is back-patched.
//!
//! Addresses are sorted lexicographically, then greedily split into runs
//! (each emitted as its own address block): an address joins the
//! current run only while doing so still leaves the run with a shared
//! head or tail to compress; once an address shares neither with the run
//! it's appended to, it instead starts a new run. A message with one
//! homogeneous set of addresses (the common HELLO/TC case) still
//! collapses to a single block; heterogeneous contributions split
//! instead of forcing a head/tail-less encoding across the whole set.

use crate::error::{ResourceError, WireError};
use crate::netaddr::NetAddr;

use super::tlv::{
    write_tlv, ADDR_FLAG_HAS_FULL_TAIL, ADDR_FLAG_HAS_HEAD, ADDR_FLAG_HAS_MULTI_PLEN,
    ADDR_FLAG_HAS_SINGLE_PLEN, ADDR_FLAG_HAS_ZERO_TAIL, MSG_FLAG_HAS_HOPCOUNT,
    MSG_FLAG_HAS_HOPLIMIT, MSG_FLAG_HAS_ORIGINATOR, MSG_FLAG_HAS_SEQNO, PKT_FLAG_HAS_SEQNO,
    PKT_FLAG_HAS_TLV,
};

/// A handle to an address contributed via [`MessageBuilder::add_address`],
/// used to later attach TLVs to it with [`MessageBuilder::add_addrtlv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressHandle(usize);

#[derive(Debug, Clone)]
struct TlvSpec {
    tlv_type: u8,
    type_ext: Option<u8>,
    value: Option<Vec<u8>>,
}

struct AddrEntry {
    addr: NetAddr,
    mandatory: bool,
}

struct AddrTlvEntry {
    handle: AddressHandle,
    spec: TlvSpec,
    allow_multivalue: bool,
}

/// Accumulates one message's contributed header fields, TLVs and
/// addresses as content providers run.
#[derive(Default)]
pub struct MessageBuilder {
    originator: Option<NetAddr>,
    hop_limit: Option<u8>,
    hop_count: Option<u8>,
    seqno: Option<u16>,
    message_tlvs: Vec<TlvSpec>,
    addresses: Vec<AddrEntry>,
    addr_tlvs: Vec<AddrTlvEntry>,
    icv_reservation: Option<(u8, usize)>,
}

impl MessageBuilder {
    pub fn set_originator(&mut self, addr: NetAddr) {
        self.originator = Some(addr);
    }

    pub fn set_hop_limit(&mut self, v: u8) {
        self.hop_limit = Some(v);
    }

    pub fn set_hop_count(&mut self, v: u8) {
        self.hop_count = Some(v);
    }

    pub fn set_seqno(&mut self, v: u16) {
        self.seqno = Some(v);
    }

    pub fn add_message_tlv(&mut self, tlv_type: u8, type_ext: Option<u8>, value: Option<&[u8]>) {
        self.message_tlvs.push(TlvSpec {
            tlv_type,
            type_ext,
            value: value.map(<[u8]>::to_vec),
        });
    }

    /// Reserve a fixed-size, zero-filled message TLV that a signing
    /// post-processor will overwrite in place once the rest of the
    /// message is serialized.
    pub fn reserve_icv_tlv(&mut self, tlv_type: u8, size: usize) {
        self.icv_reservation = Some((tlv_type, size));
        self.message_tlvs.push(TlvSpec {
            tlv_type,
            type_ext: None,
            value: Some(vec![0u8; size]),
        });
    }

    pub fn add_address(&mut self, addr: NetAddr, mandatory: bool) -> AddressHandle {
        self.addresses.push(AddrEntry { addr, mandatory });
        AddressHandle(self.addresses.len() - 1)
    }

    pub fn add_addrtlv(
        &mut self,
        handle: AddressHandle,
        tlv_type: u8,
        value: &[u8],
        allow_multivalue: bool,
    ) {
        self.addr_tlvs.push(AddrTlvEntry {
            handle,
            spec: TlvSpec {
                tlv_type,
                type_ext: None,
                value: Some(value.to_vec()),
            },
            allow_multivalue,
        });
    }
}

/// A message content provider, declared per message type.
pub trait MessageProvider {
    fn msg_type(&self) -> u8;
    fn order_key(&self) -> i32 {
        0
    }
    fn add_message_header(&mut self, msg: &mut MessageBuilder);
    fn add_message_tlvs(&mut self, _msg: &mut MessageBuilder) {}
    fn add_addresses(&mut self, _msg: &mut MessageBuilder) {}
}

/// Mutable access handed to a signing post-processor after a message's
/// bytes (other than the reserved ICV value) are final.
pub struct SigningContext<'a> {
    pub message: &'a mut [u8],
    pub hop_count_offset: Option<usize>,
    pub hop_limit_offset: Option<usize>,
    pub icv_value_offset: usize,
    pub icv_value_len: usize,
}

pub trait MessagePostProcessor {
    fn process(&mut self, ctx: &mut SigningContext<'_>);
}

/// Compose one message's wire bytes: run the provider, order + compress
/// its addresses, coalesce address TLVs, serialize, then run signing
/// post-processors before the caller appends the result to a target
/// buffer.
pub fn compose_message(
    provider: &mut dyn MessageProvider,
    addr_len: u8,
    mtu: usize,
    postprocessors: &mut [Box<dyn MessagePostProcessor>],
) -> Result<Vec<u8>, ResourceError> {
    let mut builder = MessageBuilder::default();
    provider.add_message_header(&mut builder);
    provider.add_message_tlvs(&mut builder);
    provider.add_addresses(&mut builder);

    let mut flags = 0u8;
    if builder.originator.is_some() {
        flags |= MSG_FLAG_HAS_ORIGINATOR;
    }
    if builder.hop_limit.is_some() {
        flags |= MSG_FLAG_HAS_HOPLIMIT;
    }
    if builder.hop_count.is_some() {
        flags |= MSG_FLAG_HAS_HOPCOUNT;
    }
    if builder.seqno.is_some() {
        flags |= MSG_FLAG_HAS_SEQNO;
    }

    let mut body = Vec::new();
    if let Some(o) = &builder.originator {
        body.extend_from_slice(o.as_bytes());
    }
    let mut hop_limit_offset = None;
    if let Some(h) = builder.hop_limit {
        hop_limit_offset = Some(body.len());
        body.push(h);
    }
    let mut hop_count_offset = None;
    if let Some(h) = builder.hop_count {
        hop_count_offset = Some(body.len());
        body.push(h);
    }
    if let Some(s) = builder.seqno {
        body.extend_from_slice(&s.to_be_bytes());
    }

    let mut tlv_block = Vec::new();
    let mut icv_value_offset_in_block = None;
    for tlv in &builder.message_tlvs {
        let before = tlv_block.len();
        write_tlv(
            &mut tlv_block,
            tlv.tlv_type,
            tlv.type_ext,
            None,
            false,
            tlv.value.as_deref(),
        );
        if let Some((icv_type, icv_size)) = builder.icv_reservation {
            if tlv.tlv_type == icv_type && tlv.value.as_ref().map(Vec::len) == Some(icv_size) {
                // value bytes are the tail `icv_size` bytes of the TLV we just wrote
                icv_value_offset_in_block = Some(tlv_block.len() - icv_size);
            }
        }
        let _ = before;
    }
    body.extend_from_slice(&(tlv_block.len() as u16).to_be_bytes());
    let tlv_block_start_in_body = body.len();
    body.extend_from_slice(&tlv_block);

    if !builder.addresses.is_empty() {
        let addr_block = compress_and_write_addresses(&builder, addr_len)?;
        body.extend_from_slice(&addr_block);
    }

    let msg_size = 4 + body.len();
    if msg_size > mtu {
        return Err(ResourceError::MessageTooLarge {
            message_bytes: msg_size,
            mtu,
        });
    }

    let mut out = Vec::with_capacity(msg_size);
    out.push(provider.msg_type());
    out.push((flags << 4) | (addr_len - 1));
    out.extend_from_slice(&(msg_size as u16).to_be_bytes());
    out.extend_from_slice(&body);

    if let Some(offset) = icv_value_offset_in_block {
        let icv_value_offset = 4 + tlv_block_start_in_body + offset;
        let icv_value_len = builder.icv_reservation.unwrap().1;
        for pp in postprocessors.iter_mut() {
            let mut ctx = SigningContext {
                message: &mut out,
                hop_count_offset: hop_count_offset.map(|o| 4 + o),
                hop_limit_offset: hop_limit_offset.map(|o| 4 + o),
                icv_value_offset,
                icv_value_len,
            };
            pp.process(&mut ctx);
        }
    }

    Ok(out)
}

/// Order addresses into longest-common-prefix order (lexicographic by
/// address bytes is a faithful proxy: it places addresses sharing a
/// prefix adjacently), split into compression runs, and write one
/// address block (plus its own coalesced address-TLV block) per run.
fn compress_and_write_addresses(builder: &MessageBuilder, addr_len: u8) -> Result<Vec<u8>, ResourceError> {
    let n = builder.addresses.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        builder.addresses[a]
            .addr
            .as_bytes()
            .cmp(builder.addresses[b].addr.as_bytes())
    });

    let addr_len_usize = addr_len as usize;
    let runs = split_into_runs(&order, builder, addr_len_usize);

    let mut out = Vec::new();
    for run in &runs {
        out.extend_from_slice(&write_address_block(builder, run, addr_len));
    }
    Ok(out)
}

/// Greedily split a sorted address order into compression runs: an
/// address extends the current run only while the run, taken as a
/// whole, still shares a head or tail to compress; once it shares
/// neither with a run of more than one address, it starts a new run
/// instead.
fn split_into_runs(order: &[usize], builder: &MessageBuilder, addr_len: usize) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for &idx in order {
        match runs.last_mut() {
            None => runs.push(vec![idx]),
            Some(run) => {
                run.push(idx);
                let bytes: Vec<&[u8]> = run.iter().map(|&i| builder.addresses[i].addr.as_bytes()).collect();
                let head_len = common_prefix_len(&bytes, addr_len);
                let (tail_len, _) = common_suffix(&bytes, addr_len, head_len);
                if head_len == 0 && tail_len == 0 && run.len() > 1 {
                    run.pop();
                    runs.push(vec![idx]);
                }
            }
        }
    }
    runs
}

/// Encode one run's address block: head/mid/tail compression, prefix
/// lengths, and its own address-TLV sub-block keyed to positions local
/// to this run.
fn write_address_block(builder: &MessageBuilder, run: &[usize], addr_len: u8) -> Vec<u8> {
    let addr_len_usize = addr_len as usize;
    let n = run.len();
    let bytes: Vec<&[u8]> = run.iter().map(|&i| builder.addresses[i].addr.as_bytes()).collect();

    let head_len = common_prefix_len(&bytes, addr_len_usize);
    let (tail_len, zero_tail) = common_suffix(&bytes, addr_len_usize, head_len);

    let mut block = Vec::new();
    block.push(n as u8);

    let mut flags = 0u8;
    if head_len > 0 {
        flags |= ADDR_FLAG_HAS_HEAD;
    }
    if tail_len > 0 {
        flags |= if zero_tail {
            ADDR_FLAG_HAS_ZERO_TAIL
        } else {
            ADDR_FLAG_HAS_FULL_TAIL
        };
    }

    let prefix_lens: Vec<u8> = run
        .iter()
        .map(|&i| builder.addresses[i].addr.prefix_len().unwrap_or(addr_len * 8))
        .collect();
    let single_plen = prefix_lens.windows(2).all(|w| w[0] == w[1]);
    let full_plen = addr_len * 8;
    if !(single_plen && prefix_lens.first().copied() == Some(full_plen)) {
        if single_plen {
            flags |= ADDR_FLAG_HAS_SINGLE_PLEN;
        } else {
            flags |= ADDR_FLAG_HAS_MULTI_PLEN;
        }
    }

    block.push(flags);
    if head_len > 0 {
        block.push(head_len as u8);
        block.extend_from_slice(&bytes[0][..head_len]);
    }
    for b in &bytes {
        block.extend_from_slice(&b[head_len..addr_len_usize - tail_len]);
    }
    if tail_len > 0 {
        block.push(tail_len as u8);
        if !zero_tail {
            block.extend_from_slice(&bytes[0][addr_len_usize - tail_len..]);
        }
    }
    if flags & ADDR_FLAG_HAS_SINGLE_PLEN != 0 {
        block.push(prefix_lens[0]);
    } else if flags & ADDR_FLAG_HAS_MULTI_PLEN != 0 {
        block.extend_from_slice(&prefix_lens);
    }

    let mut local_pos = vec![0usize; builder.addresses.len()];
    for (pos, &orig) in run.iter().enumerate() {
        local_pos[orig] = pos;
    }
    let in_run: std::collections::HashSet<usize> = run.iter().copied().collect();
    let addr_tlv_block = coalesce_and_write_addr_tlvs(builder, &local_pos, &in_run);
    block.extend_from_slice(&(addr_tlv_block.len() as u16).to_be_bytes());
    block.extend_from_slice(&addr_tlv_block);

    block
}

fn common_prefix_len(bytes: &[&[u8]], addr_len: usize) -> usize {
    if bytes.len() < 2 {
        return 0;
    }
    let mut len = 0;
    'outer: while len < addr_len {
        let b = bytes[0][len];
        for addr in &bytes[1..] {
            if addr[len] != b {
                break 'outer;
            }
        }
        len += 1;
    }
    len
}

/// Returns (tail_len, all_zero). Only the suffix strictly after the
/// common prefix is considered, and only if every address agrees on it
/// (full-tail) or it is all zero (zero-tail, cheaper to encode).
fn common_suffix(bytes: &[&[u8]], addr_len: usize, head_len: usize) -> (usize, bool) {
    if bytes.len() < 2 || head_len >= addr_len {
        return (0, false);
    }
    let mut len = 0;
    'outer: while head_len + len < addr_len {
        let idx = addr_len - 1 - len;
        let b = bytes[0][idx];
        for addr in &bytes[1..] {
            if addr[idx] != b {
                break 'outer;
            }
        }
        len += 1;
    }
    if len == 0 {
        return (0, false);
    }
    let all_zero = bytes.iter().all(|addr| addr[addr_len - len..].iter().all(|&b| b == 0));
    (len, all_zero)
}

/// Group address TLVs by (type, extension), restricted to addresses that
/// belong to this run: a run of consecutive positions (local to this
/// address block) sharing an identical value collapses to one
/// multi-index TLV; a run sharing only the (type, extension) but with
/// `allow_multivalue` collapses to one multi-value TLV; anything else is
/// emitted as a singleton per address.
fn coalesce_and_write_addr_tlvs(
    builder: &MessageBuilder,
    position_of: &[usize],
    in_run: &std::collections::HashSet<usize>,
) -> Vec<u8> {
    use std::collections::BTreeMap;

    let mut by_key: BTreeMap<(u8, Option<u8>), Vec<(usize, &[u8], bool)>> = BTreeMap::new();
    for entry in &builder.addr_tlvs {
        if !in_run.contains(&entry.handle.0) {
            continue;
        }
        let pos = position_of[entry.handle.0];
        let value = entry.spec.value.as_deref().unwrap_or(&[]);
        by_key
            .entry((entry.spec.tlv_type, entry.spec.type_ext))
            .or_default()
            .push((pos, value, entry.allow_multivalue));
    }

    let mut out = Vec::new();
    for ((tlv_type, type_ext), mut entries) in by_key {
        entries.sort_by_key(|(pos, _, _)| *pos);
        let mut i = 0;
        while i < entries.len() {
            let (start_pos, start_value, allow_multi) = entries[i];
            let mut j = i + 1;
            let mut same_value_run = true;
            while j < entries.len() && entries[j].0 == entries[j - 1].0 + 1 {
                if entries[j].1 != start_value {
                    same_value_run = false;
                }
                j += 1;
            }
            let end_pos = entries[j - 1].0;

            if same_value_run {
                write_tlv(
                    &mut out,
                    tlv_type,
                    type_ext,
                    Some((start_pos as u8, end_pos as u8)),
                    false,
                    Some(start_value),
                );
            } else if allow_multi && entries[i..j].iter().all(|e| e.2) {
                let mut concatenated = Vec::new();
                for (_, v, _) in &entries[i..j] {
                    concatenated.extend_from_slice(v);
                }
                write_tlv(
                    &mut out,
                    tlv_type,
                    type_ext,
                    Some((start_pos as u8, end_pos as u8)),
                    true,
                    Some(&concatenated),
                );
            } else {
                for (pos, v, _) in &entries[i..j] {
                    write_tlv(&mut out, tlv_type, type_ext, Some((*pos as u8, *pos as u8)), false, Some(v));
                }
            }
            i = j;
        }
    }
    out
}

/// Assembles one or more composed messages into wire packets, flushing
/// and starting a new packet whenever the next message would exceed
/// `mtu`.
pub struct PacketWriter {
    pub mtu: usize,
}

impl PacketWriter {
    pub fn new(mtu: usize) -> Self {
        Self { mtu }
    }

    /// `pkt_seqno` is consumed by every packet this call produces (the
    /// caller is expected to have allocated one packet sequence number
    /// per call, matching the daemon-wide packet seqno counter).
    pub fn write_packets(&self, messages: &[Vec<u8>], pkt_seqno: Option<u16>) -> Result<Vec<Vec<u8>>, WireError> {
        let mut packets = Vec::new();
        let mut current = self.new_packet_header(pkt_seqno);

        for msg in messages {
            if current.len() + msg.len() > self.mtu && current.len() > 1 {
                packets.push(std::mem::replace(&mut current, self.new_packet_header(pkt_seqno)));
            }
            if current.len() + msg.len() > self.mtu {
                // A single message cannot fit even a fresh packet at this MTU.
                return Err(WireError::LengthMismatch {
                    declared: self.mtu as u16,
                    actual: msg.len() as u16,
                });
            }
            current.extend_from_slice(msg);
        }
        packets.push(current);
        Ok(packets)
    }

    fn new_packet_header(&self, pkt_seqno: Option<u16>) -> Vec<u8> {
        let flags = if pkt_seqno.is_some() { PKT_FLAG_HAS_SEQNO } else { 0 };
        let mut out = vec![flags];
        if let Some(s) = pkt_seqno {
            out.extend_from_slice(&s.to_be_bytes());
        }
        let _ = PKT_FLAG_HAS_TLV;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SingleAddressProvider;

    impl MessageProvider for SingleAddressProvider {
        fn msg_type(&self) -> u8 {
            1
        }
        fn add_message_header(&mut self, _msg: &mut MessageBuilder) {}
        fn add_addresses(&mut self, msg: &mut MessageBuilder) {
            let h = msg.add_address(NetAddr::v4([10, 1, 0, 101], 32), true);
            msg.add_addrtlv(h, 3, &[0x01], false);
        }
    }

    #[test]
    fn single_address_single_tlv_matches_expected_wire_bytes() {
        let mut provider = SingleAddressProvider;
        let bytes = compose_message(&mut provider, 4, 1500, &mut []).unwrap();
        // msg-type=1, flags/addrlen=0x03, size, empty msg-tlv block,
        // one-address block with no head/tail compression (single
        // address has nothing to share a prefix with) and one TLV.
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 0x03);
        let size = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(size, bytes.len());
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

    #[test]
    fn three_addresses_sharing_a_prefix_compress_to_one_block() {
        let mut provider = ThreeAddressProvider;
        let bytes = compose_message(&mut provider, 4, 1500, &mut []).unwrap();
        // head = 0a 01 00 (3 bytes), mid = 65 66 67, all addrs /32 so no
        // prefix-length field is emitted, and the shared TLV value
        // coalesces into one multi-index TLV.
        let addr_block_start = 1 + 1 + 2 + 2; // type+flags/addrlen+size+msgtlvlen(0)
        assert_eq!(bytes[addr_block_start], 3); // num-addr
        let flags = bytes[addr_block_start + 1];
        assert_ne!(flags & ADDR_FLAG_HAS_HEAD, 0);
        let head_len_pos = addr_block_start + 2;
        assert_eq!(bytes[head_len_pos], 3);
        assert_eq!(&bytes[head_len_pos + 1..head_len_pos + 4], &[0x0a, 0x01, 0x00]);
        assert_eq!(&bytes[head_len_pos + 4..head_len_pos + 7], &[0x65, 0x66, 0x67]);
    }

    struct TwoDisjointAddressProvider;

    impl MessageProvider for TwoDisjointAddressProvider {
        fn msg_type(&self) -> u8 {
            1
        }
        fn add_message_header(&mut self, _msg: &mut MessageBuilder) {}
        fn add_addresses(&mut self, msg: &mut MessageBuilder) {
            msg.add_address(NetAddr::v4([10, 1, 0, 101], 32), true);
            msg.add_address(NetAddr::v4([192, 168, 1, 1], 32), true);
        }
    }

    #[test]
    fn addresses_sharing_no_head_or_tail_split_into_two_blocks() {
        let mut provider = TwoDisjointAddressProvider;
        let bytes = compose_message(&mut provider, 4, 1500, &mut []).unwrap();

        let addr_block_start = 1 + 1 + 2 + 2; // type+flags/addrlen+size+msgtlvlen(0)
        // First block: a single address, both /32, so no head/tail/plen
        // fields are emitted — just num-addr, flags, the raw 4 mid bytes.
        assert_eq!(bytes[addr_block_start], 1);
        let first_flags = bytes[addr_block_start + 1];
        assert_eq!(
            first_flags & (ADDR_FLAG_HAS_HEAD | ADDR_FLAG_HAS_FULL_TAIL | ADDR_FLAG_HAS_ZERO_TAIL),
            0,
            "a lone address shares nothing with itself to compress"
        );

        let mut pos = addr_block_start + 2 + 4; // num-addr, flags, 4 mid bytes
        let tlv_len = u16::from_be_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        pos += 2 + tlv_len;

        assert_eq!(
            bytes[pos], 1,
            "second address block should exist immediately after the first, carrying the other address"
        );
    }

    #[test]
    fn message_too_large_is_reported_per_target() {
        let mut provider = SingleAddressProvider;
        let err = compose_message(&mut provider, 4, 4, &mut []).unwrap_err();
        assert!(matches!(err, ResourceError::MessageTooLarge { .. }));
    }

    #[test]
    fn packet_writer_flushes_before_exceeding_mtu() {
        let writer = PacketWriter::new(10);
        let messages = vec![vec![0u8; 6], vec![0u8; 6]];
        let packets = writer.write_packets(&messages, None).unwrap();
        assert_eq!(packets.len(), 2);
    }
}
