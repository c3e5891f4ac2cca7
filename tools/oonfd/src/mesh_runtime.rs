// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-interface OLSRv2/NHDP mesh runtime: owns the multicast socket,
//! composes and sends periodic HELLO/TC messages, parses inbound
//! packets, and drives duplicate detection, the neighbor/two-hop tables
//! and MPR selection from what it observes.
//!
//! Message/TLV type codes below are this implementation's own fixed
//! assignment, in the same spirit as [`crate::signing`]'s RFC 7182 hash
//! and crypt codes: RFC 5444 defines the wire framework but leaves
//! concrete per-protocol type codes to the protocol running over it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;

use mio::net::UdpSocket;
use mio::{Interest, Token};
use socket2::{Domain, Protocol, Socket, Type};

use oonfd_core::alloc::ObjectClass;
use oonfd_core::config::MeshInterfaceConfig;
use oonfd_core::dup::{DuplicateSet, SeqnoWidth};
use oonfd_core::icv::{CryptProvider, CryptRegistry, HashProvider, HashRegistry, IDENTITY_CODE};
use oonfd_core::io::ReadinessLoop;
use oonfd_core::mpr::{select_mpr, Metric, N1Neighbor, N2Neighbor, NeighborGraph, Willingness};
use oonfd_core::netaddr::NetAddr;
use oonfd_core::rfc5444::reader::{ConsumerResult, MessageConsumer, MessageHeader, PacketReader};
use oonfd_core::rfc5444::tlv::ParsedTlv;
use oonfd_core::rfc5444::writer::{
    compose_message, MessageBuilder, MessagePostProcessor, MessageProvider, PacketWriter, SigningContext,
};
use oonfd_core::sigpolicy::{SignaturePolicy, VerifyOutcome};

use crate::signing;

const HELLO_MSG_TYPE: u8 = 1;
const TC_MSG_TYPE: u8 = 2;
const WILLINGNESS_TLV: u8 = 1;
const NBR_ADDR_TYPE_TLV: u8 = 1;
const ICV_TLV_TYPE: u8 = 9;
const MESH_MTU: usize = 1500;

fn willingness_of(code: u8) -> Willingness {
    match code {
        0 => Willingness::Never,
        7 => Willingness::Always,
        l => Willingness::Level(l.min(6)),
    }
}

#[derive(Default)]
struct NeighborRecord {
    addr: Option<NetAddr>,
    willingness: u8,
    last_heard_ms: u64,
}

/// A parsed RFC 7182 ICV attached to one observed message, plus its byte
/// range within that message's raw bytes so verification can zero it back
/// out of the covered input.
struct IcvField {
    offset: usize,
    len: usize,
    key_id: Vec<u8>,
    hash_code: u8,
    crypt_code: u8,
    signature: Vec<u8>,
}

fn parse_icv_value(value: &[u8], offset: usize) -> Option<IcvField> {
    let key_id_len = *value.first()? as usize;
    let mut pos = 1;
    let key_id = value.get(pos..pos + key_id_len)?.to_vec();
    pos += key_id_len;
    let hash_code = *value.get(pos)?;
    pos += 1;
    let crypt_code = *value.get(pos)?;
    pos += 1;
    let signature = value.get(pos..)?.to_vec();
    Some(IcvField { offset, len: value.len(), key_id, hash_code, crypt_code, signature })
}

/// One fully parsed HELLO or TC message, handed from [`CollectingConsumer`]
/// to [`MeshInterfaceRuntime::handle_observed`].
struct ObservedMessage {
    msg_type: u8,
    originator: Option<NetAddr>,
    seqno: Option<u16>,
    willingness: Option<u8>,
    addresses: Vec<NetAddr>,
    raw: Vec<u8>,
    icv: Option<IcvField>,
}

/// Collects every HELLO/TC message off one parse call into `log`, the
/// `Rc<RefCell<...>>` shared-mutable-collection pattern (mirrored from
/// `rfc5444::reader`'s own `RecordingMessageConsumer` test) used because a
/// `Box<dyn MessageConsumer>` is bound `'static` and so cannot instead hold
/// a borrowed reference back to its owning runtime.
///
/// A TLV value's offset within the message's raw bytes is recovered by
/// pointer-address subtraction against `header.raw`'s base address,
/// captured in `start()`: `message_tlv` is not handed the header again, and
/// both slices borrow the same underlying packet buffer for the duration
/// of one `PacketReader::parse` call.
struct CollectingConsumer {
    log: Rc<RefCell<Vec<ObservedMessage>>>,
    cur_msg_type: u8,
    cur_originator: Option<NetAddr>,
    cur_seqno: Option<u16>,
    cur_willingness: Option<u8>,
    cur_addresses: Vec<NetAddr>,
    cur_raw: Vec<u8>,
    cur_raw_base: usize,
    cur_icv: Option<IcvField>,
}

impl CollectingConsumer {
    fn new(log: Rc<RefCell<Vec<ObservedMessage>>>) -> Self {
        Self {
            log,
            cur_msg_type: 0,
            cur_originator: None,
            cur_seqno: None,
            cur_willingness: None,
            cur_addresses: Vec::new(),
            cur_raw: Vec::new(),
            cur_raw_base: 0,
            cur_icv: None,
        }
    }
}

impl MessageConsumer for CollectingConsumer {
    fn start(&mut self, header: &MessageHeader<'_>) -> ConsumerResult {
        self.cur_msg_type = header.msg_type;
        self.cur_originator = header.originator;
        self.cur_seqno = header.seqno;
        self.cur_willingness = None;
        self.cur_addresses.clear();
        self.cur_raw = header.raw.to_vec();
        self.cur_raw_base = header.raw.as_ptr() as usize;
        self.cur_icv = None;
        ConsumerResult::Okay
    }

    fn message_tlv(&mut self, tlv: &ParsedTlv<'_>) -> ConsumerResult {
        match tlv.tlv_type {
            WILLINGNESS_TLV => {
                if let Some(v) = tlv.value.and_then(|v| v.first()) {
                    self.cur_willingness = Some(*v);
                }
            }
            ICV_TLV_TYPE => {
                if let Some(value) = tlv.value {
                    let offset = value.as_ptr() as usize - self.cur_raw_base;
                    self.cur_icv = parse_icv_value(value, offset);
                }
            }
            _ => {}
        }
        ConsumerResult::Okay
    }

    fn address(&mut self, addr: &NetAddr, _tlvs: &[ParsedTlv<'_>]) -> ConsumerResult {
        self.cur_addresses.push(*addr);
        ConsumerResult::Okay
    }

    fn end(&mut self, dropped: bool) {
        if dropped {
            return;
        }
        self.log.borrow_mut().push(ObservedMessage {
            msg_type: self.cur_msg_type,
            originator: self.cur_originator,
            seqno: self.cur_seqno,
            willingness: self.cur_willingness,
            addresses: std::mem::take(&mut self.cur_addresses),
            raw: std::mem::take(&mut self.cur_raw),
            icv: self.cur_icv.take(),
        });
    }
}

/// Signs one outbound message in place, writing
/// `[key_id_len][key_id][hash_code][crypt_code][signature]` into the
/// region `MessageBuilder::reserve_icv_tlv` zero-filled for it.
struct IcvSigner {
    hash: Box<dyn HashProvider>,
    crypt: Box<dyn CryptProvider>,
    key: Vec<u8>,
    key_id: Vec<u8>,
    hash_code: u8,
    crypt_code: u8,
}

impl MessagePostProcessor for IcvSigner {
    fn process(&mut self, ctx: &mut SigningContext<'_>) {
        let digest = self.hash.hash(ctx.message);
        let signature = self.crypt.encrypt(&digest, &self.key);
        let mut value = Vec::with_capacity(ctx.icv_value_len);
        value.push(self.key_id.len() as u8);
        value.extend_from_slice(&self.key_id);
        value.push(self.hash_code);
        value.push(self.crypt_code);
        value.extend_from_slice(&signature);
        ctx.message[ctx.icv_value_offset..ctx.icv_value_offset + ctx.icv_value_len].copy_from_slice(&value);
    }
}

struct IcvPlan {
    signer: IcvSigner,
    reserved_len: usize,
}

/// Build a signing plan from the first configured signature record that
/// applies to `msg_type`, if any, skipping the identity hash (it has no
/// fixed output length to reserve a TLV for). Only one signature is ever
/// attached per outbound message: `reserve_icv_tlv` always reserves its TLV
/// with no `type_ext`, so a second reservation of the same TLV type would
/// collide with the first under the message-TLV duplicate-type check.
fn build_icv_plan(msg_type: u8, signatures: &SignaturePolicy) -> Option<IcvPlan> {
    let record = signatures.matching(Some(msg_type)).next()?;
    if record.hash_code == IDENTITY_CODE {
        return None;
    }
    let hash = signing::hash_provider(record.hash_code)?;
    let crypt = signing::crypt_provider(record.crypt_code)?;
    let reserved_len = 1 + record.key_id.len() + 1 + 1 + hash.output_len();
    Some(IcvPlan {
        signer: IcvSigner {
            hash,
            crypt,
            key: record.key.clone(),
            key_id: record.key_id.clone(),
            hash_code: record.hash_code,
            crypt_code: record.crypt_code,
        },
        reserved_len,
    })
}

/// Content provider for both HELLO and TC messages: the two differ only in
/// hop limit, whether a willingness TLV is attached, and which address set
/// is advertised.
struct NhdpProvider<'a> {
    msg_type: u8,
    local_addr: NetAddr,
    seqno: u16,
    hop_limit: u8,
    willingness: Option<u8>,
    neighbors: &'a [NetAddr],
    icv_reserved_len: Option<usize>,
}

impl MessageProvider for NhdpProvider<'_> {
    fn msg_type(&self) -> u8 {
        self.msg_type
    }

    fn add_message_header(&mut self, msg: &mut MessageBuilder) {
        msg.set_originator(self.local_addr);
        msg.set_hop_limit(self.hop_limit);
        msg.set_seqno(self.seqno);
    }

    fn add_message_tlvs(&mut self, msg: &mut MessageBuilder) {
        if let Some(w) = self.willingness {
            msg.add_message_tlv(WILLINGNESS_TLV, None, Some(&[w]));
        }
        if let Some(len) = self.icv_reserved_len {
            msg.reserve_icv_tlv(ICV_TLV_TYPE, len);
        }
    }

    fn add_addresses(&mut self, msg: &mut MessageBuilder) {
        for &addr in self.neighbors {
            let handle = msg.add_address(addr, true);
            msg.add_addrtlv(handle, NBR_ADDR_TYPE_TLV, &[1], false);
        }
    }
}

/// Everything the daemon needs to drive one configured mesh interface:
/// periodic HELLO/TC composition, inbound parsing, duplicate detection,
/// and the neighbor/two-hop/MPR tables they feed.
pub struct MeshInterfaceRuntime {
    pub name: String,
    local_addr: NetAddr,
    willingness_code: u8,
    multicast_addr: SocketAddr,
    udp: UdpSocket,
    token: Token,
    writer: PacketWriter,
    next_msg_seqno: u16,
    next_pkt_seqno: u16,
    dup: DuplicateSet,
    neighbors: ObjectClass<NeighborRecord>,
    slot_by_addr: HashMap<NetAddr, usize>,
    n2: HashMap<NetAddr, HashMap<NetAddr, Metric>>,
    mpr_set: Vec<NetAddr>,
    consumer_log: Rc<RefCell<Vec<ObservedMessage>>>,
    reader: PacketReader,
    hold_time_ms: u64,
}

impl MeshInterfaceRuntime {
    pub fn new(cfg: &MeshInterfaceConfig, io: &mut ReadinessLoop, token_base: usize) -> io::Result<Self> {
        let local_v4: Ipv4Addr = cfg
            .local_addr
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad mesh local_addr"))?;
        let local_addr = NetAddr::v4(local_v4.octets(), 32);

        let bind_addr: SocketAddr = cfg
            .bindto
            .as_deref()
            .unwrap_or("0.0.0.0")
            .parse()
            .map(|ip| SocketAddr::new(ip, cfg.port))
            .unwrap_or_else(|_| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), cfg.port));

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())?;

        let mcast: Ipv4Addr = cfg.multicast_v4.parse().unwrap_or(Ipv4Addr::new(224, 0, 0, 109));
        let _ = socket.join_multicast_v4(&mcast, &Ipv4Addr::UNSPECIFIED);
        let _ = socket.set_multicast_loop_v4(false);

        let std_socket: std::net::UdpSocket = socket.into();
        let mut udp = UdpSocket::from_std(std_socket);

        let token = Token(token_base);
        io.register(&mut udp, token, Interest::READABLE)?;

        let consumer_log = Rc::new(RefCell::new(Vec::new()));
        let mut reader = PacketReader::new();
        reader.add_message_consumer(Box::new(CollectingConsumer::new(consumer_log.clone())));

        Ok(Self {
            name: cfg.name.clone(),
            local_addr,
            willingness_code: cfg.willingness,
            multicast_addr: SocketAddr::new(mcast.into(), cfg.port),
            udp,
            token,
            writer: PacketWriter::new(MESH_MTU),
            next_msg_seqno: 0,
            next_pkt_seqno: 0,
            dup: DuplicateSet::new(SeqnoWidth::Bits16),
            neighbors: ObjectClass::new("mesh-neighbor", 4),
            slot_by_addr: HashMap::new(),
            n2: HashMap::new(),
            mpr_set: Vec::new(),
            consumer_log,
            reader,
            hold_time_ms: cfg.hold_time_ms,
        })
    }

    pub fn owns(&self, token: Token) -> bool {
        token == self.token
    }

    pub fn mpr_set(&self) -> &[NetAddr] {
        &self.mpr_set
    }

    fn next_message(&mut self, msg_type: u8, hop_limit: u8, willingness: Option<u8>, addresses: &[NetAddr], signatures: &SignaturePolicy) -> Option<Vec<u8>> {
        let seqno = self.next_msg_seqno;
        self.next_msg_seqno = self.next_msg_seqno.wrapping_add(1);

        let plan = build_icv_plan(msg_type, signatures);
        let mut provider = NhdpProvider {
            msg_type,
            local_addr: self.local_addr,
            seqno,
            hop_limit,
            willingness,
            neighbors: addresses,
            icv_reserved_len: plan.as_ref().map(|p| p.reserved_len),
        };
        let mut postprocessors: Vec<Box<dyn MessagePostProcessor>> = Vec::new();
        if let Some(plan) = plan {
            postprocessors.push(Box::new(plan.signer));
        }

        match compose_message(&mut provider, self.local_addr.addr_len() as u8, self.writer.mtu, &mut postprocessors) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::warn!(target: "oonfd::mesh", "{}: failed to compose message type {msg_type}: {e}", self.name);
                None
            }
        }
    }

    fn send_message(&mut self, bytes: Vec<u8>) {
        let pkt_seqno = self.next_pkt_seqno;
        self.next_pkt_seqno = self.next_pkt_seqno.wrapping_add(1);
        let packets = match self.writer.write_packets(&[bytes], Some(pkt_seqno)) {
            Ok(p) => p,
            Err(e) => {
                log::warn!(target: "oonfd::mesh", "{}: failed to frame packet: {e}", self.name);
                return;
            }
        };
        for packet in packets {
            match self.udp.send_to(&packet, self.multicast_addr) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => log::warn!(target: "oonfd::mesh", "{}: send failed: {e}", self.name),
            }
        }
    }

    /// Compose and send a HELLO advertising every currently known 1-hop
    /// neighbor.
    pub fn tick_hello(&mut self, signatures: &SignaturePolicy) {
        let neighbor_addrs: Vec<NetAddr> = self.slot_by_addr.keys().copied().collect();
        if let Some(bytes) = self.next_message(HELLO_MSG_TYPE, 1, Some(self.willingness_code), &neighbor_addrs, signatures) {
            self.send_message(bytes);
        }
    }

    /// Compose and send a TC advertising the full 1-hop neighbor set (a
    /// valid, if non-minimal, topology advertisement per RFC 7181 §2.1 —
    /// MPR-selector-only advertisement would need inbound HELLOs to carry
    /// our own address back to us, which is out of scope here).
    pub fn tick_tc(&mut self, signatures: &SignaturePolicy) {
        let neighbor_addrs: Vec<NetAddr> = self.slot_by_addr.keys().copied().collect();
        if let Some(bytes) = self.next_message(TC_MSG_TYPE, 255, None, &neighbor_addrs, signatures) {
            self.send_message(bytes);
        }
    }

    pub fn handle_readiness(
        &mut self,
        token: Token,
        readable: bool,
        now: u64,
        hashes: &HashRegistry,
        crypts: &CryptRegistry,
        signatures: &SignaturePolicy,
    ) -> io::Result<()> {
        if token != self.token || !readable {
            return Ok(());
        }
        let mut buf = [0u8; 2048];
        loop {
            match self.udp.recv_from(&mut buf) {
                Ok((n, _from)) => {
                    let _ = self.reader.parse(&buf[..n]);
                    let observed: Vec<ObservedMessage> = self.consumer_log.borrow_mut().drain(..).collect();
                    for msg in observed {
                        self.handle_observed(msg, now, hashes, crypts, signatures);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_observed(
        &mut self,
        msg: ObservedMessage,
        now: u64,
        hashes: &HashRegistry,
        crypts: &CryptRegistry,
        signatures: &SignaturePolicy,
    ) {
        let Some(originator) = msg.originator else { return };
        if originator == self.local_addr {
            return;
        }
        let Some(seqno) = msg.seqno else { return };

        if let Some(icv) = &msg.icv {
            let mut covered = msg.raw.clone();
            if let Some(region) = covered.get_mut(icv.offset..icv.offset + icv.len) {
                region.fill(0);
            }
            let verdict = signatures.verify(hashes, crypts, &icv.key_id, icv.hash_code, icv.crypt_code, &covered, &icv.signature);
            if SignaturePolicy::combine(std::iter::once(verdict)) == VerifyOutcome::Drop {
                log::warn!(target: "oonfd::mesh", "{}: dropping message from {originator} with invalid ICV", self.name);
                return;
            }
        }

        let (_, is_new) = self.dup.add(msg.msg_type, &originator, u64::from(seqno));
        if !is_new {
            return;
        }

        match msg.msg_type {
            HELLO_MSG_TYPE => self.update_neighbor(originator, msg.willingness, now),
            TC_MSG_TYPE => self.update_two_hop(originator, &msg.addresses),
            _ => {}
        }
        self.recompute_mpr();
    }

    fn update_neighbor(&mut self, addr: NetAddr, willingness: Option<u8>, now: u64) {
        let slot = match self.slot_by_addr.get(&addr) {
            Some(&s) => s,
            None => {
                let s = self.neighbors.malloc();
                self.slot_by_addr.insert(addr, s);
                s
            }
        };
        if let Some(rec) = self.neighbors.get_mut(slot) {
            rec.addr = Some(addr);
            if let Some(w) = willingness {
                rec.willingness = w;
            }
            rec.last_heard_ms = now;
        }
    }

    fn update_two_hop(&mut self, via: NetAddr, advertised: &[NetAddr]) {
        for &y in advertised {
            if y == self.local_addr || y == via {
                continue;
            }
            self.n2.entry(y).or_default().insert(via, 1);
        }
    }

    fn recompute_mpr(&mut self) {
        let mut graph = NeighborGraph::new();
        for (&addr, &slot) in &self.slot_by_addr {
            if let Some(rec) = self.neighbors.get(slot) {
                graph.n1.push(N1Neighbor { addr, willingness: willingness_of(rec.willingness) });
            }
        }
        for (&addr, via) in &self.n2 {
            graph.n2.push(N2Neighbor {
                addr,
                via: via.clone(),
                direct_metric: self.slot_by_addr.contains_key(&addr).then_some(1),
            });
        }
        self.mpr_set = select_mpr(&graph);
    }

    /// Drop neighbors (and their two-hop contributions) that have not been
    /// heard from within `hold_time_ms`.
    pub fn prune_stale(&mut self, now: u64) {
        let mut dead = Vec::new();
        for (&addr, &slot) in &self.slot_by_addr {
            if let Some(rec) = self.neighbors.get(slot) {
                if now.saturating_sub(rec.last_heard_ms) > self.hold_time_ms {
                    dead.push((addr, slot));
                }
            }
        }
        if dead.is_empty() {
            return;
        }
        for (addr, slot) in dead {
            self.slot_by_addr.remove(&addr);
            self.neighbors.free(slot);
            self.n2.remove(&addr);
            self.dup.remove(HELLO_MSG_TYPE, &addr);
        }
        self.recompute_mpr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn willingness_of_maps_fixed_endpoints() {
        assert_eq!(willingness_of(0), Willingness::Never);
        assert_eq!(willingness_of(7), Willingness::Always);
        assert_eq!(willingness_of(3), Willingness::Level(3));
    }

    #[test]
    fn icv_value_round_trips_through_parse() {
        let value: Vec<u8> = vec![3, b'i', b'd', b'1', 2, 2, 0xaa, 0xbb];
        let field = parse_icv_value(&value, 10).unwrap();
        assert_eq!(field.key_id, b"id1");
        assert_eq!(field.hash_code, 2);
        assert_eq!(field.crypt_code, 2);
        assert_eq!(field.signature, vec![0xaa, 0xbb]);
        assert_eq!(field.offset, 10);
        assert_eq!(field.len, value.len());
    }

    #[test]
    fn build_icv_plan_skips_identity_hash() {
        let mut policy = SignaturePolicy::new();
        policy.add(oonfd_core::sigpolicy::SignatureRecord {
            name: "id".into(),
            key: b"k".to_vec(),
            key_id: b"id1".to_vec(),
            msg_types: {
                let mut bm = oonfd_core::sigpolicy::MsgTypeBitmap::empty();
                bm.set(HELLO_MSG_TYPE);
                bm
            },
            apply_to_packet: false,
            source_specific: false,
            drop_on_bad: true,
            hash_code: IDENTITY_CODE,
            crypt_code: IDENTITY_CODE,
        });
        assert!(build_icv_plan(HELLO_MSG_TYPE, &policy).is_none());
    }
}
