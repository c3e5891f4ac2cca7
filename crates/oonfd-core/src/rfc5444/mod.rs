// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 5444 packet/message/address-block/TLV binary codec: a
//! bounds-checked, non-allocating reader dispatching to registered
//! consumers, and a content-provider-driven writer with address
//! compression, TLV coalescing, multi-target fragmentation and a signing
//! hook.

mod tlv;

pub mod reader;
pub mod writer;

pub use reader::{ConsumerResult, MessageConsumer, MessageHeader, PacketConsumer, PacketHeader, PacketReader};
pub use tlv::{
    ParsedTlv, ADDR_FLAG_HAS_FULL_TAIL, ADDR_FLAG_HAS_HEAD, ADDR_FLAG_HAS_MULTI_PLEN,
    ADDR_FLAG_HAS_SINGLE_PLEN, ADDR_FLAG_HAS_ZERO_TAIL, MSG_FLAG_HAS_HOPCOUNT, MSG_FLAG_HAS_HOPLIMIT,
    MSG_FLAG_HAS_ORIGINATOR, MSG_FLAG_HAS_SEQNO, PKT_FLAG_HAS_SEQNO, PKT_FLAG_HAS_TLV,
    TLV_FLAG_HAS_EXTENDED_LENGTH, TLV_FLAG_HAS_MULTI_INDEX, TLV_FLAG_HAS_SINGLE_INDEX,
    TLV_FLAG_HAS_TYPE_EXT, TLV_FLAG_HAS_VALUE, TLV_FLAG_MULTIVALUE,
};
pub use writer::{
    compose_message, AddressHandle, MessageBuilder, MessagePostProcessor, MessageProvider,
    PacketWriter, SigningContext,
};
