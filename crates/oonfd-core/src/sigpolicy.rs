// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 7182 signature policy: matches outbound messages/packets against
//! registered signature records and verifies inbound ICVs, reusing the
//! [`crate::icv`] hash/crypt registries from a signing policy layer
//! above them.

use crate::error::PolicyError;
use crate::icv::{CryptRegistry, HashRegistry, IcvPipeline};

/// Bitmap over the 256 RFC 5444 message types a signature applies to.
#[derive(Debug, Clone)]
pub struct MsgTypeBitmap([u64; 4]);

impl MsgTypeBitmap {
    pub fn empty() -> Self {
        Self([0; 4])
    }

    pub fn all() -> Self {
        Self([u64::MAX; 4])
    }

    pub fn set(&mut self, msg_type: u8) {
        let idx = (msg_type / 64) as usize;
        let bit = msg_type % 64;
        self.0[idx] |= 1u64 << bit;
    }

    pub fn contains(&self, msg_type: u8) -> bool {
        let idx = (msg_type / 64) as usize;
        let bit = msg_type % 64;
        self.0[idx] & (1u64 << bit) != 0
    }
}

/// A registered signature record.
pub struct SignatureRecord {
    pub name: String,
    pub key: Vec<u8>,
    pub key_id: Vec<u8>,
    pub msg_types: MsgTypeBitmap,
    pub apply_to_packet: bool,
    pub source_specific: bool,
    pub drop_on_bad: bool,
    pub hash_code: u8,
    pub crypt_code: u8,
}

impl SignatureRecord {
    /// Whether this record applies to an outbound message of `msg_type`,
    /// or (when `msg_type` is `None`) to the packet itself.
    pub fn is_matching(&self, msg_type: Option<u8>) -> bool {
        match msg_type {
            Some(t) => self.msg_types.contains(t),
            None => self.apply_to_packet,
        }
    }
}

/// What to do with an inbound message/packet once all of its attached
/// signatures have been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Okay,
    Skip,
    Drop,
}

/// Holds every locally-known signature record and resolves outbound
/// matches / inbound verification against them.
#[derive(Default)]
pub struct SignaturePolicy {
    records: Vec<SignatureRecord>,
}

impl SignaturePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: SignatureRecord) {
        self.records.push(record);
    }

    /// Every registered record whose `is_matching` accepts this
    /// message/packet, in registration order.
    pub fn matching(&self, msg_type: Option<u8>) -> impl Iterator<Item = &SignatureRecord> {
        self.records.iter().filter(move |r| r.is_matching(msg_type))
    }

    /// Verify one attached signature (key-id, hash code, crypt code, ICV
    /// bytes) against the covered input. Returns [`PolicyError`] only when
    /// the verdict is `Skip` or `Drop`; `Ok(())` is the `Okay` verdict.
    ///
    /// A `verify_id` matching no locally-known key-id is itself an `Okay`:
    /// an unrecognized key-id cannot be judged, so it is not our signature
    /// to enforce.
    pub fn verify(
        &self,
        hashes: &HashRegistry,
        crypts: &CryptRegistry,
        verify_id: &[u8],
        hash_code: u8,
        crypt_code: u8,
        covered: &[u8],
        icv: &[u8],
    ) -> Result<(), PolicyError> {
        let Some(record) = self.records.iter().find(|r| r.key_id == verify_id) else {
            return Ok(());
        };
        if record.hash_code != hash_code || record.crypt_code != crypt_code {
            return Err(if record.drop_on_bad {
                PolicyError::Drop
            } else {
                PolicyError::Skip
            });
        }
        let Ok(pipeline) = IcvPipeline::resolve(hashes, crypts, hash_code, crypt_code) else {
            return Err(PolicyError::Skip);
        };
        if pipeline.validate(covered, &record.key, icv) {
            Ok(())
        } else if record.drop_on_bad {
            Err(PolicyError::Drop)
        } else {
            Err(PolicyError::Skip)
        }
    }

    /// Combine the individual verdicts for every signature attached to one
    /// message/packet into one overall outcome: any `Drop` wins, else any
    /// `Skip`, else `Okay`.
    pub fn combine(results: impl IntoIterator<Item = Result<(), PolicyError>>) -> VerifyOutcome {
        let mut outcome = VerifyOutcome::Okay;
        for r in results {
            match r {
                Ok(()) => {}
                Err(PolicyError::Skip) => {
                    if outcome == VerifyOutcome::Okay {
                        outcome = VerifyOutcome::Skip;
                    }
                }
                Err(PolicyError::Drop) => outcome = VerifyOutcome::Drop,
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icv::IDENTITY_CODE;

    fn record(name: &str, key_id: &[u8], msg_types: MsgTypeBitmap) -> SignatureRecord {
        SignatureRecord {
            name: name.to_string(),
            key: b"key".to_vec(),
            key_id: key_id.to_vec(),
            msg_types,
            apply_to_packet: false,
            source_specific: false,
            drop_on_bad: true,
            hash_code: IDENTITY_CODE,
            crypt_code: IDENTITY_CODE,
        }
    }

    #[test]
    fn bitmap_tracks_individual_message_types() {
        let mut bm = MsgTypeBitmap::empty();
        bm.set(1);
        bm.set(200);
        assert!(bm.contains(1));
        assert!(bm.contains(200));
        assert!(!bm.contains(2));
    }

    #[test]
    fn matching_filters_by_msg_type_bitmap() {
        let mut policy = SignaturePolicy::new();
        let mut bm = MsgTypeBitmap::empty();
        bm.set(1);
        policy.add(record("hello-sig", b"id1", bm));
        assert_eq!(policy.matching(Some(1)).count(), 1);
        assert_eq!(policy.matching(Some(2)).count(), 0);
    }

    #[test]
    fn verify_accepts_matching_identity_signature() {
        let mut policy = SignaturePolicy::new();
        policy.add(record("x", b"id1", MsgTypeBitmap::all()));
        let hashes = HashRegistry::new();
        let crypts = CryptRegistry::new();
        let covered = b"message bytes";
        let icv = covered.to_vec(); // identity pipeline: sign == input
        assert!(policy
            .verify(&hashes, &crypts, b"id1", IDENTITY_CODE, IDENTITY_CODE, covered, &icv)
            .is_ok());
    }

    #[test]
    fn verify_drops_on_bad_icv_when_drop_on_bad() {
        let mut policy = SignaturePolicy::new();
        policy.add(record("x", b"id1", MsgTypeBitmap::all()));
        let hashes = HashRegistry::new();
        let crypts = CryptRegistry::new();
        let result = policy.verify(&hashes, &crypts, b"id1", IDENTITY_CODE, IDENTITY_CODE, b"abc", b"def");
        assert_eq!(result, Err(PolicyError::Drop));
    }

    #[test]
    fn unknown_key_id_is_okay() {
        let policy = SignaturePolicy::new();
        let hashes = HashRegistry::new();
        let crypts = CryptRegistry::new();
        assert!(policy
            .verify(&hashes, &crypts, b"unknown", IDENTITY_CODE, IDENTITY_CODE, b"x", b"x")
            .is_ok());
    }

    #[test]
    fn combine_prefers_drop_over_skip_over_okay() {
        assert_eq!(SignaturePolicy::combine([Ok(()), Ok(())]), VerifyOutcome::Okay);
        assert_eq!(
            SignaturePolicy::combine([Ok(()), Err(PolicyError::Skip)]),
            VerifyOutcome::Skip
        );
        assert_eq!(
            SignaturePolicy::combine([Err(PolicyError::Skip), Err(PolicyError::Drop)]),
            VerifyOutcome::Drop
        );
    }
}
