// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Build the RFC 7182 hash/crypt registries and signature policy from
//! the daemon's `[[signature]]` sections, seeding one shared set of
//! providers that every signature record refers to by type code.
//!
//! Type codes below are this implementation's own fixed assignment
//! (RFC 7182 defines the registry but leaves concrete code allocation to
//! the running daemon's configuration); `identity` always keeps code 0,
//! matching [`oonfd_core::icv::IDENTITY_CODE`].

use oonfd_core::config::SignatureConfig;
use oonfd_core::icv::{CryptProvider, CryptRegistry, HashProvider, HashRegistry, IDENTITY_CODE};
use oonfd_core::sigpolicy::{MsgTypeBitmap, SignatureRecord, SignaturePolicy};

const SHA1_CODE: u8 = 1;
const SHA256_CODE: u8 = 2;
const SHA384_CODE: u8 = 3;
const SHA512_CODE: u8 = 4;

fn code_for(name: &str) -> u8 {
    match name.to_ascii_lowercase().as_str() {
        "sha1" => SHA1_CODE,
        "sha256" => SHA256_CODE,
        "sha384" => SHA384_CODE,
        "sha512" => SHA512_CODE,
        _ => IDENTITY_CODE,
    }
}

/// Register every SHA-family provider the `crypto` feature makes
/// available. Harmless to call even if no configured section uses them.
fn seed_registries(hashes: &mut HashRegistry, crypts: &mut CryptRegistry) {
    use oonfd_core::icv::sha;

    let _ = hashes.add(Box::new(sha::Sha1Hash { type_code: SHA1_CODE }));
    let _ = hashes.add(Box::new(sha::Sha256Hash { type_code: SHA256_CODE }));
    let _ = hashes.add(Box::new(sha::Sha384Hash { type_code: SHA384_CODE }));
    let _ = hashes.add(Box::new(sha::Sha512Hash { type_code: SHA512_CODE }));

    let _ = crypts.add(Box::new(sha::hmac_sha1_crypt(SHA1_CODE)));
    let _ = crypts.add(Box::new(sha::hmac_sha256_crypt(SHA256_CODE)));
    let _ = crypts.add(Box::new(sha::hmac_sha384_crypt(SHA384_CODE)));
    let _ = crypts.add(Box::new(sha::hmac_sha512_crypt(SHA512_CODE)));
}

/// Build the registries and policy a running daemon needs from its
/// configured signature sections.
pub fn build(sections: &[SignatureConfig]) -> (HashRegistry, CryptRegistry, SignaturePolicy) {
    let mut hashes = HashRegistry::new();
    let mut crypts = CryptRegistry::new();
    seed_registries(&mut hashes, &mut crypts);

    let mut policy = SignaturePolicy::new();
    for section in sections {
        let mut msg_types = MsgTypeBitmap::empty();
        for t in &section.msgtype {
            msg_types.set(*t);
        }
        policy.add(SignatureRecord {
            name: section.name.clone(),
            key: section.key.clone(),
            key_id: section.id.clone(),
            msg_types,
            apply_to_packet: section.packet,
            source_specific: section.source_specific,
            drop_on_bad: section.drop_if_invalid,
            hash_code: code_for(&section.hash),
            crypt_code: code_for(&section.crypt),
        });
    }
    (hashes, crypts, policy)
}

/// A freshly constructed, owned hash provider for `code`, matching the
/// same fixed type-code assignment [`seed_registries`] puts in the
/// shared [`HashRegistry`].
///
/// An outbound [`oonfd_core::rfc5444::writer::MessagePostProcessor`] runs
/// behind a `Box<dyn ... + 'static>`, so it cannot borrow the daemon's
/// shared registry; it needs its own provider instance instead. Inbound
/// verification has no such constraint and keeps using the shared
/// registry directly via [`SignaturePolicy::verify`].
pub fn hash_provider(code: u8) -> Option<Box<dyn HashProvider>> {
    use oonfd_core::icv::sha;
    match code {
        SHA1_CODE => Some(Box::new(sha::Sha1Hash { type_code: SHA1_CODE })),
        SHA256_CODE => Some(Box::new(sha::Sha256Hash { type_code: SHA256_CODE })),
        SHA384_CODE => Some(Box::new(sha::Sha384Hash { type_code: SHA384_CODE })),
        SHA512_CODE => Some(Box::new(sha::Sha512Hash { type_code: SHA512_CODE })),
        _ => None,
    }
}

/// The owned-provider counterpart to [`hash_provider`] for the crypt
/// side of the pipeline.
pub fn crypt_provider(code: u8) -> Option<Box<dyn CryptProvider>> {
    use oonfd_core::icv::sha;
    match code {
        SHA1_CODE => Some(Box::new(sha::hmac_sha1_crypt(SHA1_CODE))),
        SHA256_CODE => Some(Box::new(sha::hmac_sha256_crypt(SHA256_CODE))),
        SHA384_CODE => Some(Box::new(sha::hmac_sha384_crypt(SHA384_CODE))),
        SHA512_CODE => Some(Box::new(sha::hmac_sha512_crypt(SHA512_CODE))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hash_name_falls_back_to_identity() {
        assert_eq!(code_for("nonsense"), IDENTITY_CODE);
        assert_eq!(code_for("SHA256"), SHA256_CODE);
    }

    #[test]
    fn build_registers_one_record_per_section() {
        let sections = vec![SignatureConfig {
            name: "default".into(),
            key: b"k".to_vec(),
            id: b"id1".to_vec(),
            msgtype: vec![1, 2],
            packet: false,
            source_specific: false,
            drop_if_invalid: true,
            hash: "sha256".into(),
            crypt: "sha256".into(),
        }];
        let (_hashes, _crypts, policy) = build(&sections);
        assert_eq!(policy.matching(Some(1)).count(), 1);
        assert_eq!(policy.matching(Some(3)).count(), 0);
    }

    #[test]
    fn owned_providers_mirror_the_seeded_registry_codes() {
        assert_eq!(hash_provider(SHA256_CODE).unwrap().type_code(), SHA256_CODE);
        assert_eq!(crypt_provider(SHA256_CODE).unwrap().type_code(), SHA256_CODE);
        assert!(hash_provider(IDENTITY_CODE).is_none());
        assert!(crypt_provider(IDENTITY_CODE).is_none());
    }
}
