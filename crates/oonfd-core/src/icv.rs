// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RFC 7182 Integrity Check Value hash/crypt providers: type-code-keyed
//! hash and crypt registries, identity defaults, and a pipeline that
//! composes a hash with a crypt to produce a signature value.

use std::collections::BTreeMap;

/// Type code of the identity hash/crypt, matching every other registered
/// code being non-zero in the concrete providers below.
pub const IDENTITY_CODE: u8 = 0;

pub trait HashProvider: Send + Sync {
    fn type_code(&self) -> u8;
    fn name(&self) -> &'static str;
    /// Fixed output length in bytes for this hash function.
    fn output_len(&self) -> usize;
    fn hash(&self, input: &[u8]) -> Vec<u8>;
}

pub trait CryptProvider: Send + Sync {
    fn type_code(&self) -> u8;
    fn name(&self) -> &'static str;
    /// The encrypt/sign transform applied to a hash digest.
    fn encrypt(&self, digest: &[u8], key: &[u8]) -> Vec<u8>;
}

struct IdentityHash;
impl HashProvider for IdentityHash {
    fn type_code(&self) -> u8 {
        IDENTITY_CODE
    }
    fn name(&self) -> &'static str {
        "identity"
    }
    fn output_len(&self) -> usize {
        // Unbounded: identity hash is exactly the input, length varies.
        0
    }
    fn hash(&self, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }
}

struct IdentityCrypt;
impl CryptProvider for IdentityCrypt {
    fn type_code(&self) -> u8 {
        IDENTITY_CODE
    }
    fn name(&self) -> &'static str {
        "identity"
    }
    fn encrypt(&self, digest: &[u8], _key: &[u8]) -> Vec<u8> {
        digest.to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateCode(u8),
    UnknownCode(u8),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateCode(c) => write!(f, "ICV type code {c} already registered"),
            Self::UnknownCode(c) => write!(f, "ICV type code {c} not registered"),
        }
    }
}
impl std::error::Error for RegistryError {}

/// Type-code-keyed registry of hash providers, seeded with the identity
/// hash.
pub struct HashRegistry {
    providers: BTreeMap<u8, Box<dyn HashProvider>>,
}

impl Default for HashRegistry {
    fn default() -> Self {
        let mut providers: BTreeMap<u8, Box<dyn HashProvider>> = BTreeMap::new();
        providers.insert(IDENTITY_CODE, Box::new(IdentityHash));
        Self { providers }
    }
}

impl HashRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: Box<dyn HashProvider>) -> Result<(), RegistryError> {
        let code = provider.type_code();
        if self.providers.contains_key(&code) {
            return Err(RegistryError::DuplicateCode(code));
        }
        self.providers.insert(code, provider);
        Ok(())
    }

    pub fn remove(&mut self, code: u8) {
        self.providers.remove(&code);
    }

    pub fn get(&self, code: u8) -> Option<&dyn HashProvider> {
        self.providers.get(&code).map(|b| b.as_ref())
    }
}

/// Type-code-keyed registry of crypt providers, seeded with the identity
/// crypt.
pub struct CryptRegistry {
    providers: BTreeMap<u8, Box<dyn CryptProvider>>,
}

impl Default for CryptRegistry {
    fn default() -> Self {
        let mut providers: BTreeMap<u8, Box<dyn CryptProvider>> = BTreeMap::new();
        providers.insert(IDENTITY_CODE, Box::new(IdentityCrypt));
        Self { providers }
    }
}

impl CryptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, provider: Box<dyn CryptProvider>) -> Result<(), RegistryError> {
        let code = provider.type_code();
        if self.providers.contains_key(&code) {
            return Err(RegistryError::DuplicateCode(code));
        }
        self.providers.insert(code, provider);
        Ok(())
    }

    pub fn remove(&mut self, code: u8) {
        self.providers.remove(&code);
    }

    pub fn get(&self, code: u8) -> Option<&dyn CryptProvider> {
        self.providers.get(&code).map(|b| b.as_ref())
    }
}

/// A resolved (hash, crypt) pair as attached to a signature record.
/// `sign` is `encrypt(hash(input))`; `validate` defaults to "sign the
/// input and compare the result to the supplied signature in constant
/// time".
pub struct IcvPipeline<'a> {
    pub hash: &'a dyn HashProvider,
    pub crypt: &'a dyn CryptProvider,
}

impl<'a> IcvPipeline<'a> {
    pub fn resolve(hashes: &'a HashRegistry, crypts: &'a CryptRegistry, hash_code: u8, crypt_code: u8) -> Result<Self, RegistryError> {
        let hash = hashes.get(hash_code).ok_or(RegistryError::UnknownCode(hash_code))?;
        let crypt = crypts.get(crypt_code).ok_or(RegistryError::UnknownCode(crypt_code))?;
        Ok(Self { hash, crypt })
    }

    pub fn sign(&self, input: &[u8], key: &[u8]) -> Vec<u8> {
        self.crypt.encrypt(&self.hash.hash(input), key)
    }

    pub fn validate(&self, input: &[u8], key: &[u8], signature: &[u8]) -> bool {
        let expected = self.sign(input, key);
        constant_time_eq(&expected, signature)
    }
}

/// Constant-time byte comparison: always walks the full (shorter) length
/// regardless of where the first mismatch occurs, so a validation failure
/// does not leak how many leading bytes matched via timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(feature = "crypto")]
pub mod sha {
    //! Concrete SHA-family hash providers and HMAC crypt providers, built
    //! on `ring`.

    use super::{CryptProvider, HashProvider};
    use ring::{digest, hmac};

    pub struct Sha1Hash {
        pub type_code: u8,
    }
    impl HashProvider for Sha1Hash {
        fn type_code(&self) -> u8 {
            self.type_code
        }
        fn name(&self) -> &'static str {
            "sha1"
        }
        fn output_len(&self) -> usize {
            20
        }
        fn hash(&self, input: &[u8]) -> Vec<u8> {
            digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, input).as_ref().to_vec()
        }
    }

    // `ring` does not expose SHA-224 (RFC 7182 lists it as an optional
    // algorithm); SHA-1/256/384/512 below cover every hash `ring` provides.

    pub struct Sha256Hash {
        pub type_code: u8,
    }
    impl HashProvider for Sha256Hash {
        fn type_code(&self) -> u8 {
            self.type_code
        }
        fn name(&self) -> &'static str {
            "sha256"
        }
        fn output_len(&self) -> usize {
            32
        }
        fn hash(&self, input: &[u8]) -> Vec<u8> {
            digest::digest(&digest::SHA256, input).as_ref().to_vec()
        }
    }

    pub struct Sha384Hash {
        pub type_code: u8,
    }
    impl HashProvider for Sha384Hash {
        fn type_code(&self) -> u8 {
            self.type_code
        }
        fn name(&self) -> &'static str {
            "sha384"
        }
        fn output_len(&self) -> usize {
            48
        }
        fn hash(&self, input: &[u8]) -> Vec<u8> {
            digest::digest(&digest::SHA384, input).as_ref().to_vec()
        }
    }

    pub struct Sha512Hash {
        pub type_code: u8,
    }
    impl HashProvider for Sha512Hash {
        fn type_code(&self) -> u8 {
            self.type_code
        }
        fn name(&self) -> &'static str {
            "sha512"
        }
        fn output_len(&self) -> usize {
            64
        }
        fn hash(&self, input: &[u8]) -> Vec<u8> {
            digest::digest(&digest::SHA512, input).as_ref().to_vec()
        }
    }

    /// HMAC with the given key, applied over an already-hashed digest —
    /// i.e. this is the "crypt" half of an HMAC-SHA* ICV pipeline, not a
    /// standalone HMAC-of-message provider.
    pub struct HmacCrypt {
        pub type_code: u8,
        pub algorithm: hmac::Algorithm,
    }
    impl CryptProvider for HmacCrypt {
        fn type_code(&self) -> u8 {
            self.type_code
        }
        fn name(&self) -> &'static str {
            "hmac"
        }
        fn encrypt(&self, digest_bytes: &[u8], key: &[u8]) -> Vec<u8> {
            let key = hmac::Key::new(self.algorithm, key);
            hmac::sign(&key, digest_bytes).as_ref().to_vec()
        }
    }

    pub fn hmac_sha1_crypt(type_code: u8) -> HmacCrypt {
        HmacCrypt {
            type_code,
            algorithm: hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        }
    }

    pub fn hmac_sha256_crypt(type_code: u8) -> HmacCrypt {
        HmacCrypt {
            type_code,
            algorithm: hmac::HMAC_SHA256,
        }
    }

    pub fn hmac_sha384_crypt(type_code: u8) -> HmacCrypt {
        HmacCrypt {
            type_code,
            algorithm: hmac::HMAC_SHA384,
        }
    }

    pub fn hmac_sha512_crypt(type_code: u8) -> HmacCrypt {
        HmacCrypt {
            type_code,
            algorithm: hmac::HMAC_SHA512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_pipeline_signs_as_copy() {
        let hashes = HashRegistry::new();
        let crypts = CryptRegistry::new();
        let pipeline = IcvPipeline::resolve(&hashes, &crypts, IDENTITY_CODE, IDENTITY_CODE).unwrap();
        let sig = pipeline.sign(b"hello", b"key");
        assert_eq!(sig, b"hello");
        assert!(pipeline.validate(b"hello", b"key", &sig));
    }

    #[test]
    fn unknown_code_is_reported() {
        let hashes = HashRegistry::new();
        let crypts = CryptRegistry::new();
        assert!(IcvPipeline::resolve(&hashes, &crypts, 99, IDENTITY_CODE).is_err());
    }

    #[test]
    fn duplicate_code_registration_is_rejected() {
        let mut hashes = HashRegistry::new();
        assert!(hashes.add(Box::new(IdentityHash)).is_err());
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[cfg(feature = "crypto")]
    #[test]
    fn hmac_sha256_round_trip_and_tamper_detection() {
        use sha::{hmac_sha256_crypt, Sha256Hash};

        let mut hashes = HashRegistry::new();
        hashes.add(Box::new(Sha256Hash { type_code: 2 })).unwrap();
        let mut crypts = CryptRegistry::new();
        crypts.add(Box::new(hmac_sha256_crypt(2))).unwrap();

        let pipeline = IcvPipeline::resolve(&hashes, &crypts, 2, 2).unwrap();
        let message = vec![0x42u8; 200];
        let key = b"k";
        let sig = pipeline.sign(&message, key);
        assert!(pipeline.validate(&message, key, &sig));

        let mut tampered = message.clone();
        tampered[100] ^= 0x01;
        assert!(!pipeline.validate(&tampered, key, &sig));
    }
}
