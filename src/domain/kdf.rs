//! Password hashing and private-key sealing.
//!
//! This module provides:
//! - Argon2id password hash records that carry their own cost parameters
//! - AES-256-GCM envelope encryption of account private keys
//!
//! # Security
//!
//! - Argon2id is memory-hard (resistant to GPU/ASIC attacks)
//! - Every hash and every sealed key gets a fresh random salt
//! - Digest comparison is constant-time
//! - Parameters are stored next to the digest, so changing
//!   [`KdfParams::default`] never invalidates existing records

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{password_hash::Output, Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Current version of the password hash record.
pub const PASSWORD_HASH_VERSION: u8 = 1;

/// Current version of the sealed key byte layout.
pub const SEALED_KEY_VERSION: u8 = 1;

const ALGORITHM: &str = "argon2id";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const SEAL_KEY_LEN: usize = 32;

/// Errors during hashing or key sealing.
#[derive(Debug, Error)]
pub enum KdfError {
    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Invalid cost parameters: {0}")]
    InvalidParams(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("Invalid record format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported record version {0}")]
    UnsupportedVersion(u8),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub m_cost: u32,
    /// Number of passes
    pub t_cost: u32,
    /// Degree of parallelism
    pub p_cost: u32,
    /// Digest length in bytes (16..=64)
    pub output_len: usize,
}

impl Default for KdfParams {
    /// OWASP baseline for Argon2id (19 MiB, 2 passes, 1 lane).
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
            output_len: 32,
        }
    }
}

impl KdfParams {
    /// Build the Argon2id instance for these parameters.
    ///
    /// # Errors
    /// Returns error if the parameters are outside Argon2's accepted ranges.
    fn argon2(&self, output_len: usize) -> Result<Argon2<'static>, KdfError> {
        if !(16..=64).contains(&self.output_len) {
            return Err(KdfError::InvalidParams(format!(
                "output length {} not in 16..=64",
                self.output_len
            )));
        }
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(output_len))
            .map_err(|e| KdfError::InvalidParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn derive(&self, secret: &[u8], salt: &[u8], out: &mut [u8]) -> Result<(), KdfError> {
        self.argon2(out.len())?
            .hash_password_into(secret, salt, out)
            .map_err(|e| KdfError::Derivation(e.to_string()))
    }
}

fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Self-describing password hash.
///
/// Serialized as a JSON object, so no field can collide with a delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub version: u8,
    pub algorithm: String,
    pub params: KdfParams,
    /// Base64 salt
    pub salt: String,
    /// Base64 digest
    pub digest: String,
}

impl PasswordHash {
    /// Hash a password with a fresh salt and the given parameters.
    ///
    /// # Errors
    /// Returns error if the parameters are invalid.
    pub fn generate(password: &str, params: &KdfParams) -> Result<Self, KdfError> {
        let salt = random_salt();
        let mut digest = Zeroizing::new(vec![0u8; params.output_len]);
        params.derive(password.as_bytes(), &salt, &mut digest)?;

        Ok(Self {
            version: PASSWORD_HASH_VERSION,
            algorithm: ALGORITHM.to_string(),
            params: *params,
            salt: B64.encode(salt),
            digest: B64.encode(digest.as_slice()),
        })
    }

    /// Recompute the digest with the stored salt and parameters and compare.
    ///
    /// A wrong password yields `Ok(false)`; errors are reserved for corrupt
    /// records.
    ///
    /// # Errors
    /// Returns error if the record cannot be interpreted.
    pub fn verify(&self, password: &str) -> Result<bool, KdfError> {
        self.check_header()?;

        let salt = B64
            .decode(&self.salt)
            .map_err(|e| KdfError::InvalidFormat(format!("salt: {e}")))?;
        let expected = B64
            .decode(&self.digest)
            .map_err(|e| KdfError::InvalidFormat(format!("digest: {e}")))?;
        if expected.len() != self.params.output_len {
            return Err(KdfError::InvalidFormat(
                "digest length does not match parameters".to_string(),
            ));
        }

        let mut computed = Zeroizing::new(vec![0u8; self.params.output_len]);
        self.params.derive(password.as_bytes(), &salt, &mut computed)?;

        let expected =
            Output::new(&expected).map_err(|e| KdfError::InvalidFormat(e.to_string()))?;
        let computed =
            Output::new(&computed).map_err(|e| KdfError::InvalidFormat(e.to_string()))?;

        // `Output` equality is constant-time.
        Ok(expected == computed)
    }

    fn check_header(&self) -> Result<(), KdfError> {
        if self.version != PASSWORD_HASH_VERSION {
            return Err(KdfError::UnsupportedVersion(self.version));
        }
        if self.algorithm != ALGORITHM {
            return Err(KdfError::InvalidFormat(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }
        Ok(())
    }

    /// Encode for storage.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn encode(&self) -> Result<String, KdfError> {
        serde_json::to_string(self).map_err(|e| KdfError::InvalidFormat(e.to_string()))
    }

    /// Decode a stored record.
    ///
    /// # Errors
    /// Returns error if the string is not a supported hash record.
    pub fn decode(encoded: &str) -> Result<Self, KdfError> {
        let record: Self =
            serde_json::from_str(encoded).map_err(|e| KdfError::InvalidFormat(e.to_string()))?;
        record.check_header()?;
        Ok(record)
    }
}

/// Private key material sealed under a password-derived key.
#[derive(Debug, Clone)]
pub struct SealedKey {
    pub params: KdfParams,
    pub salt: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedKey {
    /// Serialize to bytes for storage.
    ///
    /// Layout: `version | m_cost | t_cost | p_cost | salt_len | salt | nonce | ciphertext`,
    /// integers little-endian.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(1 + 12 + 1 + self.salt.len() + NONCE_LEN + self.ciphertext.len());
        out.push(SEALED_KEY_VERSION);
        out.extend_from_slice(&self.params.m_cost.to_le_bytes());
        out.extend_from_slice(&self.params.t_cost.to_le_bytes());
        out.extend_from_slice(&self.params.p_cost.to_le_bytes());
        out.push(self.salt.len() as u8);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Deserialize from bytes.
    ///
    /// # Errors
    /// Returns error if the byte layout is invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KdfError> {
        let short = || KdfError::InvalidFormat("sealed key truncated".to_string());
        let (&version, rest) = bytes.split_first().ok_or_else(short)?;
        if version != SEALED_KEY_VERSION {
            return Err(KdfError::UnsupportedVersion(version));
        }
        if rest.len() < 13 {
            return Err(short());
        }

        let read_u32 = |at: usize| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&rest[at..at + 4]);
            u32::from_le_bytes(buf)
        };
        let params = KdfParams {
            m_cost: read_u32(0),
            t_cost: read_u32(4),
            p_cost: read_u32(8),
            output_len: SEAL_KEY_LEN,
        };

        let salt_len = rest[12] as usize;
        let body = &rest[13..];
        if body.len() < salt_len + NONCE_LEN {
            return Err(short());
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&body[salt_len..salt_len + NONCE_LEN]);

        Ok(Self {
            params,
            salt: body[..salt_len].to_vec(),
            nonce,
            ciphertext: body[salt_len + NONCE_LEN..].to_vec(),
        })
    }
}

fn cipher_for(password: &str, params: &KdfParams, salt: &[u8]) -> Result<Aes256Gcm, KdfError> {
    let mut key = Zeroizing::new([0u8; SEAL_KEY_LEN]);
    params.derive(password.as_bytes(), salt, key.as_mut_slice())?;
    Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| KdfError::Encryption(e.to_string()))
}

/// Seal key material under a password.
///
/// # Errors
/// Returns error if key derivation or encryption fails.
pub fn seal_key(plaintext: &[u8], password: &str, params: &KdfParams) -> Result<SealedKey, KdfError> {
    let params = KdfParams {
        output_len: SEAL_KEY_LEN,
        ..*params
    };
    let salt = random_salt();
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = cipher_for(password, &params, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| KdfError::Encryption(e.to_string()))?;

    Ok(SealedKey {
        params,
        salt: salt.to_vec(),
        nonce,
        ciphertext,
    })
}

/// Open sealed key material.
///
/// # Errors
/// Returns `KdfError::Decryption` if the password is wrong or data is tampered.
pub fn open_key(sealed: &SealedKey, password: &str) -> Result<Zeroizing<Vec<u8>>, KdfError> {
    let cipher = cipher_for(password, &sealed.params, &sealed.salt)?;
    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| KdfError::Decryption)
}

#[cfg(test)]
pub(crate) fn test_params() -> KdfParams {
    KdfParams {
        m_cost: 64,
        t_cost: 1,
        p_cost: 1,
        output_len: 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hash_verifies_own_password() {
        let hash = PasswordHash::generate("correct-horse", &test_params()).expect("Should hash");
        assert!(hash.verify("correct-horse").expect("Should verify"));
        assert!(!hash.verify("wrong-horse").expect("Should verify"));
    }

    #[test]
    fn test_same_password_gets_different_salts() {
        let a = PasswordHash::generate("same", &test_params()).expect("Should hash");
        let b = PasswordHash::generate("same", &test_params()).expect("Should hash");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_verification_ignores_current_defaults() {
        let old = KdfParams {
            m_cost: 128,
            t_cost: 3,
            p_cost: 2,
            output_len: 48,
        };
        let encoded = PasswordHash::generate("stable", &old)
            .expect("Should hash")
            .encode()
            .expect("Should encode");

        // A record written under different parameters still verifies, because
        // its own parameters travel with it.
        assert_ne!(old, KdfParams::default());
        let decoded = PasswordHash::decode(&encoded).expect("Should decode");
        assert_eq!(decoded.params, old);
        assert!(decoded.verify("stable").expect("Should verify"));
    }

    #[test]
    fn test_decode_rejects_foreign_records() {
        assert!(PasswordHash::decode("deadbeef$00$2$8$1$64").is_err());

        let mut record = PasswordHash::generate("pw", &test_params()).expect("Should hash");
        record.version = 9;
        let encoded = serde_json::to_string(&record).expect("Should serialize");
        assert!(matches!(
            PasswordHash::decode(&encoded),
            Err(KdfError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_output_len_bounds_enforced() {
        let params = KdfParams {
            output_len: 8,
            ..test_params()
        };
        assert!(matches!(
            PasswordHash::generate("pw", &params),
            Err(KdfError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_seal_open_roundtrip_through_bytes() {
        let secret = b"0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
        let sealed = seal_key(secret, "pw", &test_params()).expect("Should seal");
        let restored = SealedKey::from_bytes(&sealed.to_bytes()).expect("Should parse");
        let opened = open_key(&restored, "pw").expect("Should open");
        assert_eq!(opened.as_slice(), secret);
    }

    #[test]
    fn test_open_with_wrong_password_fails() {
        let sealed = seal_key(b"key", "right", &test_params()).expect("Should seal");
        assert!(matches!(open_key(&sealed, "wrong"), Err(KdfError::Decryption)));
    }

    #[test]
    fn test_truncated_sealed_key_rejected() {
        let bytes = seal_key(b"key", "pw", &test_params())
            .expect("Should seal")
            .to_bytes();
        assert!(SealedKey::from_bytes(&bytes[..10]).is_err());
        assert!(SealedKey::from_bytes(&[]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_hash_accepts_only_its_password(
            password in ".{0,24}",
            other in ".{0,24}",
            m_cost in 32u32..256,
            t_cost in 1u32..3,
            p_cost in 1u32..=3,
            output_len in 16usize..=64,
        ) {
            let params = KdfParams { m_cost, t_cost, p_cost, output_len };
            let hash = PasswordHash::generate(&password, &params).expect("Should hash");
            let decoded = PasswordHash::decode(&hash.encode().expect("Should encode"))
                .expect("Should decode");
            prop_assert!(decoded.verify(&password).expect("Should verify"));
            if other != password {
                prop_assert!(!decoded.verify(&other).expect("Should verify"));
            }
        }
    }
}
