//! Credentials and account keypairs.
//!
//! An account keypair is a secp256k1 key whose address doubles as the
//! ledger identity used as transaction sender.
//!
//! # Memory Security
//!
//! Private keys are held in `Zeroizing` buffers and never printed by
//! `Debug`.

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use zeroize::Zeroizing;

use super::kdf::{PasswordHash, SealedKey};
use super::Role;

/// Errors for malformed or mismatched keypairs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid public key (expected a 20-byte hex address): {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Private key does not belong to address {0}")]
    Mismatch(String),
}

/// Parse an address, accepting both checksummed and lowercase forms.
///
/// # Errors
/// Returns error if the string is not a 20-byte hex address.
pub fn parse_address(value: &str) -> Result<Address, KeyError> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|_| KeyError::InvalidPublicKey(value.to_string()))
}

/// Parse a hex private key with or without `0x` prefix.
///
/// # Errors
/// Returns error if the key is not a valid secp256k1 scalar.
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, KeyError> {
    let trimmed = private_key.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex.parse::<PrivateKeySigner>()
        .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))
}

/// Public/private key pair supplied by a user.
#[derive(Clone)]
pub struct AccountKeys {
    public_key: String,
    private_key: Zeroizing<String>,
}

impl AccountKeys {
    #[must_use]
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: Zeroizing::new(private_key.into()),
        }
    }

    /// Generate a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let signer = PrivateKeySigner::random();
        Self {
            public_key: signer.address().to_checksum(None),
            private_key: Zeroizing::new(format!("0x{}", hex::encode(signer.to_bytes()))),
        }
    }

    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    #[must_use]
    pub fn private_key(&self) -> &str {
        self.private_key.as_str()
    }

    /// Check that the private key derives the public address.
    ///
    /// Returns the address on success.
    ///
    /// # Errors
    /// Returns error if either key is malformed or they do not match.
    pub fn validate(&self) -> Result<Address, KeyError> {
        let address = parse_address(&self.public_key)?;
        let signer = parse_signer(&self.private_key)?;
        if signer.address() != address {
            return Err(KeyError::Mismatch(address.to_checksum(None)));
        }
        Ok(address)
    }

    /// Build a local signer for this account.
    ///
    /// # Errors
    /// Returns error if the keypair is invalid.
    pub fn signer(&self) -> Result<PrivateKeySigner, KeyError> {
        self.validate()?;
        parse_signer(&self.private_key)
    }

    /// Public key in canonical (checksummed) form.
    ///
    /// # Errors
    /// Returns error if the public key is malformed.
    pub fn canonical_public_key(&self) -> Result<String, KeyError> {
        Ok(parse_address(&self.public_key)?.to_checksum(None))
    }
}

impl std::fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKeys")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Credential row as persisted off-chain.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password_hash: PasswordHash,
    pub role: Role,
    /// Checksummed account address
    pub public_key: String,
    /// Private key sealed under the user's password
    pub sealed_private_key: SealedKey,
}
