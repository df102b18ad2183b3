//! Credential service: registration, password verification and rotation.
//!
//! Passwords are stored as self-describing Argon2id records, so existing
//! rows keep verifying after the default cost parameters change. The account
//! private key is sealed under the password and re-sealed on rotation.

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use zeroize::Zeroizing;

use crate::adapters::StorageError;
use crate::domain::{
    credential::parse_signer,
    kdf::{self, KdfError, KdfParams, PasswordHash},
    validation, AccountKeys, Credential, KeyError, Role, ValidationError,
};
use crate::ports::Storage;

/// Errors from credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Old password does not match")]
    WrongOldPassword,

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Key derivation error: {0}")]
    Kdf(#[from] KdfError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<KeyError> for CredentialError {
    fn from(e: KeyError) -> Self {
        Self::Validation(ValidationError::InvalidKeypair(e))
    }
}

/// Translate a uniqueness violation from the store into the matching
/// validation error.
pub(crate) fn conflict_to_validation(err: &StorageError, username: &str) -> Option<ValidationError> {
    let StorageError::Conflict(msg) = err else {
        return None;
    };
    let column = msg.rsplit('.').next().unwrap_or_default();
    Some(match column {
        "username" => ValidationError::DuplicateUsername(username.to_string()),
        "public_key" => ValidationError::DuplicateKey,
        "mail" => ValidationError::DuplicateEmail,
        "phone" => ValidationError::DuplicatePhone,
        _ => return None,
    })
}

/// Credential store over an off-chain `Storage`.
pub struct CredentialStore<S>
where
    S: Storage,
{
    storage: Arc<S>,
    params: KdfParams,
}

impl<S> CredentialStore<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    /// Create a store hashing new passwords with the default parameters.
    pub fn new(storage: Arc<S>) -> Self {
        Self::with_params(storage, KdfParams::default())
    }

    /// Create a store hashing new passwords with explicit parameters.
    pub fn with_params(storage: Arc<S>, params: KdfParams) -> Self {
        Self { storage, params }
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    fn storage_err(e: S::Error) -> CredentialError {
        CredentialError::Storage(e.into())
    }

    /// Check username format and availability of username and public key.
    ///
    /// # Errors
    /// Returns the first failed check; performs no writes.
    pub fn check_available(&self, username: &str, keys: &AccountKeys) -> Result<(), CredentialError> {
        validation::check_username(username)?;
        keys.validate()?;

        if self.storage.username_exists(username).map_err(Self::storage_err)? {
            return Err(ValidationError::DuplicateUsername(username.to_string()).into());
        }
        if self
            .storage
            .public_key_exists(&keys.canonical_public_key()?)
            .map_err(Self::storage_err)?
        {
            return Err(ValidationError::DuplicateKey.into());
        }
        Ok(())
    }

    /// Hash the password and seal the private key into a credential row.
    ///
    /// Pure apart from randomness: nothing is written.
    ///
    /// # Errors
    /// Returns error if the keypair is invalid or hashing fails.
    pub fn build_credential(
        &self,
        username: &str,
        password: &str,
        role: Role,
        keys: &AccountKeys,
    ) -> Result<Credential, CredentialError> {
        let signer = keys.signer()?;
        let secret = Zeroizing::new(hex::encode(signer.to_bytes()));

        Ok(Credential {
            username: username.to_string(),
            password_hash: PasswordHash::generate(password, &self.params)?,
            role,
            public_key: keys.canonical_public_key()?,
            sealed_private_key: kdf::seal_key(secret.as_bytes(), password, &self.params)?,
        })
    }

    /// Register a bare credential.
    ///
    /// # Errors
    /// Returns `DuplicateUsername`/`DuplicateKey` if taken (also when a
    /// concurrent insert wins the race), or a storage error.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        role: Role,
        keys: &AccountKeys,
    ) -> Result<(), CredentialError> {
        self.check_available(username, keys)?;
        let credential = self.build_credential(username, password, role, keys)?;

        self.storage
            .insert_credential(&credential)
            .map_err(|e| {
                let e = e.into();
                match conflict_to_validation(&e, username) {
                    Some(v) => CredentialError::Validation(v),
                    None => CredentialError::Storage(e),
                }
            })?;

        tracing::info!(username, role = %role, "Credential registered");
        Ok(())
    }

    /// Whether `password` is the user's password.
    ///
    /// Unknown users verify as `false`.
    ///
    /// # Errors
    /// Returns error only if storage fails or the stored record is unusable.
    pub fn verify(&self, username: &str, password: &str) -> Result<bool, CredentialError> {
        match self.storage.load_credential(username).map_err(Self::storage_err)? {
            Some(credential) => Ok(credential.password_hash.verify(password)?),
            None => Ok(false),
        }
    }

    /// Full login check: password, public key and private key.
    ///
    /// Returns the credential and the unsealed signer on success.
    ///
    /// # Errors
    /// Returns error only on storage failure or a corrupt record; wrong
    /// credentials yield `Ok(None)`.
    pub fn authenticate(
        &self,
        username: &str,
        password: &str,
        public_key: &str,
        private_key: &str,
    ) -> Result<Option<(Credential, PrivateKeySigner)>, CredentialError> {
        let Some(credential) = self.storage.load_credential(username).map_err(Self::storage_err)?
        else {
            return Ok(None);
        };

        if !credential.password_hash.verify(password)? {
            return Ok(None);
        }

        let supplied = AccountKeys::new(public_key, private_key);
        let Ok(address) = supplied.validate() else {
            return Ok(None);
        };
        if address.to_checksum(None) != credential.public_key {
            return Ok(None);
        }

        let stored = kdf::open_key(&credential.sealed_private_key, password)?;
        let stored = std::str::from_utf8(&stored)
            .map_err(|_| KdfError::InvalidFormat("sealed key is not text".to_string()))?;
        let stored = parse_signer(stored)?;
        let supplied = supplied.signer()?;

        if stored.to_bytes() != supplied.to_bytes() {
            return Ok(None);
        }
        Ok(Some((credential, supplied)))
    }

    /// Boolean form of [`Self::authenticate`].
    ///
    /// # Errors
    /// See [`Self::authenticate`].
    pub fn check_credentials(
        &self,
        username: &str,
        password: &str,
        public_key: &str,
        private_key: &str,
    ) -> Result<bool, CredentialError> {
        Ok(self
            .authenticate(username, password, public_key, private_key)?
            .is_some())
    }

    /// Replace the password, re-sealing the private key under the new one.
    ///
    /// # Errors
    /// Returns `WrongOldPassword` if `old` does not verify.
    pub fn change_password(&self, username: &str, old: &str, new: &str) -> Result<(), CredentialError> {
        let mut credential = self
            .storage
            .load_credential(username)
            .map_err(Self::storage_err)?
            .ok_or_else(|| CredentialError::UnknownUser(username.to_string()))?;

        if !credential.password_hash.verify(old)? {
            return Err(CredentialError::WrongOldPassword);
        }

        let secret = kdf::open_key(&credential.sealed_private_key, old)?;
        credential.password_hash = PasswordHash::generate(new, &self.params)?;
        credential.sealed_private_key = kdf::seal_key(&secret, new, &self.params)?;

        self.storage
            .update_credential_secrets(&credential)
            .map_err(Self::storage_err)?;

        tracing::info!(username, "Password changed");
        Ok(())
    }

    /// Role of a registered user.
    ///
    /// # Errors
    /// Returns error if storage fails.
    pub fn role_of(&self, username: &str) -> Result<Option<Role>, CredentialError> {
        Ok(self
            .storage
            .load_credential(username)
            .map_err(Self::storage_err)?
            .map(|c| c.role))
    }
}
