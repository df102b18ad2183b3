//! Login gate with attempt limiting.
//!
//! The gate is either unlocked (counting failed attempts) or locked until an
//! instant. Locking is derived from the clock on each attempt: once the
//! lockout instant has passed the gate unlocks and forgets earlier failures.
//! Nothing runs in the background.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use zeroize::Zeroizing;

use super::credentials::CredentialStore;
use crate::adapters::StorageError;
use crate::domain::Role;
use crate::ports::Storage;

/// Login outcome errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Wrong credentials")]
    WrongCredentials,

    #[error("Too many failed attempts, retry in {0} seconds")]
    LockedOut(u64),

    /// The credential store could not be consulted; not counted as an attempt.
    #[error("Authentication unavailable: {0}")]
    Unavailable(String),
}

/// Attempt limit and lockout duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout: Duration::from_secs(180),
        }
    }
}

/// Credentials entered by the user.
pub struct LoginRequest {
    pub username: String,
    pub password: Zeroizing<String>,
    pub public_key: String,
    pub private_key: Zeroizing<String>,
}

impl LoginRequest {
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            public_key: public_key.into(),
            private_key: Zeroizing::new(private_key.into()),
        }
    }
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// The authenticated user of this session.
///
/// Holds the account's signing key. Writes borrow it for a single
/// transaction, so the key material is wiped when the principal is dropped
/// (k256 signing keys zeroize on drop).
pub struct SessionPrincipal {
    pub username: String,
    pub role: Role,
    pub address: Address,
    signer: PrivateKeySigner,
}

impl SessionPrincipal {
    #[must_use]
    pub fn new(username: impl Into<String>, role: Role, signer: PrivateKeySigner) -> Self {
        Self {
            username: username.into(),
            role,
            address: signer.address(),
            signer,
        }
    }

    /// Signing key for on-chain writes made by this user.
    #[must_use]
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl std::fmt::Debug for SessionPrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPrincipal")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Session-scoped login gate.
pub struct AuthenticationGate<S>
where
    S: Storage,
{
    credentials: Arc<CredentialStore<S>>,
    policy: AuthPolicy,
    attempts: u32,
    lockout_until: Option<Instant>,
    principal: Option<SessionPrincipal>,
}

impl<S> AuthenticationGate<S>
where
    S: Storage,
    S::Error: Into<StorageError>,
{
    pub fn new(credentials: Arc<CredentialStore<S>>, policy: AuthPolicy) -> Self {
        Self {
            credentials,
            policy,
            attempts: 0,
            lockout_until: None,
            principal: None,
        }
    }

    /// Log in with username, password and keypair.
    ///
    /// # Errors
    /// `WrongCredentials`, `LockedOut(seconds)` or `Unavailable`.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        public_key: &str,
        private_key: &str,
    ) -> Result<Role, AuthError> {
        self.login_with(&LoginRequest::new(username, password, public_key, private_key))
    }

    /// Log in with a prepared request.
    ///
    /// # Errors
    /// See [`Self::login`].
    pub fn login_with(&mut self, request: &LoginRequest) -> Result<Role, AuthError> {
        self.login_at(request, Instant::now())
    }

    /// Log in as of `now`.
    ///
    /// # Errors
    /// See [`Self::login`].
    pub fn login_at(&mut self, request: &LoginRequest, now: Instant) -> Result<Role, AuthError> {
        self.refresh(now);

        if let Some(until) = self.lockout_until {
            let remaining = until.saturating_duration_since(now);
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::warn!(username = %request.username, remaining_secs = secs, "Login rejected: locked out");
            return Err(AuthError::LockedOut(secs));
        }

        let outcome = self
            .credentials
            .authenticate(
                &request.username,
                &request.password,
                &request.public_key,
                &request.private_key,
            )
            .map_err(|e| {
                tracing::error!(username = %request.username, error = %e, "Credential lookup failed");
                AuthError::Unavailable(e.to_string())
            })?;

        match outcome {
            Some((credential, signer)) => {
                self.attempts = 0;
                let role = credential.role;
                self.principal = Some(SessionPrincipal::new(credential.username, role, signer));
                tracing::info!(username = %request.username, role = %role, "Login succeeded");
                Ok(role)
            }
            None => {
                self.attempts += 1;
                if self.attempts >= self.policy.max_attempts {
                    self.lockout_until = Some(now + self.policy.lockout);
                    tracing::warn!(
                        username = %request.username,
                        attempts = self.attempts,
                        lockout_secs = self.policy.lockout.as_secs(),
                        "Too many failed logins, locking"
                    );
                } else {
                    tracing::info!(
                        username = %request.username,
                        attempts = self.attempts,
                        "Login failed"
                    );
                }
                Err(AuthError::WrongCredentials)
            }
        }
    }

    /// Unlock if the lockout has expired.
    fn refresh(&mut self, now: Instant) {
        if self.lockout_until.is_some_and(|until| now >= until) {
            self.lockout_until = None;
            self.attempts = 0;
        }
    }

    /// End the session.
    pub fn logout(&mut self) {
        if let Some(principal) = self.principal.take() {
            tracing::info!(username = %principal.username, "Logged out");
        }
        self.attempts = 0;
        self.lockout_until = None;
    }

    #[must_use]
    pub fn principal(&self) -> Option<&SessionPrincipal> {
        self.principal.as_ref()
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether an attempt made at `now` would be rejected outright.
    #[must_use]
    pub fn is_locked_at(&self, now: Instant) -> bool {
        self.lockout_until.is_some_and(|until| now < until)
    }
}
