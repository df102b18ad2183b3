//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! login, ledger access and the dual-write use cases.

mod actions;
mod auth;
mod credentials;
mod dual_write;
mod events;
mod ledger;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::{ledger_function, ActionOrchestrator};
pub use auth::{AuthError, AuthPolicy, AuthenticationGate, LoginRequest, SessionPrincipal};
pub use credentials::{CredentialError, CredentialStore};
pub use dual_write::{ActionError, DualWriteCoordinator, RegError};
pub use events::{EventPoller, EventWatcher, EventWatcherHandle, WatchSettings, DEFAULT_EVENT};
pub use ledger::{LedgerClient, LedgerError, LedgerSettings};
