//! # HealthLedger
//!
//! Healthcare identity and records service with a tamper-evident ledger
//! mirror.
//!
//! This crate provides:
//! - Credential registration and login with attempt limiting
//! - Patient, medic and caregiver profiles, reports and treatment plans in
//!   an off-chain SQLite store
//! - An EVM contract mirroring every write as an auditable transaction
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (roles, profiles, credentials, ledger values)
//! - `ports`: Trait definitions for external operations
//! - `adapters`: Concrete implementations (SQLite, alloy JSON-RPC, solc, files)
//! - `application`: Use cases orchestrating domain and ports
//! - `config`: Runtime configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use domain::{Profile, Role};

/// Result type for HealthLedger operations
pub type Result<T> = std::result::Result<T, HealthLedgerError>;

/// Main error type for HealthLedger
#[derive(Debug, thiserror::Error)]
pub enum HealthLedgerError {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Invalid input: {0}")]
    Validation(#[from] domain::ValidationError),

    #[error(transparent)]
    Credential(#[from] application::CredentialError),

    #[error(transparent)]
    Auth(#[from] application::AuthError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] application::LedgerError),

    #[error(transparent)]
    Action(#[from] application::ActionError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
