//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the YAML file named
//! by `HEALTHLEDGER_CONFIG`, then individual `HEALTHLEDGER_*` environment
//! variables. The deployer key is never part of the file; it is read from a
//! secret file when a deployment needs it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::application::{AuthPolicy, LedgerSettings, WatchSettings, DEFAULT_EVENT};
use crate::domain::SubmitOptions;

pub const CONFIG_ENV: &str = "HEALTHLEDGER_CONFIG";
const DEPLOYER_KEY_FILE_ENV: &str = "HEALTHLEDGER_DEPLOYER_KEY_FILE";
const DEPLOYER_KEY_ENV: &str = "HEALTHLEDGER_DEPLOYER_KEY";
const DOCKER_SECRET_PATH: &str = "/run/secrets/healthledger_deployer_key";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },

    #[error("Empty secret in {0}")]
    EmptySecret(String),
}

/// Login attempt limiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub max_attempts: u32,
    pub lockout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_secs: 180,
        }
    }
}

/// Transaction and receipt parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub request_timeout_secs: u64,
    pub gas: u64,
    pub deploy_gas: u64,
    pub receipt_timeout_secs: u64,
    pub receipt_poll_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_timeout_secs: 30,
            gas: SubmitOptions::DEFAULT_GAS,
            deploy_gas: 6_000_000,
            receipt_timeout_secs: 60,
            receipt_poll_ms: 500,
        }
    }
}

/// Contract build and deployment artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractConfig {
    /// Persisted contract reference document
    pub reference_path: PathBuf,
    pub source_path: PathBuf,
    /// Contract to deploy when the source defines several
    pub name: Option<String>,
    pub solc_version: String,
    pub solc_dir: PathBuf,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            reference_path: PathBuf::from("on_chain/contract.json"),
            source_path: PathBuf::from("on_chain/on_chain.sol"),
            name: None,
            solc_version: "0.8.0".to_string(),
            solc_dir: PathBuf::from(".solc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventConfig {
    pub event: String,
    pub poll_interval_secs: u64,
    pub max_block_range: u64,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            event: DEFAULT_EVENT.to_string(),
            poll_interval_secs: 10,
            max_block_range: 1_000,
        }
    }
}

/// Where logs go: `auto`, `stdout` or `file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub mode: String,
    pub file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            mode: "auto".to_string(),
            file: PathBuf::from("healthledger.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub db_path: PathBuf,
    pub journal_path: PathBuf,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    pub contract: ContractConfig,
    pub events: EventConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns error if the config file is unreadable or a value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(path.trim()))?,
            None => Self::defaults(),
        };
        config.apply_env(&lookup)?;
        Ok(config)
    }

    fn defaults() -> Self {
        Self {
            db_path: PathBuf::from("healthledger.db"),
            journal_path: PathBuf::from("reconciliation.jsonl"),
            ..Self::default()
        }
    }

    /// Parse a YAML file over the defaults.
    ///
    /// # Errors
    /// Returns `Io` or `Yaml`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// # Errors
    /// Returns `Yaml` for malformed documents or unknown keys.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let defaults = Self::defaults();
        let mut config: Self = serde_yaml::from_str(text)?;
        if config.db_path.as_os_str().is_empty() {
            config.db_path = defaults.db_path;
        }
        if config.journal_path.as_os_str().is_empty() {
            config.journal_path = defaults.journal_path;
        }
        Ok(config)
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let path = |var: &str, slot: &mut PathBuf| {
            if let Some(v) = lookup(var) {
                *slot = PathBuf::from(v.trim());
            }
        };
        path("HEALTHLEDGER_DB_PATH", &mut self.db_path);
        path("HEALTHLEDGER_JOURNAL_PATH", &mut self.journal_path);
        path("HEALTHLEDGER_CONTRACT_PATH", &mut self.contract.reference_path);
        path("HEALTHLEDGER_CONTRACT_SOURCE", &mut self.contract.source_path);
        path("HEALTHLEDGER_SOLC_DIR", &mut self.contract.solc_dir);
        path("HEALTHLEDGER_LOG_FILE", &mut self.log.file);

        if let Some(v) = lookup("HEALTHLEDGER_RPC_URL") {
            self.ledger.rpc_url = v.trim().to_string();
        }
        if let Some(v) = lookup("HEALTHLEDGER_SOLC_VERSION") {
            self.contract.solc_version = v.trim().to_string();
        }
        if let Some(v) = lookup("HEALTHLEDGER_LOG_MODE") {
            self.log.mode = v.trim().to_lowercase();
        }

        parse_into(lookup, "HEALTHLEDGER_MAX_LOGIN_ATTEMPTS", &mut self.auth.max_attempts)?;
        parse_into(lookup, "HEALTHLEDGER_LOCKOUT_SECS", &mut self.auth.lockout_secs)?;
        parse_into(lookup, "HEALTHLEDGER_GAS", &mut self.ledger.gas)?;
        parse_into(lookup, "HEALTHLEDGER_RECEIPT_TIMEOUT_SECS", &mut self.ledger.receipt_timeout_secs)?;
        parse_into(lookup, "HEALTHLEDGER_EVENT_POLL_SECS", &mut self.events.poll_interval_secs)?;

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "auth.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !matches!(self.log.mode.as_str(), "auto" | "stdout" | "file") {
            return Err(ConfigError::InvalidValue {
                var: "log.mode",
                reason: format!("expected auto, stdout or file, got {}", self.log.mode),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy {
            max_attempts: self.auth.max_attempts,
            lockout: Duration::from_secs(self.auth.lockout_secs),
        }
    }

    #[must_use]
    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            receipt_timeout: Duration::from_secs(self.ledger.receipt_timeout_secs),
            receipt_poll_interval: Duration::from_millis(self.ledger.receipt_poll_ms),
            deploy_gas: self.ledger.deploy_gas,
        }
    }

    #[must_use]
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            gas: self.ledger.gas,
            ..SubmitOptions::default()
        }
    }

    #[must_use]
    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            event: self.events.event.clone(),
            poll_interval: Duration::from_secs(self.events.poll_interval_secs),
            max_block_range: self.events.max_block_range,
            start_block: None,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.request_timeout_secs)
    }
}

fn parse_into<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = lookup(var) {
        *slot = v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Deployer private key, if one is provisioned.
///
/// Looks at `HEALTHLEDGER_DEPLOYER_KEY_FILE`, then the Docker secret; the
/// plain `HEALTHLEDGER_DEPLOYER_KEY` variable is honored in debug builds
/// only. `None` means deployments use the node's first unlocked account.
///
/// # Errors
/// Returns error if a named secret file is unreadable or empty.
pub fn deployer_key(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<Zeroizing<String>>, ConfigError> {
    if let Some(path) = lookup(DEPLOYER_KEY_FILE_ENV) {
        return read_secret(Path::new(path.trim())).map(Some);
    }

    if Path::new(DOCKER_SECRET_PATH).exists() {
        return read_secret(Path::new(DOCKER_SECRET_PATH)).map(Some);
    }

    if cfg!(debug_assertions) {
        if let Some(v) = lookup(DEPLOYER_KEY_ENV) {
            let secret = Zeroizing::new(v.trim().to_string());
            if secret.is_empty() {
                return Err(ConfigError::EmptySecret(DEPLOYER_KEY_ENV.to_string()));
            }
            return Ok(Some(secret));
        }
    }

    Ok(None)
}

fn read_secret(path: &Path) -> Result<Zeroizing<String>, ConfigError> {
    let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?);
    let secret = Zeroizing::new(content.trim().to_string());
    if secret.is_empty() {
        return Err(ConfigError::EmptySecret(path.display().to_string()));
    }
    Ok(secret)
}
