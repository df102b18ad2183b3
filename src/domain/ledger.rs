//! Ledger-side value types: contract references, transactions, receipts, logs.

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, TxHash, B256};
use serde::{Deserialize, Serialize};

/// Current version of the persisted contract reference document.
pub const CONTRACT_REFERENCE_VERSION: u8 = 1;

/// The active contract: address plus interface description.
///
/// Persisted as one document and replaced as a whole on redeploy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractReference {
    pub version: u8,
    pub address: Address,
    pub abi: JsonAbi,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_tx: Option<TxHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ContractReference {
    #[must_use]
    pub fn new(address: Address, abi: JsonAbi) -> Self {
        Self {
            version: CONTRACT_REFERENCE_VERSION,
            address,
            abi,
            deployment_tx: None,
            deployer: None,
            compiler_version: None,
            deployed_at: None,
        }
    }
}

/// Compiler output for one contract.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
    pub compiler_version: String,
}

/// Fully specified transaction, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub input: Bytes,
    pub gas: u64,
    pub gas_price: u128,
    pub nonce: u64,
}

impl LedgerTransaction {
    /// Upper bound of the fee this transaction can burn, in wei.
    #[must_use]
    pub fn max_fee(&self) -> u128 {
        self.gas_price.saturating_mul(u128::from(self.gas))
    }
}

/// Inclusion receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    /// Execution status (`false` = reverted)
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
}

/// Per-call overrides for `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub gas: u64,
    /// Defaults to the network's suggested price
    pub gas_price: Option<u128>,
    /// Defaults to the sender's transaction count
    pub nonce: Option<u64>,
}

impl SubmitOptions {
    pub const DEFAULT_GAS: u64 = 2_000_000;
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            gas: Self::DEFAULT_GAS,
            gas_price: None,
            nonce: None,
        }
    }
}

/// Log filter over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Raw contract log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

/// Contract event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub name: String,
    pub log: RawLog,
}

/// What the coordinator was doing when the two stores diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// The ledger rejected the write; nothing was stored off-chain.
    ChainWriteFailed,
    /// The ledger accepted the write but the off-chain store did not.
    PartialWrite,
}

/// One line of the reconciliation journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: ReconciliationKind,
    pub operation: String,
    pub function: String,
    pub sender: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub error: String,
}
