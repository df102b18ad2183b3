//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integration with external libraries:
//! - `sqlite`: SQLite for local storage
//! - `evm`: alloy JSON-RPC client for the ledger
//! - `solc`: Solidity compiler, installed on demand
//! - `contract_file`: contract reference slot on disk
//! - `journal`: reconciliation journal
//! - `sanitize`: PII filtering for logs

pub mod contract_file;
pub mod evm;
pub mod journal;
pub mod sanitize;
pub mod solc;
pub mod sqlite;

pub use contract_file::{ContractFileError, FileContractStore};
pub use evm::{AlloyLedger, LedgerRpcError};
pub use journal::{FileJournal, JournalError};
pub use solc::{CompileError, SolcCompiler};
pub use sqlite::{SqliteStorage, StorageError};
