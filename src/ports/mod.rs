//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (SQLite, the EVM node,
//! the contract reference file, the Solidity compiler, the reconciliation
//! journal).

mod compiler;
mod contract_store;
mod journal;
mod ledger;
mod storage;

pub use compiler::Compiler;
pub use contract_store::ContractStore;
pub use journal::Journal;
pub use ledger::Ledger;
pub use storage::{Page, Storage};
