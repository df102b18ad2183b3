//! Ledger port: the JSON-RPC surface of an EVM node.
//!
//! Calls are blocking. Implementations are free to drive an async client
//! internally, but callers see a synchronous API.

use alloy::primitives::{Address, Bytes, TxHash};
use alloy::signers::local::PrivateKeySigner;

use crate::domain::{LedgerTransaction, LogQuery, RawLog, TxReceipt};

/// Trait for ledger node access.
///
/// The node is the authority for transaction outcomes; implementations must
/// not cache receipts.
pub trait Ledger: Send + Sync {
    /// Error type for RPC operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Chain id of the connected network.
    ///
    /// # Errors
    /// Returns error if the node is unreachable.
    fn chain_id(&self) -> Result<u64, Self::Error>;

    /// Accounts managed (unlocked) by the node.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn accounts(&self) -> Result<Vec<Address>, Self::Error>;

    /// Balance in wei.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn balance(&self, account: Address) -> Result<u128, Self::Error>;

    /// Network's suggested gas price in wei.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn gas_price(&self) -> Result<u128, Self::Error>;

    /// Transaction count (next nonce) of an account.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn transaction_count(&self, account: Address) -> Result<u64, Self::Error>;

    /// Submit a transaction and return its hash without waiting.
    ///
    /// With a `signer` the transaction is signed locally and sent raw; the
    /// signer must control `tx.from` and is not retained. Without one the
    /// node signs for `tx.from`.
    ///
    /// # Errors
    /// Returns error if the signer does not match the sender or the node
    /// rejects the transaction.
    fn send_transaction(
        &self,
        tx: &LedgerTransaction,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<TxHash, Self::Error>;

    /// Receipt of a transaction, or `None` while it is pending.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, Self::Error>;

    /// Execute a read-only call against the latest block.
    ///
    /// # Errors
    /// Returns error if the call reverts or the RPC call fails.
    fn call(&self, from: Option<Address>, to: Address, input: Bytes) -> Result<Bytes, Self::Error>;

    /// Latest block number.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn block_number(&self) -> Result<u64, Self::Error>;

    /// Logs matching a filter.
    ///
    /// # Errors
    /// Returns error if the RPC call fails.
    fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, Self::Error>;
}
