//! EVM adapter: `Ledger` over an alloy JSON-RPC provider.
//!
//! The provider is async; every call is driven to completion on a private
//! current-thread tokio runtime and bounded by the configured request timeout.
//! Transactions submitted with a signer are signed locally and sent raw; all
//! others go through `eth_sendTransaction` and are signed by the node. No
//! signing key is held between calls.

use std::future::Future;
use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use tokio::runtime::Runtime;

use crate::domain::{LedgerTransaction, LogQuery, RawLog, TxReceipt};
use crate::ports::Ledger;

/// Errors from the JSON-RPC adapter.
#[derive(Debug, thiserror::Error)]
pub enum LedgerRpcError {
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("RPC error in {method}: {reason}")]
    Rpc { method: &'static str, reason: String },

    #[error("RPC {method} timed out after {secs}s")]
    Timeout { method: &'static str, secs: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Ledger backed by an HTTP JSON-RPC endpoint.
pub struct AlloyLedger {
    runtime: Runtime,
    provider: DynProvider,
    endpoint: String,
    request_timeout: Duration,
}

impl AlloyLedger {
    /// Build a client for `endpoint`.
    ///
    /// No request is made here; use [`Ledger::chain_id`] to probe the node.
    ///
    /// # Errors
    /// Returns error if the endpoint is not a valid URL or the runtime cannot
    /// be created.
    pub fn connect(endpoint: &str, request_timeout: Duration) -> Result<Self, LedgerRpcError> {
        let url = endpoint
            .parse::<reqwest::Url>()
            .map_err(|e| LedgerRpcError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let provider = ProviderBuilder::new().connect_http(url).erased();

        tracing::debug!(endpoint, "Ledger provider created");

        Ok(Self {
            runtime,
            provider,
            endpoint: endpoint.to_string(),
            request_timeout,
        })
    }

    /// Endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Drive one RPC future to completion under the request timeout.
    fn run<T, E, F>(&self, method: &'static str, fut: F) -> Result<T, LedgerRpcError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let timeout = self.request_timeout;
        self.runtime
            .block_on(async move { tokio::time::timeout(timeout, fut).await })
            .map_err(|_| LedgerRpcError::Timeout {
                method,
                secs: timeout.as_secs(),
            })?
            .map_err(|e| LedgerRpcError::Rpc {
                method,
                reason: e.to_string(),
            })
    }
}

/// Translate a fully specified transaction into an RPC request.
fn to_request(tx: &LedgerTransaction, chain_id: Option<u64>) -> TransactionRequest {
    let request = TransactionRequest::default()
        .with_from(tx.from)
        .with_gas_limit(tx.gas)
        .with_gas_price(tx.gas_price)
        .with_nonce(tx.nonce);

    let request = match tx.to {
        Some(to) => request.with_to(to).with_input(tx.input.clone()),
        None => request.with_deploy_code(tx.input.clone()),
    };

    match chain_id {
        Some(id) => request.with_chain_id(id),
        None => request,
    }
}

fn to_filter(query: &LogQuery) -> Filter {
    let filter = Filter::new()
        .address(query.address)
        .from_block(BlockNumberOrTag::Number(query.from_block))
        .to_block(BlockNumberOrTag::Number(query.to_block));
    match query.topic0 {
        Some(topic) => filter.event_signature(topic),
        None => filter,
    }
}

impl Ledger for AlloyLedger {
    type Error = LedgerRpcError;

    fn chain_id(&self) -> Result<u64, Self::Error> {
        self.run("eth_chainId", self.provider.get_chain_id())
    }

    fn accounts(&self) -> Result<Vec<Address>, Self::Error> {
        self.run("eth_accounts", self.provider.get_accounts())
    }

    fn balance(&self, account: Address) -> Result<u128, Self::Error> {
        let wei = self.run("eth_getBalance", async {
            self.provider.get_balance(account).await
        })?;
        Ok(wei.saturating_to::<u128>())
    }

    fn gas_price(&self) -> Result<u128, Self::Error> {
        self.run("eth_gasPrice", self.provider.get_gas_price())
    }

    fn transaction_count(&self, account: Address) -> Result<u64, Self::Error> {
        self.run("eth_getTransactionCount", async {
            self.provider.get_transaction_count(account).await
        })
    }

    fn send_transaction(
        &self,
        tx: &LedgerTransaction,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<TxHash, Self::Error> {
        match signer {
            Some(signer) => {
                if signer.address() != tx.from {
                    return Err(LedgerRpcError::Signing(format!(
                        "key for {} cannot sign for {}",
                        signer.address(),
                        tx.from
                    )));
                }
                let chain_id = self.chain_id()?;
                let wallet = EthereumWallet::from(signer.clone());
                let envelope = self
                    .runtime
                    .block_on(to_request(tx, Some(chain_id)).build(&wallet))
                    .map_err(|e| LedgerRpcError::Signing(e.to_string()))?;
                self.run("eth_sendRawTransaction", async {
                    self.provider
                        .send_tx_envelope(envelope)
                        .await
                        .map(|pending| *pending.tx_hash())
                })
            }
            None => self.run("eth_sendTransaction", async {
                self.provider
                    .send_transaction(to_request(tx, None))
                    .await
                    .map(|pending| *pending.tx_hash())
            }),
        }
    }

    fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, Self::Error> {
        let receipt = self.run(
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(tx_hash),
        )?;

        Ok(receipt.map(|r| TxReceipt {
            tx_hash: r.transaction_hash,
            success: r.status(),
            block_number: r.block_number,
            gas_used: r.gas_used,
            contract_address: r.contract_address,
        }))
    }

    fn call(&self, from: Option<Address>, to: Address, input: Bytes) -> Result<Bytes, Self::Error> {
        let mut request = TransactionRequest::default().with_to(to).with_input(input);
        if let Some(from) = from {
            request = request.with_from(from);
        }
        self.run("eth_call", async { self.provider.call(request).await })
    }

    fn block_number(&self) -> Result<u64, Self::Error> {
        self.run("eth_blockNumber", self.provider.get_block_number())
    }

    fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, Self::Error> {
        let filter = to_filter(query);
        let logs = self.run("eth_getLogs", async { self.provider.get_logs(&filter).await })?;

        Ok(logs
            .into_iter()
            .map(|log| RawLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number,
                tx_hash: log.transaction_hash,
                log_index: log.log_index,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, TxKind};

    fn sample_tx(to: Option<Address>) -> LedgerTransaction {
        LedgerTransaction {
            from: address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            to,
            input: Bytes::from_static(&[0xde, 0xad]),
            gas: 2_000_000,
            gas_price: 1_000_000_000,
            nonce: 7,
        }
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = AlloyLedger::connect("not a url", Duration::from_secs(1));
        assert!(matches!(result, Err(LedgerRpcError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_connect_is_lazy() {
        let ledger = AlloyLedger::connect("http://127.0.0.1:9", Duration::from_millis(200))
            .expect("Should build client without contacting the node");
        assert_eq!(ledger.endpoint(), "http://127.0.0.1:9");
    }

    #[test]
    fn test_call_request_fields() {
        let to = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
        let request = to_request(&sample_tx(Some(to)), Some(31337));

        assert_eq!(request.to, Some(TxKind::Call(to)));
        assert_eq!(request.gas, Some(2_000_000));
        assert_eq!(request.gas_price, Some(1_000_000_000));
        assert_eq!(request.nonce, Some(7));
        assert_eq!(request.chain_id, Some(31337));
    }

    #[test]
    fn test_deploy_request_targets_create() {
        let request = to_request(&sample_tx(None), None);
        assert_eq!(request.to, Some(TxKind::Create));
        assert_eq!(request.chain_id, None);
    }

    #[test]
    fn test_signer_must_control_sender() {
        let ledger = AlloyLedger::connect("http://127.0.0.1:9", Duration::from_millis(200))
            .expect("Should build client");
        let signer = PrivateKeySigner::random();

        // Rejected before any request reaches the (absent) node.
        let err = ledger
            .send_transaction(&sample_tx(None), Some(&signer))
            .expect_err("Should reject foreign signer");
        assert!(matches!(err, LedgerRpcError::Signing(_)));
    }

    #[test]
    fn test_filter_carries_topic() {
        let topic = b256!("0000000000000000000000000000000000000000000000000000000000000001");
        let filter = to_filter(&LogQuery {
            address: Address::ZERO,
            topic0: Some(topic),
            from_block: 10,
            to_block: 20,
        });
        assert_eq!(filter.get_from_block(), Some(10));
        assert_eq!(filter.get_to_block(), Some(20));
    }
}
