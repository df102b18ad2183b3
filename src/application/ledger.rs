//! Ledger client: contract lifecycle and transaction submission.
//!
//! Wraps a `Ledger` port with the active contract reference. Function
//! arguments arrive as strings and are coerced to the ABI types of the loaded
//! contract before anything touches the network; writes wait for a receipt
//! under a client-side timeout.

use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::{Event, Function};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::signers::local::PrivateKeySigner;

use crate::domain::{
    credential::parse_address, ContractReference, LedgerTransaction, SubmitOptions, TxReceipt,
};
use crate::ports::{Compiler, ContractStore, Ledger};

/// Errors at the ledger boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    ChainConnection(String),

    #[error("No contract loaded; deploy the contract first")]
    ContractNotLoaded,

    #[error("Invalid sender address: {0:?}")]
    InvalidSender(String),

    #[error("No ledger function for {action} {entity}")]
    UnsupportedAction { action: String, entity: String },

    #[error("Contract has no function {0}")]
    UnknownFunction(String),

    #[error("Invalid argument for {function}: {reason}")]
    InvalidArgument { function: String, reason: String },

    #[error("Deployment failed: {0}")]
    DeploymentFailed(String),

    #[error("Write to {function} failed: {reason}")]
    WriteFailed { function: String, reason: String },

    #[error("Read from {function} failed: {reason}")]
    ReadFailed { function: String, reason: String },

    #[error("No receipt for {tx_hash} within {secs}s")]
    TimeoutExceeded { tx_hash: TxHash, secs: u64 },
}

/// Tunables for submission and deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    pub receipt_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub deploy_gas: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            receipt_timeout: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_millis(500),
            deploy_gas: 6_000_000,
        }
    }
}

/// Client for the healthcare records contract.
pub struct LedgerClient<L, C>
where
    L: Ledger,
    C: ContractStore,
{
    ledger: Option<Arc<L>>,
    offline_reason: String,
    contracts: C,
    contract: RwLock<Option<ContractReference>>,
    deployer: Option<PrivateKeySigner>,
    settings: LedgerSettings,
}

impl<L, C> LedgerClient<L, C>
where
    L: Ledger,
    C: ContractStore,
{
    /// Connect to a ledger, probing it once.
    ///
    /// # Errors
    /// Returns `ChainConnection` if the node does not answer.
    pub fn new(ledger: Arc<L>, contracts: C, settings: LedgerSettings) -> Result<Self, LedgerError> {
        let chain_id = ledger
            .chain_id()
            .map_err(|e| LedgerError::ChainConnection(e.to_string()))?;
        tracing::info!(chain_id, "Connected to ledger");

        Ok(Self {
            ledger: Some(ledger),
            offline_reason: String::new(),
            contracts,
            contract: RwLock::new(None),
            deployer: None,
            settings,
        })
    }

    /// A client with no ledger: every on-chain operation fails with
    /// `ChainConnection`.
    pub fn offline(contracts: C, settings: LedgerSettings, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(%reason, "Ledger offline, on-chain features disabled");
        Self {
            ledger: None,
            offline_reason: reason,
            contracts,
            contract: RwLock::new(None),
            deployer: None,
            settings,
        }
    }

    /// Fund and sign deployments with this key instead of the node's first
    /// account.
    pub fn set_deployer(&mut self, signer: PrivateKeySigner) {
        self.deployer = Some(signer);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.ledger.is_some()
    }

    /// The underlying ledger.
    ///
    /// # Errors
    /// Returns `ChainConnection` if offline.
    pub fn ledger(&self) -> Result<&Arc<L>, LedgerError> {
        self.ledger
            .as_ref()
            .ok_or_else(|| LedgerError::ChainConnection(self.offline_reason.clone()))
    }

    /// Active contract reference, if any.
    #[must_use]
    pub fn contract(&self) -> Option<ContractReference> {
        self.contract.read().ok().and_then(|c| c.clone())
    }

    fn loaded_contract(&self) -> Result<ContractReference, LedgerError> {
        self.contract().ok_or(LedgerError::ContractNotLoaded)
    }

    fn set_contract(&self, reference: ContractReference) {
        match self.contract.write() {
            Ok(mut slot) => *slot = Some(reference),
            Err(poisoned) => *poisoned.into_inner() = Some(reference),
        }
    }

    /// Load the persisted contract reference.
    ///
    /// Never fails: a missing or unreadable reference leaves the client
    /// without a contract. Returns whether a contract is now loaded.
    pub fn load_contract(&self) -> bool {
        match self.contracts.load() {
            Ok(Some(reference)) => {
                tracing::info!(address = %reference.address, "Contract loaded");
                self.set_contract(reference);
                true
            }
            Ok(None) => {
                tracing::warn!("No contract reference found; deploy the contract first");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "Contract reference unreadable");
                false
            }
        }
    }

    /// Compile, deploy and persist a new contract.
    ///
    /// The previous reference stays in place unless every step succeeds.
    ///
    /// # Errors
    /// Returns `ChainConnection` if offline, otherwise `DeploymentFailed`.
    pub fn deploy_and_initialize<P: Compiler>(
        &self,
        compiler: &P,
        source: &str,
    ) -> Result<ContractReference, LedgerError> {
        let ledger = self.ledger()?;
        let failed = |stage: &str, e: &dyn std::fmt::Display| {
            let reason = format!("{stage}: {e}");
            tracing::error!(%reason, "Contract deployment failed");
            LedgerError::DeploymentFailed(reason)
        };

        let compiled = compiler.compile(source).map_err(|e| failed("compile", &e))?;

        let deployer = match &self.deployer {
            Some(signer) => signer.address(),
            None => ledger
                .accounts()
                .map_err(|e| failed("accounts", &e))?
                .into_iter()
                .next()
                .ok_or_else(|| failed("accounts", &"node exposes no funded account"))?,
        };

        let gas_price = ledger.gas_price().map_err(|e| failed("gas price", &e))?;
        let nonce = ledger
            .transaction_count(deployer)
            .map_err(|e| failed("nonce", &e))?;
        let tx = LedgerTransaction {
            from: deployer,
            to: None,
            input: compiled.bytecode.clone(),
            gas: self.settings.deploy_gas,
            gas_price,
            nonce,
        };

        let balance = ledger.balance(deployer).map_err(|e| failed("balance", &e))?;
        if balance < tx.max_fee() {
            return Err(failed(
                "funds",
                &format!("{deployer} holds {balance} wei, needs up to {}", tx.max_fee()),
            ));
        }

        let tx_hash = ledger
            .send_transaction(&tx, self.deployer.as_ref())
            .map_err(|e| failed("send", &e))?;
        let receipt = self.wait_for_receipt(tx_hash).map_err(|e| failed("receipt", &e))?;
        if !receipt.success {
            return Err(failed("receipt", &format!("constructor reverted in {tx_hash}")));
        }
        let address = receipt
            .contract_address
            .ok_or_else(|| failed("receipt", &"no contract address in receipt"))?;

        let reference = ContractReference {
            deployment_tx: Some(tx_hash),
            deployer: Some(deployer),
            compiler_version: Some(compiled.compiler_version.clone()),
            deployed_at: Some(chrono::Utc::now()),
            ..ContractReference::new(address, compiled.abi)
        };

        self.contracts
            .store(&reference)
            .map_err(|e| failed("persist", &e))?;
        self.set_contract(reference.clone());

        tracing::info!(
            %address,
            %deployer,
            %tx_hash,
            contract = %compiled.name,
            "Contract deployed and initialized"
        );
        Ok(reference)
    }

    /// Pick the overload of `name` taking `arity` arguments.
    fn function(reference: &ContractReference, name: &str, arity: usize) -> Result<Function, LedgerError> {
        reference
            .abi
            .function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .cloned()
            .ok_or_else(|| LedgerError::UnknownFunction(format!("{name}/{arity}")))
    }

    /// Coerce string arguments to the function's parameter types.
    fn encode(function: &Function, args: &[String]) -> Result<Bytes, LedgerError> {
        let invalid = |reason: String| LedgerError::InvalidArgument {
            function: function.name.clone(),
            reason,
        };

        let values = function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let ty = param
                    .resolve()
                    .map_err(|e| invalid(format!("{}: {e}", param.name)))?;
                ty.coerce_str(arg)
                    .map_err(|e| invalid(format!("{} as {ty}: {e}", param.name)))
            })
            .collect::<Result<Vec<DynSolValue>, _>>()?;

        function
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Send a state-changing call, signed by the node for `from_address`, and
    /// wait for its receipt.
    ///
    /// # Errors
    /// - `InvalidSender` for an empty or malformed sender (no network call)
    /// - `ContractNotLoaded`, `UnknownFunction`, `InvalidArgument` (no network call)
    /// - `WriteFailed` for RPC failures and reverted receipts
    /// - `TimeoutExceeded` if no receipt arrives in time
    pub fn submit(
        &self,
        function_name: &str,
        from_address: &str,
        args: &[String],
        options: SubmitOptions,
    ) -> Result<TxReceipt, LedgerError> {
        self.send(function_name, from_address, None, args, options)
    }

    /// Like [`Self::submit`], but signed locally by `signer`, whose address
    /// is the sender. The key is used for this transaction only.
    ///
    /// # Errors
    /// See [`Self::submit`].
    pub fn submit_signed(
        &self,
        function_name: &str,
        signer: &PrivateKeySigner,
        args: &[String],
        options: SubmitOptions,
    ) -> Result<TxReceipt, LedgerError> {
        let from_address = signer.address().to_checksum(None);
        self.send(function_name, &from_address, Some(signer), args, options)
    }

    fn send(
        &self,
        function_name: &str,
        from_address: &str,
        signer: Option<&PrivateKeySigner>,
        args: &[String],
        options: SubmitOptions,
    ) -> Result<TxReceipt, LedgerError> {
        let result = self.try_submit(function_name, from_address, signer, args, options);
        if let Err(e) = &result {
            tracing::error!(
                function = function_name,
                sender = from_address,
                args = ?args,
                error = %e,
                "Ledger write failed"
            );
        }
        result
    }

    fn try_submit(
        &self,
        function_name: &str,
        from_address: &str,
        signer: Option<&PrivateKeySigner>,
        args: &[String],
        options: SubmitOptions,
    ) -> Result<TxReceipt, LedgerError> {
        if from_address.trim().is_empty() {
            return Err(LedgerError::InvalidSender(from_address.to_string()));
        }
        let from = parse_address(from_address)
            .map_err(|_| LedgerError::InvalidSender(from_address.to_string()))?;
        if signer.is_some_and(|s| s.address() != from) {
            return Err(LedgerError::InvalidSender(from_address.to_string()));
        }

        let ledger = self.ledger()?;
        let reference = self.loaded_contract()?;
        let function = Self::function(&reference, function_name, args.len())?;
        let input = Self::encode(&function, args)?;

        let write_failed = |e: &dyn std::fmt::Display| LedgerError::WriteFailed {
            function: function_name.to_string(),
            reason: e.to_string(),
        };

        let gas_price = match options.gas_price {
            Some(price) => price,
            None => ledger.gas_price().map_err(|e| write_failed(&e))?,
        };
        let nonce = match options.nonce {
            Some(nonce) => nonce,
            None => ledger.transaction_count(from).map_err(|e| write_failed(&e))?,
        };

        let tx = LedgerTransaction {
            from,
            to: Some(reference.address),
            input,
            gas: options.gas,
            gas_price,
            nonce,
        };
        let tx_hash = ledger
            .send_transaction(&tx, signer)
            .map_err(|e| write_failed(&e))?;
        let receipt = self.wait_for_receipt(tx_hash)?;

        if !receipt.success {
            return Err(write_failed(&format!("transaction {tx_hash} reverted")));
        }

        tracing::info!(
            function = function_name,
            sender = %from,
            signed_locally = signer.is_some(),
            %tx_hash,
            gas = tx.gas,
            gas_price = tx.gas_price,
            "Ledger write confirmed"
        );
        Ok(receipt)
    }

    /// Poll for a receipt until it arrives or the timeout passes.
    ///
    /// # Errors
    /// Returns `TimeoutExceeded`, or `WriteFailed` if polling itself fails.
    pub fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TxReceipt, LedgerError> {
        let ledger = self.ledger()?;
        let started = Instant::now();

        loop {
            match ledger.receipt(tx_hash) {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => {
                    return Err(LedgerError::WriteFailed {
                        function: "eth_getTransactionReceipt".to_string(),
                        reason: e.to_string(),
                    })
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.receipt_timeout {
                return Err(LedgerError::TimeoutExceeded {
                    tx_hash,
                    secs: self.settings.receipt_timeout.as_secs(),
                });
            }
            let remaining = self.settings.receipt_timeout - elapsed;
            thread::sleep(self.settings.receipt_poll_interval.min(remaining));
        }
    }

    /// Read-only contract call.
    ///
    /// # Errors
    /// Returns `ReadFailed` for RPC or decoding failures.
    pub fn call(&self, function_name: &str, args: &[String]) -> Result<Vec<DynSolValue>, LedgerError> {
        let ledger = self.ledger()?;
        let reference = self.loaded_contract()?;
        let function = Self::function(&reference, function_name, args.len())?;
        let input = Self::encode(&function, args)?;

        let read_failed = |reason: String| {
            tracing::error!(function = function_name, args = ?args, %reason, "Ledger read failed");
            LedgerError::ReadFailed {
                function: function_name.to_string(),
                reason,
            }
        };

        let output = ledger
            .call(None, reference.address, input)
            .map_err(|e| read_failed(e.to_string()))?;
        let values = function
            .abi_decode_output(&output)
            .map_err(|e| read_failed(e.to_string()))?;

        tracing::debug!(function = function_name, "Ledger read");
        Ok(values)
    }

    /// Event definition from the loaded contract.
    ///
    /// # Errors
    /// Returns `ContractNotLoaded` or `UnknownFunction` if the ABI lacks it.
    pub fn event(&self, name: &str) -> Result<(Address, Event), LedgerError> {
        let reference = self.loaded_contract()?;
        let event = reference
            .abi
            .event(name)
            .and_then(|events| events.first())
            .cloned()
            .ok_or_else(|| LedgerError::UnknownFunction(format!("event {name}")))?;
        Ok((reference.address, event))
    }
}
