//! In-process doubles for the ledger-side ports.

use std::sync::{Arc, Mutex};

use alloy::json_abi::JsonAbi;
use alloy::primitives::{address, keccak256, Address, Bytes, TxHash};
use alloy::signers::local::PrivateKeySigner;

use crate::domain::{
    CompiledContract, ContractReference, LedgerTransaction, LogQuery, RawLog, TxReceipt,
};
use crate::ports::{Compiler, ContractStore, Ledger};

pub const CONTRACT_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const NODE_ACCOUNT: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

pub const TEST_ABI: &str = r#"[
  {"type":"function","name":"addPatient","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"},{"name":"autonomous","type":"bool"}]},
  {"type":"function","name":"updatePatient","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"},{"name":"autonomous","type":"bool"}]},
  {"type":"function","name":"addMedic","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"},{"name":"specialization","type":"string"}]},
  {"type":"function","name":"updateMedic","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"},{"name":"specialization","type":"string"}]},
  {"type":"function","name":"addCaregiver","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"}]},
  {"type":"function","name":"updateCaregiver","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"name","type":"string"},{"name":"lastname","type":"string"}]},
  {"type":"function","name":"addReport","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"analyses","type":"string"},{"name":"diagnosis","type":"string"}]},
  {"type":"function","name":"updateReport","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"id","type":"uint256"},{"name":"analyses","type":"string"},{"name":"diagnosis","type":"string"}]},
  {"type":"function","name":"addTreatmentPlan","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"description","type":"string"},{"name":"startDate","type":"string"},{"name":"endDate","type":"string"}]},
  {"type":"function","name":"updateTreatmentPlan","stateMutability":"nonpayable","outputs":[],
   "inputs":[{"name":"id","type":"uint256"},{"name":"description","type":"string"},{"name":"startDate","type":"string"},{"name":"endDate","type":"string"}]},
  {"type":"function","name":"getPatientCount","stateMutability":"view",
   "inputs":[],"outputs":[{"name":"","type":"uint256"}]},
  {"type":"event","name":"ActionLogged","anonymous":false,
   "inputs":[{"name":"actionType","type":"string","indexed":false},{"name":"initiator","type":"address","indexed":true}]}
]"#;

pub fn test_abi() -> JsonAbi {
    serde_json::from_str(TEST_ABI).expect("Should parse test abi")
}

pub fn test_reference() -> ContractReference {
    ContractReference::new(CONTRACT_ADDRESS, test_abi())
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct FakeError(pub String);

/// Runs inside `send_transaction`, after the transaction is accepted.
#[derive(Clone)]
pub struct SendHook(pub Arc<dyn Fn() + Send + Sync>);

impl std::fmt::Debug for SendHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SendHook")
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    /// RPC method names in call order
    pub calls: Vec<&'static str>,
    pub sent: Vec<LedgerTransaction>,
    pub receipts: Vec<TxReceipt>,
    /// Local signer of each sent transaction; `None` when the node signed
    pub signed_by: Vec<Option<Address>>,
    pub logs: Vec<RawLog>,
    pub block_number: u64,
    pub balance: u128,
    pub call_output: Bytes,
    pub fail_send: Option<String>,
    pub revert: bool,
    pub withhold_receipts: bool,
    pub unreachable: bool,
    pub on_send: Option<SendHook>,
}

/// Scripted ledger that mines every accepted transaction immediately.
#[derive(Debug)]
pub struct FakeLedger {
    pub state: Mutex<FakeState>,
}

impl Default for FakeLedger {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                balance: 10u128.pow(21),
                block_number: 1,
                ..FakeState::default()
            }),
        }
    }
}

impl FakeLedger {
    pub fn with<F: FnOnce(&mut FakeState)>(self, f: F) -> Self {
        f(&mut *self.state.lock().expect("Lock failed"));
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().expect("Lock failed").calls.clone()
    }

    pub fn sent(&self) -> Vec<LedgerTransaction> {
        self.state.lock().expect("Lock failed").sent.clone()
    }

    pub fn signed_by(&self) -> Vec<Option<Address>> {
        self.state.lock().expect("Lock failed").signed_by.clone()
    }

    pub fn push_log(&self, block_number: u64, log_index: u64) {
        let mut state = self.state.lock().expect("Lock failed");
        state.logs.push(RawLog {
            address: CONTRACT_ADDRESS,
            topics: vec![test_abi().event("ActionLogged").expect("event")[0].selector()],
            data: Bytes::new(),
            block_number: Some(block_number),
            tx_hash: None,
            log_index: Some(log_index),
        });
        state.block_number = state.block_number.max(block_number);
    }

    fn record(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>, FakeError> {
        let mut state = self.state.lock().expect("Lock failed");
        state.calls.push(method);
        if state.unreachable {
            return Err(FakeError("connection refused".to_string()));
        }
        Ok(state)
    }
}

impl Ledger for FakeLedger {
    type Error = FakeError;

    fn chain_id(&self) -> Result<u64, Self::Error> {
        self.record("eth_chainId").map(|_| 31337)
    }

    fn accounts(&self) -> Result<Vec<Address>, Self::Error> {
        self.record("eth_accounts").map(|_| vec![NODE_ACCOUNT])
    }

    fn balance(&self, _account: Address) -> Result<u128, Self::Error> {
        self.record("eth_getBalance").map(|s| s.balance)
    }

    fn gas_price(&self) -> Result<u128, Self::Error> {
        self.record("eth_gasPrice").map(|_| 1_000_000_000)
    }

    fn transaction_count(&self, _account: Address) -> Result<u64, Self::Error> {
        self.record("eth_getTransactionCount").map(|s| s.sent.len() as u64)
    }

    fn send_transaction(
        &self,
        tx: &LedgerTransaction,
        signer: Option<&PrivateKeySigner>,
    ) -> Result<TxHash, Self::Error> {
        let method = if signer.is_some() {
            "eth_sendRawTransaction"
        } else {
            "eth_sendTransaction"
        };
        let mut state = self.record(method)?;
        if let Some(reason) = state.fail_send.clone() {
            return Err(FakeError(reason));
        }
        if let Some(signer) = signer {
            if signer.address() != tx.from {
                return Err(FakeError(format!("key for {} cannot sign for {}", signer.address(), tx.from)));
            }
        }

        let tx_hash = keccak256((state.sent.len() as u64).to_be_bytes());
        state.block_number += 1;
        let receipt = TxReceipt {
            tx_hash,
            success: !state.revert,
            block_number: Some(state.block_number),
            gas_used: 21_000,
            contract_address: tx.to.is_none().then_some(CONTRACT_ADDRESS),
        };
        state.sent.push(tx.clone());
        state.signed_by.push(signer.map(|s| s.address()));
        state.receipts.push(receipt);
        if let Some(SendHook(hook)) = state.on_send.clone() {
            hook();
        }
        Ok(tx_hash)
    }

    fn receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, Self::Error> {
        let state = self.record("eth_getTransactionReceipt")?;
        if state.withhold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.iter().find(|r| r.tx_hash == tx_hash).cloned())
    }

    fn call(&self, _from: Option<Address>, _to: Address, _input: Bytes) -> Result<Bytes, Self::Error> {
        self.record("eth_call").map(|s| s.call_output.clone())
    }

    fn block_number(&self) -> Result<u64, Self::Error> {
        self.record("eth_blockNumber").map(|s| s.block_number)
    }

    fn logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, Self::Error> {
        let state = self.record("eth_getLogs")?;
        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == query.address)
            .filter(|log| {
                log.block_number
                    .is_some_and(|b| b >= query.from_block && b <= query.to_block)
            })
            .filter(|log| query.topic0.is_none() || log.topics.first() == query.topic0.as_ref())
            .cloned()
            .collect())
    }
}

/// Contract slot held in memory.
#[derive(Debug, Default)]
pub struct MemoryContractStore {
    pub slot: Mutex<Option<ContractReference>>,
    pub fail_store: bool,
}

impl MemoryContractStore {
    pub fn holding(reference: ContractReference) -> Self {
        Self {
            slot: Mutex::new(Some(reference)),
            fail_store: false,
        }
    }
}

impl ContractStore for MemoryContractStore {
    type Error = FakeError;

    fn load(&self) -> Result<Option<ContractReference>, Self::Error> {
        Ok(self.slot.lock().expect("Lock failed").clone())
    }

    fn store(&self, reference: &ContractReference) -> Result<(), Self::Error> {
        if self.fail_store {
            return Err(FakeError("disk full".to_string()));
        }
        *self.slot.lock().expect("Lock failed") = Some(reference.clone());
        Ok(())
    }
}

/// Compiler returning a fixed artifact, or a fixed diagnostic.
#[derive(Debug)]
pub struct StaticCompiler {
    pub fail: Option<String>,
}

impl Compiler for StaticCompiler {
    type Error = FakeError;

    fn compile(&self, _source: &str) -> Result<CompiledContract, Self::Error> {
        if let Some(reason) = &self.fail {
            return Err(FakeError(reason.clone()));
        }
        Ok(CompiledContract {
            name: "HealthCareRecords".to_string(),
            abi: test_abi(),
            bytecode: Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]),
            compiler_version: "0.8.0".to_string(),
        })
    }
}

/// Journal kept in memory.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    pub entries: Mutex<Vec<crate::domain::ReconciliationEntry>>,
}

impl crate::ports::Journal for MemoryJournal {
    type Error = FakeError;

    fn record(&self, entry: &crate::domain::ReconciliationEntry) -> Result<(), Self::Error> {
        self.entries.lock().expect("Lock failed").push(entry.clone());
        Ok(())
    }
}
