//! File-backed contract reference slot.
//!
//! The reference is one JSON document replaced by write-to-temp then rename,
//! so a concurrent reader sees either the old or the new contract. Deployments
//! made before the merged document existed left an address file and an ABI
//! file side by side; those are read (never written) when the document is
//! missing.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use alloy::json_abi::JsonAbi;

use crate::domain::{ledger::CONTRACT_REFERENCE_VERSION, ContractReference};
use crate::ports::ContractStore;

const LEGACY_ADDRESS_FILE: &str = "contract_address.txt";
const LEGACY_ABI_FILE: &str = "contract_abi.json";

#[derive(Debug, thiserror::Error)]
pub enum ContractFileError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed contract reference {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("Unsupported contract reference version {0}")]
    UnsupportedVersion(u8),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ContractFileError + '_ {
    move |source| ContractFileError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Contract reference stored at a fixed path.
#[derive(Debug, Clone)]
pub struct FileContractStore {
    path: PathBuf,
}

impl FileContractStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn legacy_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn load_document(&self) -> Result<ContractReference, ContractFileError> {
        let raw = fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        let reference: ContractReference =
            serde_json::from_str(&raw).map_err(|e| ContractFileError::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if reference.version != CONTRACT_REFERENCE_VERSION {
            return Err(ContractFileError::UnsupportedVersion(reference.version));
        }
        Ok(reference)
    }

    fn load_legacy(&self) -> Result<Option<ContractReference>, ContractFileError> {
        let dir = self.legacy_dir();
        let address_path = dir.join(LEGACY_ADDRESS_FILE);
        let abi_path = dir.join(LEGACY_ABI_FILE);
        if !address_path.is_file() || !abi_path.is_file() {
            return Ok(None);
        }

        let address = fs::read_to_string(&address_path).map_err(io_err(&address_path))?;
        let address = address
            .trim()
            .parse()
            .map_err(|e: alloy::primitives::hex::FromHexError| ContractFileError::Malformed {
                path: address_path.clone(),
                reason: e.to_string(),
            })?;

        let abi = fs::read_to_string(&abi_path).map_err(io_err(&abi_path))?;
        let abi: JsonAbi = serde_json::from_str(&abi).map_err(|e| ContractFileError::Malformed {
            path: abi_path.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(dir = %dir.display(), "Loaded contract reference from legacy files");
        Ok(Some(ContractReference::new(address, abi)))
    }
}

impl ContractStore for FileContractStore {
    type Error = ContractFileError;

    fn load(&self) -> Result<Option<ContractReference>, Self::Error> {
        if self.path.is_file() {
            return self.load_document().map(Some);
        }
        self.load_legacy()
    }

    fn store(&self, reference: &ContractReference) -> Result<(), Self::Error> {
        let dir = self.legacy_dir();
        fs::create_dir_all(dir).map_err(io_err(dir))?;

        let body = serde_json::to_vec_pretty(reference).map_err(|e| ContractFileError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&body).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        tracing::info!(
            address = %reference.address,
            path = %self.path.display(),
            "Contract reference updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn reference() -> ContractReference {
        let abi: JsonAbi = serde_json::from_str(
            r#"[{"type":"event","name":"ActionLogged","anonymous":false,"inputs":[
                {"name":"actionType","type":"string","indexed":false,"internalType":"string"}]}]"#,
        )
        .expect("Should parse abi");
        ContractReference::new(address!("5FbDB2315678afecb367f032d93F642f64180aa3"), abi)
    }

    #[test]
    fn test_missing_slot_is_none() {
        let dir = tempfile::tempdir().expect("Should create dir");
        let store = FileContractStore::new(dir.path().join("contract.json"));
        assert!(store.load().expect("Should load").is_none());
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().expect("Should create dir");
        let store = FileContractStore::new(dir.path().join("on_chain/contract.json"));

        let mut first = reference();
        store.store(&first).expect("Should store");
        first.address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
        store.store(&first).expect("Should replace");

        let loaded = store.load().expect("Should load").expect("Should exist");
        assert_eq!(loaded, first);
        assert!(!dir.path().join("on_chain/contract.json.tmp").exists());
    }

    #[test]
    fn test_legacy_fallback() {
        let dir = tempfile::tempdir().expect("Should create dir");
        fs::write(
            dir.path().join(LEGACY_ADDRESS_FILE),
            "0x5FbDB2315678afecb367f032d93F642f64180aa3\n",
        )
        .expect("Should write");
        fs::write(dir.path().join(LEGACY_ABI_FILE), "[]").expect("Should write");

        let store = FileContractStore::new(dir.path().join("contract.json"));
        let loaded = store.load().expect("Should load").expect("Should exist");
        assert_eq!(loaded.address, reference().address);
        assert!(!store.path().exists());
    }

    #[test]
    fn test_malformed_document_is_error() {
        let dir = tempfile::tempdir().expect("Should create dir");
        let path = dir.path().join("contract.json");
        fs::write(&path, "{not json").expect("Should write");

        let store = FileContractStore::new(&path);
        assert!(matches!(store.load(), Err(ContractFileError::Malformed { .. })));
    }
}
