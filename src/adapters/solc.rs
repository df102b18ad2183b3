//! Solidity compiler adapter.
//!
//! Runs a pinned `solc` release in `--standard-json` mode. The binary is
//! looked up in the install directory and, if absent, downloaded from the
//! official release list and checked against its published SHA-256.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::domain::CompiledContract;
use crate::ports::Compiler;

const RELEASES_BASE: &str = "https://binaries.soliditylang.org";
const SOURCE_UNIT: &str = "on_chain.sol";

/// Compiler errors.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Unsupported platform for solc downloads: {0}")]
    UnsupportedPlatform(String),

    #[error("solc {0} is not a published release")]
    UnknownVersion(String),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Checksum mismatch for solc {version}")]
    ChecksumMismatch { version: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed compiler output: {0}")]
    Output(String),

    #[error("Compilation failed: {0}")]
    Diagnostics(String),

    #[error("No deployable contract in source")]
    NoContract,
}

#[derive(Debug, Deserialize)]
struct ReleaseList {
    builds: Vec<ReleaseBuild>,
}

#[derive(Debug, Deserialize)]
struct ReleaseBuild {
    path: String,
    version: String,
    sha256: String,
}

/// `solc` wrapper pinned to one version.
#[derive(Debug, Clone)]
pub struct SolcCompiler {
    version: String,
    install_dir: PathBuf,
    contract_name: Option<String>,
    download_timeout: Duration,
}

impl SolcCompiler {
    #[must_use]
    pub fn new(version: impl Into<String>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            install_dir: install_dir.into(),
            contract_name: None,
            download_timeout: Duration::from_secs(120),
        }
    }

    /// Deploy this contract instead of the first one with bytecode.
    #[must_use]
    pub fn with_contract_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Location of the pinned binary inside the install directory.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(format!("solc-{}", self.version))
    }

    /// Return the binary path, downloading the release first if needed.
    ///
    /// # Errors
    /// Returns error if the release cannot be fetched or verified.
    pub fn ensure_installed(&self) -> Result<PathBuf, CompileError> {
        let path = self.binary_path();
        if path.is_file() {
            return Ok(path);
        }

        let platform = release_platform()?;
        tracing::info!(version = %self.version, platform, "Installing solc");

        let client = reqwest::blocking::Client::builder()
            .timeout(self.download_timeout)
            .build()?;

        let list: ReleaseList = client
            .get(format!("{RELEASES_BASE}/{platform}/list.json"))
            .send()?
            .error_for_status()?
            .json()?;

        let build = list
            .builds
            .into_iter()
            .find(|b| b.version == self.version)
            .ok_or_else(|| CompileError::UnknownVersion(self.version.clone()))?;

        let binary = client
            .get(format!("{RELEASES_BASE}/{platform}/{}", build.path))
            .send()?
            .error_for_status()?
            .bytes()?;

        if !checksum_matches(&binary, &build.sha256) {
            return Err(CompileError::ChecksumMismatch {
                version: self.version.clone(),
            });
        }

        fs::create_dir_all(&self.install_dir)?;
        install_executable(&path, &binary)?;
        tracing::info!(path = %path.display(), "solc installed");
        Ok(path)
    }

    fn run(&self, binary: &Path, input: &Value) -> Result<Value, CompileError> {
        let mut child = Command::new(binary)
            .arg("--standard-json")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.to_string().as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(CompileError::Diagnostics(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CompileError::Output(e.to_string()))
    }
}

impl Compiler for SolcCompiler {
    type Error = CompileError;

    fn compile(&self, source: &str) -> Result<CompiledContract, Self::Error> {
        let binary = self.ensure_installed()?;
        let output = self.run(&binary, &standard_input(source))?;
        let contract = select_contract(&output, self.contract_name.as_deref())?;
        Ok(CompiledContract {
            compiler_version: self.version.clone(),
            ..contract
        })
    }
}

fn release_platform() -> Result<&'static str, CompileError> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Ok("linux-amd64"),
        ("macos", _) => Ok("macosx-amd64"),
        ("windows", "x86_64") => Ok("windows-amd64"),
        (os, arch) => Err(CompileError::UnsupportedPlatform(format!("{os}-{arch}"))),
    }
}

fn checksum_matches(bytes: &[u8], expected: &str) -> bool {
    let digest = hex::encode(Sha256::digest(bytes));
    digest.eq_ignore_ascii_case(expected.trim_start_matches("0x"))
}

fn install_executable(path: &Path, bytes: &[u8]) -> Result<(), CompileError> {
    let tmp = path.with_extension("download");
    fs::write(&tmp, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))?;
    }

    fs::rename(&tmp, path)?;
    Ok(())
}

fn standard_input(source: &str) -> Value {
    json!({
        "language": "Solidity",
        "sources": { SOURCE_UNIT: { "content": source } },
        "settings": {
            "outputSelection": {
                "*": { "*": ["abi", "evm.bytecode.object"] }
            }
        }
    })
}

/// Pick the contract to deploy from standard-json output.
///
/// Errors of severity `error` fail the whole compilation; warnings are logged.
fn select_contract(output: &Value, wanted: Option<&str>) -> Result<CompiledContract, CompileError> {
    let mut failures = Vec::new();
    for diagnostic in output["errors"].as_array().into_iter().flatten() {
        let message = diagnostic["formattedMessage"]
            .as_str()
            .or_else(|| diagnostic["message"].as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        if diagnostic["severity"] == "error" {
            failures.push(message);
        } else {
            tracing::warn!(%message, "solc warning");
        }
    }
    if !failures.is_empty() {
        return Err(CompileError::Diagnostics(failures.join("\n")));
    }

    let contracts = output["contracts"][SOURCE_UNIT]
        .as_object()
        .ok_or(CompileError::NoContract)?;

    for (name, contract) in contracts {
        if wanted.is_some_and(|w| w != name) {
            continue;
        }

        let bytecode = contract["evm"]["bytecode"]["object"].as_str().unwrap_or_default();
        if bytecode.is_empty() {
            continue;
        }

        let abi: JsonAbi = serde_json::from_value(contract["abi"].clone())
            .map_err(|e| CompileError::Output(format!("abi of {name}: {e}")))?;
        let bytecode = hex::decode(bytecode.trim_start_matches("0x"))
            .map_err(|e| CompileError::Output(format!("bytecode of {name}: {e}")))?;

        return Ok(CompiledContract {
            name: name.clone(),
            abi,
            bytecode: Bytes::from(bytecode),
            compiler_version: String::new(),
        });
    }

    Err(CompileError::NoContract)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_with(contracts: Value, errors: Value) -> Value {
        json!({ "contracts": { SOURCE_UNIT: contracts }, "errors": errors })
    }

    #[test]
    fn test_selects_first_contract_with_bytecode() {
        let output = output_with(
            json!({
                "IRecords": { "abi": [], "evm": { "bytecode": { "object": "" } } },
                "Records": {
                    "abi": [{
                        "type": "function",
                        "name": "addPatient",
                        "inputs": [{ "name": "name", "type": "string", "internalType": "string" }],
                        "outputs": [],
                        "stateMutability": "nonpayable"
                    }],
                    "evm": { "bytecode": { "object": "6080" } }
                }
            }),
            json!([]),
        );

        let contract = select_contract(&output, None).expect("Should select contract");
        assert_eq!(contract.name, "Records");
        assert_eq!(contract.bytecode.as_ref(), &[0x60, 0x80]);
        assert!(contract.abi.function("addPatient").is_some());
    }

    #[test]
    fn test_named_contract_is_required() {
        let output = output_with(
            json!({ "Records": { "abi": [], "evm": { "bytecode": { "object": "00" } } } }),
            json!([]),
        );
        assert!(matches!(
            select_contract(&output, Some("Other")),
            Err(CompileError::NoContract)
        ));
    }

    #[test]
    fn test_error_diagnostics_fail() {
        let output = json!({
            "errors": [
                { "severity": "warning", "formattedMessage": "unused variable" },
                { "severity": "error", "formattedMessage": "ParserError: expected ';'" }
            ]
        });
        match select_contract(&output, None) {
            Err(CompileError::Diagnostics(msg)) => {
                assert!(msg.contains("ParserError"));
                assert!(!msg.contains("unused"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_checksum() {
        // sha256("abc")
        let expected = "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert!(checksum_matches(b"abc", expected));
        assert!(!checksum_matches(b"abd", expected));
    }

    #[test]
    fn test_installed_binary_is_reused() {
        let dir = tempfile::tempdir().expect("Should create dir");
        let compiler = SolcCompiler::new("0.8.0", dir.path());
        fs::write(compiler.binary_path(), b"#!/bin/sh\n").expect("Should write");

        let path = compiler.ensure_installed().expect("Should not download");
        assert_eq!(path, dir.path().join("solc-0.8.0"));
    }

    #[test]
    fn test_standard_input_shape() {
        let input = standard_input("contract A {}");
        assert_eq!(input["sources"][SOURCE_UNIT]["content"], "contract A {}");
        assert_eq!(input["language"], "Solidity");
    }
}
