//! Compiler port: Solidity source to ABI and bytecode.

use crate::domain::CompiledContract;

/// Trait for contract compilation.
pub trait Compiler: Send + Sync {
    /// Error type for compilation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compile a source unit and return the contract to deploy.
    ///
    /// # Errors
    /// Returns error on compiler diagnostics of severity `error`, or if the
    /// compiler is unavailable.
    fn compile(&self, source: &str) -> Result<CompiledContract, Self::Error>;
}
