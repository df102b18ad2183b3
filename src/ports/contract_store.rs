//! Contract reference port: the single persisted slot for the active contract.

use crate::domain::ContractReference;

/// Trait for persisting the active contract reference.
pub trait ContractStore: Send + Sync {
    /// Error type for slot operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the current reference.
    ///
    /// # Returns
    /// `None` if no contract has been deployed yet.
    ///
    /// # Errors
    /// Returns error if the slot exists but cannot be read or parsed.
    fn load(&self) -> Result<Option<ContractReference>, Self::Error>;

    /// Replace the current reference.
    ///
    /// Readers observe either the old or the new reference, never a mix.
    ///
    /// # Errors
    /// Returns error if the write fails; the previous reference is then intact.
    fn store(&self, reference: &ContractReference) -> Result<(), Self::Error>;
}
