//! Journal port: durable record of writes that left the two stores apart.

use crate::domain::ReconciliationEntry;

/// Append-only sink for reconciliation entries.
pub trait Journal: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append one entry.
    ///
    /// # Errors
    /// Returns error if the entry could not be made durable.
    fn record(&self, entry: &ReconciliationEntry) -> Result<(), Self::Error>;
}
