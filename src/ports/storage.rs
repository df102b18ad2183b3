//! Storage port: Trait for the off-chain relational store.
//!
//! This trait abstracts the storage backend (SQLite) from the application logic.

use crate::domain::{
    Credential, NewReport, NewTreatmentPlan, PatientProfile, Profile, Report, TreatmentPlan,
};

/// One page of results with pagination metadata.
///
/// Pages are plain values handed back to the caller; the store keeps no
/// cursor of its own.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Items in this page
    pub items: Vec<T>,
    /// Total count of all items
    pub total_count: usize,
    /// Current page offset
    pub offset: usize,
    /// Page size limit
    pub limit: usize,
    /// Whether there are more pages
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Create a new page.
    #[must_use]
    pub fn new(items: Vec<T>, total_count: usize, offset: usize, limit: usize) -> Self {
        let has_more = offset + items.len() < total_count;
        Self {
            items,
            total_count,
            offset,
            limit,
            has_more,
        }
    }

    /// Get the next page offset.
    #[must_use]
    pub fn next_offset(&self) -> Option<usize> {
        if self.has_more {
            Some(self.offset + self.limit)
        } else {
            None
        }
    }

    /// Get the previous page offset.
    #[must_use]
    pub fn prev_offset(&self) -> Option<usize> {
        if self.offset > 0 {
            Some(self.offset.saturating_sub(self.limit))
        } else {
            None
        }
    }
}

/// Trait for off-chain storage operations.
///
/// Uniqueness of usernames, public keys and medic emails is enforced by the
/// store itself at write time; the `*_exists` queries are advisory pre-checks.
pub trait Storage: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether a username is present in credentials or patients.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn username_exists(&self, username: &str) -> Result<bool, Self::Error>;

    /// Whether a public key is already bound to a credential.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn public_key_exists(&self, public_key: &str) -> Result<bool, Self::Error>;

    /// Whether a phone number is used by any profile other than `except_username`.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn phone_exists(&self, phone: &str, except_username: Option<&str>) -> Result<bool, Self::Error>;

    /// Whether a medic email is used by any medic other than `except_username`.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn email_exists(&self, mail: &str, except_username: Option<&str>) -> Result<bool, Self::Error>;

    /// Insert a bare credential.
    ///
    /// # Errors
    /// Returns a conflict error if the username or public key is taken.
    fn insert_credential(&self, credential: &Credential) -> Result<(), Self::Error>;

    /// Insert a credential and its profile in one local transaction.
    ///
    /// # Errors
    /// Returns error (and writes nothing) if either insert fails.
    fn insert_account(&self, credential: &Credential, profile: &Profile) -> Result<(), Self::Error>;

    /// Load a credential by username.
    ///
    /// # Errors
    /// Returns error if the query fails or the row is corrupt.
    fn load_credential(&self, username: &str) -> Result<Option<Credential>, Self::Error>;

    /// Replace the password hash and sealed private key of a credential.
    ///
    /// # Errors
    /// Returns `NotFound` if the username does not exist.
    fn update_credential_secrets(&self, credential: &Credential) -> Result<(), Self::Error>;

    /// Load the profile attached to a username.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn load_profile(&self, username: &str) -> Result<Option<Profile>, Self::Error>;

    /// Overwrite an existing profile (role cannot change).
    ///
    /// # Errors
    /// Returns `NotFound` if no profile exists for the username.
    fn update_profile(&self, profile: &Profile) -> Result<(), Self::Error>;

    /// Patients, one page at a time, ordered by username.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn patients_page(&self, offset: usize, limit: usize) -> Result<Page<PatientProfile>, Self::Error>;

    /// Insert a report stamped with `date`; returns the new id.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    fn insert_report(&self, report: &NewReport, date: chrono::NaiveDate) -> Result<i64, Self::Error>;

    /// # Errors
    /// Returns error if the query fails.
    fn load_report(&self, id: i64) -> Result<Option<Report>, Self::Error>;

    /// # Errors
    /// Returns `NotFound` if the report does not exist.
    fn update_report(&self, report: &Report) -> Result<(), Self::Error>;

    /// Reports for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn reports_for_patient(&self, patient_username: &str) -> Result<Vec<Report>, Self::Error>;

    /// Insert a treatment plan stamped with `date`; returns the new id.
    ///
    /// # Errors
    /// Returns error if the insert fails.
    fn insert_treatment_plan(
        &self,
        plan: &NewTreatmentPlan,
        date: chrono::NaiveDate,
    ) -> Result<i64, Self::Error>;

    /// # Errors
    /// Returns error if the query fails.
    fn load_treatment_plan(&self, id: i64) -> Result<Option<TreatmentPlan>, Self::Error>;

    /// # Errors
    /// Returns `NotFound` if the plan does not exist.
    fn update_treatment_plan(&self, plan: &TreatmentPlan) -> Result<(), Self::Error>;

    /// Treatment plans for a patient, newest first.
    ///
    /// # Errors
    /// Returns error if the query fails.
    fn treatment_plans_for_patient(
        &self,
        patient_username: &str,
    ) -> Result<Vec<TreatmentPlan>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_navigation() {
        let page = Page::new(vec![1, 2, 3], 7, 3, 3);
        assert!(page.has_more);
        assert_eq!(page.next_offset(), Some(6));
        assert_eq!(page.prev_offset(), Some(0));

        let last = Page::new(vec![7], 7, 6, 3);
        assert!(!last.has_more);
        assert_eq!(last.next_offset(), None);

        let first = Page::<u8>::new(vec![], 0, 0, 3);
        assert_eq!(first.prev_offset(), None);
    }
}
