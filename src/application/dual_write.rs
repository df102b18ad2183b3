//! Dual-write coordinator: one logical write, two stores.
//!
//! Every write runs in three phases:
//!
//! 1. validate against formats and the off-chain store, with no side effects
//! 2. submit the ledger transaction, signed with the acting account's key
//!    for that transaction only
//! 3. write the off-chain store, only after a successful receipt
//!
//! A ledger failure stops before phase 3, so the off-chain row never exists
//! without its ledger event. An off-chain failure after phase 2 cannot be
//! undone on the ledger; it is logged at error level and appended to the
//! reconciliation journal.

use std::sync::Arc;

use alloy::primitives::TxHash;
use alloy::signers::local::PrivateKeySigner;
use chrono::NaiveDate;

use super::actions::{ledger_function, ActionOrchestrator};
use super::auth::SessionPrincipal;
use super::credentials::{conflict_to_validation, CredentialError, CredentialStore};
use super::ledger::LedgerError;
use crate::adapters::StorageError;
use crate::domain::{
    kdf::KdfError, validation, AccountKeys, Action, EntityKind, NewReport, NewTreatmentPlan,
    Profile, ReconciliationEntry, ReconciliationKind, Report, Role, TreatmentPlan, TxReceipt,
    ValidationError,
};
use crate::ports::{ContractStore, Journal, Ledger, Storage};

/// Errors from coordinated writes.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The ledger rejected the write; nothing was stored off-chain.
    #[error("Ledger write failed: {0}")]
    ChainWriteFailed(#[source] LedgerError),

    /// The ledger accepted the write but the off-chain store did not.
    #[error("{operation} recorded on-chain in {tx_hash} but not stored off-chain: {reason}")]
    PartialWriteInconsistency {
        operation: &'static str,
        tx_hash: TxHash,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key derivation error: {0}")]
    Kdf(#[from] KdfError),
}

/// Registration errors share the coordinator taxonomy.
pub type RegError = ActionError;

impl From<CredentialError> for ActionError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Validation(v) => Self::Validation(v),
            CredentialError::Storage(s) => Self::Storage(s),
            CredentialError::Kdf(k) => Self::Kdf(k),
            CredentialError::WrongOldPassword => {
                Self::Validation(ValidationError::NotPermitted("wrong password".to_string()))
            }
            CredentialError::UnknownUser(username) => Self::Validation(ValidationError::UnknownAccount {
                role: "user",
                username,
            }),
        }
    }
}

/// One prepared ledger call, kept for logging and journaling.
struct LedgerCall<'a> {
    operation: &'static str,
    kind: EntityKind,
    action: Action,
    signer: &'a PrivateKeySigner,
    sender: String,
    args: Vec<String>,
    subject: &'a str,
}

impl<'a> LedgerCall<'a> {
    fn new(
        operation: &'static str,
        kind: EntityKind,
        action: Action,
        signer: &'a PrivateKeySigner,
        args: Vec<String>,
        subject: &'a str,
    ) -> Self {
        Self {
            operation,
            kind,
            action,
            signer,
            sender: signer.address().to_checksum(None),
            args,
            subject,
        }
    }
}

/// Sequences off-chain and on-chain writes.
pub struct DualWriteCoordinator<S, L, C, J>
where
    S: Storage,
    L: Ledger,
    C: ContractStore,
    J: Journal,
{
    credentials: Arc<CredentialStore<S>>,
    orchestrator: Arc<ActionOrchestrator<L, C>>,
    journal: Arc<J>,
    today: Box<dyn Fn() -> NaiveDate + Send + Sync>,
}

impl<S, L, C, J> DualWriteCoordinator<S, L, C, J>
where
    S: Storage,
    S::Error: Into<StorageError>,
    L: Ledger,
    C: ContractStore,
    J: Journal,
{
    pub fn new(
        credentials: Arc<CredentialStore<S>>,
        orchestrator: Arc<ActionOrchestrator<L, C>>,
        journal: Arc<J>,
    ) -> Self {
        Self {
            credentials,
            orchestrator,
            journal,
            today: Box::new(|| chrono::Local::now().date_naive()),
        }
    }

    /// Replace the clock used to stamp records.
    #[must_use]
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    fn storage(&self) -> &S {
        self.credentials.storage()
    }

    fn store_err(e: S::Error) -> StorageError {
        e.into()
    }

    // ----- validation helpers (no side effects) -----

    fn check_unique_contacts(&self, profile: &Profile, except: Option<&str>) -> Result<(), ActionError> {
        if self
            .storage()
            .phone_exists(profile.phone(), except)
            .map_err(Self::store_err)?
        {
            return Err(ValidationError::DuplicatePhone.into());
        }
        if let Some(mail) = profile.mail() {
            if self
                .storage()
                .email_exists(mail, except)
                .map_err(Self::store_err)?
            {
                return Err(ValidationError::DuplicateEmail.into());
            }
        }
        Ok(())
    }

    fn require_profile(&self, username: &str, role: Role) -> Result<Profile, ActionError> {
        match self.storage().load_profile(username).map_err(Self::store_err)? {
            Some(profile) if profile.role() == role => Ok(profile),
            _ => Err(ValidationError::UnknownAccount {
                role: role.as_str(),
                username: username.to_string(),
            }
            .into()),
        }
    }

    fn check_caregiver_link(&self, profile: &Profile) -> Result<(), ActionError> {
        if let Profile::Caregiver(c) = profile {
            self.require_profile(&c.patient_username, Role::Patient)?;
        }
        Ok(())
    }

    fn require_medic(principal: &SessionPrincipal, medic_username: &str) -> Result<(), ActionError> {
        if principal.role != Role::Medic || principal.username != medic_username {
            return Err(ValidationError::NotPermitted(format!(
                "{} may not write records as medic {medic_username}",
                principal.username
            ))
            .into());
        }
        Ok(())
    }

    // ----- ledger phase -----

    fn submit(&self, call: &LedgerCall<'_>) -> Result<TxReceipt, ActionError> {
        self.orchestrator
            .submit_entity_action_signed(call.kind, call.action, call.signer, &call.args)
            .map_err(|e| {
                self.journal_entry(call, ReconciliationKind::ChainWriteFailed, None, &e.to_string());
                ActionError::ChainWriteFailed(e)
            })
    }

    // ----- store phase -----

    fn partial(&self, call: &LedgerCall<'_>, receipt: &TxReceipt, error: &StorageError) -> ActionError {
        tracing::error!(
            operation = call.operation,
            function = ledger_function(call.action, call.kind).unwrap_or_default(),
            subject = call.subject,
            sender = %call.sender,
            args = ?call.args,
            tx_hash = %receipt.tx_hash,
            error = %error,
            "Partial write: ledger updated but off-chain store was not"
        );
        self.journal_entry(
            call,
            ReconciliationKind::PartialWrite,
            Some(receipt.tx_hash),
            &error.to_string(),
        );
        ActionError::PartialWriteInconsistency {
            operation: call.operation,
            tx_hash: receipt.tx_hash,
            reason: error.to_string(),
        }
    }

    fn journal_entry(
        &self,
        call: &LedgerCall<'_>,
        kind: ReconciliationKind,
        tx_hash: Option<TxHash>,
        error: &str,
    ) {
        let entry = ReconciliationEntry {
            timestamp: chrono::Utc::now(),
            kind,
            operation: call.operation.to_string(),
            function: ledger_function(call.action, call.kind)
                .unwrap_or_default()
                .to_string(),
            sender: call.sender.clone(),
            args: call.args.clone(),
            tx_hash,
            error: error.to_string(),
        };
        if let Err(e) = self.journal.record(&entry) {
            tracing::error!(error = %e, operation = call.operation, "Could not append to reconciliation journal");
        }
    }

    // ----- operations -----

    /// Register a new account: credential, profile and ledger entry.
    ///
    /// # Errors
    /// `Validation` before any side effect, `ChainWriteFailed` with nothing
    /// stored, or `PartialWriteInconsistency` if only the ledger was written.
    pub fn register(
        &self,
        password: &str,
        keys: &AccountKeys,
        profile: &Profile,
    ) -> Result<TxReceipt, RegError> {
        let username = profile.username();

        validation::check_profile(profile, (self.today)())?;
        self.credentials.check_available(username, keys)?;
        self.check_unique_contacts(profile, None)?;
        self.check_caregiver_link(profile)?;

        let credential = self
            .credentials
            .build_credential(username, password, profile.role(), keys)?;
        let signer = keys.signer().map_err(ValidationError::from)?;

        let call = LedgerCall::new(
            "register",
            profile.role().into(),
            Action::Register,
            &signer,
            profile.ledger_args(),
            username,
        );
        let receipt = self.submit(&call)?;

        if let Err(e) = self
            .storage()
            .insert_account(&credential, profile)
            .map_err(Self::store_err)
        {
            // A uniqueness race lost after the pre-check still leaves the
            // ledger ahead of the store.
            if let Some(v) = conflict_to_validation(&e, username) {
                tracing::warn!(username, reason = %v, "Registration lost a uniqueness race");
            }
            return Err(self.partial(&call, &receipt, &e));
        }

        tracing::info!(username, role = %profile.role(), tx_hash = %receipt.tx_hash, "Account registered");
        Ok(receipt)
    }

    /// Update the acting user's own profile.
    ///
    /// # Errors
    /// See [`Self::register`].
    pub fn update_profile(
        &self,
        principal: &SessionPrincipal,
        profile: &Profile,
    ) -> Result<TxReceipt, ActionError> {
        let username = profile.username();
        if principal.username != username || principal.role != profile.role() {
            return Err(ValidationError::NotPermitted(format!(
                "{} may not update profile of {username}",
                principal.username
            ))
            .into());
        }

        validation::check_profile(profile, (self.today)())?;
        self.require_profile(username, profile.role())?;
        self.check_unique_contacts(profile, Some(username))?;
        self.check_caregiver_link(profile)?;

        let call = LedgerCall::new(
            "update_profile",
            profile.role().into(),
            Action::Update,
            principal.signer(),
            profile.ledger_args(),
            username,
        );
        let receipt = self.submit(&call)?;

        if let Err(e) = self.storage().update_profile(profile).map_err(Self::store_err) {
            return Err(self.partial(&call, &receipt, &e));
        }

        tracing::info!(username, tx_hash = %receipt.tx_hash, "Profile updated");
        Ok(receipt)
    }

    /// Add a report, stamped with today's date.
    ///
    /// # Errors
    /// See [`Self::register`].
    pub fn add_report(
        &self,
        principal: &SessionPrincipal,
        report: &NewReport,
    ) -> Result<Report, ActionError> {
        Self::require_medic(principal, &report.medic_username)?;
        validation::check_report(report)?;
        self.require_profile(&report.patient_username, Role::Patient)?;

        let call = LedgerCall::new(
            "add_report",
            EntityKind::Report,
            Action::Add,
            principal.signer(),
            report.ledger_args(),
            &report.patient_username,
        );
        let receipt = self.submit(&call)?;

        let date = (self.today)();
        let id = match self.storage().insert_report(report, date).map_err(Self::store_err) {
            Ok(id) => id,
            Err(e) => return Err(self.partial(&call, &receipt, &e)),
        };

        tracing::info!(id, patient = %report.patient_username, tx_hash = %receipt.tx_hash, "Report added");
        Ok(Report {
            id,
            date,
            patient_username: report.patient_username.clone(),
            medic_username: report.medic_username.clone(),
            analyses: report.analyses.clone(),
            diagnosis: report.diagnosis.clone(),
        })
    }

    /// Replace the analyses and diagnosis of a report.
    ///
    /// # Errors
    /// See [`Self::register`].
    pub fn update_report(
        &self,
        principal: &SessionPrincipal,
        id: i64,
        analyses: &str,
        diagnosis: &str,
    ) -> Result<Report, ActionError> {
        let existing = self
            .storage()
            .load_report(id)
            .map_err(Self::store_err)?
            .ok_or_else(|| ValidationError::InvalidField {
                field: "report",
                reason: format!("no report with id {id}"),
            })?;
        if principal.role != Role::Medic {
            return Err(ValidationError::NotPermitted(format!(
                "{} may not update reports",
                principal.username
            ))
            .into());
        }
        validation::require("analyses", analyses)?;
        validation::require("diagnosis", diagnosis)?;

        let updated = Report {
            analyses: analyses.to_string(),
            diagnosis: diagnosis.to_string(),
            ..existing
        };
        let call = LedgerCall::new(
            "update_report",
            EntityKind::Report,
            Action::Update,
            principal.signer(),
            updated.ledger_args(),
            &updated.patient_username,
        );
        let receipt = self.submit(&call)?;

        if let Err(e) = self.storage().update_report(&updated).map_err(Self::store_err) {
            return Err(self.partial(&call, &receipt, &e));
        }

        tracing::info!(id, tx_hash = %receipt.tx_hash, "Report updated");
        Ok(updated)
    }

    /// Add a treatment plan, stamped with today's date.
    ///
    /// # Errors
    /// See [`Self::register`].
    pub fn add_treatment_plan(
        &self,
        principal: &SessionPrincipal,
        plan: &NewTreatmentPlan,
    ) -> Result<TreatmentPlan, ActionError> {
        Self::require_medic(principal, &plan.medic_username)?;
        validation::check_treatment_plan(plan)?;
        self.require_profile(&plan.patient_username, Role::Patient)?;

        let call = LedgerCall::new(
            "add_treatment_plan",
            EntityKind::TreatmentPlan,
            Action::Add,
            principal.signer(),
            plan.ledger_args(),
            &plan.patient_username,
        );
        let receipt = self.submit(&call)?;

        let date = (self.today)();
        let id = match self
            .storage()
            .insert_treatment_plan(plan, date)
            .map_err(Self::store_err)
        {
            Ok(id) => id,
            Err(e) => return Err(self.partial(&call, &receipt, &e)),
        };

        tracing::info!(id, patient = %plan.patient_username, tx_hash = %receipt.tx_hash, "Treatment plan added");
        Ok(TreatmentPlan {
            id,
            date,
            patient_username: plan.patient_username.clone(),
            medic_username: plan.medic_username.clone(),
            description: plan.description.clone(),
            start_date: plan.start_date,
            end_date: plan.end_date,
        })
    }

    /// Amend a treatment plan: the note is appended to the description with
    /// today's date and the acting medic's name, and the dates are replaced.
    ///
    /// # Errors
    /// See [`Self::register`].
    pub fn update_treatment_plan(
        &self,
        principal: &SessionPrincipal,
        id: i64,
        note: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<TreatmentPlan, ActionError> {
        let existing = self
            .storage()
            .load_treatment_plan(id)
            .map_err(Self::store_err)?
            .ok_or_else(|| ValidationError::InvalidField {
                field: "treatment_plan",
                reason: format!("no treatment plan with id {id}"),
            })?;
        if principal.role != Role::Medic {
            return Err(ValidationError::NotPermitted(format!(
                "{} may not update treatment plans",
                principal.username
            ))
            .into());
        }
        validation::require("description", note)?;
        validation::check_plan_dates(start_date, end_date)?;

        let today = (self.today)();
        let updated = TreatmentPlan {
            description: existing.amended_description(note, &principal.username, today),
            start_date,
            end_date,
            ..existing
        };
        let call = LedgerCall::new(
            "update_treatment_plan",
            EntityKind::TreatmentPlan,
            Action::Update,
            principal.signer(),
            updated.ledger_args(),
            &updated.patient_username,
        );
        let receipt = self.submit(&call)?;

        if let Err(e) = self
            .storage()
            .update_treatment_plan(&updated)
            .map_err(Self::store_err)
        {
            return Err(self.partial(&call, &receipt, &e));
        }

        tracing::info!(id, tx_hash = %receipt.tx_hash, "Treatment plan updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::fixtures::{caregiver, credential_with, date, medic, patient};
    use crate::adapters::sqlite::SqliteStorage;
    use crate::application::ledger::{LedgerClient, LedgerSettings};
    use crate::application::test_support::*;
    use crate::domain::credential::fixtures::{keys, KEYS};
    use crate::domain::kdf::test_params;

    type Coordinator = DualWriteCoordinator<SqliteStorage, FakeLedger, MemoryContractStore, MemoryJournal>;

    struct Harness {
        ledger: Arc<FakeLedger>,
        storage: Arc<SqliteStorage>,
        journal: Arc<MemoryJournal>,
        coordinator: Coordinator,
    }

    fn harness_with(ledger: FakeLedger) -> Harness {
        let ledger = Arc::new(ledger);
        let storage = Arc::new(SqliteStorage::in_memory().expect("Should create db"));
        let credentials = Arc::new(CredentialStore::with_params(Arc::clone(&storage), test_params()));
        let client = LedgerClient::new(
            Arc::clone(&ledger),
            MemoryContractStore::holding(test_reference()),
            LedgerSettings::default(),
        )
        .expect("Should connect");
        client.load_contract();
        let orchestrator = Arc::new(ActionOrchestrator::new(Arc::new(client)));
        let journal = Arc::new(MemoryJournal::default());
        let coordinator = DualWriteCoordinator::new(credentials, orchestrator, Arc::clone(&journal))
            .with_clock(|| date(2026, 10, 16));

        Harness {
            ledger,
            storage,
            journal,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeLedger::default())
    }

    fn principal(username: &str, role: Role, key: usize) -> SessionPrincipal {
        SessionPrincipal::new(username, role, keys(key).signer().expect("Should build signer"))
    }

    fn seed_alice_and_house(h: &Harness) {
        h.coordinator
            .register("pw", &keys(0), &patient("alice", "555-0100"))
            .expect("Should register patient");
        h.coordinator
            .register("pw", &keys(1), &medic("house", "house@ppth.org", "555-0101"))
            .expect("Should register medic");
    }

    #[test]
    fn test_register_patient_writes_chain_then_store() {
        let h = harness();
        let receipt = h
            .coordinator
            .register("pw", &keys(0), &patient("alice", "555-0100"))
            .expect("Should register");
        assert!(receipt.success);

        let sent = h.ledger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from.to_checksum(None), KEYS[0].0);
        assert_eq!(h.ledger.signed_by(), vec![Some(sent[0].from)]);

        assert!(matches!(
            h.storage.load_profile("alice").expect("Should load"),
            Some(Profile::Patient(_))
        ));
        assert!(h.storage.load_credential("alice").expect("Should load").is_some());
    }

    #[test]
    fn test_duplicate_username_makes_no_ledger_call() {
        let h = harness();
        h.coordinator
            .register("pw", &keys(0), &patient("alice", "555-0100"))
            .expect("Should register");
        let calls_before = h.ledger.calls().len();

        let err = h
            .coordinator
            .register("pw", &keys(2), &patient("alice", "555-0199"))
            .expect_err("Should reject duplicate");
        assert!(matches!(
            err,
            ActionError::Validation(ValidationError::DuplicateUsername(_))
        ));
        assert_eq!(h.ledger.calls().len(), calls_before);
    }

    #[test]
    fn test_duplicate_contacts_rejected() {
        let h = harness();
        seed_alice_and_house(&h);

        let err = h
            .coordinator
            .register("pw", &keys(2), &patient("carol", "555-0100"))
            .expect_err("Should reject phone");
        assert!(matches!(err, ActionError::Validation(ValidationError::DuplicatePhone)));

        let err = h
            .coordinator
            .register("pw", &keys(2), &medic("wilson", "house@ppth.org", "555-0102"))
            .expect_err("Should reject email");
        assert!(matches!(err, ActionError::Validation(ValidationError::DuplicateEmail)));
    }

    #[test]
    fn test_caregiver_needs_existing_patient() {
        let h = harness();
        let err = h
            .coordinator
            .register("pw", &keys(2), &caregiver("bruce", "ghost", "555-0103"))
            .expect_err("Should reject");
        assert!(matches!(
            err,
            ActionError::Validation(ValidationError::UnknownAccount { .. })
        ));
        assert!(h.ledger.sent().is_empty());
    }

    #[test]
    fn test_chain_failure_leaves_no_row() {
        let h = harness_with(FakeLedger::default().with(|s| s.fail_send = Some("out of gas".into())));

        let err = h
            .coordinator
            .register("pw", &keys(0), &patient("alice", "555-0100"))
            .expect_err("Should fail");
        assert!(matches!(err, ActionError::ChainWriteFailed(LedgerError::WriteFailed { .. })));

        assert!(h.storage.load_credential("alice").expect("Should load").is_none());
        assert!(h.storage.load_profile("alice").expect("Should load").is_none());

        let entries = h.journal.entries.lock().expect("Lock failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ReconciliationKind::ChainWriteFailed);
        assert_eq!(entries[0].function, "addPatient");
    }

    #[test]
    fn test_store_failure_after_receipt_is_partial_write() {
        let h = harness();
        seed_alice_and_house(&h);

        // Another writer takes the username between the pre-check and the
        // store write.
        let storage = Arc::clone(&h.storage);
        h.ledger.state.lock().expect("Lock failed").on_send = Some(SendHook(Arc::new(move || {
            let _ = storage.insert_account(
                &crate::adapters::sqlite::fixtures::credential("carol", Role::Patient, 2),
                &patient("carol", "555-0150"),
            );
        })));

        let err = h
            .coordinator
            .register("pw", &keys(2), &patient("carol", "555-0150"))
            .expect_err("Should lose the race");
        let ActionError::PartialWriteInconsistency { operation, tx_hash, .. } = err else {
            panic!("expected partial write, got {err:?}");
        };
        assert_eq!(operation, "register");

        let entries = h.journal.entries.lock().expect("Lock failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ReconciliationKind::PartialWrite);
        assert_eq!(entries[0].function, "addPatient");
        assert_eq!(entries[0].tx_hash, Some(tx_hash));
        assert_eq!(entries[0].sender, KEYS[2].0);
    }

    /// Store `profile` from another writer while the coordinator's
    /// transaction is in flight.
    fn race_with(h: &Harness, username: &'static str, profile: Profile) {
        let storage = Arc::clone(&h.storage);
        h.ledger.state.lock().expect("Lock failed").on_send = Some(SendHook(Arc::new(move || {
            storage
                .insert_account(
                    &credential_with(username, profile.role(), &AccountKeys::generate()),
                    &profile,
                )
                .expect("Should store racing account");
        })));
    }

    #[test]
    fn test_phone_race_is_partial_write() {
        let h = harness();
        seed_alice_and_house(&h);
        race_with(&h, "dave", patient("dave", "555-0150"));

        let err = h
            .coordinator
            .register("pw", &keys(2), &patient("carol", "555-0150"))
            .expect_err("Should lose the phone race");
        let ActionError::PartialWriteInconsistency { reason, .. } = err else {
            panic!("expected partial write, got {err:?}");
        };
        assert!(reason.contains("phones.phone"), "{reason}");

        assert!(h.storage.load_profile("carol").expect("Should load").is_none());
        assert!(h.storage.load_credential("carol").expect("Should load").is_none());
        assert_eq!(
            h.storage
                .load_profile("dave")
                .expect("Should load")
                .expect("Should exist")
                .phone(),
            "555-0150"
        );
        let entries = h.journal.entries.lock().expect("Lock failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ReconciliationKind::PartialWrite);
    }

    #[test]
    fn test_medic_email_race_is_partial_write() {
        let h = harness();
        seed_alice_and_house(&h);
        race_with(&h, "cuddy", medic("cuddy", "dean@ppth.org", "555-0160"));

        let err = h
            .coordinator
            .register("pw", &keys(2), &medic("wilson", "dean@ppth.org", "555-0161"))
            .expect_err("Should lose the email race");
        let ActionError::PartialWriteInconsistency { operation, reason, .. } = err else {
            panic!("expected partial write, got {err:?}");
        };
        assert_eq!(operation, "register");
        assert!(reason.contains("medics.mail"), "{reason}");

        assert!(h.storage.load_credential("wilson").expect("Should load").is_none());
        let entries = h.journal.entries.lock().expect("Lock failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].function, "addMedic");
        assert_eq!(entries[0].sender, KEYS[2].0);
    }

    #[test]
    fn test_profile_phone_race_is_partial_write() {
        let h = harness();
        seed_alice_and_house(&h);
        race_with(&h, "dave", patient("dave", "555-0170"));
        let alice = principal("alice", Role::Patient, 0);

        let err = h
            .coordinator
            .update_profile(&alice, &patient("alice", "555-0170"))
            .expect_err("Should lose the phone race");
        assert!(matches!(err, ActionError::PartialWriteInconsistency { operation: "update_profile", .. }));
        assert_eq!(
            h.storage
                .load_profile("alice")
                .expect("Should load")
                .expect("Should exist")
                .phone(),
            "555-0100"
        );
    }

    #[test]
    fn test_signing_key_not_retained() {
        let h = harness();
        seed_alice_and_house(&h);
        let alice = principal("alice", Role::Patient, 0);
        h.coordinator
            .update_profile(&alice, &patient("alice", "555-0177"))
            .expect("Should update");
        drop(alice);

        // With the session gone, a write from the same address can only be
        // signed by the node.
        h.coordinator
            .orchestrator
            .submit_entity_action(
                EntityKind::Patient,
                Action::Update,
                KEYS[0].0,
                &patient("alice", "555-0177").ledger_args(),
            )
            .expect("Should submit");

        let signed_by = h.ledger.signed_by();
        let alice_address = keys(0).signer().expect("Should build signer").address();
        assert_eq!(signed_by.len(), 4);
        assert_eq!(signed_by[2], Some(alice_address));
        assert_eq!(signed_by[3], None);
    }

    #[test]
    fn test_unknown_plan_rejected_before_ledger() {
        let h = harness();
        seed_alice_and_house(&h);
        let house = principal("house", Role::Medic, 1);
        let sent_before = h.ledger.sent().len();

        let err = h
            .coordinator
            .update_treatment_plan(&house, 999, "note", date(2026, 10, 16), date(2026, 11, 1))
            .expect_err("Should reject unknown plan");
        assert!(matches!(err, ActionError::Validation(_)));
        assert_eq!(h.ledger.sent().len(), sent_before);
        assert!(h.journal.entries.lock().expect("Lock failed").is_empty());
    }

    #[test]
    fn test_reports_require_acting_medic() {
        let h = harness();
        seed_alice_and_house(&h);
        let alice = principal("alice", Role::Patient, 0);
        let report = NewReport {
            patient_username: "alice".to_string(),
            medic_username: "house".to_string(),
            analyses: "CBC".to_string(),
            diagnosis: "Anemia".to_string(),
        };

        let sent_before = h.ledger.sent().len();
        let err = h
            .coordinator
            .add_report(&alice, &report)
            .expect_err("Patient may not write reports");
        assert!(matches!(err, ActionError::Validation(ValidationError::NotPermitted(_))));
        assert_eq!(h.ledger.sent().len(), sent_before);
    }

    #[test]
    fn test_report_update_roundtrip() {
        let h = harness();
        seed_alice_and_house(&h);
        let house = principal("house", Role::Medic, 1);

        let added = h
            .coordinator
            .add_report(
                &house,
                &NewReport {
                    patient_username: "alice".to_string(),
                    medic_username: "house".to_string(),
                    analyses: "CBC".to_string(),
                    diagnosis: "Anemia".to_string(),
                },
            )
            .expect("Should add");

        let updated = h
            .coordinator
            .update_report(&house, added.id, "CBC, ferritin", "Iron deficiency")
            .expect("Should update");
        assert_eq!(updated.diagnosis, "Iron deficiency");
        assert_eq!(
            h.storage
                .load_report(added.id)
                .expect("Should load")
                .expect("Should exist")
                .diagnosis,
            "Iron deficiency"
        );
    }

    #[test]
    fn test_treatment_plan_update_appends_note() {
        let h = harness();
        seed_alice_and_house(&h);
        let house = principal("house", Role::Medic, 1);

        let plan = h
            .coordinator
            .add_treatment_plan(
                &house,
                &NewTreatmentPlan {
                    patient_username: "alice".to_string(),
                    medic_username: "house".to_string(),
                    description: "Iron supplements".to_string(),
                    start_date: date(2026, 10, 16),
                    end_date: date(2026, 12, 16),
                },
            )
            .expect("Should add");

        let updated = h
            .coordinator
            .update_treatment_plan(&house, plan.id, "Double dose", date(2026, 10, 20), date(2027, 1, 20))
            .expect("Should update");

        assert_eq!(
            updated.description,
            "Iron supplements. \nDescription updated on 2026-10-16 by the medic house: Double dose"
        );
        let stored = h
            .storage
            .load_treatment_plan(plan.id)
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(stored, updated);
        assert_eq!(stored.end_date, date(2027, 1, 20));
    }

    #[test]
    fn test_profile_update_only_by_owner() {
        let h = harness();
        seed_alice_and_house(&h);
        let house = principal("house", Role::Medic, 1);

        let err = h
            .coordinator
            .update_profile(&house, &patient("alice", "555-0177"))
            .expect_err("Should reject");
        assert!(matches!(err, ActionError::Validation(ValidationError::NotPermitted(_))));

        let alice = principal("alice", Role::Patient, 0);
        h.coordinator
            .update_profile(&alice, &patient("alice", "555-0177"))
            .expect("Should update own profile");
        assert_eq!(
            h.storage
                .load_profile("alice")
                .expect("Should load")
                .expect("Should exist")
                .phone(),
            "555-0177"
        );
    }
}
