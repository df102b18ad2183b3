//! Maps domain actions onto ledger functions.

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;

use super::ledger::{LedgerClient, LedgerError};
use crate::domain::{Action, EntityKind, SubmitOptions, TxReceipt};
use crate::ports::{ContractStore, Ledger};

/// Ledger function for an action on an entity kind, if the pair is mirrored.
#[must_use]
pub fn ledger_function(action: Action, kind: EntityKind) -> Option<&'static str> {
    use Action::{Add, Register, Update};
    use EntityKind::{Caregiver, Medic, Patient, Report, TreatmentPlan};

    Some(match (action, kind) {
        (Register, Patient) => "addPatient",
        (Register, Medic) => "addMedic",
        (Register, Caregiver) => "addCaregiver",
        (Update, Patient) => "updatePatient",
        (Update, Medic) => "updateMedic",
        (Update, Caregiver) => "updateCaregiver",
        (Add, Report) => "addReport",
        (Update, Report) => "updateReport",
        (Add, TreatmentPlan) => "addTreatmentPlan",
        (Update, TreatmentPlan) => "updateTreatmentPlan",
        _ => return None,
    })
}

/// Submits entity actions through a [`LedgerClient`].
pub struct ActionOrchestrator<L, C>
where
    L: Ledger,
    C: ContractStore,
{
    client: Arc<LedgerClient<L, C>>,
    options: SubmitOptions,
}

impl<L, C> ActionOrchestrator<L, C>
where
    L: Ledger,
    C: ContractStore,
{
    pub fn new(client: Arc<LedgerClient<L, C>>) -> Self {
        Self {
            client,
            options: SubmitOptions::default(),
        }
    }

    /// Use these gas/price/nonce defaults for every submission.
    #[must_use]
    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn client(&self) -> &Arc<LedgerClient<L, C>> {
        &self.client
    }

    fn function_for(action: Action, kind: EntityKind) -> Result<&'static str, LedgerError> {
        ledger_function(action, kind).ok_or_else(|| {
            tracing::error!(%action, entity = %kind, "No ledger function for action");
            LedgerError::UnsupportedAction {
                action: action.to_string(),
                entity: kind.to_string(),
            }
        })
    }

    /// Mirror one action on the ledger, sent from `from_address` and signed
    /// by the node.
    ///
    /// # Errors
    /// `UnsupportedAction` for unmapped pairs and `InvalidSender` for an
    /// empty sender, both before any network call; otherwise whatever
    /// [`LedgerClient::submit`] returns.
    pub fn submit_entity_action(
        &self,
        kind: EntityKind,
        action: Action,
        from_address: &str,
        args: &[String],
    ) -> Result<TxReceipt, LedgerError> {
        let function = Self::function_for(action, kind)?;
        self.client.submit(function, from_address, args, self.options)
    }

    /// Mirror one action on the ledger, signed locally by the acting account.
    ///
    /// # Errors
    /// See [`Self::submit_entity_action`].
    pub fn submit_entity_action_signed(
        &self,
        kind: EntityKind,
        action: Action,
        signer: &PrivateKeySigner,
        args: &[String],
    ) -> Result<TxReceipt, LedgerError> {
        let function = Self::function_for(action, kind)?;
        self.client.submit_signed(function, signer, args, self.options)
    }
}
