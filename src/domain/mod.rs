//! Domain layer: Core business types and logic.
//!
//! Plain value types plus the password/key primitives they rely on.
//! Nothing here performs I/O.

pub mod credential;
mod entity;
pub mod kdf;
pub mod ledger;
mod role;
pub mod validation;

pub use credential::{AccountKeys, Credential, KeyError};
pub use entity::{
    Action, CaregiverProfile, EntityKind, MedicProfile, NewReport, NewTreatmentPlan,
    PatientProfile, Profile, Report, TreatmentPlan,
};
pub use ledger::{
    CompiledContract, ContractReference, LedgerEvent, LedgerTransaction, LogQuery, RawLog,
    ReconciliationEntry, ReconciliationKind, SubmitOptions, TxReceipt,
};
pub use role::{Role, UnknownRole};
pub use validation::ValidationError;
