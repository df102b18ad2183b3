//! Off-chain entity records: profiles, reports and treatment plans.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Role;

/// Kinds of entity mirrored on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Medic,
    Caregiver,
    Report,
    TreatmentPlan,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Patient => "patient",
            Self::Medic => "medic",
            Self::Caregiver => "caregiver",
            Self::Report => "report",
            Self::TreatmentPlan => "treatment_plan",
        })
    }
}

impl From<Role> for EntityKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Patient => Self::Patient,
            Role::Medic => Self::Medic,
            Role::Caregiver => Self::Caregiver,
        }
    }
}

/// Write actions mirrored on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Register,
    Update,
    Add,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Register => "register",
            Self::Update => "update",
            Self::Add => "add",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub username: String,
    pub name: String,
    pub lastname: String,
    pub birthday: NaiveDate,
    pub birth_place: String,
    pub residence: String,
    pub autonomous: bool,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicProfile {
    pub username: String,
    pub name: String,
    pub lastname: String,
    pub birthday: NaiveDate,
    pub specialization: String,
    pub mail: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaregiverProfile {
    pub username: String,
    pub patient_username: String,
    pub name: String,
    pub lastname: String,
    pub relationship: String,
    pub phone: String,
}

/// Role-specific profile attached to a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "UPPERCASE")]
pub enum Profile {
    Patient(PatientProfile),
    Medic(MedicProfile),
    Caregiver(CaregiverProfile),
}

impl Profile {
    #[must_use]
    pub fn role(&self) -> Role {
        match self {
            Self::Patient(_) => Role::Patient,
            Self::Medic(_) => Role::Medic,
            Self::Caregiver(_) => Role::Caregiver,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Patient(p) => &p.username,
            Self::Medic(m) => &m.username,
            Self::Caregiver(c) => &c.username,
        }
    }

    #[must_use]
    pub fn phone(&self) -> &str {
        match self {
            Self::Patient(p) => &p.phone,
            Self::Medic(m) => &m.phone,
            Self::Caregiver(c) => &c.phone,
        }
    }

    #[must_use]
    pub fn mail(&self) -> Option<&str> {
        match self {
            Self::Medic(m) => Some(&m.mail),
            _ => None,
        }
    }

    /// Arguments of the `add*`/`update*` ledger functions for this profile.
    #[must_use]
    pub fn ledger_args(&self) -> Vec<String> {
        match self {
            Self::Patient(p) => vec![
                p.name.clone(),
                p.lastname.clone(),
                p.autonomous.to_string(),
            ],
            Self::Medic(m) => vec![
                m.name.clone(),
                m.lastname.clone(),
                m.specialization.clone(),
            ],
            Self::Caregiver(c) => vec![c.name.clone(), c.lastname.clone()],
        }
    }
}

/// Medical report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub date: NaiveDate,
    pub patient_username: String,
    pub medic_username: String,
    pub analyses: String,
    pub diagnosis: String,
}

impl Report {
    /// Arguments of `updateReport`: the id followed by the new contents.
    #[must_use]
    pub fn ledger_args(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.analyses.clone(),
            self.diagnosis.clone(),
        ]
    }
}

/// Report fields supplied by a medic; id and date are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub patient_username: String,
    pub medic_username: String,
    pub analyses: String,
    pub diagnosis: String,
}

impl NewReport {
    #[must_use]
    pub fn ledger_args(&self) -> Vec<String> {
        vec![self.analyses.clone(), self.diagnosis.clone()]
    }
}

/// Treatment plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub id: i64,
    pub date: NaiveDate,
    pub patient_username: String,
    pub medic_username: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl TreatmentPlan {
    /// Append a dated, attributed note instead of overwriting the description.
    #[must_use]
    pub fn amended_description(&self, note: &str, medic_username: &str, on: NaiveDate) -> String {
        format!(
            "{}. \nDescription updated on {} by the medic {}: {}",
            self.description,
            on.format("%Y-%m-%d"),
            medic_username,
            note
        )
    }

    /// Arguments of `updateTreatmentPlan`.
    #[must_use]
    pub fn ledger_args(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.description.clone(),
            self.start_date.format("%Y-%m-%d").to_string(),
            self.end_date.format("%Y-%m-%d").to_string(),
        ]
    }
}

/// Treatment plan fields supplied by a medic; id and date are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTreatmentPlan {
    pub patient_username: String,
    pub medic_username: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl NewTreatmentPlan {
    #[must_use]
    pub fn ledger_args(&self) -> Vec<String> {
        vec![
            self.description.clone(),
            self.start_date.format("%Y-%m-%d").to_string(),
            self.end_date.format("%Y-%m-%d").to_string(),
        ]
    }
}
