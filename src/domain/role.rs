//! Account roles.

use serde::{Deserialize, Serialize};

/// Role attached to every credential.
///
/// Parsed exhaustively from storage; an unknown role string is an error,
/// never a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Medic,
    Patient,
    Caregiver,
}

impl Role {
    /// Storage representation (matches the `CHECK` constraint of the schema).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Medic => "MEDIC",
            Self::Patient => "PATIENT",
            Self::Caregiver => "CAREGIVER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role string does not name a known role.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl std::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEDIC" => Ok(Self::Medic),
            "PATIENT" => Ok(Self::Patient),
            "CAREGIVER" => Ok(Self::Caregiver),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("medic".parse::<Role>().expect("Should parse"), Role::Medic);
        assert_eq!(" Patient ".parse::<Role>().expect("Should parse"), Role::Patient);
        assert_eq!("CAREGIVER".parse::<Role>().expect("Should parse"), Role::Caregiver);
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!("admin".parse::<Role>().is_err());
        assert!("".parse::<Role>().is_err());
    }

    #[test]
    fn test_display_matches_storage_form() {
        for role in [Role::Medic, Role::Patient, Role::Caregiver] {
            assert_eq!(role.to_string().parse::<Role>().expect("Should parse"), role);
        }
    }
}
