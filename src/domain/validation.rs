//! Field format checks run before any write.
//!
//! Uniqueness is checked against the store by the write coordinator; this
//! module only covers format rules.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use super::credential::KeyError;
use super::entity::{NewReport, NewTreatmentPlan, Profile};

/// Recoverable input errors (format or uniqueness).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Phone number already registered")]
    DuplicatePhone,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Public key already registered")]
    DuplicateKey,

    #[error("Invalid keypair: {0}")]
    InvalidKeypair(#[from] KeyError),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown {role} {username}")]
    UnknownAccount { role: &'static str, username: String },

    #[error("Operation not permitted: {0}")]
    NotPermitted(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("Valid regex")
    })
}

/// Require a non-blank value.
///
/// # Errors
/// Returns error if the value is empty after trimming.
pub fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Usernames: 3-32 characters of letters, digits, `.`, `_` or `-`.
///
/// # Errors
/// Returns error if the username is malformed.
pub fn check_username(username: &str) -> Result<(), ValidationError> {
    let ok_len = (3..=32).contains(&username.chars().count());
    let ok_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !ok_len || !ok_chars {
        return Err(invalid(
            "username",
            "3-32 characters of letters, digits, '.', '_' or '-'",
        ));
    }
    Ok(())
}

/// Phone numbers: digits with optional spaces or hyphens, 7-15 characters.
///
/// # Errors
/// Returns error if the phone number is malformed.
pub fn check_phone(phone: &str) -> Result<(), ValidationError> {
    let digits_only = phone.chars().filter(|c| !matches!(c, '-' | ' ')).collect::<String>();
    if digits_only.is_empty() || !digits_only.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("phone", "digits, spaces and hyphens only"));
    }
    if !(7..=15).contains(&phone.len()) {
        return Err(invalid("phone", "must be 7-15 characters"));
    }
    Ok(())
}

/// # Errors
/// Returns error if the address does not look like an email.
pub fn check_email(mail: &str) -> Result<(), ValidationError> {
    if !email_regex().is_match(mail) {
        return Err(invalid("mail", "not a valid email address"));
    }
    Ok(())
}

/// Birthdays must lie strictly in the past.
///
/// # Errors
/// Returns error if the date is today or later.
pub fn check_birthday(birthday: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
    if birthday >= today {
        return Err(invalid("birthday", "must be in the past"));
    }
    Ok(())
}

/// Parse an ISO `YYYY-MM-DD` date.
///
/// # Errors
/// Returns error if the string is not a valid date.
pub fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| invalid(field, "expected YYYY-MM-DD"))
}

/// Format checks for a profile.
///
/// # Errors
/// Returns the first failing field.
pub fn check_profile(profile: &Profile, today: NaiveDate) -> Result<(), ValidationError> {
    check_username(profile.username())?;
    check_phone(profile.phone())?;
    match profile {
        Profile::Patient(p) => {
            require("name", &p.name)?;
            require("lastname", &p.lastname)?;
            require("birth_place", &p.birth_place)?;
            require("residence", &p.residence)?;
            check_birthday(p.birthday, today)
        }
        Profile::Medic(m) => {
            require("name", &m.name)?;
            require("lastname", &m.lastname)?;
            require("specialization", &m.specialization)?;
            check_email(&m.mail)?;
            check_birthday(m.birthday, today)
        }
        Profile::Caregiver(c) => {
            require("name", &c.name)?;
            require("lastname", &c.lastname)?;
            require("relationship", &c.relationship)?;
            check_username(&c.patient_username)
        }
    }
}

/// # Errors
/// Returns error if analyses or diagnosis are blank.
pub fn check_report(report: &NewReport) -> Result<(), ValidationError> {
    require("analyses", &report.analyses)?;
    require("diagnosis", &report.diagnosis)
}

/// # Errors
/// Returns error if the description is blank or the dates are inverted.
pub fn check_treatment_plan(plan: &NewTreatmentPlan) -> Result<(), ValidationError> {
    require("description", &plan.description)?;
    check_plan_dates(plan.start_date, plan.end_date)
}

/// # Errors
/// Returns error if `end` precedes `start`.
pub fn check_plan_dates(start: NaiveDate, end: NaiveDate) -> Result<(), ValidationError> {
    if end < start {
        return Err(invalid("end_date", "must not precede start_date"));
    }
    Ok(())
}
