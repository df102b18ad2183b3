//! SQLite adapter: Implementation of Storage.
//!
//! Provides local persistence for credentials, profiles, reports and
//! treatment plans.
//!
//! # Security
//!
//! - Passwords are stored only as Argon2id hash records
//! - Private keys are stored sealed (see `domain::kdf::seal_key`)
//! - Every statement is parameterized
//!
//! # Constraints
//!
//! Username, public key, medic email and phone uniqueness are `UNIQUE`
//! constraints, so a racing insert fails with [`StorageError::Conflict`] even
//! when an earlier pre-check passed. Phones span three profile tables and are
//! claimed in the `phones` table inside the same transaction as the profile
//! row. Foreign keys are enforced.
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::domain::{
    kdf::{PasswordHash, SealedKey},
    CaregiverProfile, Credential, MedicProfile, NewReport, NewTreatmentPlan, PatientProfile,
    Profile, Report, Role, TreatmentPlan,
};
use crate::ports::{Page, Storage};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    #[error("Constraint violation: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database connection lock poisoned")]
    Poisoned,
}

impl StorageError {
    /// Whether this error is a uniqueness or foreign-key violation.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                Self::Conflict(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => Self::Database(e),
        }
    }
}

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at the given path.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('MEDIC', 'PATIENT', 'CAREGIVER')),
                public_key TEXT NOT NULL UNIQUE,
                sealed_private_key BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patients (
                username TEXT NOT NULL UNIQUE REFERENCES credentials(username),
                name TEXT NOT NULL,
                lastname TEXT NOT NULL,
                birthday TEXT NOT NULL,
                birth_place TEXT NOT NULL,
                residence TEXT NOT NULL,
                autonomous INTEGER NOT NULL CHECK (autonomous IN (0, 1)),
                phone TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS medics (
                username TEXT NOT NULL UNIQUE REFERENCES credentials(username),
                name TEXT NOT NULL,
                lastname TEXT NOT NULL,
                birthday TEXT NOT NULL,
                specialization TEXT NOT NULL,
                mail TEXT NOT NULL UNIQUE,
                phone TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS caregivers (
                username TEXT NOT NULL UNIQUE REFERENCES credentials(username),
                patient_username TEXT NOT NULL REFERENCES patients(username),
                name TEXT NOT NULL,
                lastname TEXT NOT NULL,
                relationship TEXT NOT NULL,
                phone TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                patient_username TEXT NOT NULL REFERENCES patients(username),
                medic_username TEXT NOT NULL REFERENCES medics(username),
                analyses TEXT NOT NULL,
                diagnosis TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS treatment_plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                patient_username TEXT NOT NULL REFERENCES patients(username),
                medic_username TEXT NOT NULL REFERENCES medics(username),
                description TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS phones (
                phone TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE REFERENCES credentials(username)
            );

            INSERT OR IGNORE INTO phones (phone, username)
                SELECT phone, username FROM patients
                UNION ALL SELECT phone, username FROM medics
                UNION ALL SELECT phone, username FROM caregivers;

            CREATE INDEX IF NOT EXISTS idx_reports_patient
                ON reports(patient_username, date DESC);
            CREATE INDEX IF NOT EXISTS idx_treatment_plans_patient
                ON treatment_plans(patient_username, date DESC);
            ",
        )?;

        Ok(())
    }

    fn format_date(date: NaiveDate) -> String {
        date.format(DATE_FORMAT).to_string()
    }

    /// Parse a stored date, surfacing corruption as a conversion failure.
    fn date_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
        let raw: String = row.get(idx)?;
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn insert_credential_row(conn: &Connection, credential: &Credential) -> Result<(), StorageError> {
        let hash = credential
            .password_hash
            .encode()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO credentials (
                username, password_hash, role, public_key, sealed_private_key
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                credential.username,
                hash,
                credential.role.as_str(),
                credential.public_key,
                credential.sealed_private_key.to_bytes(),
            ],
        )?;
        Ok(())
    }

    fn insert_profile_row(conn: &Connection, profile: &Profile) -> Result<(), StorageError> {
        match profile {
            Profile::Patient(p) => conn.execute(
                r"
                INSERT INTO patients (
                    username, name, lastname, birthday, birth_place,
                    residence, autonomous, phone
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                params![
                    p.username,
                    p.name,
                    p.lastname,
                    Self::format_date(p.birthday),
                    p.birth_place,
                    p.residence,
                    i64::from(p.autonomous),
                    p.phone,
                ],
            )?,
            Profile::Medic(m) => conn.execute(
                r"
                INSERT INTO medics (
                    username, name, lastname, birthday, specialization, mail, phone
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    m.username,
                    m.name,
                    m.lastname,
                    Self::format_date(m.birthday),
                    m.specialization,
                    m.mail,
                    m.phone,
                ],
            )?,
            Profile::Caregiver(c) => conn.execute(
                r"
                INSERT INTO caregivers (
                    username, patient_username, name, lastname, relationship, phone
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    c.username,
                    c.patient_username,
                    c.name,
                    c.lastname,
                    c.relationship,
                    c.phone,
                ],
            )?,
        };
        Ok(())
    }

    /// Claim the profile's phone for its owner, releasing any previous one.
    fn claim_phone(conn: &Connection, profile: &Profile) -> Result<(), StorageError> {
        let moved = conn.execute(
            "UPDATE phones SET phone = ?1 WHERE username = ?2",
            params![profile.phone(), profile.username()],
        )?;
        if moved == 0 {
            conn.execute(
                "INSERT INTO phones (phone, username) VALUES (?1, ?2)",
                params![profile.phone(), profile.username()],
            )?;
        }
        Ok(())
    }

    fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<PatientProfile> {
        let autonomous: i64 = row.get(6)?;
        Ok(PatientProfile {
            username: row.get(0)?,
            name: row.get(1)?,
            lastname: row.get(2)?,
            birthday: Self::date_column(row, 3)?,
            birth_place: row.get(4)?,
            residence: row.get(5)?,
            autonomous: autonomous != 0,
            phone: row.get(7)?,
        })
    }

    fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
        Ok(Report {
            id: row.get(0)?,
            date: Self::date_column(row, 1)?,
            patient_username: row.get(2)?,
            medic_username: row.get(3)?,
            analyses: row.get(4)?,
            diagnosis: row.get(5)?,
        })
    }

    fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<TreatmentPlan> {
        Ok(TreatmentPlan {
            id: row.get(0)?,
            date: Self::date_column(row, 1)?,
            patient_username: row.get(2)?,
            medic_username: row.get(3)?,
            description: row.get(4)?,
            start_date: Self::date_column(row, 5)?,
            end_date: Self::date_column(row, 6)?,
        })
    }

    fn role_of(conn: &Connection, username: &str) -> Result<Option<Role>, StorageError> {
        let role: Option<String> = conn
            .query_row(
                "SELECT role FROM credentials WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        role.map(|r| r.parse::<Role>().map_err(|e| StorageError::Corrupt(e.to_string())))
            .transpose()
    }
}

const PATIENT_COLUMNS: &str =
    "username, name, lastname, birthday, birth_place, residence, autonomous, phone";
const REPORT_COLUMNS: &str = "id, date, patient_username, medic_username, analyses, diagnosis";
const PLAN_COLUMNS: &str =
    "id, date, patient_username, medic_username, description, start_date, end_date";

impl Storage for SqliteStorage {
    type Error = StorageError;

    fn username_exists(&self, username: &str) -> Result<bool, Self::Error> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            r"
            SELECT (SELECT COUNT(*) FROM credentials WHERE username = ?1)
                 + (SELECT COUNT(*) FROM patients WHERE username = ?1)
            ",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn public_key_exists(&self, public_key: &str) -> Result<bool, Self::Error> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM credentials WHERE lower(public_key) = lower(?1)",
            params![public_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn phone_exists(&self, phone: &str, except_username: Option<&str>) -> Result<bool, Self::Error> {
        let conn = self.conn()?;
        let except = except_username.unwrap_or("");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM phones WHERE phone = ?1 AND username <> ?2",
            params![phone, except],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn email_exists(&self, mail: &str, except_username: Option<&str>) -> Result<bool, Self::Error> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM medics WHERE mail = ?1 AND username <> ?2",
            params![mail, except_username.unwrap_or("")],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_credential(&self, credential: &Credential) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        Self::insert_credential_row(&conn, credential)?;
        tracing::debug!(username = %credential.username, "Inserted credential");
        Ok(())
    }

    fn insert_account(&self, credential: &Credential, profile: &Profile) -> Result<(), Self::Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::insert_credential_row(&tx, credential)?;
        Self::insert_profile_row(&tx, profile)?;
        Self::claim_phone(&tx, profile)?;
        tx.commit()?;

        tracing::debug!(
            username = %credential.username,
            role = %credential.role,
            "Inserted account"
        );
        Ok(())
    }

    fn load_credential(&self, username: &str) -> Result<Option<Credential>, Self::Error> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                r"
                SELECT username, password_hash, role, public_key, sealed_private_key
                FROM credentials
                WHERE username = ?1
                ",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((username, hash, role, public_key, sealed)) = row else {
            return Ok(None);
        };

        Ok(Some(Credential {
            password_hash: PasswordHash::decode(&hash)
                .map_err(|e| StorageError::Corrupt(format!("password hash of {username}: {e}")))?,
            role: role
                .parse()
                .map_err(|e: crate::domain::UnknownRole| StorageError::Corrupt(e.to_string()))?,
            public_key,
            sealed_private_key: SealedKey::from_bytes(&sealed)
                .map_err(|e| StorageError::Corrupt(format!("sealed key of {username}: {e}")))?,
            username,
        }))
    }

    fn update_credential_secrets(&self, credential: &Credential) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        let hash = credential
            .password_hash
            .encode()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let changed = conn.execute(
            r"
            UPDATE credentials
            SET password_hash = ?1, sealed_private_key = ?2
            WHERE username = ?3
            ",
            params![hash, credential.sealed_private_key.to_bytes(), credential.username],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(credential.username.clone()));
        }
        Ok(())
    }

    fn load_profile(&self, username: &str) -> Result<Option<Profile>, Self::Error> {
        let conn = self.conn()?;

        let role = match Self::role_of(&conn, username)? {
            Some(role) => role,
            None => return Ok(None),
        };

        let profile = match role {
            Role::Patient => conn
                .query_row(
                    &format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE username = ?1"),
                    params![username],
                    Self::patient_from_row,
                )
                .optional()?
                .map(Profile::Patient),
            Role::Medic => conn
                .query_row(
                    r"
                    SELECT username, name, lastname, birthday, specialization, mail, phone
                    FROM medics WHERE username = ?1
                    ",
                    params![username],
                    |row| {
                        Ok(MedicProfile {
                            username: row.get(0)?,
                            name: row.get(1)?,
                            lastname: row.get(2)?,
                            birthday: Self::date_column(row, 3)?,
                            specialization: row.get(4)?,
                            mail: row.get(5)?,
                            phone: row.get(6)?,
                        })
                    },
                )
                .optional()?
                .map(Profile::Medic),
            Role::Caregiver => conn
                .query_row(
                    r"
                    SELECT username, patient_username, name, lastname, relationship, phone
                    FROM caregivers WHERE username = ?1
                    ",
                    params![username],
                    |row| {
                        Ok(CaregiverProfile {
                            username: row.get(0)?,
                            patient_username: row.get(1)?,
                            name: row.get(2)?,
                            lastname: row.get(3)?,
                            relationship: row.get(4)?,
                            phone: row.get(5)?,
                        })
                    },
                )
                .optional()?
                .map(Profile::Caregiver),
        };

        Ok(profile)
    }

    fn update_profile(&self, profile: &Profile) -> Result<(), Self::Error> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = match profile {
            Profile::Patient(p) => tx.execute(
                r"
                UPDATE patients
                SET name = ?2, lastname = ?3, birthday = ?4, birth_place = ?5,
                    residence = ?6, autonomous = ?7, phone = ?8
                WHERE username = ?1
                ",
                params![
                    p.username,
                    p.name,
                    p.lastname,
                    Self::format_date(p.birthday),
                    p.birth_place,
                    p.residence,
                    i64::from(p.autonomous),
                    p.phone,
                ],
            )?,
            Profile::Medic(m) => tx.execute(
                r"
                UPDATE medics
                SET name = ?2, lastname = ?3, birthday = ?4, specialization = ?5,
                    mail = ?6, phone = ?7
                WHERE username = ?1
                ",
                params![
                    m.username,
                    m.name,
                    m.lastname,
                    Self::format_date(m.birthday),
                    m.specialization,
                    m.mail,
                    m.phone,
                ],
            )?,
            Profile::Caregiver(c) => tx.execute(
                r"
                UPDATE caregivers
                SET patient_username = ?2, name = ?3, lastname = ?4,
                    relationship = ?5, phone = ?6
                WHERE username = ?1
                ",
                params![
                    c.username,
                    c.patient_username,
                    c.name,
                    c.lastname,
                    c.relationship,
                    c.phone,
                ],
            )?,
        };

        if changed == 0 {
            return Err(StorageError::NotFound(format!(
                "{} profile {}",
                profile.role(),
                profile.username()
            )));
        }
        Self::claim_phone(&tx, profile)?;
        tx.commit()?;
        Ok(())
    }

    fn patients_page(&self, offset: usize, limit: usize) -> Result<Page<PatientProfile>, Self::Error> {
        let conn = self.conn()?;

        let total_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM patients", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients ORDER BY username LIMIT ?1 OFFSET ?2"
        ))?;
        let patients = stmt
            .query_map(params![limit as i64, offset as i64], Self::patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(patients, total_count as usize, offset, limit))
    }

    fn insert_report(&self, report: &NewReport, date: NaiveDate) -> Result<i64, Self::Error> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO reports (date, patient_username, medic_username, analyses, diagnosis)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                Self::format_date(date),
                report.patient_username,
                report.medic_username,
                report.analyses,
                report.diagnosis,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_report(&self, id: i64) -> Result<Option<Report>, Self::Error> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                params![id],
                Self::report_from_row,
            )
            .optional()?)
    }

    fn update_report(&self, report: &Report) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE reports SET analyses = ?2, diagnosis = ?3 WHERE id = ?1",
            params![report.id, report.analyses, report.diagnosis],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("report {}", report.id)));
        }
        Ok(())
    }

    fn reports_for_patient(&self, patient_username: &str) -> Result<Vec<Report>, Self::Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE patient_username = ?1 ORDER BY date DESC, id DESC"
        ))?;
        let reports = stmt
            .query_map(params![patient_username], Self::report_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reports)
    }

    fn insert_treatment_plan(
        &self,
        plan: &NewTreatmentPlan,
        date: NaiveDate,
    ) -> Result<i64, Self::Error> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO treatment_plans (
                date, patient_username, medic_username, description, start_date, end_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                Self::format_date(date),
                plan.patient_username,
                plan.medic_username,
                plan.description,
                Self::format_date(plan.start_date),
                Self::format_date(plan.end_date),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn load_treatment_plan(&self, id: i64) -> Result<Option<TreatmentPlan>, Self::Error> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM treatment_plans WHERE id = ?1"),
                params![id],
                Self::plan_from_row,
            )
            .optional()?)
    }

    fn update_treatment_plan(&self, plan: &TreatmentPlan) -> Result<(), Self::Error> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r"
            UPDATE treatment_plans
            SET description = ?2, start_date = ?3, end_date = ?4
            WHERE id = ?1
            ",
            params![
                plan.id,
                plan.description,
                Self::format_date(plan.start_date),
                Self::format_date(plan.end_date),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("treatment plan {}", plan.id)));
        }
        Ok(())
    }

    fn treatment_plans_for_patient(
        &self,
        patient_username: &str,
    ) -> Result<Vec<TreatmentPlan>, Self::Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM treatment_plans WHERE patient_username = ?1 ORDER BY date DESC, id DESC"
        ))?;
        let plans = stmt
            .query_map(params![patient_username], Self::plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }
}
