//! JSON-lines reconciliation journal.
//!
//! One entry per line, appended and synced before `record` returns. The file
//! is created with 0600 permissions on Unix since entries carry profile data.

use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::ReconciliationEntry;
use crate::ports::Journal;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Journal encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Journal lock poisoned")]
    Poisoned,
}

/// Append-only journal file.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    // Serializes appends from concurrent writers in this process.
    lock: Mutex<()>,
}

impl FileJournal {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back, oldest first.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or a line does not parse.
    pub fn entries(&self) -> Result<Vec<ReconciliationEntry>, JournalError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(JournalError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(JournalError::from))
            .collect()
    }

    fn io(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Journal for FileJournal {
    type Error = JournalError;

    fn record(&self, entry: &ReconciliationEntry) -> Result<(), Self::Error> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.lock.lock().map_err(|_| JournalError::Poisoned)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io(e))?;
        }

        let mut opts = OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        {
            opts.mode(0o600);
        }

        let mut file = opts.open(&self.path).map_err(|e| self.io(e))?;
        file.write_all(&line).map_err(|e| self.io(e))?;
        file.sync_data().map_err(|e| self.io(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReconciliationKind;

    fn entry(operation: &str) -> ReconciliationEntry {
        ReconciliationEntry {
            timestamp: chrono::Utc::now(),
            kind: ReconciliationKind::PartialWrite,
            operation: operation.to_string(),
            function: "addPatient".to_string(),
            sender: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string(),
            args: vec!["Alice".to_string(), "Liddell".to_string(), "true".to_string()],
            tx_hash: None,
            error: "Constraint violation: UNIQUE constraint failed".to_string(),
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().expect("Should create dir");
        let journal = FileJournal::new(dir.path().join("logs/reconcile.jsonl"));

        assert!(journal.entries().expect("Should read").is_empty());

        journal.record(&entry("register")).expect("Should record");
        journal.record(&entry("update_profile")).expect("Should record");

        let entries = journal.entries().expect("Should read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "register");
        assert_eq!(entries[1].operation, "update_profile");
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("Should create dir");
        let journal = FileJournal::new(dir.path().join("reconcile.jsonl"));
        journal.record(&entry("register")).expect("Should record");

        let mode = fs::metadata(journal.path())
            .expect("Should stat")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
