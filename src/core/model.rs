//! Persisted records: one `EditOperation` per confirmed apply, holding one
//! `FileChange` per touched file.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pre-image and post-image of one file within an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: PathBuf,
    pub original_content: String,
    pub new_content: String,
    pub timestamp: DateTime<Utc>,
    pub change_id: String,
    pub backup_path: PathBuf,
}

impl FileChange {
    /// True when the file did not exist before the operation.
    pub fn created_file(&self) -> bool {
        self.original_content.is_empty()
    }
}

/// One user-visible atomic action, possibly spanning many files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOperation {
    pub operation_id: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub changes: Vec<FileChange>,
}

impl EditOperation {
    pub fn file_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.changes.iter().map(|c| &c.file_path)
    }
}

/// Generate a short, filesystem-safe identifier.
///
/// Twelve characters from a 62-symbol alphabet; collisions within one ledger
/// are not a practical concern.
pub fn generate_id() -> String {
    let alphabet = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    (0..12)
        .map(|_| {
            let idx = rng.random_range(0..alphabet.len());
            alphabet[idx] as char
        })
        .collect()
}
