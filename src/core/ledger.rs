//! Operation log: the reloadable ledger of applied operations, and rollback.
//!
//! The ledger is a single JSON document rewritten atomically on every append.
//! A ledger that cannot be parsed degrades to an empty history; the bad file
//! is moved aside before anything is written over it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::core::error::EditError;
use crate::core::model::EditOperation;
use crate::infra::io::write_atomic;

pub const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    operations: Vec<EditOperation>,
}

/// Accepted on-disk shapes; older ledgers are a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum LedgerOnDisk {
    Versioned(LedgerFile),
    Legacy(Vec<EditOperation>),
}

#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    operations: Vec<EditOperation>,
    /// Reason the on-disk ledger was not loaded
    load_failure: Option<String>,
}

impl OperationLog {
    /// Load the ledger at `path`. Never fails: problems degrade to an empty
    /// history and are reported by [`load_warning`](Self::load_warning).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (operations, load_failure) = match load(&path) {
            Ok(ops) => (ops, None),
            Err(reason) => {
                warn!(ledger = %path.display(), %reason, "edit history unreadable, starting empty");
                (Vec::new(), Some(reason))
            }
        };
        debug!(ledger = %path.display(), operations = operations.len(), "edit history loaded");
        Self {
            path,
            operations,
            load_failure,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_warning(&self) -> Option<EditError> {
        self.load_failure.as_ref().map(|reason| EditError::HistoryLoad {
            path: self.path.clone(),
            reason: reason.clone(),
        })
    }

    pub fn operations(&self) -> &[EditOperation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn find(&self, operation_id: &str) -> Option<&EditOperation> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }

    /// Record `op` and persist the whole ledger.
    ///
    /// The operation stays in memory even if the write fails, since its
    /// file changes already happened.
    pub fn append(&mut self, op: EditOperation) -> Result<(), EditError> {
        debug_assert!(!op.changes.is_empty(), "logged operations carry changes");
        let id = op.operation_id.clone();
        self.operations.push(op);
        self.save()?;
        info!(operation = %id, total = self.operations.len(), "operation recorded");
        Ok(())
    }

    fn save(&mut self) -> Result<(), EditError> {
        let storage = |source: io::Error| EditError::Storage {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(storage)?;
        }
        if self.load_failure.is_some() && self.path.exists() {
            let aside = corrupt_path(&self.path);
            fs::rename(&self.path, &aside).map_err(storage)?;
            warn!(moved_to = %aside.display(), "unreadable edit history set aside");
        }

        let doc = LedgerFile {
            version: LEDGER_VERSION,
            operations: self.operations.clone(),
        };
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| storage(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(&self.path, text.as_bytes()).map_err(storage)?;
        self.load_failure = None;
        Ok(())
    }

    /// Most recent first, at most `limit` entries.
    ///
    /// Equal timestamps keep the later-recorded operation first.
    pub fn history(&self, limit: usize) -> Vec<&EditOperation> {
        let mut ops: Vec<(usize, &EditOperation)> = self.operations.iter().enumerate().collect();
        ops.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));
        ops.into_iter().take(limit).map(|(_, op)| op).collect()
    }

    /// Restore every file of `operation_id` to its pre-image, in recorded
    /// order, relative to `root`.
    ///
    /// A failed write stops the rollback; files restored before it stay
    /// restored. Files the operation created are emptied, not deleted.
    pub fn rollback_detailed(
        &self,
        operation_id: &str,
        root: &Path,
    ) -> Result<Vec<PathBuf>, EditError> {
        let op = self
            .find(operation_id)
            .ok_or_else(|| EditError::RollbackFailure {
                operation_id: operation_id.to_string(),
                path: None,
                reason: "unknown operation".into(),
            })?;

        let mut restored = Vec::with_capacity(op.changes.len());
        for change in &op.changes {
            let target = root.join(&change.file_path);
            let res = match target.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir),
                _ => Ok(()),
            }
            .and_then(|()| write_atomic(&target, change.original_content.as_bytes()));

            if let Err(e) = res {
                warn!(
                    operation = operation_id,
                    path = %target.display(),
                    error = %e,
                    restored = restored.len(),
                    "rollback stopped"
                );
                return Err(EditError::RollbackFailure {
                    operation_id: operation_id.to_string(),
                    path: Some(target),
                    reason: e.to_string(),
                });
            }
            debug!(path = %target.display(), "pre-image restored");
            restored.push(target);
        }

        info!(operation = operation_id, files = restored.len(), "operation rolled back");
        Ok(restored)
    }

    /// `true` when every file of the operation was restored.
    pub fn rollback(&self, operation_id: &str, root: &Path) -> bool {
        match self.rollback_detailed(operation_id, root) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "rollback failed");
                false
            }
        }
    }
}

fn load(path: &Path) -> Result<Vec<EditOperation>, String> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.to_string()),
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<LedgerOnDisk>(&text) {
        Ok(LedgerOnDisk::Versioned(doc)) => {
            if doc.version > LEDGER_VERSION {
                warn!(version = doc.version, "edit history written by a newer version");
            }
            Ok(doc.operations)
        }
        Ok(LedgerOnDisk::Legacy(ops)) => Ok(ops),
        Err(e) => Err(format!("not a valid edit history: {e}")),
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "edit_history.json".into());
    path.with_file_name(format!(
        "{name}.corrupt-{}",
        Utc::now().format("%Y%m%d%H%M%S")
    ))
}
