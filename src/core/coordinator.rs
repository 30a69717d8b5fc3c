//! Preview/apply pipeline over a borrowed strategy registry.
//!
//! `preview` is side-effect free. `apply` re-runs parse and validate, then
//! for each file: snapshot the pre-image, write the new content, record the
//! change. Files are handled one at a time; an I/O failure part-way leaves
//! the earlier files written and logged.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::core::backup::{BackupStore, CleanupReport};
use crate::core::diff::{DiffLine, DiffRenderer, DiffStats, diff_stats};
use crate::core::error::EditError;
use crate::core::ledger::OperationLog;
use crate::core::model::{EditOperation, FileChange, generate_id};
use crate::core::strategy::{
    EditStrategy, FileMap, ParseStats, StrategyRegistry, StrategyResult,
};
use crate::infra::io::{read_existing, write_atomic};

/// Preview of one proposed file.
#[derive(Debug, Clone, Serialize)]
pub struct FilePreview {
    pub path: String,
    pub original: String,
    pub new: String,
    pub diff: String,
    pub visual_diff: Vec<DiffLine>,
    pub exists_already: bool,
    pub stats: DiffStats,
}

/// Everything a caller needs to show before confirming an apply.
#[derive(Debug, Clone, Serialize)]
pub struct StructuredPreview {
    pub strategy: String,
    pub files: Vec<FilePreview>,
    pub parse_stats: ParseStats,
    pub diagnostics: Vec<String>,
    pub fallback: Option<&'static str>,
}

impl StructuredPreview {
    pub fn total_stats(&self) -> DiffStats {
        self.files.iter().fold(DiffStats::default(), |acc, f| DiffStats {
            added: acc.added + f.stats.added,
            removed: acc.removed + f.stats.removed,
        })
    }
}

/// Where the coordinator keeps its state on disk.
#[derive(Debug, Clone)]
pub struct CoordinatorPaths {
    pub workspace: PathBuf,
    /// Relative paths are taken from `workspace`
    pub backup_dir: PathBuf,
    pub history_file: String,
}

impl CoordinatorPaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            backup_dir: PathBuf::from(".swing_backups"),
            history_file: "edit_history.json".into(),
        }
    }

    pub fn resolved_backup_dir(&self) -> PathBuf {
        if self.backup_dir.is_absolute() {
            self.backup_dir.clone()
        } else {
            self.workspace.join(&self.backup_dir)
        }
    }
}

pub struct EditCoordinator<'r> {
    registry: &'r StrategyRegistry,
    workspace: PathBuf,
    backups: BackupStore,
    log: OperationLog,
    renderer: DiffRenderer,
}

impl<'r> EditCoordinator<'r> {
    pub fn new(registry: &'r StrategyRegistry, paths: &CoordinatorPaths) -> Self {
        let backup_dir = paths.resolved_backup_dir();
        let log = OperationLog::open(backup_dir.join(&paths.history_file));
        let settings = registry.settings();
        Self {
            registry,
            workspace: paths.workspace.clone(),
            backups: BackupStore::new(backup_dir),
            log,
            renderer: DiffRenderer::new(settings.context_lines, settings.new_file_preview_lines),
        }
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// Set when the ledger on disk could not be read.
    pub fn history_warning(&self) -> Option<EditError> {
        self.log.load_warning()
    }

    /// Parse and validate without touching the disk.
    fn run_strategy(
        &self,
        strategy: &str,
        model_text: &str,
        current_files: &FileMap,
    ) -> Result<(&'r dyn EditStrategy, StrategyResult), EditError> {
        let s = self.registry.get(strategy)?;
        let result = s.parse(model_text, current_files);
        if let Some(e) = &result.error {
            debug!(strategy = s.name(), error = %e, "parse failed");
            return Err(EditError::ParseFailure(e.clone()));
        }
        if let Err(e) = s.validate(&result) {
            debug!(strategy = s.name(), error = %e, "validation failed");
            return Err(EditError::ValidationFailure(e));
        }
        Ok((s, result))
    }

    /// What applying `model_text` would do, file by file.
    #[instrument(level = "debug", skip(self, model_text, current_files))]
    pub fn preview(
        &self,
        strategy: &str,
        model_text: &str,
        current_files: &FileMap,
    ) -> Result<StructuredPreview, EditError> {
        let (s, result) = self.run_strategy(strategy, model_text, current_files)?;

        let mut files = Vec::with_capacity(result.files.len());
        for (path, new) in &result.files {
            let target = self.workspace.join(path);
            let on_disk = read_existing(&target).map_err(|source| EditError::Storage {
                path: target.clone(),
                source,
            })?;
            let exists_already = on_disk.is_some();
            let original = current_files
                .get(path)
                .cloned()
                .or(on_disk)
                .unwrap_or_default();

            files.push(FilePreview {
                diff: self.renderer.unified_diff(path, &original, new),
                visual_diff: self.renderer.visualize(path, &original, new),
                stats: diff_stats(&original, new),
                path: path.clone(),
                original,
                new: new.clone(),
                exists_already,
            });
        }

        Ok(StructuredPreview {
            strategy: s.name().to_string(),
            files,
            parse_stats: result.stats,
            diagnostics: result.diagnostics,
            fallback: result.fallback,
        })
    }

    /// Write the proposed files and record one operation.
    #[instrument(level = "debug", skip(self, model_text, current_files, description))]
    pub fn apply(
        &mut self,
        strategy: &str,
        model_text: &str,
        current_files: &FileMap,
        description: &str,
    ) -> Result<EditOperation, EditError> {
        let (s, result) = self.run_strategy(strategy, model_text, current_files)?;
        let now = Utc::now();
        let operation_id = generate_id();
        let description = describe(s.name(), description, result.files.len());

        let mut changes = Vec::with_capacity(result.files.len());
        for (path, new_content) in &result.files {
            match self.apply_one(path, new_content, now) {
                Ok(change) => changes.push(change),
                Err(source) => {
                    let target = self.workspace.join(path);
                    warn!(path = %target.display(), error = %source, written = changes.len(), "apply stopped");
                    let partial_operation = if changes.is_empty() {
                        None
                    } else {
                        let op = EditOperation {
                            operation_id: operation_id.clone(),
                            timestamp: now,
                            description: format!("{description} (partial)"),
                            changes,
                        };
                        match self.log.append(op) {
                            Ok(()) => Some(operation_id),
                            Err(e) => {
                                warn!(error = %e, "could not record partial operation");
                                None
                            }
                        }
                    };
                    return Err(EditError::ApplyIo {
                        path: target,
                        partial_operation,
                        source,
                    });
                }
            }
        }

        let op = EditOperation {
            operation_id,
            timestamp: now,
            description,
            changes,
        };
        match self.log.append(op.clone()) {
            Ok(()) => {}
            Err(EditError::Storage { path, source }) => {
                warn!(operation = %op.operation_id, error = %source, "edit applied but not recorded");
                return Err(EditError::Unrecorded {
                    operation_id: op.operation_id,
                    path,
                    source,
                });
            }
            Err(e) => return Err(e),
        }
        info!(
            operation = %op.operation_id,
            files = op.changes.len(),
            "edit applied"
        );
        Ok(op)
    }

    /// Snapshot then overwrite one file.
    fn apply_one(&self, path: &str, new_content: &str, at: DateTime<Utc>) -> io::Result<FileChange> {
        let target = self.workspace.join(path);
        let original_content = match read_existing(&target)? {
            Some(text) => text,
            None => {
                if let Some(dir) = target.parent() {
                    fs::create_dir_all(dir)?;
                }
                String::new()
            }
        };

        let change_id = generate_id();
        let backup_path = self
            .backups
            .snapshot(Path::new(path), &original_content, &change_id, at)?;
        write_atomic(&target, new_content.as_bytes())?;
        debug!(path, bytes = new_content.len(), "file written");

        Ok(FileChange {
            file_path: PathBuf::from(path),
            original_content,
            new_content: new_content.to_string(),
            timestamp: at,
            change_id,
            backup_path,
        })
    }

    pub fn history(&self, limit: usize) -> Vec<&EditOperation> {
        self.log.history(limit)
    }

    /// `false` for an unknown id or when a restore write fails.
    pub fn rollback(&self, operation_id: &str) -> bool {
        self.log.rollback(operation_id, &self.workspace)
    }

    pub fn rollback_detailed(&self, operation_id: &str) -> Result<Vec<PathBuf>, EditError> {
        self.log.rollback_detailed(operation_id, &self.workspace)
    }

    /// Delete snapshots older than `max_age_days`; the ledger is kept.
    pub fn cleanup_backups(
        &self,
        max_age_days: u64,
        dry_run: bool,
    ) -> Result<CleanupReport, EditError> {
        self.backups
            .cleanup(max_age_days, dry_run)
            .map_err(|source| EditError::Storage {
                path: self.backups.dir().to_path_buf(),
                source,
            })
    }
}

/// `[strategy] description`, with a file count when none was given.
pub fn describe(strategy: &str, description: &str, files: usize) -> String {
    let description = description.trim();
    if description.is_empty() {
        format!("[{strategy}] {files} file(s) modified")
    } else {
        format!("[{strategy}] {description}")
    }
}
