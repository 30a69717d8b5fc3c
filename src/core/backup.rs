//! Write-ahead snapshots of pre-edit content.
//!
//! One flat directory holds `<YYYYmmdd_HHMMSS>_<changeId>_<basename>` files,
//! each written and fsynced before the edited file is touched. The ledger
//! lives in the same directory and is never considered a snapshot.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A snapshot file found in the backup directory.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub change_id: String,
    pub original_name: String,
    pub size_bytes: u64,
}

/// Outcome of an age-based cleanup.
#[derive(Debug, Default, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
    pub dry_run: bool,
}

/// Snapshot storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `content` as the pre-image of `file_path`.
    ///
    /// Returns the snapshot path once its bytes are on disk.
    pub fn snapshot(
        &self,
        file_path: &Path,
        content: &str,
        change_id: &str,
        at: DateTime<Utc>,
    ) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let basename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no file name in {}", file_path.display()),
                )
            })?;
        let name = format!("{}_{}_{}", at.format(STAMP_FORMAT), change_id, basename);
        let backup_path = self.dir.join(name);

        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)?;
        f.write_all(content.as_bytes())?;
        f.sync_all()?;
        let _ = sync_dir(&self.dir);

        debug!(
            file = %file_path.display(),
            backup = %backup_path.display(),
            bytes = content.len(),
            "snapshot written"
        );
        Ok(backup_path)
    }

    /// Snapshot files currently in the directory, oldest first.
    ///
    /// Files whose names do not follow the snapshot layout (the ledger, temp
    /// files, set-aside corrupt ledgers) are not listed.
    pub fn list(&self) -> io::Result<Vec<SnapshotEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let md = entry.metadata()?;
            if !md.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((taken_at, change_id, original_name)) = parse_snapshot_name(&name) {
                out.push(SnapshotEntry {
                    path: entry.path(),
                    taken_at,
                    change_id,
                    original_name,
                    size_bytes: md.len(),
                });
            }
        }
        out.sort_by(|a, b| a.taken_at.cmp(&b.taken_at).then_with(|| a.path.cmp(&b.path)));
        Ok(out)
    }

    /// Delete snapshots taken more than `max_age_days` ago.
    pub fn cleanup(&self, max_age_days: u64, dry_run: bool) -> io::Result<CleanupReport> {
        let mut report = CleanupReport {
            dry_run,
            ..CleanupReport::default()
        };
        let cutoff = i64::try_from(max_age_days)
            .ok()
            .and_then(Duration::try_days)
            .and_then(|age| Utc::now().checked_sub_signed(age));
        // Nothing can be older than a cutoff before the calendar starts
        let Some(cutoff) = cutoff else {
            debug!(max_age_days, "cleanup age out of range, nothing to remove");
            return Ok(report);
        };

        for snap in self.list()? {
            if snap.taken_at >= cutoff {
                continue;
            }
            if dry_run {
                report.bytes_freed += snap.size_bytes;
                report.removed.push(snap.path);
                continue;
            }
            match fs::remove_file(&snap.path) {
                Ok(()) => {
                    report.bytes_freed += snap.size_bytes;
                    report.removed.push(snap.path);
                }
                Err(e) => {
                    warn!(path = %snap.path.display(), error = %e, "failed to remove snapshot");
                    report.errors.push(format!("{}: {e}", snap.path.display()));
                }
            }
        }
        Ok(report)
    }
}

/// Split `<stamp>_<changeId>_<basename>` into its parts.
fn parse_snapshot_name(name: &str) -> Option<(DateTime<Utc>, String, String)> {
    // Stamp is "YYYYmmdd_HHMMSS": fixed 15 bytes followed by '_'
    if name.len() < 17 || !name.is_char_boundary(15) || name.as_bytes()[15] != b'_' {
        return None;
    }
    let stamp = NaiveDateTime::parse_from_str(&name[..15], STAMP_FORMAT).ok()?;
    let rest = &name[16..];
    let (change_id, original) = rest.split_once('_')?;
    if change_id.is_empty()
        || original.is_empty()
        || !change_id.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some((stamp.and_utc(), change_id.to_string(), original.to_string()))
}

/// Cross-platform directory fsync helper.
#[cfg(unix)]
pub(crate) fn sync_dir(p: &Path) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let f = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(p)?;
    f.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_p: &Path) -> io::Result<()> {
    // No reliable directory fsync; best-effort no-op.
    Ok(())
}
