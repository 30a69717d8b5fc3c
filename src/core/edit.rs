//! Command handlers for the `swing` binary.
//!
//! Each handler loads the workspace config, builds the default strategy
//! registry and borrows it into a coordinator for the duration of one
//! command. Errors travel as `anyhow` and are mapped to exit codes once, in
//! [`finish_with_exit`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::{
    io::{self, IsTerminal, Read},
    path::{Component, Path, PathBuf},
};
use tracing::debug;

use crate::cli::{
    AppContext, ApplyArgs, CleanupArgs, HistoryArgs, PreviewArgs, ReplyInput, RollbackArgs,
    StrategiesArgs,
};
use crate::core::coordinator::{CoordinatorPaths, EditCoordinator, StructuredPreview};
use crate::core::diff::DiffLine;
use crate::core::error::{EditError, exit_code_for};
use crate::core::model::EditOperation;
use crate::core::strategy::{FileMap, StrategyRegistry};
use crate::infra::config::{Config, load_config};
use crate::infra::io::read_file_smart;

/// Bad command-line input that never reached the engine.
#[derive(thiserror::Error, Debug, Clone)]
pub enum InputError {
    #[error("context file not found: {}", .0.display())]
    MissingContextFile(PathBuf),

    #[error("context file {} is outside the workspace", .0.display())]
    OutsideWorkspace(PathBuf),

    #[error("reply is empty")]
    EmptyReply,
}

/// Exit code for any error reaching the CLI boundary.
/// 0=success, 2=rejected reply, 3=invalid input, 4=io, 5=internal
pub fn exit_code(e: &anyhow::Error) -> i32 {
    if let Some(edit) = e.downcast_ref::<EditError>() {
        return exit_code_for(edit);
    }
    if e.downcast_ref::<InputError>().is_some() {
        return 3;
    }
    if e.chain().any(|cause| cause.is::<io::Error>()) {
        return 4;
    }
    5
}

/// Convert Result<()> to exit codes for CLI harness
pub fn finish_with_exit(result: Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(EditError::ApplyIo {
                partial_operation: Some(id),
                ..
            }) = e.downcast_ref::<EditError>()
            {
                eprintln!("Files written before the failure were recorded as operation {id}.");
                eprintln!("Run `swing rollback {id}` to undo them.");
            }
            if let Some(EditError::Unrecorded { operation_id, .. }) = e.downcast_ref::<EditError>() {
                eprintln!("Operation {operation_id} is missing from history; pre-edit snapshots are in the backup directory.");
            }
            if let Some(se) = e.downcast_ref::<EditError>().and_then(EditError::strategy_error) {
                debug!(kind = ?se.kind, strategy = %se.strategy, "reply rejected");
            }
            std::process::exit(exit_code(&e));
        }
    }
}

/// Config, registry and on-disk locations for one command.
struct Session {
    config: Config,
    registry: StrategyRegistry,
    paths: CoordinatorPaths,
}

impl Session {
    fn open(ctx: &AppContext) -> Result<Self> {
        let config = load_config(&ctx.workspace)?;
        let registry = StrategyRegistry::with_defaults(&config.engine_settings());
        let paths = CoordinatorPaths {
            workspace: ctx.workspace.clone(),
            backup_dir: config.backup_dir.clone(),
            history_file: config.history_file.clone(),
        };
        debug!(workspace = %ctx.workspace.display(), "session opened");
        Ok(Self {
            config,
            registry,
            paths,
        })
    }

    fn coordinator(&self) -> EditCoordinator<'_> {
        EditCoordinator::new(&self.registry, &self.paths)
    }

    fn strategy<'a>(&'a self, input: &'a ReplyInput) -> &'a str {
        input
            .strategy
            .as_deref()
            .unwrap_or(&self.config.default_strategy)
    }
}

/// Reply text from a file, or stdin for `-`.
fn read_reply(path: &Path) -> Result<String> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read reply from stdin")?;
        buf
    } else {
        read_file_smart(path)
            .with_context(|| format!("Failed to read reply file: {}", path.display()))?
            .into_string()
            .with_context(|| format!("Reply file is not text: {}", path.display()))?
    };

    if text.trim().is_empty() {
        return Err(InputError::EmptyReply.into());
    }
    Ok(text)
}

/// Workspace-relative key with `/` separators.
fn context_key(workspace: &Path, file: &Path) -> Result<String, InputError> {
    let outside = || InputError::OutsideWorkspace(file.to_path_buf());
    let rel = if !file.is_absolute() {
        file.to_path_buf()
    } else if let Ok(rel) = file.strip_prefix(workspace) {
        rel.to_path_buf()
    } else {
        // `.` or symlinked workspaces only compare after resolution
        let ws = std::fs::canonicalize(workspace).map_err(|_| outside())?;
        let full = std::fs::canonicalize(file).map_err(|_| outside())?;
        full.strip_prefix(&ws).map_err(|_| outside())?.to_path_buf()
    };

    let mut parts = Vec::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(InputError::OutsideWorkspace(file.to_path_buf())),
        }
    }
    Ok(parts.join("/"))
}

/// Current text of the files named on the command line.
fn load_context(workspace: &Path, files: &[PathBuf]) -> Result<FileMap> {
    let mut map = FileMap::with_capacity(files.len());
    for file in files {
        let key = context_key(workspace, file)?;
        let full = workspace.join(&key);
        if !full.is_file() {
            return Err(InputError::MissingContextFile(file.clone()).into());
        }
        let text = read_file_smart(&full)?
            .into_string()
            .with_context(|| format!("Context file is not text: {}", full.display()))?;
        map.insert(key, text);
    }
    debug!(files = map.len(), "context loaded");
    Ok(map)
}

fn use_color(ctx: &AppContext) -> bool {
    !ctx.no_color && io::stdout().is_terminal()
}

fn print_diff_line(line: &DiffLine, color: bool) {
    if !color {
        println!("{}", line.text());
        return;
    }
    match line {
        DiffLine::Header(t) => println!("{}", t.bold()),
        DiffLine::HunkMarker(t) => println!("{}", t.cyan()),
        DiffLine::Added(t) => println!("{}", t.green()),
        DiffLine::Removed(t) => println!("{}", t.red()),
        DiffLine::Context(t) => println!("{t}"),
        DiffLine::Neutral(t) => println!("{}", t.dimmed()),
    }
}

fn render_preview(preview: &StructuredPreview, color: bool) {
    for file in &preview.files {
        let state = if file.exists_already { "modified" } else { "new" };
        let title = format!(
            "{} ({state}, +{} -{})",
            file.path, file.stats.added, file.stats.removed
        );
        if color {
            println!("{}", title.bold().yellow());
        } else {
            println!("{title}");
        }
        for line in &file.visual_diff {
            print_diff_line(line, color);
        }
        println!();
    }

    if let Some(from) = preview.fallback {
        eprintln!("note: no {} blocks found; parsed as {from}", preview.strategy);
    }
    for note in &preview.diagnostics {
        eprintln!("note: {note}");
    }

    let total = preview.total_stats();
    println!(
        "{} file(s) via {}: +{} -{}",
        preview.files.len(),
        preview.strategy,
        total.added,
        total.removed
    );
}

/// Show what a reply would change; never writes.
pub fn preview_run(args: PreviewArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let strategy = session.strategy(&args.input);
    let reply = read_reply(&args.input.response)?;
    let files = load_context(&ctx.workspace, &args.input.files)?;

    let preview = session
        .coordinator()
        .preview(strategy, &reply, &files)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else if !ctx.quiet {
        render_preview(&preview, use_color(ctx));
    }
    Ok(())
}

#[derive(Serialize)]
struct AppliedReport<'a> {
    operation_id: &'a str,
    description: &'a str,
    files: Vec<&'a Path>,
    created: Vec<&'a Path>,
    backups: Vec<&'a Path>,
}

impl<'a> From<&'a EditOperation> for AppliedReport<'a> {
    fn from(op: &'a EditOperation) -> Self {
        Self {
            operation_id: &op.operation_id,
            description: &op.description,
            files: op.file_paths().map(PathBuf::as_path).collect(),
            created: op
                .changes
                .iter()
                .filter(|c| c.created_file())
                .map(|c| c.file_path.as_path())
                .collect(),
            backups: op.changes.iter().map(|c| c.backup_path.as_path()).collect(),
        }
    }
}

/// Preview, then write when `--yes` is given and `--dry-run` is not.
pub fn apply_run(args: ApplyArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let strategy = session.strategy(&args.input);
    let reply = read_reply(&args.input.response)?;
    let files = load_context(&ctx.workspace, &args.input.files)?;
    let mut coord = session.coordinator();

    if !args.yes || ctx.dry_run {
        let preview = coord.preview(strategy, &reply, &files)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&preview)?);
            return Ok(());
        }
        if !ctx.quiet {
            render_preview(&preview, use_color(ctx));
            if ctx.dry_run {
                eprintln!("DRY RUN - no files were written");
            } else {
                eprintln!("Safety mode: showing preview only. Use --yes to write changes.");
            }
        }
        return Ok(());
    }

    let op = coord.apply(strategy, &reply, &files, &args.description)?;

    if args.json {
        println!("{}", serde_json::to_string(&AppliedReport::from(&op))?);
    } else if !ctx.quiet {
        println!(
            "Applied operation {} ({} file(s)): {}",
            op.operation_id,
            op.changes.len(),
            op.description
        );
        for change in &op.changes {
            let mark = if change.created_file() { " (created)" } else { "" };
            println!("  • {}{mark}", change.file_path.display());
        }
        println!("Undo with: swing rollback {}", op.operation_id);
    }
    Ok(())
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    operation_id: &'a str,
    timestamp: DateTime<Utc>,
    description: &'a str,
    files: Vec<&'a Path>,
}

/// Recorded operations, newest first.
pub fn history_run(args: HistoryArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let coord = session.coordinator();
    if let Some(warning) = coord.history_warning() {
        eprintln!("warning: {warning}");
    }

    let limit = args.limit.unwrap_or(session.config.history.limit);
    let ops = coord.history(limit);

    if args.json {
        let entries: Vec<HistoryEntry<'_>> = ops
            .iter()
            .map(|op| HistoryEntry {
                operation_id: &op.operation_id,
                timestamp: op.timestamp,
                description: &op.description,
                files: op.file_paths().map(PathBuf::as_path).collect(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if ops.is_empty() {
        if !ctx.quiet {
            println!("No operations recorded.");
        }
        return Ok(());
    }

    for op in ops {
        println!(
            "{timestamp:<19} {id:<12} files={files:>3} {description}",
            timestamp = op.timestamp.format("%Y-%m-%d %H:%M:%S"),
            id = op.operation_id,
            files = op.changes.len(),
            description = op.description
        );
    }
    Ok(())
}

/// Restore every file of one operation to its pre-edit content.
pub fn rollback_run(args: RollbackArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let coord = session.coordinator();
    if let Some(warning) = coord.history_warning() {
        eprintln!("warning: {warning}");
    }

    let Some(op) = coord.log().find(&args.operation_id) else {
        return Err(EditError::RollbackFailure {
            operation_id: args.operation_id,
            path: None,
            reason: "unknown operation".into(),
        }
        .into());
    };

    if ctx.dry_run {
        if !ctx.quiet {
            println!("DRY RUN - would restore {} file(s):", op.changes.len());
            for change in &op.changes {
                println!("  - {}", change.file_path.display());
            }
        }
        return Ok(());
    }

    let restored = coord.rollback_detailed(&args.operation_id)?;
    if !ctx.quiet {
        println!(
            "Restored {} file(s) from operation {}",
            restored.len(),
            args.operation_id
        );
        for path in &restored {
            println!("  - {}", path.display());
        }
    }
    Ok(())
}

/// Delete snapshots older than the configured or given age.
pub fn cleanup_run(args: CleanupArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let days = args
        .older_than_days
        .unwrap_or(session.config.history.cleanup_days);
    let report = session
        .coordinator()
        .cleanup_backups(days, ctx.dry_run)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for err in &report.errors {
        eprintln!("warning: {err}");
    }
    if ctx.quiet {
        return Ok(());
    }

    if report.dry_run {
        println!("DRY RUN - no snapshots were deleted");
    }
    if report.removed.is_empty() {
        println!("No snapshots older than {days} day(s)");
        return Ok(());
    }

    let action = if report.dry_run { "Would remove" } else { "Removed" };
    println!("{} {} snapshot(s):", action, report.removed.len());
    for path in &report.removed {
        println!("  - {}", path.display());
    }
    if report.bytes_freed > 0 {
        println!("Space freed: {} bytes", report.bytes_freed);
    }
    Ok(())
}

/// Registered strategies with what each is good at.
pub fn strategies_run(args: StrategiesArgs, ctx: &AppContext) -> Result<()> {
    let session = Session::open(ctx)?;
    let infos = session.registry.list();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    let color = use_color(ctx);
    for info in infos {
        let marker = if info.name == session.config.default_strategy {
            " (default)"
        } else {
            ""
        };
        if color {
            println!("{}{marker}", info.name.bold());
        } else {
            println!("{}{marker}", info.name);
        }
        println!("  {}", info.description);
        println!(
            "  partial edits: {}  multiple files: {}",
            yes_no(info.supports_partial_edit),
            yes_no(info.supports_multiple_files)
        );
        if !info.best_for.is_empty() {
            println!("  best for: {}", info.best_for.join(", "));
        }
    }
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{StrategyError, StrategyErrorKind};

    #[test]
    fn context_keys_are_workspace_relative() {
        let ws = Path::new("/work");
        assert_eq!(context_key(ws, Path::new("src/lib.rs")).unwrap(), "src/lib.rs");
        assert_eq!(context_key(ws, Path::new("./a/b.py")).unwrap(), "a/b.py");
        assert_eq!(
            context_key(ws, Path::new("/work/pkg/mod.rs")).unwrap(),
            "pkg/mod.rs"
        );
        assert!(matches!(
            context_key(ws, Path::new("/elsewhere/x.rs")),
            Err(InputError::OutsideWorkspace(_))
        ));
        assert!(matches!(
            context_key(ws, Path::new("../x.rs")),
            Err(InputError::OutsideWorkspace(_))
        ));
    }

    #[test]
    fn absolute_paths_resolve_against_unnormalized_workspace() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/a.rs"), "fn a() {}\n").unwrap();

        let ws = tmp.path().join("src").join("..");
        let abs = std::fs::canonicalize(tmp.path()).unwrap().join("src/a.rs");
        assert_eq!(context_key(&ws, &abs).unwrap(), "src/a.rs");

        let other = tempfile::TempDir::new().unwrap();
        std::fs::write(other.path().join("x.rs"), "fn x() {}\n").unwrap();
        assert!(matches!(
            context_key(&ws, &other.path().join("x.rs")),
            Err(InputError::OutsideWorkspace(_))
        ));
    }

    #[test]
    fn load_context_reads_files_and_rejects_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/a.rs"), "fn a() {}\n").unwrap();

        let map = load_context(tmp.path(), &[PathBuf::from("src/a.rs")]).unwrap();
        assert_eq!(map.get("src/a.rs").map(String::as_str), Some("fn a() {}\n"));

        let err = load_context(tmp.path(), &[PathBuf::from("nope.rs")]).unwrap_err();
        assert_eq!(exit_code(&err), 3);
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let rejected: anyhow::Error = EditError::ValidationFailure(StrategyError::new(
            StrategyErrorKind::NoMatchFound,
            "search-replace",
            "no block matched",
        ))
        .into();
        assert_eq!(exit_code(&rejected), 2);

        let unknown: anyhow::Error = EditError::UnknownStrategy {
            name: "magic".into(),
            available: "whole-file".into(),
        }
        .into();
        assert_eq!(exit_code(&unknown), 3);

        let io_err = anyhow::Error::new(io::Error::other("disk full")).context("writing");
        assert_eq!(exit_code(&io_err), 4);

        assert_eq!(exit_code(&anyhow::anyhow!("bug")), 5);
    }

    #[test]
    fn empty_reply_is_invalid_input() {
        let tmp = tempfile::TempDir::new().unwrap();
        let reply = tmp.path().join("reply.md");
        std::fs::write(&reply, "  \n\n").unwrap();
        let err = read_reply(&reply).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::EmptyReply)
        ));
    }
}
