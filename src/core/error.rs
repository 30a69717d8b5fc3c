//! Error taxonomy for the edit engine.
//!
//! Parse and validation failures are ordinary outcomes (the model did not
//! follow the requested convention) and travel as values. Disk failures carry
//! the offending path so the caller can decide whether to retry.

use std::path::PathBuf;

/// Why a strategy refused a model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyErrorKind {
    /// Blocks or hunks were found but none matched the current files
    NoMatchFound,
    /// A path could refer to more than one file, or was given twice
    AmbiguousPath,
    /// Output looks cut off or elided
    TruncatedContent,
    /// A path line or hunk header could not be parsed
    MalformedHeader,
    /// Nothing in the reply followed the convention
    EmptyResult,
}

impl std::fmt::Display for StrategyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyErrorKind::NoMatchFound => "no match found",
            StrategyErrorKind::AmbiguousPath => "ambiguous path",
            StrategyErrorKind::TruncatedContent => "truncated content",
            StrategyErrorKind::MalformedHeader => "malformed header",
            StrategyErrorKind::EmptyResult => "empty result",
        };
        f.write_str(s)
    }
}

/// A parse or validation failure, tagged with the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize)]
#[error("[{strategy}] {kind}: {message}")]
pub struct StrategyError {
    pub kind: StrategyErrorKind,
    pub strategy: String,
    pub message: String,
}

impl StrategyError {
    pub fn new(kind: StrategyErrorKind, strategy: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            strategy: strategy.to_string(),
            message: message.into(),
        }
    }
}

/// Engine-level errors surfaced by the coordinator, log and backup store.
#[derive(Debug, thiserror::Error)]
pub enum EditError {
    /// No recognizable convention in the reply
    #[error("parse failure: {0}")]
    ParseFailure(StrategyError),

    /// Convention recognized but the result is unacceptable
    #[error("validation failure: {0}")]
    ValidationFailure(StrategyError),

    /// Registry lookup for a name nobody registered
    #[error("unknown strategy '{name}' (available: {available})")]
    UnknownStrategy { name: String, available: String },

    /// Backup or write failed during apply; earlier files stay written
    #[error("apply failed at {}: {source}", .path.display())]
    ApplyIo {
        path: PathBuf,
        /// Id of the operation logged for the files written before the failure
        partial_operation: Option<String>,
        #[source]
        source: std::io::Error,
    },

    /// Every file was written but the ledger could not be saved
    #[error("operation {operation_id} applied but not recorded in {}: {source}", .path.display())]
    Unrecorded {
        operation_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unknown operation id or a restore write failed
    #[error("rollback of {operation_id} failed{}: {reason}", at_path(.path))]
    RollbackFailure {
        operation_id: String,
        path: Option<PathBuf>,
        reason: String,
    },

    /// Ledger present but unreadable or unparsable
    #[error("history load failed for {}: {reason}", .path.display())]
    HistoryLoad { path: PathBuf, reason: String },

    /// Ledger or backup directory could not be written outside of apply
    #[error("storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn at_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

impl EditError {
    /// The strategy failure behind a parse or validation error, if any.
    pub fn strategy_error(&self) -> Option<&StrategyError> {
        match self {
            EditError::ParseFailure(e) | EditError::ValidationFailure(e) => Some(e),
            _ => None,
        }
    }

    /// Parse and validation failures are expected outcomes a caller may retry.
    pub fn is_recoverable(&self) -> bool {
        self.strategy_error().is_some()
    }
}

/// Exit codes for the CLI harness.
/// 0=success, 2=rejected reply, 3=invalid input, 4=io, 5=internal
pub fn exit_code_for(e: &EditError) -> i32 {
    match e {
        EditError::ParseFailure(_) | EditError::ValidationFailure(_) => 2,
        EditError::UnknownStrategy { .. } => 3,
        EditError::ApplyIo { .. } | EditError::Storage { .. } | EditError::Unrecorded { .. } => 4,
        EditError::RollbackFailure { .. } => 4,
        EditError::HistoryLoad { .. } => 5,
    }
}
