//! **swing-edit** - apply, preview and undo file edits described in LLM replies
//!
//! A reply is parsed by one of several strategies (whole-file blocks,
//! SEARCH/REPLACE blocks, unified diffs) into proposed file contents. The
//! coordinator previews them as diffs, and on apply snapshots every pre-image
//! before writing and records the batch in a rollback ledger.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Edit engine: strategies, preview, apply, history and rollback
pub mod core {
    /// Error taxonomy and exit-code mapping
    pub mod error;
    pub use error::{EditError, StrategyError, StrategyErrorKind};

    /// Persisted operation and file-change records
    pub mod model;
    pub use model::{EditOperation, FileChange};

    /// Unified-diff text and typed preview lines
    pub mod diff;
    pub use diff::{DiffLine, DiffRenderer, DiffStats};

    /// Write-ahead snapshots of pre-edit content
    pub mod backup;
    pub use backup::{BackupStore, CleanupReport};

    /// Reply conventions and the name-keyed registry
    pub mod strategy;
    pub use strategy::{EditStrategy, EngineSettings, FileMap, StrategyRegistry};

    /// Append-only operation ledger with rollback
    pub mod ledger;
    pub use ledger::OperationLog;

    /// Preview/apply pipeline
    pub mod coordinator;
    pub use coordinator::{CoordinatorPaths, EditCoordinator, StructuredPreview};

    /// CLI command handlers
    pub mod edit;
    pub use edit::{
        apply_run, cleanup_run, history_run, preview_run, rollback_run, strategies_run,
    };
}

/// Infrastructure - configuration and file I/O
pub mod infra {
    /// Layered configuration (defaults, workspace file, environment)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Memory-mapped reads and atomic writes
    pub mod io;
    pub use io::{FileContent, read_file_smart, write_atomic};
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use core::{
    apply_run, cleanup_run, history_run, preview_run, rollback_run, strategies_run,
};
pub use infra::{Config, load_config};

// Core types for external consumers
pub use core::{
    EditCoordinator, EditError, EditOperation, EditStrategy, FileChange, FileMap,
    StrategyRegistry, StructuredPreview,
};
