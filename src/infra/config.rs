use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::{AppContext, InitArgs};
use crate::core::strategy::EngineSettings;

/// Config file names looked up in the workspace, first hit wins
pub const CONFIG_FILES: [&str; 3] = ["swing.toml", ".swing.toml", "swing.json"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config
{
    /// Snapshot and ledger directory (relative to the workspace unless absolute)
    pub backup_dir: PathBuf,

    /// Ledger file name inside `backup_dir`
    pub history_file: String,

    /// Strategy used when none is given on the command line
    pub default_strategy: String,

    /// Parsing and preview settings
    pub edit: EditConfig,

    /// History listing and retention
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditConfig
{
    pub min_content_len: usize,
    pub context_lines: usize,
    pub new_file_preview_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig
{
    pub limit: usize,
    pub cleanup_days: u64,
}

impl Default for Config
{
    fn default() -> Self
    {
        let engine = EngineSettings::default();
        Self {
            backup_dir: PathBuf::from(".swing_backups"),
            history_file: "edit_history.json".to_string(),
            default_strategy: "whole-file".to_string(),
            edit: EditConfig {
                min_content_len: engine.min_content_len,
                context_lines: engine.context_lines,
                new_file_preview_lines: engine.new_file_preview_lines,
            },
            history: HistoryConfig { limit: 10, cleanup_days: 7 },
        }
    }
}

impl Config
{
    pub fn engine_settings(&self) -> EngineSettings
    {
        EngineSettings {
            min_content_len: self
                .edit
                .min_content_len,
            context_lines: self
                .edit
                .context_lines,
            new_file_preview_lines: self
                .edit
                .new_file_preview_lines,
        }
    }
}

/// Defaults, then the first config file found in `workspace`, then
/// `SWING__*` environment variables (`SWING__EDIT__CONTEXT_LINES=5`).
pub fn load_config(workspace: &Path) -> Result<Config>
{
    let defaults =
        config::Config::try_from(&Config::default()).context("Failed to encode default config")?;
    let mut builder = config::Config::builder().add_source(defaults);

    for name in &CONFIG_FILES
    {
        let path = workspace.join(name);
        if path.exists()
        {
            debug!(path = %path.display(), "loading config file");
            builder = builder.add_source(config::File::from(path));
            break;
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWING")
            .separator("__")
            .try_parsing(true),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("swing.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_files()
    {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(tmp.path()).unwrap();
        assert_eq!(cfg.backup_dir, PathBuf::from(".swing_backups"));
        assert_eq!(cfg.history_file, "edit_history.json");
        assert_eq!(cfg.default_strategy, "whole-file");
        assert_eq!(cfg.engine_settings(), EngineSettings::default());
        assert_eq!(cfg.history.limit, 10);
        assert_eq!(cfg.history.cleanup_days, 7);
    }

    #[test]
    fn workspace_file_overrides_defaults()
    {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path()
                .join("swing.toml"),
            "default_strategy = \"unified-diff\"\n[edit]\nmin_content_len = 20\n",
        )
        .unwrap();

        let cfg = load_config(tmp.path()).unwrap();
        assert_eq!(cfg.default_strategy, "unified-diff");
        assert_eq!(
            cfg.engine_settings()
                .min_content_len,
            20
        );
        // untouched keys keep their defaults
        assert_eq!(
            cfg.edit
                .context_lines,
            3
        );
    }

    #[test]
    fn default_config_round_trips_through_toml()
    {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }
}
