//! `swing completions`: shell completion scripts from the clap definition.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate, generate_to};
use std::{fs, io::Write};
use tracing::debug;

use crate::cli::{AppContext, Cli, CompletionsArgs};

const BIN_NAME: &str = "swing";

/// Completion script for `shell`.
pub fn script(shell: Shell) -> Vec<u8> {
    let mut buf = Vec::new();
    generate(shell, &mut Cli::command(), BIN_NAME, &mut buf);
    buf
}

/// Print the script, or write it under `--out-dir`. `--dry-run` only names the target.
pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let Some(dir) = args.out_dir else {
        std::io::stdout()
            .write_all(&script(args.shell))
            .context("write completion script")?;
        return Ok(());
    };

    if ctx.dry_run {
        println!("DRY RUN - would write {} completion into {}", args.shell, dir.display());
        return Ok(());
    }

    fs::create_dir_all(&dir)
        .with_context(|| format!("create completion dir {}", dir.display()))?;
    let path = generate_to(args.shell, &mut Cli::command(), BIN_NAME, &dir)
        .context("generate completion file")?;
    debug!(shell = %args.shell, path = %path.display(), "completion written");

    if !ctx.quiet {
        eprintln!("Wrote completion to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ctx(dry_run: bool) -> AppContext {
        AppContext {
            quiet: true,
            no_color: true,
            dry_run,
            workspace: PathBuf::from("."),
        }
    }

    #[test]
    fn scripts_name_the_binary_and_subcommands() {
        let bash = String::from_utf8(script(Shell::Bash)).unwrap();
        assert!(bash.contains("swing"));
        assert!(bash.contains("rollback"));

        let fish = String::from_utf8(script(Shell::Fish)).unwrap();
        assert!(fish.contains("complete -c swing"));
    }

    #[test]
    fn out_dir_receives_file_unless_dry_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("completions");

        let args = |d: &PathBuf| CompletionsArgs {
            shell: Shell::Bash,
            out_dir: Some(d.clone()),
        };
        run(args(&dir), &ctx(true)).unwrap();
        assert!(!dir.exists());

        run(args(&dir), &ctx(false)).unwrap();
        assert!(dir.join("swing.bash").is_file());
    }
}
