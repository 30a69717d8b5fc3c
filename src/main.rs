use anyhow::Result;
use clap::Parser;
use swing_edit::cli::{AppContext, Cli, Commands};
use swing_edit::core::edit::finish_with_exit;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Log filter variable, e.g. `SWING_LOG=swing_edit=debug`
const LOG_ENV: &str = "SWING_LOG";

fn init_tracing(no_color: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new("warn"))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {e}"))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(!no_color);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.no_color) {
        eprintln!("warning: {e:#}");
    }

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
        workspace: cli.workspace,
    };

    let result = match cli.command {
        Commands::Preview(args) => swing_edit::preview_run(args, &ctx),
        Commands::Apply(args) => swing_edit::apply_run(args, &ctx),
        Commands::History(args) => swing_edit::history_run(args, &ctx),
        Commands::Rollback(args) => swing_edit::rollback_run(args, &ctx),
        Commands::Cleanup(args) => swing_edit::cleanup_run(args, &ctx),
        Commands::Strategies(args) => swing_edit::strategies_run(args, &ctx),
        Commands::Init(args) => swing_edit::infra::config::init(args, &ctx),
        Commands::Completions(args) => swing_edit::completion::run(args, &ctx),
    };

    finish_with_exit(result)
}
