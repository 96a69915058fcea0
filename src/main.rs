use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use repobrief::{
    cli_types::{Cli, Commands, HookAction},
    CliApp, CliConfig,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_root = match &cli.command {
        Commands::Index(args) => args.path.clone(),
        Commands::Hook { action: HookAction::Install { path, .. } } => path.clone(),
        Commands::Hook { action: HookAction::Uninstall { path } } => path.clone(),
        Commands::Config(args) => args.path.clone(),
    };

    let config = CliConfig::load(&project_root, cli.config.as_deref())?;
    let app = CliApp::new(config, cli.verbose > 0, cli.quiet, !cli.no_color);

    match cli.command {
        Commands::Index(args) => {
            app.index(args).await?;
        }
        Commands::Hook { action } => match action {
            HookAction::Install { path, force } => {
                app.install_hook(&path, force)?;
            }
            HookAction::Uninstall { path } => {
                app.uninstall_hook(&path)?;
            }
        },
        Commands::Config(args) => app.show_config(&args.path)?,
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise the level follows `-v`/`-q`. Logs go to stderr
/// so they never mix with command output.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("repobrief={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
