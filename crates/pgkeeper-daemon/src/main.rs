use clap::Parser;
use pgkeeper_core::KeeperConfig;
use tracing::debug;

mod app;
mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgkeeper=info,pgkeeper_scheduler=info,pgkeeper_backup=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Keygen => {
            commands::keygen();
            Ok(())
        }
        Commands::Serve => commands::serve(&open(config_path)?).await,
        Commands::Datasource { command } => commands::datasource(&open(config_path)?, command).await,
        Commands::Backup { command } => commands::backup(&open(config_path)?, command).await,
    }
}

/// Load config (explicit --config / PGKEEPER_CONFIG > ~/.pgkeeper/pgkeeper.toml)
/// and wire the stores, orchestrator and command.
fn open(config_path: Option<&str>) -> anyhow::Result<app::App> {
    let config = KeeperConfig::load(config_path)?;
    debug!(?config, "configuration loaded");
    app::App::open(config)
}
