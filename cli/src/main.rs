use anyhow::Result;
use clap::Parser;

mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let observability = commands::load_config(cli.config.as_deref())
        .map(|c| c.observability)
        .unwrap_or_default();
    service::init_tracing(&observability)?;

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Cache(cmd) => commands::cache::run(cmd, config).await,
        Commands::Entity(cmd) => commands::entity::run(cmd, config).await,
        Commands::Config(cmd) => commands::config::run(cmd, config)
    }
}
