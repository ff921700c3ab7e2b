pub mod cache;
pub mod config;
pub mod entity;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use service::AccessControlRuntime;

#[derive(Parser)]
#[command(
    name = "acs",
    author,
    version,
    about = "Access control decision cache and attribute store operations",
    long_about = "Operates on the stores named in the configuration.\n\nConfiguration comes from \
                  --config (TOML or YAML) or, when absent, from RD_*, PG_*, AC_*, AT_*, CN_* and \
                  OB_* environment variables."
)]
pub struct Cli {
    #[arg(long, global = true, env = "ACS_CONFIG", help = "Configuration file (TOML or YAML)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand, about = "Flush or invalidate cached decisions")]
    Cache(cache::CacheCommand),

    #[command(subcommand, about = "Inspect resources and subjects")]
    Entity(entity::EntityCommand),

    #[command(subcommand, about = "Check configuration")]
    Config(config::ConfigCommand)
}

pub fn load_config(path: Option<&Path>) -> Result<::config::Config> {
    match path {
        Some(path) => ::config::load_and_validate(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => ::config::load_from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration from environment: {e}"))
    }
}

pub async fn runtime(path: Option<&Path>) -> Result<AccessControlRuntime> {
    let config = load_config(path)?;
    Ok(AccessControlRuntime::from_config(&config).await?)
}
