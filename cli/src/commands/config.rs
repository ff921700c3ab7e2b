use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::output;

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Load and validate a configuration")]
    Validate(ValidateArgs)
}

#[derive(Args)]
pub struct ValidateArgs {
    #[arg(long, help = "File to validate instead of --config / environment")]
    pub file: Option<PathBuf>
}

pub fn run(command: ConfigCommand, config: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Validate(args) => {
            let path = args.file.as_deref().or(config);
            let loaded = match path {
                Some(path) => ::config::load_from_file(path)?,
                None => super::load_config(None)?
            };
            if let Err(errors) = ::config::validate(&loaded) {
                for problem in ::config::describe(&errors) {
                    output::error(&problem);
                }
                anyhow::bail!("configuration is invalid");
            }
            output::success("Configuration is valid");
            println!("  cache:       {} (enabled: {})", loaded.cache.backend, loaded.cache.enabled);
            println!(
                "  attributes:  {} (traversal limit {})",
                loaded.attributes.backend, loaded.attributes.traversal_limit
            );
        }
    }
    Ok(())
}
