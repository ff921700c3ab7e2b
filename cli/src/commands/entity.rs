use std::path::Path;

use acs_core::types::{EntityKind, ZoneId};
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use crate::output;

#[derive(Subcommand)]
pub enum EntityCommand {
    #[command(about = "Show an entity and its attributes")]
    Get(GetArgs),

    #[command(about = "List an entity and every transitive child")]
    Descendants(TargetArgs)
}

#[derive(Args)]
pub struct TargetArgs {
    #[arg(long, help = "Zone the entity belongs to")]
    pub zone: ZoneId,

    #[arg(long, help = "resource or subject")]
    pub kind: EntityKind,

    #[arg(help = "Entity identifier")]
    pub identifier: String,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, help = "Include attributes inherited from ancestors")]
    pub inherited: bool
}

pub async fn run(command: EntityCommand, config: Option<&Path>) -> Result<()> {
    let runtime = super::runtime(config).await?;
    let privileges = runtime.privileges();
    match command {
        EntityCommand::Get(args) => {
            let t = &args.target;
            let Some(entity) = privileges
                .get_entity(&t.zone, t.kind, &t.identifier, args.inherited)
                .await?
            else {
                anyhow::bail!("{} {} not found in zone {}", t.kind, t.identifier, t.zone);
            };

            if t.json {
                println!("{}", serde_json::to_string_pretty(&entity)?);
                return Ok(());
            }
            output::header(&format!("{} {}", entity.kind, entity.identifier));
            println!("  zone:    {}", entity.zone_id);
            for parent in &entity.parents {
                println!("  parent:  {}", parent.cyan());
            }
            output::subheader(if args.inherited {
                "Attributes (including inherited)"
            } else {
                "Attributes"
            });
            for attribute in &entity.attributes {
                println!(
                    "  {} {} = {}",
                    format!("[{}]", attribute.issuer).dimmed(),
                    attribute.name,
                    attribute.value.cyan()
                );
            }
        }
        EntityCommand::Descendants(t) => {
            let ids = privileges
                .descendants(&t.zone, t.kind, &t.identifier)
                .await?;
            if t.json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                for id in ids {
                    println!("{id}");
                }
            }
        }
    }
    Ok(())
}
