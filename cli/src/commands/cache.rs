use std::path::Path;

use acs_core::types::{EntityKind, ZoneId};
use anyhow::Result;
use clap::{ArgGroup, Args, Subcommand};
use decision_cache::DecisionCache;

use crate::output;

#[derive(Subcommand)]
pub enum CacheCommand {
    #[command(about = "Drop every cached decision (markers are kept)")]
    Flush,

    #[command(about = "Invalidate decisions for one subject, resource or policy set")]
    Invalidate(InvalidateArgs)
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("target")
        .required(true)
        .args(["subject", "resource", "policy_set"])
))]
pub struct InvalidateArgs {
    #[arg(long, help = "Zone the identifier belongs to")]
    pub zone: ZoneId,

    #[arg(long, help = "Subject identifier; its descendants are included")]
    pub subject: Option<String>,

    #[arg(long, help = "Resource identifier; descendants and translations are included")]
    pub resource: Option<String>,

    #[arg(long, help = "Policy set identifier")]
    pub policy_set: Option<String>
}

pub async fn run(command: CacheCommand, config: Option<&Path>) -> Result<()> {
    let runtime = super::runtime(config).await?;
    match command {
        CacheCommand::Flush => {
            runtime.cache().reset_all().await?;
            output::success("Flushed all cached decisions");
        }
        CacheCommand::Invalidate(args) => {
            let privileges = runtime.privileges();
            if let Some(policy_set) = &args.policy_set {
                privileges.policy_set_changed(&args.zone, policy_set).await?;
                output::success(&format!("Invalidated policy set {policy_set} in {}", args.zone));
            } else {
                let (kind, identifier) = match (&args.subject, &args.resource) {
                    (Some(subject), _) => (EntityKind::Subject, subject),
                    (None, Some(resource)) => (EntityKind::Resource, resource),
                    (None, None) => anyhow::bail!("one of --subject, --resource or --policy-set is required")
                };
                let count = privileges.invalidate_entity(&args.zone, kind, identifier).await?;
                output::success(&format!(
                    "Invalidated {kind} {identifier} and {} descendant(s) in {}",
                    count.saturating_sub(1),
                    args.zone
                ));
            }
        }
    }
    Ok(())
}
