use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use notion_backup::backup::run_backup;
use notion_backup::config;
use notion_backup::notify::{DiscordNotifier, Notifier};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    /// Only back up this workspace
    #[arg(long, short)]
    workspace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    info!(workspaces = cfg.workspaces.len(), "loaded config");

    let backup_root = cfg.resolved_backup_root(&args.config);
    let notifier = cfg
        .notifications
        .discord_webhook_url
        .clone()
        .map(DiscordNotifier::new);

    run_backup(
        &cfg,
        &backup_root,
        args.workspace.as_deref(),
        notifier.as_ref().map(|n| n as &dyn Notifier),
    )
    .await
}
