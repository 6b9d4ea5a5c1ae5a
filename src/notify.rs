//! Run-completion notifications. Discord is the only delivery channel; the
//! trait seam exists so the orchestrator can be tested with a recording fake.
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::backup::manifest::{Manifest, RunStatus};
use crate::config::NotifyOn;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub fn should_notify(notify_on: NotifyOn, status: RunStatus) -> bool {
    match notify_on {
        NotifyOn::Always => true,
        NotifyOn::Error => matches!(
            status,
            RunStatus::CompletedWithWarnings | RunStatus::Failed
        ),
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, workspace: &str, manifest: &Manifest, backup_path: &Path)
        -> Result<()>;
}

pub struct DiscordNotifier {
    http: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        let http = Client::builder()
            .user_agent("notion-backup/0.1")
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self { http, webhook_url }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(
        &self,
        workspace: &str,
        manifest: &Manifest,
        backup_path: &Path,
    ) -> Result<()> {
        let payload = build_webhook_payload(workspace, manifest, backup_path);
        self.http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("failed to send webhook")?
            .error_for_status()
            .context("webhook rejected")?;
        info!(workspace, "sent notification");
        Ok(())
    }
}

/// Discord embed for one run: status color and emoji, counts, duration and
/// up to three error lines.
pub fn build_webhook_payload(workspace: &str, manifest: &Manifest, backup_path: &Path) -> Value {
    let (color, emoji) = match manifest.status {
        RunStatus::Completed => (0x00FF00, "✅"),
        RunStatus::CompletedWithWarnings => (0xFFFF00, "⚠️"),
        RunStatus::Failed => (0xFF0000, "❌"),
    };

    let mut lines = vec![
        format!("**Pages:** {}", manifest.pages_backed_up),
        format!("**Databases:** {}", manifest.databases_backed_up),
        format!("**Files:** {}", manifest.files_downloaded),
        format!("**Duration:** {}", format_duration(manifest.duration_seconds)),
    ];
    if !manifest.errors.is_empty() {
        let count = manifest.errors.len();
        lines.push(format!("**Errors:** {count}"));
        if count <= 3 {
            for err in &manifest.errors {
                lines.push(format!("  • {err}"));
            }
        } else {
            for err in &manifest.errors[..2] {
                lines.push(format!("  • {err}"));
            }
            lines.push(format!("  • ... and {} more", count - 2));
        }
    }
    lines.push(format!("**Path:** {}", backup_path.display()));

    json!({
        "embeds": [{
            "title": format!("{emoji} Notion Backup: {workspace}"),
            "description": lines.join("\n"),
            "color": color,
            "footer": { "text": format!("Status: {}", manifest.status.as_str()) },
        }]
    })
}

fn format_duration(seconds: f64) -> String {
    let total = seconds as u64;
    let minutes = total / 60;
    let secs = total % 60;
    if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
