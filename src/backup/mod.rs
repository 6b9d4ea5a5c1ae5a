//! Orchestrates one backup run per workspace: discovery, bounded-concurrency
//! item fetches, asset downloads, dual-format persistence and the manifest.
//! A run never aborts midway; failures degrade the manifest status instead.
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod assets;
pub mod manifest;
pub mod storage;

use crate::backup::assets::{collect_asset_refs, AssetFetcher, AssetStore, HttpAssetFetcher};
use crate::backup::manifest::{Manifest, RunAccountant};
use crate::backup::storage::BackupStorage;
use crate::config::Config;
use crate::fetch::{discover_content, fetch_database_tree, fetch_page_tree};
use crate::markdown::writer::MarkdownWriter;
use crate::model::{DatabaseTree, PageTree};
use crate::notion::{NotionApi, NotionClient, RetryPolicy};
use crate::notify::{should_notify, Notifier};
use crate::retention::prune_old_backups;
use serde_json::Value;

/// Concurrent item pipelines per run, sized against the API rate budget.
const MAX_WORKERS: usize = 3;

pub struct BackupOutcome {
    pub manifest: Manifest,
    pub backup_path: PathBuf,
}

enum ItemResult<T> {
    Saved(T),
    Failed(String),
    Skipped,
}

/// Run a full backup of one workspace. Never returns an error: every failure
/// is absorbed into the manifest, whose status tells the caller how the run
/// went.
pub async fn backup_workspace(
    api: &dyn NotionApi,
    fetcher: Arc<dyn AssetFetcher>,
    backup_root: &Path,
    workspace: &str,
    retry: &RetryPolicy,
) -> BackupOutcome {
    let started = Utc::now();
    let mut accountant = RunAccountant::new(started);
    let storage = BackupStorage::new(backup_root, workspace, started);

    if let Err(err) = storage.create_directories().await {
        error!(workspace, %err, "cannot create backup directories");
        accountant.record_fatal(format!("storage: {err}"));
        return BackupOutcome {
            manifest: accountant.finalize(Utc::now()),
            backup_path: storage.backup_path().to_path_buf(),
        };
    }

    let content = match discover_content(api, retry).await {
        Ok(content) => content,
        Err(err) => {
            error!(workspace, %err, "discovery failed");
            accountant.record_fatal(format!("discovery: {err}"));
            let manifest = accountant.finalize(Utc::now());
            save_manifest_best_effort(&storage, &manifest).await;
            return BackupOutcome {
                manifest,
                backup_path: storage.backup_path().to_path_buf(),
            };
        }
    };

    // Set on the first authentication error; remaining pipelines check it
    // before starting so a revoked token does not burn the whole rate budget.
    let cancelled = AtomicBool::new(false);

    let page_results: Vec<ItemResult<PageTree>> = stream::iter(&content.pages)
        .map(|raw| {
            let storage = &storage;
            let cancelled = &cancelled;
            async move {
                let Some(page_id) = raw.get("id").and_then(Value::as_str) else {
                    warn!("search result without id; skipping");
                    return ItemResult::Skipped;
                };
                if cancelled.load(Ordering::SeqCst) {
                    return ItemResult::Skipped;
                }
                match fetch_page_tree(api, retry, page_id).await {
                    Ok(tree) => match storage.save_page_json(page_id, &tree).await {
                        Ok(_) => ItemResult::Saved(tree),
                        Err(err) => {
                            warn!(page_id, %err, "failed to save page");
                            ItemResult::Failed(format!("page {page_id}: {err}"))
                        }
                    },
                    Err(err) => {
                        if err.is_auth() {
                            cancelled.store(true, Ordering::SeqCst);
                        }
                        warn!(page_id, %err, "failed to fetch page");
                        ItemResult::Failed(format!("page {page_id}: {err}"))
                    }
                }
            }
        })
        .buffer_unordered(MAX_WORKERS)
        .collect()
        .await;

    let mut pages = Vec::new();
    for result in page_results {
        match result {
            ItemResult::Saved(tree) => {
                accountant.record_page();
                pages.push(tree);
            }
            ItemResult::Failed(message) => accountant.record_error(message),
            ItemResult::Skipped => {}
        }
    }

    let database_results: Vec<ItemResult<DatabaseTree>> = stream::iter(&content.database_ids)
        .map(|database_id| {
            let storage = &storage;
            let cancelled = &cancelled;
            async move {
                if cancelled.load(Ordering::SeqCst) {
                    return ItemResult::Skipped;
                }
                match fetch_database_tree(api, retry, database_id).await {
                    Ok(tree) => match storage.save_database_json(database_id, &tree).await {
                        Ok(_) => ItemResult::Saved(tree),
                        Err(err) => {
                            warn!(database_id, %err, "failed to save database");
                            ItemResult::Failed(format!("database {database_id}: {err}"))
                        }
                    },
                    Err(err) => {
                        if err.is_auth() {
                            cancelled.store(true, Ordering::SeqCst);
                        }
                        warn!(database_id, %err, "failed to fetch database");
                        ItemResult::Failed(format!("database {database_id}: {err}"))
                    }
                }
            }
        })
        .buffer_unordered(MAX_WORKERS)
        .collect()
        .await;

    let mut databases = Vec::new();
    for result in database_results {
        match result {
            ItemResult::Saved(tree) => {
                accountant.record_database();
                databases.push(tree);
            }
            ItemResult::Failed(message) => accountant.record_error(message),
            ItemResult::Skipped => {}
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        accountant.record_fatal("authentication rejected during run".to_string());
    }

    // Assets before markdown, so rendered links point at files that exist.
    let store = AssetStore::new(storage.files_path().to_path_buf(), fetcher);
    let mut refs: Vec<String> = Vec::new();
    for tree in &pages {
        refs.extend(collect_asset_refs(&tree.blocks));
    }
    for tree in &databases {
        for row in &tree.rows {
            refs.extend(collect_asset_refs(&row.blocks));
        }
    }
    stream::iter(&refs)
        .for_each_concurrent(MAX_WORKERS, |url| {
            let store = &store;
            async move {
                store.resolve(url).await;
            }
        })
        .await;
    let asset_stats = store.take_stats().await;
    accountant.record_files(asset_stats.downloaded);
    for message in asset_stats.errors {
        accountant.record_error(message);
    }
    let resolved = store.resolved_paths().await;

    // Markdown last, parents before children so nesting lands correctly.
    let mut writer = MarkdownWriter::new(storage.markdown_path());
    let mut written = 0u32;
    for idx in parent_first_order(&pages) {
        match writer.write_page(&pages[idx], &resolved) {
            Ok(_) => written += 1,
            Err(err) => warn!(page_id = %pages[idx].page.id, %err, "failed to write markdown"),
        }
    }
    for tree in &databases {
        if let Err(err) = writer.write_database(tree, &resolved) {
            let id = tree.database.get("id").and_then(Value::as_str).unwrap_or("?");
            warn!(database_id = %id, %err, "failed to write database markdown");
        }
    }
    info!(workspace, written, "wrote markdown files");

    let manifest = accountant.finalize(Utc::now());
    save_manifest_best_effort(&storage, &manifest).await;
    info!(
        workspace,
        pages = manifest.pages_backed_up,
        databases = manifest.databases_backed_up,
        files = manifest.files_downloaded,
        errors = manifest.errors.len(),
        status = manifest.status.as_str(),
        "backup finished"
    );

    BackupOutcome {
        manifest,
        backup_path: storage.backup_path().to_path_buf(),
    }
}

async fn save_manifest_best_effort(storage: &BackupStorage, manifest: &Manifest) {
    if let Err(err) = storage.save_manifest(manifest).await {
        warn!(%err, "failed to save manifest");
    }
}

/// Order page indices so every page comes after its parent. Unknown parents
/// anchor at the root; a parent cycle is broken at its first repeated id.
fn parent_first_order(pages: &[PageTree]) -> Vec<usize> {
    let index: HashMap<&str, usize> = pages
        .iter()
        .enumerate()
        .map(|(i, tree)| (tree.page.id.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(pages.len());
    let mut placed = vec![false; pages.len()];
    for start in 0..pages.len() {
        let mut chain = Vec::new();
        let mut on_chain = HashSet::new();
        let mut current = Some(start);
        while let Some(idx) = current {
            if placed[idx] || !on_chain.insert(idx) {
                break;
            }
            chain.push(idx);
            current = pages[idx]
                .page
                .parent_id
                .as_deref()
                .and_then(|pid| index.get(pid).copied());
        }
        for idx in chain.into_iter().rev() {
            placed[idx] = true;
            order.push(idx);
        }
    }
    order
}

/// Back up every configured workspace (or just `workspace_filter`), prune old
/// runs, and notify per configuration. One workspace failing never stops the
/// next one.
pub async fn run_backup(
    cfg: &Config,
    backup_root: &Path,
    workspace_filter: Option<&str>,
    notifier: Option<&dyn Notifier>,
) -> anyhow::Result<()> {
    let workspaces: Vec<_> = cfg
        .workspaces
        .iter()
        .filter(|ws| workspace_filter.map_or(true, |name| ws.name == name))
        .collect();
    if workspaces.is_empty() {
        anyhow::bail!(
            "workspace '{}' not found in config",
            workspace_filter.unwrap_or_default()
        );
    }

    for ws in workspaces {
        info!(workspace = %ws.name, "starting backup");
        let outcome = match ws.token() {
            Ok(token) => {
                let client = NotionClient::new(token);
                backup_workspace(
                    &client,
                    Arc::new(HttpAssetFetcher::new()),
                    backup_root,
                    &ws.name,
                    &RetryPolicy::default(),
                )
                .await
            }
            Err(err) => {
                error!(workspace = %ws.name, %err, "cannot start backup");
                let mut accountant = RunAccountant::new(Utc::now());
                accountant.record_fatal(err.to_string());
                BackupOutcome {
                    manifest: accountant.finalize(Utc::now()),
                    backup_path: backup_root.join(&ws.name),
                }
            }
        };

        let deleted = prune_old_backups(backup_root, &ws.name, cfg.retention_count);
        if deleted > 0 {
            info!(workspace = %ws.name, deleted, "pruned old backups");
        }

        if let Some(notifier) = notifier {
            if should_notify(cfg.notifications.notify_on, outcome.manifest.status) {
                if let Err(err) = notifier
                    .notify(&ws.name, &outcome.manifest, &outcome.backup_path)
                    .await
                {
                    error!(workspace = %ws.name, %err, "notification failed");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageMeta;

    fn page(id: &str, parent: Option<&str>) -> PageTree {
        PageTree {
            page: PageMeta {
                id: id.into(),
                parent_id: parent.map(str::to_string),
                ..Default::default()
            },
            blocks: Vec::new(),
        }
    }

    #[test]
    fn children_are_ordered_after_parents() {
        let pages = vec![
            page("child", Some("parent")),
            page("grandchild", Some("child")),
            page("parent", None),
        ];
        let order = parent_first_order(&pages);
        let pos = |id: &str| {
            order
                .iter()
                .position(|&i| pages[i].page.id == id)
                .unwrap()
        };
        assert!(pos("parent") < pos("child"));
        assert!(pos("child") < pos("grandchild"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn parent_cycles_do_not_loop_or_drop_pages() {
        let pages = vec![page("a", Some("b")), page("b", Some("a"))];
        let order = parent_first_order(&pages);
        assert_eq!(order.len(), 2);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1]);
    }

    #[test]
    fn unknown_parent_keeps_page_in_order() {
        let pages = vec![page("orphan", Some("missing"))];
        assert_eq!(parent_first_order(&pages), vec![0]);
    }
}
