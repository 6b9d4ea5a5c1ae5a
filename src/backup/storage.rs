//! On-disk layout for one backup run and atomic JSON persistence:
//! `{root}/{workspace}/{timestamp}/{json,markdown,files}` plus the manifest.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::manifest::Manifest;
use crate::model::{DatabaseTree, PageTree};

/// Timestamp directory format. The retention pruner's safety check depends
/// on this exact pattern.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct BackupStorage {
    backup_path: PathBuf,
    json_pages_path: PathBuf,
    json_databases_path: PathBuf,
    markdown_path: PathBuf,
    files_path: PathBuf,
    timestamp: String,
}

impl BackupStorage {
    pub fn new(base_path: &Path, workspace: &str, started: DateTime<Utc>) -> Self {
        let timestamp = started.format(TIMESTAMP_FORMAT).to_string();
        let backup_path = base_path.join(workspace).join(&timestamp);
        Self {
            json_pages_path: backup_path.join("json").join("pages"),
            json_databases_path: backup_path.join("json").join("databases"),
            markdown_path: backup_path.join("markdown"),
            files_path: backup_path.join("files"),
            backup_path,
            timestamp,
        }
    }

    pub async fn create_directories(&self) -> Result<()> {
        for path in [
            &self.json_pages_path,
            &self.json_databases_path,
            &self.markdown_path,
            &self.files_path,
        ] {
            tokio::fs::create_dir_all(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        info!(path = %self.backup_path.display(), "created backup directory");
        Ok(())
    }

    /// Persist one page's full tree. The write is atomic per item: content
    /// lands in a temporary file that is renamed into place, so a crashed
    /// run never leaves a truncated record as the final file.
    pub async fn save_page_json(&self, page_id: &str, tree: &PageTree) -> Result<PathBuf> {
        let path = self.json_pages_path.join(format!("{page_id}.json"));
        write_json_atomic(&path, tree).await?;
        Ok(path)
    }

    pub async fn save_database_json(
        &self,
        database_id: &str,
        tree: &DatabaseTree,
    ) -> Result<PathBuf> {
        let path = self.json_databases_path.join(format!("{database_id}.json"));
        write_json_atomic(&path, tree).await?;
        Ok(path)
    }

    pub async fn save_manifest(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.backup_path.join("manifest.json");
        write_json_atomic(&path, manifest).await?;
        Ok(path)
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn markdown_path(&self) -> &Path {
        &self.markdown_path
    }

    pub fn files_path(&self) -> &Path {
        &self.files_path
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("failed to serialize record")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to publish {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::manifest::RunAccountant;
    use crate::model::{BlockKind, BlockNode, PageMeta, RichTextRun};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap()
    }

    fn sample_tree() -> PageTree {
        PageTree {
            page: PageMeta {
                id: "p1".into(),
                created_time: "2024-01-01T00:00:00.000Z".into(),
                last_edited_time: "2024-01-02T00:00:00.000Z".into(),
                parent_id: None,
                properties: serde_json::Map::new(),
            },
            blocks: vec![BlockNode {
                id: "b1".into(),
                kind: BlockKind::Toggle {
                    rich_text: vec![RichTextRun::plain("details")],
                },
                children: vec![BlockNode::new(
                    "b2",
                    BlockKind::ToDo {
                        rich_text: vec![RichTextRun::plain("task")],
                        checked: true,
                    },
                )],
            }],
        }
    }

    #[tokio::test]
    async fn layout_matches_contract() {
        let dir = tempdir().unwrap();
        let storage = BackupStorage::new(dir.path(), "personal", started());
        storage.create_directories().await.unwrap();

        let run = dir.path().join("personal").join("2024-01-15_030000");
        assert!(run.join("json").join("pages").is_dir());
        assert!(run.join("json").join("databases").is_dir());
        assert!(run.join("markdown").is_dir());
        assert!(run.join("files").is_dir());
        assert_eq!(storage.timestamp(), "2024-01-15_030000");
    }

    #[tokio::test]
    async fn page_json_round_trips() {
        let dir = tempdir().unwrap();
        let storage = BackupStorage::new(dir.path(), "ws", started());
        storage.create_directories().await.unwrap();

        let tree = sample_tree();
        let path = storage.save_page_json("p1", &tree).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: PageTree = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, tree);
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let storage = BackupStorage::new(dir.path(), "ws", started());
        storage.create_directories().await.unwrap();
        storage.save_page_json("p1", &sample_tree()).await.unwrap();

        let pages_dir = dir
            .path()
            .join("ws")
            .join("2024-01-15_030000")
            .join("json")
            .join("pages");
        let names: Vec<String> = std::fs::read_dir(&pages_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["p1.json"]);
    }

    #[tokio::test]
    async fn manifest_lands_at_run_root() {
        let dir = tempdir().unwrap();
        let storage = BackupStorage::new(dir.path(), "ws", started());
        storage.create_directories().await.unwrap();

        let manifest = RunAccountant::new(started()).finalize(started());
        let path = storage.save_manifest(&manifest).await.unwrap();
        assert_eq!(path, storage.backup_path().join("manifest.json"));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["status"], "completed");
    }
}
