//! Deletes backup runs beyond the configured retention count. Only
//! directories whose names match the run timestamp format are considered, so
//! anything else a user drops next to the backups survives pruning.
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Exact `YYYY-MM-DD_HHMMSS` shape, matching `storage::TIMESTAMP_FORMAT`.
pub fn is_backup_dir_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 17 {
        return false;
    }
    if bytes[4] != b'-' || bytes[7] != b'-' || bytes[10] != b'_' {
        return false;
    }
    name.char_indices()
        .filter(|(i, _)| ![4, 7, 10].contains(i))
        .all(|(_, c)| c.is_ascii_digit())
}

/// All backup run directories for a workspace, oldest first. Timestamp names
/// sort chronologically as plain strings.
pub fn backup_dirs(workspace_path: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(workspace_path) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| is_backup_dir_name(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    dirs
}

/// Delete the oldest runs beyond `retention_count`, returning how many were
/// removed. Individual deletion failures are logged and skipped.
pub fn prune_old_backups(backups_path: &Path, workspace: &str, retention_count: usize) -> usize {
    let workspace_path = backups_path.join(workspace);
    let dirs = backup_dirs(&workspace_path);

    let Some(to_delete) = dirs.len().checked_sub(retention_count).filter(|n| *n > 0) else {
        debug!(
            workspace,
            kept = dirs.len(),
            retention_count,
            "no backups to prune"
        );
        return 0;
    };

    let mut deleted = 0;
    for dir in &dirs[..to_delete] {
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {
                info!(path = %dir.display(), "deleted old backup");
                deleted += 1;
            }
            Err(err) => {
                error!(path = %dir.display(), error = %err, "failed to delete backup");
            }
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_run(root: &Path, workspace: &str, name: &str) {
        let dir = root.join(workspace).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), "{}").unwrap();
    }

    #[test]
    fn name_check_requires_exact_timestamp_shape() {
        assert!(is_backup_dir_name("2024-01-15_030000"));
        assert!(!is_backup_dir_name("2024-01-15"));
        assert!(!is_backup_dir_name("2024-01-15_0300000"));
        assert!(!is_backup_dir_name("2024_01-15_030000"));
        assert!(!is_backup_dir_name("2024-01-15_03000x"));
        assert!(!is_backup_dir_name("notes"));
    }

    #[test]
    fn keeps_newest_runs_and_deletes_the_rest() {
        let dir = tempdir().unwrap();
        for name in [
            "2024-01-01_030000",
            "2024-01-02_030000",
            "2024-01-03_030000",
            "2024-01-04_030000",
        ] {
            make_run(dir.path(), "personal", name);
        }

        let deleted = prune_old_backups(dir.path(), "personal", 2);
        assert_eq!(deleted, 2);

        let ws = dir.path().join("personal");
        assert!(!ws.join("2024-01-01_030000").exists());
        assert!(!ws.join("2024-01-02_030000").exists());
        assert!(ws.join("2024-01-03_030000").exists());
        assert!(ws.join("2024-01-04_030000").exists());
    }

    #[test]
    fn non_timestamp_directories_are_untouched() {
        let dir = tempdir().unwrap();
        make_run(dir.path(), "ws", "2024-01-01_030000");
        make_run(dir.path(), "ws", "2024-01-02_030000");
        let keep = dir.path().join("ws").join("scratch");
        std::fs::create_dir_all(&keep).unwrap();

        let deleted = prune_old_backups(dir.path(), "ws", 1);
        assert_eq!(deleted, 1);
        assert!(keep.exists());
        assert!(!dir.path().join("ws").join("2024-01-01_030000").exists());
    }

    #[test]
    fn under_retention_deletes_nothing() {
        let dir = tempdir().unwrap();
        make_run(dir.path(), "ws", "2024-01-01_030000");
        assert_eq!(prune_old_backups(dir.path(), "ws", 5), 0);
        assert_eq!(prune_old_backups(dir.path(), "missing", 5), 0);
    }
}
