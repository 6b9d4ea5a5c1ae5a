//! Configuration loader and validator for the backup service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("environment variable '{env}' not set for workspace '{workspace}'")]
    MissingToken { env: String, workspace: String },
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Where backup runs are written. Defaults to `backups/` next to the
    /// config file.
    #[serde(default)]
    pub backup_root: Option<String>,
    pub retention_count: usize,
    pub workspaces: Vec<Workspace>,
    #[serde(default)]
    pub notifications: Notifications,
}

/// One workspace to back up. The API token is never stored in the file, only
/// the name of the environment variable holding it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    pub name: String,
    pub token_env: String,
}

impl Workspace {
    pub fn token(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ConfigError::MissingToken {
                env: self.token_env.clone(),
                workspace: self.name.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notifications {
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default)]
    pub notify_on: NotifyOn,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    Always,
    #[default]
    Error,
}

impl Config {
    /// Resolve the backup root against the config file's directory.
    pub fn resolved_backup_root(&self, config_path: &Path) -> PathBuf {
        match &self.backup_root {
            Some(root) => PathBuf::from(root),
            None => config_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("backups"),
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.retention_count == 0 {
        return Err(ConfigError::Invalid("retention_count must be at least 1"));
    }
    if cfg.workspaces.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one workspace must be configured",
        ));
    }
    for ws in &cfg.workspaces {
        if ws.name.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace name must be non-empty"));
        }
        if ws.token_env.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "workspace token_env must be non-empty",
            ));
        }
    }
    let mut names: Vec<&str> = cfg.workspaces.iter().map(|ws| ws.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != cfg.workspaces.len() {
        return Err(ConfigError::Invalid("workspace names must be unique"));
    }
    Ok(())
}

/// Example configuration, also used as a parsing fixture by tests.
pub fn example() -> &'static str {
    r#"retention_count: 7

workspaces:
  - name: "personal"
    token_env: "NOTION_TOKEN_PERSONAL"
  - name: "team"
    token_env: "NOTION_TOKEN_TEAM"

notifications:
  discord_webhook_url: "https://discord.com/api/webhooks/EXAMPLE"
  notify_on: "error"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.retention_count, 7);
        assert_eq!(cfg.workspaces.len(), 2);
        assert_eq!(cfg.notifications.notify_on, NotifyOn::Error);
    }

    #[test]
    fn defaults_apply_when_sections_are_omitted() {
        let cfg: Config = serde_yaml::from_str(
            "retention_count: 3\nworkspaces:\n  - name: a\n    token_env: TOK\n",
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.backup_root, None);
        assert_eq!(cfg.notifications.discord_webhook_url, None);
        assert_eq!(cfg.notifications.notify_on, NotifyOn::Error);
    }

    #[test]
    fn zero_retention_is_invalid() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.retention_count = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("retention_count")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn empty_workspace_list_is_invalid() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.workspaces.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn duplicate_workspace_names_are_invalid() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.workspaces[1].name = cfg.workspaces[0].name.clone();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("unique")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn token_comes_from_environment() {
        let ws = Workspace {
            name: "w".into(),
            token_env: "NOTION_BACKUP_TEST_TOKEN".into(),
        };
        std::env::set_var("NOTION_BACKUP_TEST_TOKEN", "secret");
        assert_eq!(ws.token().unwrap(), "secret");
        std::env::remove_var("NOTION_BACKUP_TEST_TOKEN");
        assert!(matches!(ws.token(), Err(ConfigError::MissingToken { .. })));
    }

    #[test]
    fn backup_root_defaults_next_to_config() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        let resolved = cfg.resolved_backup_root(Path::new("/data/config.yaml"));
        assert_eq!(resolved, PathBuf::from("/data/backups"));

        let mut cfg = cfg;
        cfg.backup_root = Some("/mnt/backups".into());
        let resolved = cfg.resolved_backup_root(Path::new("/data/config.yaml"));
        assert_eq!(resolved, PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.workspaces[0].name, "personal");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let td = tempdir().unwrap();
        let err = load(Some(&td.path().join("nope.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
