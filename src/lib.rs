//! Automated backup for Notion workspaces: discovers every shared page and
//! database, materializes full block trees, downloads embedded assets, and
//! persists each run as JSON plus Markdown under a timestamped directory.
pub mod backup;
pub mod config;
pub mod fetch;
pub mod markdown;
pub mod model;
pub mod notify;
pub mod notion;
pub mod retention;
