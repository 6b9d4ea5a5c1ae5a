//! Run-level accounting: per-item and per-asset outcomes aggregated into the
//! manifest written at the end of every run.
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithWarnings => "completed_with_warnings",
            RunStatus::Failed => "failed",
        }
    }
}

/// Machine-readable summary of one run. Field names and shapes are part of
/// the on-disk contract (`manifest.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub timestamp: String,
    pub duration_seconds: f64,
    pub pages_backed_up: u32,
    pub databases_backed_up: u32,
    pub files_downloaded: u32,
    pub errors: Vec<String>,
    pub status: RunStatus,
}

/// Accumulates outcomes as item pipelines complete. Counts are additive, so
/// the final manifest does not depend on arrival order. A permanently failed
/// item appears only in `errors`, never in the backed-up counts.
#[derive(Debug)]
pub struct RunAccountant {
    started: DateTime<Utc>,
    pages: u32,
    databases: u32,
    files: u32,
    errors: Vec<String>,
    fatal: bool,
}

impl RunAccountant {
    pub fn new(started: DateTime<Utc>) -> Self {
        Self {
            started,
            pages: 0,
            databases: 0,
            files: 0,
            errors: Vec::new(),
            fatal: false,
        }
    }

    pub fn record_page(&mut self) {
        self.pages += 1;
    }

    pub fn record_database(&mut self) {
        self.databases += 1;
    }

    pub fn record_files(&mut self, count: u32) {
        self.files += count;
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// A failed precondition (bad credentials, discovery failure) that makes
    /// the run's result unusable regardless of any partial progress.
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        self.fatal = true;
        self.errors.push(message.into());
    }

    pub fn finalize(self, ended: DateTime<Utc>) -> Manifest {
        let total = self.pages + self.databases + self.files;
        let status = if self.fatal || (!self.errors.is_empty() && total == 0) {
            RunStatus::Failed
        } else if !self.errors.is_empty() {
            RunStatus::CompletedWithWarnings
        } else {
            RunStatus::Completed
        };
        let duration = (ended - self.started)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        Manifest {
            timestamp: self.started.to_rfc3339_opts(SecondsFormat::Secs, true),
            duration_seconds: (duration * 100.0).round() / 100.0,
            pages_backed_up: self.pages,
            databases_backed_up: self.databases,
            files_downloaded: self.files,
            errors: self.errors,
            status,
        }
    }
}
