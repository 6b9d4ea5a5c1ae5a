//! Content-addressed download of embedded binaries. Each distinct source
//! reference is downloaded at most once per run; bit-identical bytes from
//! different references share one on-disk file named by their hash.
use async_trait::async_trait;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::model::{BlockKind, BlockNode};

/// Attempts per source reference before the asset is recorded as failed.
const MAX_ATTEMPTS: u32 = 3;

/// Hex digits of the content hash used in filenames.
const HASH_PREFIX_LEN: usize = 16;

const MAX_BASENAME_LEN: usize = 180;

/// Seam for fetching raw bytes, faked in tests.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

pub struct HttpAssetFetcher {
    http: Client,
}

impl HttpAssetFetcher {
    pub fn new() -> Self {
        let http = Client::builder()
            .user_agent("notion-backup/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpAssetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let res = self.http.get(url).send().await?.error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }
}

#[derive(Debug, Default)]
pub struct AssetStats {
    pub downloaded: u32,
    pub errors: Vec<String>,
}

type Outcome = Option<String>;

/// Per-run asset store. The `entries` map is the single piece of shared
/// mutable state in a run; each source reference owns one `OnceCell` so
/// concurrent requests for the same reference collapse to one download.
pub struct AssetStore {
    files_dir: PathBuf,
    fetcher: Arc<dyn AssetFetcher>,
    retry_delay: Duration,
    entries: Mutex<HashMap<String, Arc<OnceCell<Outcome>>>>,
    stats: Mutex<AssetStats>,
}

impl AssetStore {
    pub fn new(files_dir: PathBuf, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            files_dir,
            fetcher,
            retry_delay: Duration::from_millis(500),
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(AssetStats::default()),
        }
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Resolve a source reference to an on-disk filename, downloading on
    /// first sight. Returns `None` once the retry budget is exhausted.
    pub async fn resolve(&self, url: &str) -> Option<String> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_init(|| self.download(url)).await.clone()
    }

    async fn download(&self, url: &str) -> Outcome {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetcher.fetch(url).await {
                Ok(bytes) => {
                    let filename = derived_filename(url, &bytes);
                    let path = self.files_dir.join(&filename);
                    // Identical content already on disk: dedup, no rewrite.
                    if !path.exists() {
                        if let Err(err) = tokio::fs::write(&path, &bytes).await {
                            warn!(%url, %err, "failed to write asset");
                            let mut stats = self.stats.lock().await;
                            stats.errors.push(format!("file {url}: write failed: {err}"));
                            return None;
                        }
                    }
                    debug!(%url, %filename, size = bytes.len(), "asset stored");
                    let mut stats = self.stats.lock().await;
                    stats.downloaded += 1;
                    return Some(filename);
                }
                Err(err) => {
                    warn!(%url, attempt, max = MAX_ATTEMPTS, %err, "asset download failed");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        let mut stats = self.stats.lock().await;
        stats
            .errors
            .push(format!("file {url}: download failed after {MAX_ATTEMPTS} attempts"));
        None
    }

    /// Snapshot of every successfully resolved reference, for the renderer.
    pub async fn resolved_paths(&self) -> HashMap<String, String> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter_map(|(url, cell)| {
                cell.get()
                    .and_then(|outcome| outcome.clone())
                    .map(|filename| (url.clone(), filename))
            })
            .collect()
    }

    pub async fn take_stats(&self) -> AssetStats {
        std::mem::take(&mut *self.stats.lock().await)
    }
}

/// Collect every asset source reference in a block tree, depth-first with an
/// explicit stack.
pub fn collect_asset_refs(blocks: &[BlockNode]) -> Vec<String> {
    let mut refs = Vec::new();
    let mut stack: Vec<&BlockNode> = blocks.iter().rev().collect();
    while let Some(node) = stack.pop() {
        match &node.kind {
            BlockKind::Image { source, .. } | BlockKind::File { source, .. } => {
                refs.push(source.url().to_string());
            }
            _ => {}
        }
        stack.extend(node.children.iter().rev());
    }
    refs
}

/// `{content-hash}-{best-effort basename}`. The hash covers the downloaded
/// bytes, so two references to identical content derive the same name.
fn derived_filename(url: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hash: String = digest
        .iter()
        .take(HASH_PREFIX_LEN / 2)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("{hash}-{}", best_effort_basename(url))
}

/// Recover a human-readable basename from a download URL: strip the query,
/// percent-decode, and undo the image proxy's hex-encoding of external URLs.
pub fn best_effort_basename(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    };
    let mut name = percent_decode(path.rsplit('/').next().unwrap_or(""));
    if let Some(stripped) = name.split('?').next() {
        name = stripped.to_string();
    }

    // The image proxy hex-encodes the original external URL into the path.
    if name.len() > 50 && is_hex_string(&name) {
        if let Some(decoded) = decode_hex_url(&name) {
            let inner = decoded.split('?').next().unwrap_or(&decoded);
            if let Some(basename) = inner.rsplit('/').next() {
                if !basename.is_empty() {
                    name = percent_decode(basename);
                }
            }
        }
    }

    if name.is_empty() || name == "/" {
        name = "file".to_string();
    }
    if name.len() > MAX_BASENAME_LEN {
        name.truncate(MAX_BASENAME_LEN);
    }
    name
}

fn is_hex_string(s: &str) -> bool {
    s.len() % 2 == 0 && !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_hex_url(s: &str) -> Option<String> {
    let bytes: Option<Vec<u8>> = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect();
    let decoded = String::from_utf8(bytes?).ok()?;
    if decoded.starts_with("http://") || decoded.starts_with("https://") {
        Some(decoded)
    } else {
        None
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
