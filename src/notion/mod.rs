//! Notion API client: authenticated HTTP with a shared request-rate budget,
//! a typed error taxonomy and a reusable retry-with-backoff policy.
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::notion::model::ObjectList;

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Default requests per second. Slightly below the API's 3/sec ceiling so a
/// full worker pool cannot trip the limit.
const CALLS_PER_SECOND: f64 = 2.5;

/// Error taxonomy for API calls. `Auth` is fatal to the workspace,
/// `Transient` is retried with backoff, `Request` is a permanent non-auth
/// rejection (bad id, revoked share) that becomes an item error upstream.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("transient API error: {0}")]
    Transient(String),
    #[error("API error {status}: {message}")]
    Request { status: u16, message: String },
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transient(err.to_string())
    }
}

/// Retry schedule for transient failures: `max_attempts` total tries with
/// exponential backoff starting at `base_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run a fallible async operation under a retry policy. Only transient
/// errors are retried; auth and permanent request errors surface at once.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    %err,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "transient API error; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Async rate limiter: spaces calls at least `min_interval` apart. Shared by
/// every request a workspace run makes, across the whole worker pool.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(calls_per_second: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(1.0 / calls_per_second),
            last_call: Mutex::new(None),
        }
    }

    /// Wait until a request slot is available. Holding the lock across the
    /// sleep keeps concurrent callers properly serialized.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let due = prev + self.min_interval;
            let now = Instant::now();
            if due > now {
                tokio::time::sleep_until(due).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Capability set the backup pipeline needs from the content API. Kept
/// cursor-level so pagination loops are exercised against fakes in tests.
#[async_trait]
pub trait NotionApi: Send + Sync {
    /// One page of the workspace-wide search over everything shared with the
    /// integration.
    async fn search(&self, cursor: Option<&str>) -> Result<ObjectList, ApiError>;

    /// Page properties.
    async fn get_page(&self, page_id: &str) -> Result<Value, ApiError>;

    /// One page of a block's children.
    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ObjectList, ApiError>;

    /// Database schema.
    async fn get_database(&self, database_id: &str) -> Result<Value, ApiError>;

    /// One page of a database's rows.
    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<ObjectList, ApiError>;
}

pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    limiter: RateLimiter,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(token: String) -> Self {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(token, base_url)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("notion-backup/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            limiter: RateLimiter::new(CALLS_PER_SECOND),
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Request {
                status: 0,
                message: format!("invalid endpoint {path}: {e}"),
            })?;

        self.limiter.acquire().await;
        debug!(%url, "sending notion request");

        let mut req = self
            .http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION);
        if let Some(body) = &body {
            req = req.json(body);
        }

        let res = req.send().await?;
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!("{status}: {body}")));
        }
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Request {
                status: status.as_u16(),
                message: body,
            });
        }

        res.json::<Value>()
            .await
            .map_err(|e| ApiError::Transient(format!("invalid response body: {e}")))
    }

    fn parse_list(value: Value) -> Result<ObjectList, ApiError> {
        serde_json::from_value(value).map_err(|e| ApiError::Transient(format!("invalid list: {e}")))
    }
}

#[async_trait]
impl NotionApi for NotionClient {
    async fn search(&self, cursor: Option<&str>) -> Result<ObjectList, ApiError> {
        let mut body = json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        let value = self.execute(Method::POST, "v1/search", Some(body)).await?;
        Self::parse_list(value)
    }

    async fn get_page(&self, page_id: &str) -> Result<Value, ApiError> {
        self.execute(Method::GET, &format!("v1/pages/{page_id}"), None)
            .await
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ObjectList, ApiError> {
        let mut path = format!("v1/blocks/{block_id}/children?page_size={PAGE_SIZE}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&start_cursor={cursor}"));
        }
        let value = self.execute(Method::GET, &path, None).await?;
        Self::parse_list(value)
    }

    async fn get_database(&self, database_id: &str) -> Result<Value, ApiError> {
        self.execute(Method::GET, &format!("v1/databases/{database_id}"), None)
            .await
    }

    async fn query_database(
        &self,
        database_id: &str,
        cursor: Option<&str>,
    ) -> Result<ObjectList, ApiError> {
        let mut body = json!({ "page_size": PAGE_SIZE });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }
        let value = self
            .execute(
                Method::POST,
                &format!("v1/databases/{database_id}/query"),
                Some(body),
            )
            .await?;
        Self::parse_list(value)
    }
}
