//! Content discovery and tree assembly: paginated workspace search, then a
//! fully materialized block tree per page and per database row.
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::model::{DatabaseTree, FetchedBlock, PageMeta, PageTree};
use crate::notion::{with_retry, ApiError, NotionApi, RetryPolicy};

/// Nesting levels preserved per item. The API UI caps nesting far below
/// this; anything deeper is truncated with a warning instead of recursing
/// without bound.
const MAX_BLOCK_DEPTH: usize = 64;

/// Everything the workspace search surfaced, ordered by discovery.
#[derive(Debug, Default)]
pub struct WorkspaceContent {
    pub pages: Vec<Value>,
    pub database_ids: Vec<String>,
}

/// Walk a cursor-paginated listing to completion, retrying each page
/// request under the given policy.
async fn collect_paginated<F, Fut>(
    retry: &RetryPolicy,
    mut fetch_page: F,
) -> Result<Vec<Value>, ApiError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<crate::notion::model::ObjectList, ApiError>>,
{
    let mut results = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let list = with_retry(retry, || fetch_page(cursor.clone())).await?;
        let next = list.cursor();
        results.extend(list.results);
        match next {
            Some(next) => cursor = Some(next),
            None => return Ok(results),
        }
    }
}

/// Discover every top-level page and database shared with the integration.
/// Any page request failing past the retry budget is fatal to discovery:
/// a partial listing would silently shrink the backup.
pub async fn discover_content(
    api: &dyn NotionApi,
    retry: &RetryPolicy,
) -> Result<WorkspaceContent, ApiError> {
    info!("discovering workspace content");
    let results = collect_paginated(retry, |cursor| async move {
        api.search(cursor.as_deref()).await
    })
    .await?;

    let mut content = WorkspaceContent::default();
    for item in results {
        match item.get("object").and_then(Value::as_str) {
            Some("page") => content.pages.push(item),
            Some("database") => {
                if let Some(id) = item.get("id").and_then(Value::as_str) {
                    content.database_ids.push(id.to_string());
                }
            }
            _ => {}
        }
    }
    info!(
        pages = content.pages.len(),
        databases = content.database_ids.len(),
        "discovery complete"
    );
    Ok(content)
}

/// Fetch the complete block tree under `root_id`.
///
/// Child discovery is iterative (work queue, no call recursion) and guarded
/// by a visited-id set: the API is trusted not to produce cycles, but a
/// repeated block id is fetched once and attached once rather than looping.
pub async fn fetch_block_tree(
    api: &dyn NotionApi,
    retry: &RetryPolicy,
    root_id: &str,
) -> Result<Vec<crate::model::BlockNode>, ApiError> {
    let mut lists: HashMap<String, Vec<FetchedBlock>> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<String> = vec![root_id.to_string()];
    visited.insert(root_id.to_string());

    while let Some(parent_id) = queue.pop() {
        let raw = collect_paginated(retry, |cursor| {
            let parent_id = parent_id.clone();
            async move { api.list_children(&parent_id, cursor.as_deref()).await }
        })
        .await?;

        let blocks: Vec<FetchedBlock> = raw.iter().map(FetchedBlock::from_api).collect();
        for block in &blocks {
            if block.has_children && block.node.supports_children() {
                if visited.insert(block.node.id.clone()) {
                    queue.push(block.node.id.clone());
                } else {
                    warn!(block_id = %block.node.id, "block id seen twice in one tree; skipping re-fetch");
                }
            }
        }
        lists.insert(parent_id, blocks);
    }

    Ok(assemble(root_id, &mut lists, 0))
}

/// Attach fetched child lists to their parents. Entries are removed from the
/// map as they are consumed, so a block can appear in the tree at most once
/// and the recursion strictly shrinks its input.
fn assemble(
    id: &str,
    lists: &mut HashMap<String, Vec<FetchedBlock>>,
    depth: usize,
) -> Vec<crate::model::BlockNode> {
    if depth >= MAX_BLOCK_DEPTH {
        warn!(block_id = %id, depth, "maximum block nesting reached; truncating children");
        return Vec::new();
    }
    let Some(fetched) = lists.remove(id) else {
        return Vec::new();
    };
    fetched
        .into_iter()
        .map(|fb| {
            let mut node = fb.node;
            if fb.has_children {
                node.children = assemble(&node.id.clone(), lists, depth + 1);
            }
            node
        })
        .collect()
}

/// Fetch one page's properties and its full block tree.
pub async fn fetch_page_tree(
    api: &dyn NotionApi,
    retry: &RetryPolicy,
    page_id: &str,
) -> Result<PageTree, ApiError> {
    debug!(page_id, "fetching page");
    let raw = with_retry(retry, || api.get_page(page_id)).await?;
    let page = PageMeta::from_api(&raw);
    let blocks = fetch_block_tree(api, retry, page_id).await?;
    Ok(PageTree { page, blocks })
}

/// Fetch a database's schema and every row, each row treated as its own
/// page (parent = the database id) with a fully materialized block tree.
pub async fn fetch_database_tree(
    api: &dyn NotionApi,
    retry: &RetryPolicy,
    database_id: &str,
) -> Result<DatabaseTree, ApiError> {
    debug!(database_id, "fetching database");
    let database = with_retry(retry, || api.get_database(database_id)).await?;
    let raw_rows = collect_paginated(retry, |cursor| async move {
        api.query_database(database_id, cursor.as_deref()).await
    })
    .await?;

    let mut rows = Vec::with_capacity(raw_rows.len());
    for raw in &raw_rows {
        let mut page = PageMeta::from_api(raw);
        if page.parent_id.is_none() {
            page.parent_id = Some(database_id.to_string());
        }
        let blocks = match raw.get("id").and_then(Value::as_str) {
            Some(row_id) => fetch_block_tree(api, retry, row_id).await?,
            None => Vec::new(),
        };
        rows.push(PageTree { page, blocks });
    }
    debug!(database_id, rows = rows.len(), "database fetched");
    Ok(DatabaseTree { database, rows })
}
