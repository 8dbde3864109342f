//! Elasticsearch-backed [`DocumentStore`].
//!
//! Each collection is one index. Bulk writes go through `_bulk` with
//! `refresh=true` so a write is visible to the very next scan, lookups use
//! `_mget` and `_doc`, and filtered scans use the scroll API with the scroll id
//! as cursor. Bounded lookups such as the pending-reference batch use a plain
//! sized `_search` so they hold no scroll context. An index that does not exist
//! yet reads as empty.

use std::time::Duration;

use async_trait::async_trait;
use catalog_sync_core::contract::{DocumentStore, Documents, Filter, ScanCursor, ScanPage};
use catalog_sync_core::error::StoreError;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::load_config::StoreSettings;

const SCROLL_KEEP_ALIVE: &str = "10m";

pub struct ElasticsearchStore {
    client: Client,
    base: Url,
}

impl ElasticsearchStore {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let base = Url::parse(&settings.url).map_err(|e| {
            StoreError::Backend(format!("invalid store url {:?}: {e}", settings.url))
        })?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Backend(format!(
                "store url {:?} cannot be used as a base",
                settings.url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn bulk(
        &self,
        collection: &str,
        action: &str,
        docs: impl Iterator<Item = (&String, Option<&Value>)>,
    ) -> Result<(), StoreError> {
        let mut body = String::new();
        let mut count = 0usize;
        for (id, doc) in docs {
            let header = json!({ action: { "_index": collection, "_id": id } });
            body.push_str(&header.to_string());
            body.push('\n');
            if let Some(doc) = doc {
                body.push_str(&doc.to_string());
                body.push('\n');
            }
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        let mut url = self.url(&["_bulk"]);
        url.query_pairs_mut().append_pair("refresh", "true");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(backend)?;
        let result = json_body(response).await?;

        if result.get("errors").and_then(Value::as_bool) == Some(true) {
            let items = result
                .get("items")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            for item in items {
                let Some(outcome) = item.get(action) else {
                    continue;
                };
                let status = outcome.get("status").and_then(Value::as_u64).unwrap_or(0);
                if is_tolerated(action, status) || (200..300).contains(&status) {
                    continue;
                }
                return Err(StoreError::Backend(format!(
                    "bulk {action} into {collection} failed with {status}: {}",
                    outcome.get("error").cloned().unwrap_or(Value::Null)
                )));
            }
        }
        debug!(collection, action, count, "Bulk request applied");
        Ok(())
    }

    async fn clear_scroll(&self, scroll_id: &str) {
        let result = self
            .client
            .delete(self.url(&["_search", "scroll"]))
            .json(&json!({ "scroll_id": scroll_id }))
            .send()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to clear scroll context");
        }
    }
}

/// Create-collisions and delete-misses are the idempotent outcomes of a re-run.
fn is_tolerated(action: &str, status: u64) -> bool {
    matches!((action, status), ("create", 409) | ("delete", 404))
}

fn backend(e: reqwest::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

async fn json_body(response: Response) -> Result<Value, StoreError> {
    let status = response.status();
    let text = response.text().await.map_err(backend)?;
    if !status.is_success() {
        return Err(StoreError::Backend(format!("HTTP {}: {text}", status.as_u16())));
    }
    serde_json::from_str(&text).map_err(|e| StoreError::Malformed(e.to_string()))
}

/// Translates a [`Filter`] into a query DSL clause.
pub fn to_query(filter: &Filter) -> Value {
    match filter {
        Filter::All => json!({ "match_all": {} }),
        Filter::Equals { field, value } => {
            let clause = if value.is_string() {
                json!({ "match_phrase": { field.as_str(): value } })
            } else {
                json!({ "term": { field.as_str(): value } })
            };
            json!({ "bool": { "filter": [clause] } })
        }
        Filter::Missing { field } => {
            json!({ "bool": { "must_not": [{ "exists": { "field": field } }] } })
        }
    }
}

fn hits(result: &Value) -> Vec<(String, Value)> {
    result
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let id = hit.get("_id")?.as_str()?.to_string();
                    let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                    Some((id, source))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let response = self
            .client
            .get(self.url(&[collection, "_doc", id]))
            .send()
            .await
            .map_err(backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let result = json_body(response).await?;
        if result.get("found").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        Ok(result.get("_source").cloned())
    }

    async fn bulk_upsert(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        self.bulk(collection, "index", docs.iter().map(|(id, doc)| (id, Some(doc))))
            .await
    }

    async fn bulk_create(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        self.bulk(collection, "create", docs.iter().map(|(id, doc)| (id, Some(doc))))
            .await
    }

    async fn bulk_get(&self, collection: &str, ids: &[String]) -> Result<Documents, StoreError> {
        if ids.is_empty() {
            return Ok(Documents::new());
        }
        let response = self
            .client
            .post(self.url(&[collection, "_mget"]))
            .json(&json!({ "ids": ids }))
            .send()
            .await
            .map_err(backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Documents::new());
        }
        let result = json_body(response).await?;
        let docs = result
            .get("docs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(docs
            .iter()
            .filter(|doc| doc.get("found").and_then(Value::as_bool) == Some(true))
            .filter_map(|doc| {
                let id = doc.get("_id")?.as_str()?.to_string();
                Some((id, doc.get("_source")?.clone()))
            })
            .collect())
    }

    async fn bulk_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        self.bulk(collection, "delete", ids.iter().map(|id| (id, None)))
            .await
    }

    async fn scan_filtered(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        cursor: Option<ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        let page_size = page_size.max(1);
        let response = match &cursor {
            None => {
                let mut url = self.url(&[collection, "_search"]);
                url.query_pairs_mut().append_pair("scroll", SCROLL_KEEP_ALIVE);
                self.client
                    .post(url)
                    .json(&json!({ "size": page_size, "query": to_query(filter) }))
                    .send()
                    .await
                    .map_err(backend)?
            }
            Some(ScanCursor(scroll_id)) => self
                .client
                .post(self.url(&["_search", "scroll"]))
                .json(&json!({ "scroll": SCROLL_KEEP_ALIVE, "scroll_id": scroll_id }))
                .send()
                .await
                .map_err(backend)?,
        };
        if cursor.is_none() && response.status() == StatusCode::NOT_FOUND {
            return Ok(ScanPage::default());
        }
        let result = json_body(response).await?;
        let items = hits(&result);
        let scroll_id = result
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let next = match scroll_id {
            Some(id) if items.len() >= page_size => Some(ScanCursor(id)),
            Some(id) => {
                self.clear_scroll(&id).await;
                None
            }
            None => None,
        };
        debug!(collection, count = items.len(), more = next.is_some(), "Scanned page");
        Ok(ScanPage { items, next })
    }

    async fn search(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let response = self
            .client
            .post(self.url(&[collection, "_search"]))
            .json(&json!({ "size": size.max(1), "query": to_query(filter) }))
            .send()
            .await
            .map_err(backend)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let items = hits(&json_body(response).await?);
        debug!(collection, count = items.len(), "Searched collection");
        Ok(items)
    }
}
