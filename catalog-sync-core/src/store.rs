//! Store-side building blocks: an in-process [`DocumentStore`], the audit
//! decorator, scan helpers and typed checkpoint access.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::collections::{CheckpointKey, Collections};
use crate::contract::{DocumentStore, Documents, Filter, ScanCursor, ScanPage};
use crate::error::StoreError;

/// A complete [`DocumentStore`] held in memory.
///
/// Scans walk ids in lexical order and use the last returned id as cursor.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, BTreeMap<String, Value>>>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    /// Snapshot of a whole collection.
    pub fn dump(&self, collection: &str) -> Documents {
        self.collections
            .lock()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|c| c.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .lock()?
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn bulk_upsert(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let target = guard.entry(collection.to_string()).or_default();
        for (id, doc) in docs {
            target.insert(id.clone(), doc.clone());
        }
        Ok(())
    }

    async fn bulk_create(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let target = guard.entry(collection.to_string()).or_default();
        for (id, doc) in docs {
            target.entry(id.clone()).or_insert_with(|| doc.clone());
        }
        Ok(())
    }

    async fn bulk_get(&self, collection: &str, ids: &[String]) -> Result<Documents, StoreError> {
        let guard = self.lock()?;
        let Some(source) = guard.get(collection) else {
            return Ok(Documents::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| source.get(id).map(|doc| (id.clone(), doc.clone())))
            .collect())
    }

    async fn bulk_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if let Some(target) = guard.get_mut(collection) {
            for id in ids {
                target.remove(id);
            }
        }
        Ok(())
    }

    async fn scan_filtered(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        cursor: Option<ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        let guard = self.lock()?;
        let Some(source) = guard.get(collection) else {
            return Ok(ScanPage::default());
        };
        let page_size = page_size.max(1);
        let mut matching = source
            .iter()
            .filter(|(id, _)| cursor.as_ref().map_or(true, |c| id.as_str() > c.0.as_str()))
            .filter(|(_, doc)| filter.matches(doc));

        let items: Vec<(String, Value)> = matching
            .by_ref()
            .take(page_size)
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect();
        let has_more = matching.next().is_some();
        let next = match (has_more, items.last()) {
            (true, Some((last, _))) => Some(ScanCursor(last.clone())),
            _ => None,
        };
        Ok(ScanPage { items, next })
    }

    async fn search(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self.scan_filtered(collection, filter, size, None).await?.items)
    }
}

/// Appends one audit record per bulk write to the audit log collection.
///
/// Audit failures are logged and never fail the write they describe.
pub struct AuditedStore<S, C> {
    inner: S,
    clock: C,
    log_collection: String,
}

impl<S, C> AuditedStore<S, C>
where
    S: DocumentStore,
    C: Clock,
{
    pub fn new(inner: S, clock: C, collections: &Collections) -> Self {
        Self {
            inner,
            clock,
            log_collection: collections.audit_log(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn record(&self, collection: &str, operation: &str, count: usize) {
        if collection == self.log_collection {
            return;
        }
        let timestamp = self.clock.now();
        let datetime = chrono::DateTime::from_timestamp(timestamp, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        let mut entry = Documents::new();
        entry.insert(
            format!("{timestamp}-{}", uuid::Uuid::new_v4()),
            json!({
                "timestamp": timestamp,
                "datetime": datetime,
                "collection": collection,
                "operation": operation,
                "objectCount": count,
            }),
        );
        if let Err(e) = self.inner.bulk_upsert(&self.log_collection, &entry).await {
            warn!(error = %e, collection, operation, "Failed to append audit record");
        }
    }
}

#[async_trait]
impl<S, C> DocumentStore for AuditedStore<S, C>
where
    S: DocumentStore,
    C: Clock,
{
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn bulk_upsert(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        self.inner.bulk_upsert(collection, docs).await?;
        self.record(collection, "bulkUpsert", docs.len()).await;
        Ok(())
    }

    async fn bulk_create(&self, collection: &str, docs: &Documents) -> Result<(), StoreError> {
        self.inner.bulk_create(collection, docs).await?;
        self.record(collection, "bulkCreate", docs.len()).await;
        Ok(())
    }

    async fn bulk_get(&self, collection: &str, ids: &[String]) -> Result<Documents, StoreError> {
        self.inner.bulk_get(collection, ids).await
    }

    async fn bulk_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError> {
        self.inner.bulk_delete(collection, ids).await?;
        self.record(collection, "bulkDelete", ids.len()).await;
        Ok(())
    }

    async fn scan_filtered(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        cursor: Option<ScanCursor>,
    ) -> Result<ScanPage, StoreError> {
        self.inner
            .scan_filtered(collection, filter, page_size, cursor)
            .await
    }

    async fn search(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.search(collection, filter, size).await
    }
}

/// Pages of a filtered scan as a lazy stream; one store round-trip per page.
pub fn scan_pages<'a, S>(
    store: &'a S,
    collection: &'a str,
    filter: Filter,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<(String, Value)>, StoreError>> + 'a
where
    S: DocumentStore + ?Sized,
{
    enum State {
        Start,
        After(ScanCursor),
        Done,
    }

    stream::try_unfold(State::Start, move |state| {
        let filter = filter.clone();
        async move {
            let cursor = match state {
                State::Start => None,
                State::After(cursor) => Some(cursor),
                State::Done => return Ok(None),
            };
            let page = store
                .scan_filtered(collection, &filter, page_size, cursor)
                .await?;
            if page.items.is_empty() {
                return Ok(None);
            }
            let next = match page.next {
                Some(cursor) => State::After(cursor),
                None => State::Done,
            };
            Ok::<_, StoreError>(Some((page.items, next)))
        }
    })
}

/// Every `(id, payload)` of a collection. Meant for small reference collections.
pub fn scan_all<'a, S>(
    store: &'a S,
    collection: &'a str,
) -> impl Stream<Item = Result<(String, Value), StoreError>> + 'a
where
    S: DocumentStore + ?Sized,
{
    scan_pages(store, collection, Filter::All, 200)
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, StoreError>)))
        .try_flatten()
}

/// Pages of `ACTIVE` products for `locale`.
pub fn active_products<'a, S>(
    store: &'a S,
    products_collection: &'a str,
    page_size: usize,
) -> impl Stream<Item = Result<Vec<(String, Value)>, StoreError>> + 'a
where
    S: DocumentStore + ?Sized,
{
    scan_pages(
        store,
        products_collection,
        Filter::equals("status", "ACTIVE"),
        page_size,
    )
}

/// Durable "where we left off" state in the metadata collection.
pub struct Checkpoints<'a, S: ?Sized> {
    store: &'a S,
    collection: String,
}

impl<'a, S> Checkpoints<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'a S, collections: &Collections) -> Self {
        Self {
            store,
            collection: collections.metadata(),
        }
    }

    /// Stored continuation token; `None` means "bootstrap from the fixed epoch".
    pub async fn cursor(&self, key: &CheckpointKey) -> Result<Option<String>, StoreError> {
        let record = self.store.get(&self.collection, &key.cursor_id()).await?;
        let cursor = record
            .as_ref()
            .and_then(|r| r.get("cursor"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        debug!(checkpoint = %key, has_cursor = cursor.is_some(), "Read cursor checkpoint");
        Ok(cursor)
    }

    pub async fn set_cursor(&self, key: &CheckpointKey, cursor: &str) -> Result<(), StoreError> {
        self.put(key.cursor_id(), json!({ "cursor": cursor })).await
    }

    pub async fn last_full_sync(&self, key: &CheckpointKey) -> Result<Option<i64>, StoreError> {
        let record = self.store.get(&self.collection, &key.last_sync_id()).await?;
        Ok(record
            .as_ref()
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok())))
    }

    pub async fn set_last_full_sync(&self, key: &CheckpointKey, at: i64) -> Result<(), StoreError> {
        self.put(key.last_sync_id(), json!({ "value": at })).await
    }

    async fn put(&self, id: String, record: Value) -> Result<(), StoreError> {
        let mut docs = Documents::new();
        docs.insert(id, record);
        self.store.bulk_upsert(&self.collection, &docs).await
    }
}
