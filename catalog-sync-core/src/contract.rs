#![allow(unused)]

//! # contract: the engine's two external collaborators
//!
//! The engine never talks to the network itself. It consumes:
//! - a [`CatalogSource`]: the upstream catalogue API (listing, "modified since"
//!   streams and bulk lookups);
//! - a [`DocumentStore`]: idempotent bulk CRUD plus resumable scans over named
//!   collections keyed by stable external ids.
//!
//! Both traits are async, `Send + Sync`, and annotated for `mockall` so tests
//! can script collaborator behaviour deterministically. Real implementations
//! live in the binary crate; [`crate::store::InMemoryStore`] is a complete
//! in-process store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde_json::Value;

use crate::error::{SourceError, StoreError};
use crate::payload;

/// Entities keyed by their external id.
pub type Documents = BTreeMap<String, Value>;

/// Lower bound for a "modified since" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Since {
    /// Absolute timestamp, used only until the first cursor is committed.
    Timestamp(String),
    /// Opaque continuation token returned by a previous page.
    Cursor(String),
}

/// One page of a "modified since" stream.
#[derive(Debug, Clone, Default)]
pub struct CursorPage {
    pub items: Documents,
    /// May be empty even when `items` is not.
    pub next_cursor: String,
}

/// Upstream catalogue API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn tags(&self) -> Result<Documents, SourceError>;

    /// Rates keyed `<source>-<target>`.
    async fn exchange_rates(&self) -> Result<Documents, SourceError>;

    async fn destinations(&self, locale: &str) -> Result<Documents, SourceError>;

    async fn booking_questions(&self, locale: &str) -> Result<Documents, SourceError>;

    async fn cancel_reasons(&self, locale: &str) -> Result<Documents, SourceError>;

    /// One page of attractions under `destination_id`; `offset` starts at 1.
    async fn attractions(
        &self,
        locale: &str,
        destination_id: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Documents, SourceError>;

    async fn schedules_modified_since(
        &self,
        since: &Since,
        count: u32,
    ) -> Result<CursorPage, SourceError>;

    async fn products_modified_since(
        &self,
        locale: &str,
        since: &Since,
        count: u32,
    ) -> Result<CursorPage, SourceError>;

    /// Locations keyed by reference; unknown references are simply absent.
    async fn locations_bulk(
        &self,
        locale: &str,
        refs: &[String],
    ) -> Result<Documents, SourceError>;
}

/// Predicate understood by every store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Dotted `field` equals `value`.
    Equals { field: String, value: Value },
    /// Dotted `field` is absent or null.
    Missing { field: String },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Filter::Missing {
            field: field.into(),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals { field, value } => payload::path(doc, field) == Some(value),
            Filter::Missing { field } => {
                matches!(payload::path(doc, field), None | Some(Value::Null))
            }
        }
    }
}

/// Opaque position inside a filtered scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(pub String);

/// One independently consumable page of a filtered scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<(String, Value)>,
    /// `None` once the scan is exhausted.
    pub next: Option<ScanCursor>,
}

/// Document collection primitives.
///
/// Every method treats a collection that does not exist yet as empty.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrite-or-insert every document.
    async fn bulk_upsert(&self, collection: &str, docs: &Documents) -> Result<(), StoreError>;

    /// Insert-only: ids that already exist keep their stored payload.
    async fn bulk_create(&self, collection: &str, docs: &Documents) -> Result<(), StoreError>;

    /// Missing ids are absent from the result.
    async fn bulk_get(&self, collection: &str, ids: &[String]) -> Result<Documents, StoreError>;

    /// Missing ids are no-ops.
    async fn bulk_delete(&self, collection: &str, ids: &[String]) -> Result<(), StoreError>;

    /// Next page of documents matching `filter`, resuming after `cursor`.
    async fn scan_filtered(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        cursor: Option<ScanCursor>,
    ) -> Result<ScanPage, StoreError>;

    /// At most `size` documents matching `filter` in one request. Leaves no
    /// server-side scan state behind.
    async fn search(
        &self,
        collection: &str,
        filter: &Filter,
        size: usize,
    ) -> Result<Vec<(String, Value)>, StoreError>;
}
