//! Foreign-reference discovery and the per-locale pending-fetch ledger.
//!
//! Accepted products mention locations that must be fetched through a
//! separate bulk endpoint, once per locale. References are extracted with
//! declarative [`RefPath`] patterns, inserted into a locale-agnostic ledger and
//! marked resolved per locale as the Locations phase fetches them.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use futures::TryStreamExt;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::collections::Collections;
use crate::contract::{DocumentStore, Documents, Filter};
use crate::error::StoreError;
use crate::payload::RefPath;
use crate::store::scan_pages;

const LOCATION_PATHS: &[&str] = &[
    "logistics.redemption.locations[].ref",
    "logistics.start[].location.ref",
    "logistics.end[].location.ref",
    "logistics.travelerPickup.locations[pickupType=HOTEL|AIRPORT|PORT].location.ref",
    // standard itinerary
    "itinerary.itineraryItems[].pointOfInterestLocation.location.ref",
    // multi-day tours
    "itinerary.days[].items[].pointOfInterestLocation.location.ref",
    "itinerary.days[].accommodations[].location.ref",
    // hop-on hop-off
    "itinerary.routes[].pointsOfInterest[].location.ref",
    "itinerary.routes[].stops[].stopLocation.ref",
    "itinerary.pointsOfInterest[].ref",
    "itinerary.activityInfo.location.ref",
    // unstructured
    "itinerary.pointOfInterestLocations[].location.ref",
];

const ATTRACTION_PATHS: &[&str] = &[
    "itinerary.itineraryItems[].pointOfInterestLocation.attractionId",
    "itinerary.days[].items[].pointOfInterestLocation.attractionId",
    "itinerary.routes[].pointsOfInterest[].attractionId",
    "itinerary.pointOfInterestLocations[].attractionId",
];

fn compiled(cell: &'static OnceLock<Vec<RefPath>>, patterns: &[&str]) -> &'static [RefPath] {
    cell.get_or_init(|| patterns.iter().map(|p| RefPath::parse(p)).collect())
}

fn extract(product: &Value, paths: &[RefPath]) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    for path in paths {
        path.collect(product, &mut found);
    }
    found
}

/// Every location reference mentioned by `product`, deduplicated.
pub fn extract_location_refs(product: &Value) -> BTreeSet<String> {
    static PATHS: OnceLock<Vec<RefPath>> = OnceLock::new();
    extract(product, compiled(&PATHS, LOCATION_PATHS))
}

/// Every attraction id mentioned by `product`'s itinerary, deduplicated.
pub fn extract_attraction_ids(product: &Value) -> BTreeSet<String> {
    static PATHS: OnceLock<Vec<RefPath>> = OnceLock::new();
    extract(product, compiled(&PATHS, ATTRACTION_PATHS))
}

/// Ledger of discovered references awaiting per-locale resolution.
///
/// Records look like `{ref, discoveredAt, fetchedAt: {<locale>: ts}}`. A
/// reference is unresolved for a locale while `fetchedAt.<locale>` is absent.
pub struct DependencyTracker<'a, S: ?Sized> {
    store: &'a S,
    collection: String,
}

impl<'a, S> DependencyTracker<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(store: &'a S, collections: &Collections) -> Self {
        Self {
            store,
            collection: collections.location_refs(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Inserts records for refs not yet in the ledger; existing records,
    /// including their resolution markers, are left untouched.
    pub async fn record_discovered(
        &self,
        refs: &BTreeSet<String>,
        now: i64,
    ) -> Result<usize, StoreError> {
        if refs.is_empty() {
            return Ok(0);
        }
        let records: Documents = refs
            .iter()
            .map(|r| {
                (
                    r.clone(),
                    json!({ "ref": r, "discoveredAt": now, "fetchedAt": {} }),
                )
            })
            .collect();
        self.store.bulk_create(&self.collection, &records).await?;
        debug!(count = records.len(), "Recorded discovered references");
        Ok(records.len())
    }

    /// Up to `limit` refs whose `fetchedAt.<locale>` is absent.
    pub async fn find_unresolved(
        &self,
        locale: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let found = self
            .store
            .search(
                &self.collection,
                &Filter::missing(fetched_field(locale)),
                limit,
            )
            .await?;
        Ok(found.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    /// Number of refs still unresolved for `locale`, counted page by page.
    pub async fn count_unresolved(
        &self,
        locale: &str,
        page_size: usize,
    ) -> Result<usize, StoreError> {
        scan_pages(
            self.store,
            &self.collection,
            Filter::missing(fetched_field(locale)),
            page_size,
        )
        .try_fold(0, |total, page| async move {
            Ok::<_, StoreError>(total + page.len())
        })
        .await
    }

    /// Sets `fetchedAt.<locale> = now` for each ref. Markers for other locales
    /// are preserved.
    pub async fn mark_resolved(
        &self,
        locale: &str,
        refs: &[String],
        now: i64,
    ) -> Result<(), StoreError> {
        if refs.is_empty() {
            return Ok(());
        }
        let mut stored = self.store.bulk_get(&self.collection, refs).await?;
        let mut updates = Documents::new();
        for r in refs {
            let mut record = stored
                .remove(r)
                .unwrap_or_else(|| json!({ "ref": r, "discoveredAt": now }));
            set_fetched(&mut record, locale, now);
            updates.insert(r.clone(), record);
        }
        self.store.bulk_upsert(&self.collection, &updates).await
    }
}

fn fetched_field(locale: &str) -> String {
    format!("fetchedAt.{locale}")
}

fn set_fetched(record: &mut Value, locale: &str, now: i64) {
    let Some(map) = record.as_object_mut() else {
        return;
    };
    let fetched = map
        .entry("fetchedAt")
        .or_insert_with(|| Value::Object(Map::new()));
    if !fetched.is_object() {
        *fetched = Value::Object(Map::new());
    }
    if let Value::Object(markers) = fetched {
        markers.insert(locale.to_string(), json!(now));
    }
}
