use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SyncError;

/// Immutable engine settings, built once at process entry and passed down.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Locales to mirror, in processing order.
    pub locales: Vec<String>,
    /// Prefix for every collection the engine writes.
    pub collection_prefix: String,
    pub staleness: StalenessPolicy,
    pub products: PagerSettings,
    pub schedules: PagerSettings,
    /// Unresolved references pulled per Locations iteration.
    pub location_batch_size: usize,
    /// Page size for the offset-paged attraction listing.
    pub attraction_page_size: u32,
    pub filter: FilterRules,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            locales: vec!["en".to_string()],
            collection_prefix: "catalog".to_string(),
            staleness: StalenessPolicy::default(),
            products: PagerSettings::with_page_count(200),
            schedules: PagerSettings::with_page_count(500),
            location_batch_size: 200,
            attraction_page_size: 100,
            filter: FilterRules::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.locales.is_empty() || self.locales.iter().any(|l| l.trim().is_empty()) {
            return Err(SyncError::Config(
                "at least one non-empty locale is required".into(),
            ));
        }
        // Locales become a single key under `fetchedAt` and part of index names.
        if let Some(bad) = self.locales.iter().find(|l| !is_valid_locale(l)) {
            return Err(SyncError::Config(format!(
                "locale {bad:?} may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
        if self.collection_prefix.trim().is_empty() {
            return Err(SyncError::Config("collection_prefix must not be empty".into()));
        }
        if self.location_batch_size == 0 || self.attraction_page_size == 0 {
            return Err(SyncError::Config("batch sizes must be positive".into()));
        }
        for (name, pager) in [("products", &self.products), ("schedules", &self.schedules)] {
            if pager.bootstrap_since.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "{name}.bootstrap_since must not be empty"
                )));
            }
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            locales = ?self.locales,
            collection_prefix = %self.collection_prefix,
            "Loaded sync config"
        );
        debug!(?self, "Sync config loaded (full debug)");
    }
}

fn is_valid_locale(locale: &str) -> bool {
    locale
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Maximum ages before reference data is eligible for a full re-fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessPolicy {
    pub taxonomy_after_secs: i64,
    pub exchange_rates_after_secs: i64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            taxonomy_after_secs: 12 * 60 * 60,
            exchange_rates_after_secs: 4 * 60 * 60,
        }
    }
}

/// How a "modified since" stream is bootstrapped and paged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerSettings {
    /// Fixed lower bound used until a cursor has been committed.
    pub bootstrap_since: String,
    /// Page size for the timestamp-bounded bootstrap request.
    pub bootstrap_count: u32,
    /// Page size once resuming from a cursor.
    pub page_count: u32,
}

pub const MAX_PAGE_COUNT: u32 = 500;

impl PagerSettings {
    pub fn with_page_count(page_count: u32) -> Self {
        Self {
            page_count,
            ..Self::default()
        }
    }

    pub fn bootstrap_count(&self) -> u32 {
        self.bootstrap_count.clamp(1, MAX_PAGE_COUNT)
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.clamp(1, MAX_PAGE_COUNT)
    }
}

impl Default for PagerSettings {
    fn default() -> Self {
        Self {
            bootstrap_since: "2020-01-01T00:00:01.737043Z".to_string(),
            bootstrap_count: 10,
            page_count: 200,
        }
    }
}

/// Business rules applied by [`crate::annotator::FilteringAnnotator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    pub min_reviews: u64,
    pub min_rating: f64,
    /// Itinerary types with a schema too complex to sell.
    pub denied_itinerary_types: Vec<String>,
    /// Tag ids of less desirable product kinds.
    pub denied_tags: Vec<i64>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            min_reviews: 2,
            min_rating: 2.5,
            denied_itinerary_types: vec!["HOP_ON_HOP_OFF".to_string()],
            // Airport & Hotel Transfers, Private Drivers
            denied_tags: vec![12044, 20238],
        }
    }
}
