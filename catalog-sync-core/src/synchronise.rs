//! High-level pipeline: one synchronisation run across every phase.
//!
//! A run walks a fixed phase plan with no backward transitions:
//!
//! `ExchangeRates → Tags → AvailabilitySchedules → [per locale: ReferenceObjects → Products → Locations]`
//!
//! # Responsibilities
//! - Gate slow-moving reference data through [`SyncScheduler`]
//! - Page "modified since" streams through [`CursorPager`], persisting each page
//!   before its cursor so a crash re-fetches rather than skips
//! - Classify products with [`FilteringAnnotator`] against their schedules
//! - Queue location references of active products in the [`DependencyTracker`]
//!   ledger and resolve them per locale
//!
//! # Error Handling
//! Fail-fast: the first phase that errors aborts the run with a [`RunError`]
//! naming it. Checkpoints of earlier phases (and of the pages the failed phase
//! already committed) stay valid; the next invocation resumes from them.
//!
//! # Navigation
//! - Main entrypoint: [`Synchroniser::run`]
//! - Supporting types: [`Phase`], [`SynchroniseReport`]

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::annotator::{carry_annotations, FilteringAnnotator, STATUS_ACTIVE};
use crate::clock::Clock;
use crate::collections::{CheckpointKey, Collections, EntityClass};
use crate::config::SyncConfig;
use crate::contract::{CatalogSource, DocumentStore, Documents};
use crate::discovery::{extract_attraction_ids, extract_location_refs, DependencyTracker};
use crate::error::{RunError, SyncError};
use crate::pager::{CursorPager, PageOutcome};
use crate::payload::path;
use crate::scheduler::SyncScheduler;
use crate::store::Checkpoints;
use crate::taxonomy::fetch_all_attractions;

/// One step of the run plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    ExchangeRates,
    Tags,
    AvailabilitySchedules,
    ReferenceObjects(String),
    Products(String),
    Locations(String),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::ExchangeRates => f.write_str("exchange_rates"),
            Phase::Tags => f.write_str("tags"),
            Phase::AvailabilitySchedules => f.write_str("schedules"),
            Phase::ReferenceObjects(locale) => write!(f, "reference_objects:{locale}"),
            Phase::Products(locale) => write!(f, "products:{locale}"),
            Phase::Locations(locale) => write!(f, "locations:{locale}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseCounts {
    /// Entities received from upstream.
    pub fetched: usize,
    /// Entities written through the checkpointed path.
    pub persisted: usize,
    /// New ledger entries offered for discovered references.
    pub discovered: usize,
    /// Products forced out by the filtering rules.
    pub rejected: usize,
    /// References marked resolved for the locale.
    pub resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Staleness gate said the data is still fresh.
    Skipped,
    Synced(PhaseCounts),
}

#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub outcome: PhaseOutcome,
}

#[derive(Debug, Clone)]
pub struct SynchroniseReport {
    pub started_at: i64,
    pub phases: Vec<PhaseReport>,
}

impl SynchroniseReport {
    pub fn outcome(&self, phase: &Phase) -> Option<&PhaseOutcome> {
        self.phases
            .iter()
            .find(|r| &r.phase == phase)
            .map(|r| &r.outcome)
    }
}

/// Drives a full run against one upstream source and one document store.
pub struct Synchroniser<'a, C: ?Sized, S: ?Sized, K> {
    source: &'a C,
    store: &'a S,
    config: &'a SyncConfig,
    clock: K,
    annotator: FilteringAnnotator,
    collections: Collections,
}

impl<'a, C, S, K> Synchroniser<'a, C, S, K>
where
    C: CatalogSource + ?Sized,
    S: DocumentStore + ?Sized,
    K: Clock,
{
    pub fn new(
        source: &'a C,
        store: &'a S,
        config: &'a SyncConfig,
        clock: K,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            source,
            store,
            config,
            clock,
            annotator: FilteringAnnotator::new(config.filter.clone()),
            collections: Collections::new(config.collection_prefix.clone()),
        })
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    /// The ordered phase plan for this configuration.
    pub fn plan(&self) -> Vec<Phase> {
        let mut phases = vec![
            Phase::ExchangeRates,
            Phase::Tags,
            Phase::AvailabilitySchedules,
        ];
        for locale in &self.config.locales {
            phases.push(Phase::ReferenceObjects(locale.clone()));
            phases.push(Phase::Products(locale.clone()));
            phases.push(Phase::Locations(locale.clone()));
        }
        phases
    }

    pub async fn run(&self) -> Result<SynchroniseReport, RunError> {
        let started_at = self.clock.now();
        info!(
            started_at,
            locales = ?self.config.locales,
            "[SYNC] Starting full synchronisation run"
        );

        let mut report = SynchroniseReport {
            started_at,
            phases: Vec::new(),
        };
        for phase in self.plan() {
            info!(%phase, "[SYNC] Starting phase");
            match self.run_phase(&phase, started_at).await {
                Ok(outcome) => {
                    info!(%phase, ?outcome, "[SYNC] Phase complete");
                    report.phases.push(PhaseReport { phase, outcome });
                }
                Err(e) => {
                    error!(%phase, error = %e, "[SYNC][ERROR] Phase aborted, stopping run");
                    return Err(RunError { phase, error: e });
                }
            }
        }
        info!(phases = report.phases.len(), "[SYNC] Synchronisation run complete");
        Ok(report)
    }

    /// Runs a single phase. `run_started` pins the staleness comparisons.
    pub async fn run_phase(
        &self,
        phase: &Phase,
        run_started: i64,
    ) -> Result<PhaseOutcome, SyncError> {
        match phase {
            Phase::ExchangeRates => self.sync_exchange_rates(run_started).await,
            Phase::Tags => self.sync_tags(run_started).await,
            Phase::AvailabilitySchedules => self.sync_availability_schedules().await,
            Phase::ReferenceObjects(locale) => {
                self.sync_reference_objects(locale, run_started).await
            }
            Phase::Products(locale) => self.sync_products(locale).await,
            Phase::Locations(locale) => self.sync_locations(locale).await,
        }
    }

    pub async fn sync_exchange_rates(&self, run_started: i64) -> Result<PhaseOutcome, SyncError> {
        let checkpoints = Checkpoints::new(self.store, &self.collections);
        let scheduler =
            SyncScheduler::new(&checkpoints, self.config.staleness.clone(), run_started);
        if !scheduler.should_sync(EntityClass::ExchangeRates, None).await? {
            debug!("[SYNC] Skipping exchange rates");
            return Ok(PhaseOutcome::Skipped);
        }
        let rates = self.source.exchange_rates().await?;
        let counts = self
            .persist(&self.collections.raw(EntityClass::ExchangeRates, None), &rates)
            .await?;
        scheduler.mark_synced(EntityClass::ExchangeRates, None).await?;
        Ok(PhaseOutcome::Synced(counts))
    }

    pub async fn sync_tags(&self, run_started: i64) -> Result<PhaseOutcome, SyncError> {
        let checkpoints = Checkpoints::new(self.store, &self.collections);
        let scheduler =
            SyncScheduler::new(&checkpoints, self.config.staleness.clone(), run_started);
        if !scheduler.should_sync(EntityClass::Tags, None).await? {
            debug!("[SYNC] Skipping tags");
            return Ok(PhaseOutcome::Skipped);
        }
        let tags = self.source.tags().await?;
        let counts = self
            .persist(&self.collections.raw(EntityClass::Tags, None), &tags)
            .await?;
        scheduler.mark_synced(EntityClass::Tags, None).await?;
        Ok(PhaseOutcome::Synced(counts))
    }

    /// Destinations, booking questions, cancel reasons and attractions for one
    /// locale, refreshed together behind a single staleness gate.
    pub async fn sync_reference_objects(
        &self,
        locale: &str,
        run_started: i64,
    ) -> Result<PhaseOutcome, SyncError> {
        let checkpoints = Checkpoints::new(self.store, &self.collections);
        let scheduler =
            SyncScheduler::new(&checkpoints, self.config.staleness.clone(), run_started);
        if !scheduler
            .should_sync(EntityClass::ReferenceObjects, Some(locale))
            .await?
        {
            debug!(locale, "[SYNC] Skipping localised reference objects");
            return Ok(PhaseOutcome::Skipped);
        }

        let mut counts = PhaseCounts::default();

        debug!(locale, "[SYNC] Synchronising destinations");
        let destinations = self.source.destinations(locale).await?;
        let target = self.collections.raw(EntityClass::Destinations, Some(locale));
        add(&mut counts, self.persist(&target, &destinations).await?);

        debug!(locale, "[SYNC] Synchronising booking questions");
        let questions = self.source.booking_questions(locale).await?;
        let target = self.collections.raw(EntityClass::BookingQuestions, Some(locale));
        add(&mut counts, self.persist(&target, &questions).await?);

        debug!(locale, "[SYNC] Synchronising cancel reasons");
        let reasons = self.source.cancel_reasons(locale).await?;
        let target = self.collections.raw(EntityClass::CancelReasons, Some(locale));
        add(&mut counts, self.persist(&target, &reasons).await?);

        debug!(locale, "[SYNC] Synchronising attractions");
        let attractions = fetch_all_attractions(
            self.source,
            locale,
            &destinations,
            self.config.attraction_page_size,
        )
        .await?;
        let target = self.collections.raw(EntityClass::Attractions, Some(locale));
        add(&mut counts, self.persist(&target, &attractions).await?);

        scheduler
            .mark_synced(EntityClass::ReferenceObjects, Some(locale))
            .await?;
        Ok(PhaseOutcome::Synced(counts))
    }

    /// Locale-agnostic availability schedules, cursor-paged.
    pub async fn sync_availability_schedules(&self) -> Result<PhaseOutcome, SyncError> {
        let collection = self.collections.schedules();
        let checkpoints = Checkpoints::new(self.store, &self.collections);
        let mut pager = CursorPager::resume(
            &checkpoints,
            CheckpointKey::global(EntityClass::AvailabilitySchedules),
            self.config.schedules.clone(),
        )
        .await?;

        let mut counts = PhaseCounts::default();
        while let Some((since, count)) = pager.request() {
            let page = self.source.schedules_modified_since(&since, count).await?;
            let outcome = pager.observe(&page);
            counts.fetched += page.items.len();
            match outcome {
                PageOutcome::Exhausted => break,
                PageOutcome::Final => {
                    debug!(
                        count = page.items.len(),
                        "[SYNC] Blank continuation, keeping previous schedules cursor"
                    );
                }
                PageOutcome::Continue(cursor) => {
                    self.store.bulk_upsert(&collection, &page.items).await?;
                    pager.commit(&checkpoints, cursor).await?;
                    counts.persisted += page.items.len();
                    debug!(count = page.items.len(), "[SYNC] Persisted schedules page");
                }
            }
        }
        info!(
            fetched = counts.fetched,
            persisted = counts.persisted,
            "[SYNC] Synchronised schedules"
        );
        Ok(PhaseOutcome::Synced(counts))
    }

    /// Products for one locale: fetch, classify, queue references, persist.
    pub async fn sync_products(&self, locale: &str) -> Result<PhaseOutcome, SyncError> {
        let collection = self.collections.products(locale);
        let checkpoints = Checkpoints::new(self.store, &self.collections);
        let tracker = DependencyTracker::new(self.store, &self.collections);
        let mut pager = CursorPager::resume(
            &checkpoints,
            CheckpointKey::localised(EntityClass::Products, locale),
            self.config.products.clone(),
        )
        .await?;

        let mut counts = PhaseCounts::default();
        while let Some((since, count)) = pager.request() {
            let page = self
                .source
                .products_modified_since(locale, &since, count)
                .await?;
            let outcome = pager.observe(&page);
            if outcome == PageOutcome::Exhausted {
                break;
            }
            counts.fetched += page.items.len();

            let ids: Vec<String> = page.items.keys().cloned().collect();
            let schedules = self.store.bulk_get(&self.collections.schedules(), &ids).await?;
            let previous = self.store.bulk_get(&collection, &ids).await?;

            let mut products = Documents::new();
            let mut location_refs = BTreeSet::new();
            let mut attraction_ids = BTreeSet::new();
            for (id, mut product) in page.items {
                carry_annotations(previous.get(&id), &mut product);
                let (classified, decision) =
                    self.annotator
                        .classify(&product, schedules.get(&id), self.clock.now());
                if let Some(reason) = decision.reason() {
                    counts.rejected += 1;
                    debug!(locale, product = %id, %reason, "[SYNC] Product rejected");
                }
                if is_active(&classified) {
                    location_refs.extend(extract_location_refs(&classified));
                    attraction_ids.extend(extract_attraction_ids(&classified));
                }
                products.insert(id, classified);
            }

            counts.discovered += tracker
                .record_discovered(&location_refs, self.clock.now())
                .await?;
            self.log_missing_attractions(locale, &attraction_ids).await?;

            match outcome {
                PageOutcome::Continue(cursor) => {
                    self.store.bulk_upsert(&collection, &products).await?;
                    pager.commit(&checkpoints, cursor).await?;
                    counts.persisted += products.len();
                    debug!(locale, count = products.len(), "[SYNC] Persisted products page");
                }
                _ => {
                    debug!(
                        locale,
                        count = products.len(),
                        "[SYNC] Blank continuation, keeping previous products cursor"
                    );
                }
            }
        }
        info!(
            locale,
            fetched = counts.fetched,
            persisted = counts.persisted,
            rejected = counts.rejected,
            discovered = counts.discovered,
            "[SYNC] Synchronised products"
        );
        Ok(PhaseOutcome::Synced(counts))
    }

    /// Resolves queued location references for one locale until none remain.
    pub async fn sync_locations(&self, locale: &str) -> Result<PhaseOutcome, SyncError> {
        let collection = self.collections.locations(locale);
        let tracker = DependencyTracker::new(self.store, &self.collections);
        let mut counts = PhaseCounts::default();
        loop {
            let refs = tracker
                .find_unresolved(locale, self.config.location_batch_size)
                .await?;
            if refs.is_empty() {
                break;
            }
            let locations = self.source.locations_bulk(locale, &refs).await?;
            for missing in refs.iter().filter(|r| !locations.contains_key(*r)) {
                debug!(
                    locale,
                    location = %missing,
                    "[SYNC] Upstream returned no location for reference"
                );
            }
            counts.fetched += locations.len();
            if !locations.is_empty() {
                self.store.bulk_upsert(&collection, &locations).await?;
                counts.persisted += locations.len();
            }
            tracker.mark_resolved(locale, &refs, self.clock.now()).await?;
            counts.resolved += refs.len();
            debug!(
                locale,
                requested = refs.len(),
                received = locations.len(),
                "[SYNC] Resolved location batch"
            );
        }
        info!(
            locale,
            resolved = counts.resolved,
            fetched = counts.fetched,
            "[SYNC] Synchronised locations"
        );
        Ok(PhaseOutcome::Synced(counts))
    }

    async fn persist(&self, collection: &str, docs: &Documents) -> Result<PhaseCounts, SyncError> {
        if !docs.is_empty() {
            self.store.bulk_upsert(collection, docs).await?;
        }
        debug!(collection, count = docs.len(), "[SYNC] Persisted reference data");
        Ok(PhaseCounts {
            fetched: docs.len(),
            persisted: docs.len(),
            ..PhaseCounts::default()
        })
    }

    async fn log_missing_attractions(
        &self,
        locale: &str,
        ids: &BTreeSet<String>,
    ) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        let wanted: Vec<String> = ids.iter().cloned().collect();
        let known = self
            .store
            .bulk_get(
                &self.collections.raw(EntityClass::Attractions, Some(locale)),
                &wanted,
            )
            .await?;
        for id in wanted.iter().filter(|id| !known.contains_key(*id)) {
            debug!(locale, attraction = %id, "[SYNC] Referenced attraction not in store");
        }
        Ok(())
    }
}

fn is_active(product: &Value) -> bool {
    path(product, "status").and_then(Value::as_str) == Some(STATUS_ACTIVE)
}

fn add(total: &mut PhaseCounts, part: PhaseCounts) {
    total.fetched += part.fetched;
    total.persisted += part.persisted;
    total.discovered += part.discovered;
    total.rejected += part.rejected;
    total.resolved += part.resolved;
}
