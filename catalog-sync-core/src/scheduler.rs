//! Staleness gate for slow-moving reference data.

use tracing::debug;

use crate::collections::{CheckpointKey, EntityClass};
use crate::config::StalenessPolicy;
use crate::contract::DocumentStore;
use crate::error::StoreError;
use crate::store::Checkpoints;

/// Decides whether a full re-fetch of an entity class is due.
///
/// `now` is pinned when the scheduler is built so every gate in one run
/// compares against the same instant. A skip decision writes nothing.
pub struct SyncScheduler<'a, S: ?Sized> {
    checkpoints: &'a Checkpoints<'a, S>,
    policy: StalenessPolicy,
    now: i64,
}

impl<'a, S> SyncScheduler<'a, S>
where
    S: DocumentStore + ?Sized,
{
    pub fn new(checkpoints: &'a Checkpoints<'a, S>, policy: StalenessPolicy, now: i64) -> Self {
        Self {
            checkpoints,
            policy,
            now,
        }
    }

    pub fn threshold(&self, class: EntityClass) -> i64 {
        if class == EntityClass::ExchangeRates {
            self.policy.exchange_rates_after_secs
        } else {
            self.policy.taxonomy_after_secs
        }
    }

    pub async fn should_sync(
        &self,
        class: EntityClass,
        locale: Option<&str>,
    ) -> Result<bool, StoreError> {
        let key = key_for(class, locale);
        let due = match self.checkpoints.last_full_sync(&key).await? {
            None => true,
            Some(last) => self.now - last >= self.threshold(class),
        };
        debug!(checkpoint = %key, due, "Evaluated staleness gate");
        Ok(due)
    }

    /// Stamps a completed full fetch with this run's `now`.
    pub async fn mark_synced(
        &self,
        class: EntityClass,
        locale: Option<&str>,
    ) -> Result<(), StoreError> {
        self.checkpoints
            .set_last_full_sync(&key_for(class, locale), self.now)
            .await
    }

    pub fn now(&self) -> i64 {
        self.now
    }
}

fn key_for(class: EntityClass, locale: Option<&str>) -> CheckpointKey {
    match locale {
        Some(locale) => CheckpointKey::localised(class, locale),
        None => CheckpointKey::global(class),
    }
}
