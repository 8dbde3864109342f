//! Entity classes and the collection names they are stored under.
//!
//! Collections follow `<prefix>_<role>_<class>[_<locale>]`; metadata keys follow
//! `<purpose>:<class>[:<locale>]`.

use std::fmt;

/// A named category of synchronised record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityClass {
    Tags,
    ExchangeRates,
    Destinations,
    BookingQuestions,
    CancelReasons,
    Attractions,
    /// Gate shared by the per-locale reference data group (destinations,
    /// booking questions, cancel reasons, attractions).
    ReferenceObjects,
    AvailabilitySchedules,
    Products,
    Locations,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::Tags => "tags",
            EntityClass::ExchangeRates => "exchange_rates",
            EntityClass::Destinations => "destinations",
            EntityClass::BookingQuestions => "booking_questions",
            EntityClass::CancelReasons => "cancel_reasons",
            EntityClass::Attractions => "attractions",
            EntityClass::ReferenceObjects => "referenced_objects",
            EntityClass::AvailabilitySchedules => "schedules",
            EntityClass::Products => "products",
            EntityClass::Locations => "locations",
        }
    }

    /// Slow-moving taxonomy-like data refreshed on the long staleness threshold.
    pub fn is_taxonomy(&self) -> bool {
        matches!(
            self,
            EntityClass::Tags
                | EntityClass::Destinations
                | EntityClass::BookingQuestions
                | EntityClass::CancelReasons
                | EntityClass::Attractions
                | EntityClass::ReferenceObjects
        )
    }
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves collection names for one deployment.
#[derive(Debug, Clone)]
pub struct Collections {
    prefix: String,
}

impl Collections {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Raw upstream data for `class`, optionally partitioned per locale.
    pub fn raw(&self, class: EntityClass, locale: Option<&str>) -> String {
        match locale {
            Some(locale) => format!(
                "{}_raw_{}_{}",
                self.prefix,
                class,
                normalise_locale(locale)
            ),
            None => format!("{}_raw_{}", self.prefix, class),
        }
    }

    pub fn products(&self, locale: &str) -> String {
        self.raw(EntityClass::Products, Some(locale))
    }

    pub fn locations(&self, locale: &str) -> String {
        self.raw(EntityClass::Locations, Some(locale))
    }

    pub fn schedules(&self) -> String {
        self.raw(EntityClass::AvailabilitySchedules, None)
    }

    /// Locale-agnostic ledger of discovered location references.
    pub fn location_refs(&self) -> String {
        format!("{}_sync_location_refs", self.prefix)
    }

    pub fn metadata(&self) -> String {
        format!("{}_sync_metadata", self.prefix)
    }

    pub fn audit_log(&self) -> String {
        format!("{}_sync_log", self.prefix)
    }
}

/// Identifies one checkpointed stream: an entity class, optionally per locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    pub class: EntityClass,
    pub locale: Option<String>,
}

impl CheckpointKey {
    pub fn global(class: EntityClass) -> Self {
        Self {
            class,
            locale: None,
        }
    }

    pub fn localised(class: EntityClass, locale: &str) -> Self {
        Self {
            class,
            locale: Some(locale.to_string()),
        }
    }

    pub fn cursor_id(&self) -> String {
        self.with_purpose("cursor")
    }

    pub fn last_sync_id(&self) -> String {
        self.with_purpose("last_sync")
    }

    fn with_purpose(&self, purpose: &str) -> String {
        match &self.locale {
            Some(locale) => format!("{purpose}:{}:{}", self.class, locale),
            None => format!("{purpose}:{}", self.class),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{}:{}", self.class, locale),
            None => write!(f, "{}", self.class),
        }
    }
}

// Document store index names must be lowercase.
fn normalise_locale(locale: &str) -> String {
    locale.to_ascii_lowercase().replace('-', "_")
}
