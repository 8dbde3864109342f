//! Business-rule filtering of products.
//!
//! A product that fails a rule is kept in the store but forced `INACTIVE`, so
//! downstream consumers skip it and reference discovery ignores it. Each
//! decision is recorded as annotations under [`ANNOTATIONS_KEY`].

use std::fmt;

use serde_json::{json, Map, Value};

use crate::config::FilterRules;
use crate::payload::{as_f64, is_blank, path, present, scalar_key};

/// Reserved payload key holding the annotation history.
pub const ANNOTATIONS_KEY: &str = "_sync_annotations";

pub const PRODUCER: &str = "FilteringAnnotator";

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// Why a product was rejected, in rule evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Inactive,
    ItineraryType,
    ReviewCount,
    PoorRating,
    Tags,
    Schedule,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Inactive => "inactive",
            RejectReason::ItineraryType => "itineraryType",
            RejectReason::ReviewCount => "reviewCount",
            RejectReason::PoorRating => "poorRating",
            RejectReason::Tags => "tags",
            RejectReason::Schedule => "schedule",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Accepted,
    Rejected {
        reason: RejectReason,
        /// Offending tag for [`RejectReason::Tags`].
        tag: Option<Value>,
    },
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Decision::Accepted => None,
            Decision::Rejected { reason, .. } => Some(*reason),
        }
    }

    fn reject(reason: RejectReason) -> Self {
        Decision::Rejected { reason, tag: None }
    }
}

/// Classifies one product against its availability schedule.
#[derive(Debug, Clone, Default)]
pub struct FilteringAnnotator {
    rules: FilterRules,
}

impl FilteringAnnotator {
    pub fn new(rules: FilterRules) -> Self {
        Self { rules }
    }

    /// Returns an annotated copy of `product` and the decision.
    ///
    /// Rules run in a fixed order and the first match wins: inactive,
    /// itinerary type, review count, rating, tags, schedule. Apart from the
    /// appended annotations, the only mutation is forcing `status` to
    /// `INACTIVE` on rejection (never needed for the inactive rule).
    pub fn classify(
        &self,
        product: &Value,
        schedule: Option<&Value>,
        now: i64,
    ) -> (Value, Decision) {
        let decision = self.evaluate(product, schedule);
        let mut updated = product.clone();

        if let Decision::Rejected { reason, .. } = &decision {
            if *reason != RejectReason::Inactive {
                if let Some(map) = updated.as_object_mut() {
                    map.insert("status".into(), Value::String(STATUS_INACTIVE.into()));
                }
            }
        }

        annotate(&mut updated, "lastUpdate", json!(now));
        match &decision {
            Decision::Accepted => annotate(&mut updated, "status", json!("accepted")),
            Decision::Rejected { reason, tag } => {
                annotate(&mut updated, "status", json!("rejected"));
                annotate(&mut updated, "reason", json!(reason.code()));
                if let Some(tag) = tag {
                    annotate(&mut updated, "tag", tag.clone());
                }
            }
        }
        (updated, decision)
    }

    fn evaluate(&self, product: &Value, schedule: Option<&Value>) -> Decision {
        match path(product, "status").and_then(Value::as_str) {
            None | Some("") | Some(STATUS_INACTIVE) => {
                return Decision::reject(RejectReason::Inactive)
            }
            Some(_) => {}
        }

        let itinerary_type = present(product, "itinerary.itineraryType").and_then(Value::as_str);
        match itinerary_type {
            None => return Decision::reject(RejectReason::ItineraryType),
            Some(kind) if self.rules.denied_itinerary_types.iter().any(|d| d == kind) => {
                return Decision::reject(RejectReason::ItineraryType)
            }
            Some(_) => {}
        }

        let reviews = path(product, "reviews.totalReviews").and_then(as_f64);
        if reviews.map_or(true, |n| n <= 0.0 || n < self.rules.min_reviews as f64) {
            return Decision::reject(RejectReason::ReviewCount);
        }

        let rating = path(product, "reviews.combinedAverageRating").and_then(as_f64);
        if rating.map_or(true, |r| r <= 0.0 || r < self.rules.min_rating) {
            return Decision::reject(RejectReason::PoorRating);
        }

        if let Some(tags) = path(product, "tags").and_then(Value::as_array) {
            for tag in tags {
                let denied = scalar_key(tag)
                    .and_then(|t| t.parse::<i64>().ok())
                    .is_some_and(|t| self.rules.denied_tags.contains(&t));
                if denied {
                    return Decision::Rejected {
                        reason: RejectReason::Tags,
                        tag: Some(tag.clone()),
                    };
                }
            }
        }

        let schedule_complete = schedule.is_some_and(|s| {
            ["currency", "summary.fromPrice", "bookableItems"]
                .iter()
                .all(|field| path(s, field).is_some_and(|v| !is_blank(v)))
        });
        if !schedule_complete {
            return Decision::reject(RejectReason::Schedule);
        }

        Decision::Accepted
    }
}

/// Carries the annotation history of `previous` over to a fresh payload.
///
/// Upstream payloads never contain annotations, so the stored copy is the
/// only place earlier decisions survive.
pub fn carry_annotations(previous: Option<&Value>, fresh: &mut Value) {
    let Some(history) = previous
        .and_then(|p| p.get(ANNOTATIONS_KEY))
        .and_then(Value::as_array)
    else {
        return;
    };
    let Some(map) = fresh.as_object_mut() else {
        return;
    };
    let existing = map
        .remove(ANNOTATIONS_KEY)
        .and_then(|v| match v {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default();
    let mut merged = history.clone();
    merged.extend(existing);
    map.insert(ANNOTATIONS_KEY.into(), Value::Array(merged));
}

/// Annotations recorded on `product`, oldest first.
pub fn annotations(product: &Value) -> &[Value] {
    product
        .get(ANNOTATIONS_KEY)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn annotate(product: &mut Value, key: &str, value: Value) {
    let Some(map) = product.as_object_mut() else {
        return;
    };
    let slot = map
        .entry(ANNOTATIONS_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    if let Value::Array(items) = slot {
        let mut entry = Map::new();
        entry.insert("producer".into(), json!(PRODUCER));
        entry.insert("key".into(), json!(key));
        entry.insert("value".into(), value);
        items.push(Value::Object(entry));
    }
}
