//! Helpers over dynamically shaped upstream payloads.
//!
//! Payloads stay `serde_json::Value` trees. Nested lookups go through [`path`]
//! and reference extraction is declared as [`RefPath`] patterns walked
//! generically instead of hand-written nested conditionals per payload shape.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::contract::Documents;

/// Follows a dotted path of object keys, e.g. `reviews.totalReviews`.
pub fn path<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, key| current.as_object()?.get(key))
}

/// "Nothing useful here": null, false, zero, empty string, `"0"`, empty
/// array or empty object.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// `None` when the path is absent or blank.
pub fn present<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    path(value, dotted).filter(|v| !is_blank(v))
}

/// Renders a scalar id (string or number) as a string key.
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric view of a value that may arrive as a number or a numeric string.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Keys a list of upstream entries by `id_field`. Entries without a usable
/// id are dropped.
pub fn index_by(entries: &[Value], id_field: &str) -> Documents {
    let mut documents = Documents::new();
    for entry in entries {
        match path(entry, id_field).and_then(scalar_key) {
            Some(id) => {
                documents.insert(id, entry.clone());
            }
            None => debug!(id_field, "Skipping upstream entry without an id"),
        }
    }
    documents
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    /// Every element of an array.
    Each,
    /// Array elements whose `field` equals one of `any_of`.
    EachWhere { field: String, any_of: Vec<String> },
}

/// A declarative pattern locating scalar references inside a payload.
///
/// Syntax: dot-separated keys, `[]` to fan out over an array and
/// `[field=A|B]` to fan out over the elements whose `field` is `A` or `B`:
///
/// ```
/// use catalog_sync_core::payload::RefPath;
/// let p = RefPath::parse("logistics.travelerPickup.locations[pickupType=HOTEL|PORT].location.ref");
/// assert_eq!(p.to_string(), "logistics.travelerPickup.locations[pickupType=HOTEL|PORT].location.ref");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RefPath {
    segments: Vec<Segment>,
}

impl RefPath {
    pub fn parse(pattern: &str) -> Self {
        let mut segments = Vec::new();
        for part in pattern.split('.').filter(|p| !p.is_empty()) {
            match part.split_once('[') {
                None => segments.push(Segment::Key(part.to_string())),
                Some((key, rest)) => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(key.to_string()));
                    }
                    let guard = rest.trim_end_matches(']');
                    match guard.split_once('=') {
                        Some((field, values)) => segments.push(Segment::EachWhere {
                            field: field.to_string(),
                            any_of: values.split('|').map(str::to_string).collect(),
                        }),
                        None => segments.push(Segment::Each),
                    }
                }
            }
        }
        Self { segments }
    }

    /// Adds every non-blank scalar found at this path to `out`.
    pub fn collect(&self, value: &Value, out: &mut BTreeSet<String>) {
        walk(value, &self.segments, out);
    }
}

impl std::fmt::Display for RefPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) => {
                    if !first {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                Segment::Each => f.write_str("[]")?,
                Segment::EachWhere { field, any_of } => {
                    write!(f, "[{}={}]", field, any_of.join("|"))?
                }
            }
            first = false;
        }
        Ok(())
    }
}

fn walk(value: &Value, segments: &[Segment], out: &mut BTreeSet<String>) {
    let Some((head, tail)) = segments.split_first() else {
        if !is_blank(value) {
            if let Some(key) = scalar_key(value) {
                out.insert(key);
            }
        }
        return;
    };
    match head {
        Segment::Key(key) => {
            if let Some(next) = value.as_object().and_then(|o| o.get(key)) {
                walk(next, tail, out);
            }
        }
        Segment::Each => {
            for item in elements(value) {
                walk(item, tail, out);
            }
        }
        Segment::EachWhere { field, any_of } => {
            for item in elements(value) {
                let selected = path(item, field)
                    .and_then(Value::as_str)
                    .is_some_and(|v| any_of.iter().any(|allowed| allowed == v));
                if selected {
                    walk(item, tail, out);
                }
            }
        }
    }
}

// Upstream sometimes serialises lists as objects keyed by position.
fn elements(value: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(map) => Box::new(map.values()),
        _ => Box::new(std::iter::empty()),
    }
}
