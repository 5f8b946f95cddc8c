#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Record, page and count-check types shared by the remote fetchers.
//!
//! Every paginated source (`ArcGIS` `FeatureServer` layers, CKAN datastore
//! resources) produces [`Page`]s of [`Record`]s. The accumulator
//! concatenates pages into one ordered result and the upserter converts
//! each record into a typed database row.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One observed entity returned by a remote source (a bus stop, a path
/// segment, a traffic station, a yearly traffic count).
///
/// Non-geometry attributes live in `fields`; `ArcGIS` features additionally
/// carry their `GeoJSON` geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Attribute name to scalar value.
    pub fields: serde_json::Map<String, serde_json::Value>,
    /// Feature geometry (WGS84), if the source returned one.
    pub geometry: Option<geojson::Geometry>,
}

impl Record {
    /// Creates a record from an attribute map with no geometry.
    #[must_use]
    pub const fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields,
            geometry: None,
        }
    }

    /// Returns the value of `field`, treating JSON `null` as absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    /// Field names present on this record.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }
}

impl From<serde_json::Value> for Record {
    /// Builds a record from a JSON object. Anything else yields an empty
    /// record.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }
}

/// One page of records returned by a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records on this page, in server order.
    pub records: Vec<Record>,
    /// Explicit "more available" flag from the server (e.g. `ArcGIS`
    /// `exceededTransferLimit`). Advisory only.
    pub has_more: Option<bool>,
    /// Total matching records as reported by the server (CKAN `total`).
    /// Advisory only.
    pub total: Option<u64>,
}

impl Page {
    /// Number of records on this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether this page returned no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether this page ends the query: empty, or shorter than the
    /// requested page size.
    #[must_use]
    pub fn is_exhausted(&self, page_size: u64) -> bool {
        self.is_empty() || (self.len() as u64) < page_size
    }
}

/// Outcome of comparing an accumulated record count against the count
/// reported by the remote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountCheck {
    /// The remote count equals the accumulated count.
    Match,
    /// The counts differ.
    Mismatch {
        /// Count reported by the remote source.
        expected: u64,
        /// Records actually accumulated or persisted.
        actual: u64,
    },
    /// The remote source did not provide a usable count.
    Unavailable,
}

impl CountCheck {
    /// Compares `actual` against an optional remote count.
    #[must_use]
    pub const fn compare(expected: Option<u64>, actual: u64) -> Self {
        match expected {
            None => Self::Unavailable,
            Some(expected) if expected == actual => Self::Match,
            Some(expected) => Self::Mismatch { expected, actual },
        }
    }

    /// Whether the check found a disagreement.
    #[must_use]
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}

impl fmt::Display for CountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => f.write_str("match"),
            Self::Mismatch { expected, actual } => {
                write!(f, "mismatch (expected {expected}, got {actual})")
            }
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(n: usize) -> Page {
        Page {
            records: (0..n)
                .map(|i| Record::from(serde_json::json!({ "id": i })))
                .collect(),
            ..Page::default()
        }
    }

    #[test]
    fn empty_page_is_exhausted() {
        assert!(page_of(0).is_exhausted(10));
    }

    #[test]
    fn short_page_is_exhausted() {
        assert!(page_of(3).is_exhausted(10));
    }

    #[test]
    fn full_page_is_not_exhausted() {
        assert!(!page_of(10).is_exhausted(10));
    }

    #[test]
    fn get_treats_null_as_missing() {
        let record = Record::from(serde_json::json!({"suburb": null, "lga": "Blacktown"}));
        assert!(record.get("suburb").is_none());
        assert_eq!(record.get("lga"), Some(&serde_json::json!("Blacktown")));
        assert_eq!(record.keys(), vec!["lga".to_string(), "suburb".to_string()]);
    }

    #[test]
    fn compares_counts() {
        assert_eq!(CountCheck::compare(Some(5), 5), CountCheck::Match);
        assert_eq!(CountCheck::compare(None, 5), CountCheck::Unavailable);
        let mismatch = CountCheck::compare(Some(6), 5);
        assert!(mismatch.is_mismatch());
        assert_eq!(mismatch.to_string(), "mismatch (expected 6, got 5)");
    }
}
