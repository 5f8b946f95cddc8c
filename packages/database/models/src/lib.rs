#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Typed database rows and derived result types.
//!
//! Remote [`Record`]s are converted into these rows before they are written.
//! Conversion is strict: a missing or untypeable required field fails with a
//! [`FieldError`] that lists every field the record did carry, so a changed
//! upstream schema can be diagnosed from the error alone.

use planning_etl_source_models::Record;
use serde::{Deserialize, Serialize};

/// A required record field was missing or could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Bad {row} record: field '{field}' {problem}. Keys={available:?}")]
pub struct FieldError {
    /// Row type being built (e.g. `"station reference"`).
    pub row: &'static str,
    /// Offending field.
    pub field: String,
    /// What was wrong with it.
    pub problem: String,
    /// Fields present on the record.
    pub available: Vec<String>,
}

impl FieldError {
    fn new(row: &'static str, record: &Record, field: &str, problem: impl Into<String>) -> Self {
        Self {
            row,
            field: field.to_string(),
            problem: problem.into(),
            available: record.keys(),
        }
    }
}

/// Reads fields off a [`Record`] with the conversions the traffic datasets
/// need. Identifiers arrive as numbers or strings depending on the
/// resource, so both are accepted.
struct Fields<'a> {
    row: &'static str,
    record: &'a Record,
}

impl<'a> Fields<'a> {
    const fn new(row: &'static str, record: &'a Record) -> Self {
        Self { row, record }
    }

    fn required(&self, field: &str) -> Result<&'a serde_json::Value, FieldError> {
        self.record
            .get(field)
            .ok_or_else(|| FieldError::new(self.row, self.record, field, "is missing"))
    }

    fn text(&self, field: &str) -> Result<String, FieldError> {
        let value = self.required(field)?;
        value_to_text(value).ok_or_else(|| {
            FieldError::new(self.row, self.record, field, format!("is not text: {value}"))
        })
    }

    fn optional_text(&self, field: &str) -> Option<String> {
        self.record.get(field).and_then(value_to_text)
    }

    fn int(&self, field: &str) -> Result<i64, FieldError> {
        let value = self.required(field)?;
        value_to_int(value).ok_or_else(|| {
            FieldError::new(
                self.row,
                self.record,
                field,
                format!("is not an integer: {value}"),
            )
        })
    }

    fn int32(&self, field: &str) -> Result<i32, FieldError> {
        let value = self.int(field)?;
        i32::try_from(value).map_err(|_| {
            FieldError::new(
                self.row,
                self.record,
                field,
                format!("is out of range: {value}"),
            )
        })
    }

    fn float(&self, field: &str) -> Result<f64, FieldError> {
        let value = self.required(field)?;
        value_to_float(value).ok_or_else(|| {
            FieldError::new(self.row, self.record, field, format!("is not a number: {value}"))
        })
    }
}

fn value_to_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn value_to_int(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_float(value: &serde_json::Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// One traffic count station (`bcc_traffic.station_reference`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationReference {
    /// Natural key.
    pub station_key: String,
    /// Public station identifier.
    pub station_id: String,
    /// Local government area.
    pub lga: Option<String>,
    /// Suburb name.
    pub suburb: Option<String>,
    /// Road the station counts.
    pub road_name: Option<String>,
    /// WGS84 latitude.
    pub wgs84_latitude: f64,
    /// WGS84 longitude.
    pub wgs84_longitude: f64,
}

impl TryFrom<&Record> for StationReference {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let f = Fields::new("station reference", record);
        Ok(Self {
            station_key: f.text("station_key")?,
            station_id: f.text("station_id")?,
            lga: f.optional_text("lga"),
            suburb: f.optional_text("suburb"),
            road_name: f.optional_text("road_name"),
            wgs84_latitude: f.float("wgs84_latitude")?,
            wgs84_longitude: f.float("wgs84_longitude")?,
        })
    }
}

/// One yearly traffic count for a station, direction and classification
/// (`bcc_traffic.yearly_summary`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlySummary {
    /// Station natural key.
    pub station_key: String,
    /// Count year.
    pub year: i32,
    /// Reporting period (e.g. `"ALL DAYS"`).
    pub period: String,
    /// Count type (e.g. `"VEHICLES"`).
    pub count_type: String,
    /// Direction sequence number.
    pub traffic_direction_seq: i32,
    /// Cardinal direction sequence number.
    pub cardinal_direction_seq: i32,
    /// Vehicle classification, when the count is classified.
    pub classification_type: Option<String>,
    /// Counted vehicles.
    pub traffic_count: i64,
}

impl TryFrom<&Record> for YearlySummary {
    type Error = FieldError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let f = Fields::new("yearly summary", record);
        Ok(Self {
            station_key: f.text("station_key")?,
            year: f.int32("year")?,
            period: f.text("period")?,
            count_type: f.text("count_type")?,
            traffic_direction_seq: f.int32("traffic_direction_seq")?,
            cardinal_direction_seq: f.int32("cardinal_direction_seq")?,
            classification_type: f.optional_text("classification_type"),
            traffic_count: f.int("traffic_count")?,
        })
    }
}

/// Served-path KPI for the bus stop coverage analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageKpi {
    /// Length of path inside the stop coverage, in kilometres.
    pub served_km: Option<f64>,
    /// Total path length, in kilometres.
    pub total_km: Option<f64>,
    /// `served_km / total_km` as a percentage rounded to two decimals.
    /// `None` when either length is missing or the total is zero.
    pub served_percent: Option<f64>,
}

impl CoverageKpi {
    /// Builds the KPI from the two lengths.
    #[must_use]
    pub fn from_lengths(served_km: Option<f64>, total_km: Option<f64>) -> Self {
        let served_percent = match (served_km, total_km) {
            (Some(served), Some(total)) if total != 0.0 => {
                Some((100.0 * served / total * 100.0).round() / 100.0)
            }
            _ => None,
        };
        Self {
            served_km,
            total_km,
            served_percent,
        }
    }
}

/// One feature read back from a derived `PostGIS` table, ready for file
/// export.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Non-geometry columns.
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Geometry, decoded from `ST_AsGeoJSON`.
    pub geometry: Option<geojson::Geometry>,
}
