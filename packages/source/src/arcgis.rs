//! `ArcGIS` REST API page fetcher.
//!
//! Queries a `FeatureServer` layer with `resultOffset`/`resultRecordCount`
//! paging and `f=geojson` output. Feature `properties` become record
//! fields and the feature geometry is kept alongside. Used for the council
//! bus stop and path layers.

use async_trait::async_trait;
use planning_etl_source_models::{Page, Record};

use crate::{PageFetcher, SourceError, http};

/// Configuration for an `ArcGIS` layer query.
#[derive(Debug, Clone)]
pub struct ArcGisConfig {
    /// Layer URL without the trailing `/query`
    /// (e.g. `".../FeatureServer/0"`).
    pub layer_url: String,
    /// Label for log messages (e.g. `"bus stops"`).
    pub label: String,
    /// SQL `where` predicate. `"1=1"` selects everything.
    pub where_clause: String,
    /// Comma-separated output fields (`"*"` for all).
    pub out_fields: String,
    /// Whether to request feature geometry.
    pub return_geometry: bool,
}

/// [`PageFetcher`] for an `ArcGIS` `FeatureServer` layer.
pub struct ArcGisFetcher {
    client: reqwest::Client,
    config: ArcGisConfig,
}

impl ArcGisFetcher {
    /// Creates a fetcher for the configured layer.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: ArcGisConfig) -> Self {
        Self { client, config }
    }

    fn query_url(&self) -> String {
        format!("{}/query", self.config.layer_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PageFetcher for ArcGisFetcher {
    fn label(&self) -> &str {
        &self.config.label
    }

    async fn fetch_page(&self, offset: u64, page_size: u64) -> Result<Page, SourceError> {
        let offset = offset.to_string();
        let page_size = page_size.to_string();
        let return_geometry = if self.config.return_geometry {
            "true"
        } else {
            "false"
        };

        let body = http::send_json(self.client.get(self.query_url()).query(&[
            ("where", self.config.where_clause.as_str()),
            ("outFields", self.config.out_fields.as_str()),
            ("returnGeometry", return_geometry),
            ("resultOffset", offset.as_str()),
            ("resultRecordCount", page_size.as_str()),
            ("f", "geojson"),
        ]))
        .await?;

        parse_feature_page(&self.config.label, &body)
    }

    /// Queries the layer with `returnCountOnly=true`.
    ///
    /// `ArcGIS` sometimes answers HTTP 200 with `{"error": {...}}` for count
    /// requests; that is reported as an unavailable count rather than a
    /// failure, since the count is only used as a sanity check.
    async fn total_count(&self) -> Result<Option<u64>, SourceError> {
        let body = http::send_json(self.client.get(self.query_url()).query(&[
            ("where", self.config.where_clause.as_str()),
            ("returnCountOnly", "true"),
            ("f", "json"),
        ]))
        .await?;

        Ok(parse_count(&self.config.label, &body))
    }
}

/// Parses one `GeoJSON` `FeatureCollection` page.
///
/// # Errors
///
/// Returns [`SourceError::Remote`] if the body carries an `ArcGIS` error
/// envelope, or [`SourceError::Contract`] if `features` is missing or not
/// an array.
pub fn parse_feature_page(label: &str, body: &serde_json::Value) -> Result<Page, SourceError> {
    check_error_envelope(label, body)?;

    let features = body
        .get("features")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            SourceError::contract(label, "Unexpected response structure: no features array", body)
        })?;

    let records = features
        .iter()
        .map(|feature| feature_to_record(label, feature))
        .collect::<Result<Vec<_>, _>>()?;

    // `f=geojson` puts the flag under `properties`; `f=json` at the top level.
    let has_more = body
        .get("exceededTransferLimit")
        .or_else(|| body.pointer("/properties/exceededTransferLimit"))
        .and_then(serde_json::Value::as_bool);

    Ok(Page {
        records,
        has_more,
        total: None,
    })
}

/// Parses a `returnCountOnly` response. Returns `None` for an error
/// envelope or a missing `count`.
#[must_use]
pub fn parse_count(label: &str, body: &serde_json::Value) -> Option<u64> {
    if let Some(error) = body.get("error") {
        log::warn!("{label}: count API error: {error}");
        return None;
    }
    let count = body.get("count").and_then(serde_json::Value::as_u64);
    if count.is_none() {
        log::warn!("{label}: no 'count' in count response");
    }
    count
}

/// Rejects `{"error": {"code": 400, "message": "..."}}` bodies.
fn check_error_envelope(label: &str, body: &serde_json::Value) -> Result<(), SourceError> {
    let Some(error) = body.get("error") else {
        return Ok(());
    };
    let code = error
        .get("code")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(0);
    let message = error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    log::warn!("{label}: ArcGIS error {code}: {message}. Full error: {error}");
    Err(SourceError::Remote {
        label: label.to_string(),
        code,
        message,
    })
}

fn feature_to_record(label: &str, feature: &serde_json::Value) -> Result<Record, SourceError> {
    let fields = match feature.get("properties") {
        Some(serde_json::Value::Object(props)) => props.clone(),
        Some(serde_json::Value::Null) | None => serde_json::Map::new(),
        Some(_) => {
            return Err(SourceError::contract(
                label,
                "Feature properties is not an object",
                feature,
            ));
        }
    };

    let geometry = match feature.get("geometry") {
        Some(serde_json::Value::Null) | None => None,
        Some(geom) => Some(serde_json::from_value::<geojson::Geometry>(geom.clone())?),
    };

    Ok(Record { fields, geometry })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feature_collection() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"fid": 1, "suburb": "MARSDEN PARK"},
                    "geometry": {"type": "Point", "coordinates": [150.83, -33.70]}
                },
                {
                    "type": "Feature",
                    "properties": {"fid": 2, "suburb": "RIVERSTONE"},
                    "geometry": null
                }
            ],
            "properties": {"exceededTransferLimit": true}
        });

        let page = parse_feature_page("bus stops", &body).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.has_more, Some(true));
        assert_eq!(
            page.records[0].get("suburb"),
            Some(&serde_json::json!("MARSDEN PARK"))
        );
        assert!(page.records[0].geometry.is_some());
        assert!(page.records[1].geometry.is_none());
    }

    #[test]
    fn missing_features_is_a_contract_violation() {
        let body = serde_json::json!({"type": "FeatureCollection", "foo": 1});
        let err = parse_feature_page("paths", &body).unwrap_err();
        match err {
            SourceError::Contract { keys, .. } => {
                assert_eq!(keys, vec!["foo".to_string(), "type".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn error_envelope_is_not_an_empty_page() {
        let body = serde_json::json!({
            "error": {"code": 400, "message": "Invalid query", "details": []}
        });
        let err = parse_feature_page("paths", &body).unwrap_err();
        assert!(matches!(err, SourceError::Remote { code: 400, .. }));
    }

    #[test]
    fn count_error_envelope_is_unavailable() {
        let body = serde_json::json!({"error": {"code": 500, "message": "boom"}});
        assert_eq!(parse_count("paths", &body), None);
        assert_eq!(parse_count("paths", &serde_json::json!({"count": 42})), Some(42));
    }
}
