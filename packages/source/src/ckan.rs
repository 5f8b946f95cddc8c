//! CKAN Datastore API page fetcher.
//!
//! POSTs to a `datastore_search` endpoint with `limit`/`offset` paging and
//! equality `filters`. Used for the Data.NSW traffic count resources.

use std::collections::BTreeMap;

use async_trait::async_trait;
use planning_etl_source_models::{Page, Record};

use crate::{PageFetcher, SourceError, http};

/// Configuration for a CKAN datastore query.
#[derive(Debug, Clone)]
pub struct CkanConfig {
    /// `datastore_search` endpoint
    /// (e.g. `"https://data.nsw.gov.au/data/api/action/datastore_search"`).
    pub api_url: String,
    /// CKAN resource ID for the dataset.
    pub resource_id: String,
    /// Label for log messages (e.g. `"station reference"`).
    pub label: String,
    /// Equality filters (`{"lga": "Blacktown"}`).
    pub filters: BTreeMap<String, String>,
}

/// [`PageFetcher`] for a CKAN datastore resource.
pub struct CkanFetcher {
    client: reqwest::Client,
    config: CkanConfig,
}

impl CkanFetcher {
    /// Creates a fetcher for the configured resource.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: CkanConfig) -> Self {
        Self { client, config }
    }

    /// Returns a copy of this fetcher with one extra equality filter (e.g.
    /// `station_key` for per-station queries).
    #[must_use]
    pub fn with_filter(&self, field: &str, value: &str) -> Self {
        let mut config = self.config.clone();
        config
            .filters
            .insert(field.to_string(), value.to_string());
        config.label = format!("{} [{field}={value}]", self.config.label);
        Self {
            client: self.client.clone(),
            config,
        }
    }
}

#[async_trait]
impl PageFetcher for CkanFetcher {
    fn label(&self) -> &str {
        &self.config.label
    }

    async fn fetch_page(&self, offset: u64, page_size: u64) -> Result<Page, SourceError> {
        let payload = serde_json::json!({
            "resource_id": self.config.resource_id,
            "limit": page_size,
            "offset": offset,
            "filters": self.config.filters,
        });

        let body = http::send_json(self.client.post(&self.config.api_url).json(&payload)).await?;

        parse_datastore_page(&self.config.label, &body)
    }

    /// Requests a single record to read the `total` for the current
    /// filters.
    async fn total_count(&self) -> Result<Option<u64>, SourceError> {
        let page = self.fetch_page(0, 1).await?;
        Ok(page.total)
    }
}

/// Parses one `datastore_search` response.
///
/// # Errors
///
/// Returns [`SourceError::Contract`] if `success` is not `true` or the
/// `result`/`records`/`total` structure is missing.
pub fn parse_datastore_page(label: &str, body: &serde_json::Value) -> Result<Page, SourceError> {
    if body.get("success").and_then(serde_json::Value::as_bool) != Some(true) {
        return Err(SourceError::contract(label, "CKAN returned success=false", body));
    }

    let result = body
        .get("result")
        .filter(|r| r.is_object())
        .ok_or_else(|| SourceError::contract(label, "Unexpected CKAN structure: no result", body))?;

    let records = result
        .get("records")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            SourceError::contract(label, "Unexpected CKAN structure: records is not a list", result)
        })?;

    let total = result
        .get("total")
        .and_then(|t| {
            t.as_u64()
                .or_else(|| t.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .ok_or_else(|| {
            SourceError::contract(label, "Unexpected CKAN structure: no total", result)
        })?;

    Ok(Page {
        records: records.iter().cloned().map(Record::from).collect(),
        has_more: None,
        total: Some(total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_datastore_page() {
        let body = serde_json::json!({
            "success": true,
            "result": {
                "total": 3,
                "records": [
                    {"station_key": 57299, "lga": "Blacktown"},
                    {"station_key": 57300, "lga": "Blacktown"}
                ]
            }
        });
        let page = parse_datastore_page("stations", &body).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total, Some(3));
        assert_eq!(page.has_more, None);
    }

    #[test]
    fn success_false_is_an_error() {
        let body = serde_json::json!({"success": false, "error": {"message": "Not found"}});
        let err = parse_datastore_page("stations", &body).unwrap_err();
        match err {
            SourceError::Contract { keys, .. } => {
                assert_eq!(keys, vec!["error".to_string(), "success".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_total_is_an_error() {
        let body = serde_json::json!({"success": true, "result": {"records": []}});
        assert!(matches!(
            parse_datastore_page("stations", &body),
            Err(SourceError::Contract { .. })
        ));
    }

    #[test]
    fn missing_success_is_an_error() {
        let body = serde_json::json!({"result": {"records": [], "total": 0}});
        assert!(parse_datastore_page("stations", &body).is_err());
    }

    #[test]
    fn with_filter_adds_equality_filter() {
        let fetcher = CkanFetcher::new(
            reqwest::Client::new(),
            CkanConfig {
                api_url: "http://localhost/datastore_search".to_string(),
                resource_id: "abc".to_string(),
                label: "yearly summary".to_string(),
                filters: BTreeMap::new(),
            },
        );
        let scoped = fetcher.with_filter("station_key", "57299");
        assert_eq!(scoped.label(), "yearly summary [station_key=57299]");
        assert_eq!(
            scoped.config.filters.get("station_key").map(String::as_str),
            Some("57299")
        );
    }
}
