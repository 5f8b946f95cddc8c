//! Config-driven dataset definitions.
//!
//! [`DatasetDefinition`] captures everything unique about a remote dataset
//! (where to fetch it from and which table it lands in) in a serializable
//! config struct, so every ingestion command runs the same generic
//! fetch → accumulate → write path.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::PageFetcher;
use crate::arcgis::{ArcGisConfig, ArcGisFetcher};
use crate::ckan::{CkanConfig, CkanFetcher};

/// A remote dataset and its destination table.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDefinition {
    /// Unique identifier (e.g. `"blacktown_bus_stops"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// How to fetch records from the remote API.
    pub fetcher: FetcherConfig,
    /// Where the records are persisted.
    pub target: TargetTable,
}

/// How to fetch records from the remote API.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// `ArcGIS` REST API (`resultOffset`/`resultRecordCount`).
    Arcgis {
        /// Layer URL without the trailing `/query`.
        layer_url: String,
        /// SQL `where` predicate.
        #[serde(default = "default_where")]
        where_clause: String,
        /// Comma-separated output fields.
        #[serde(default = "default_out_fields")]
        out_fields: String,
        /// Whether to request feature geometry.
        #[serde(default = "default_true")]
        return_geometry: bool,
        /// Records per page.
        page_size: u64,
    },
    /// CKAN Datastore API (`limit`/`offset`).
    Ckan {
        /// `datastore_search` endpoint.
        api_url: String,
        /// CKAN resource ID.
        resource_id: String,
        /// Equality filters.
        #[serde(default)]
        filters: BTreeMap<String, String>,
        /// Records per page.
        page_size: u64,
    },
}

fn default_where() -> String {
    "1=1".to_string()
}

fn default_out_fields() -> String {
    "*".to_string()
}

const fn default_true() -> bool {
    true
}

/// A schema-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TargetTable {
    /// Database schema (e.g. `"bcc_traffic"`).
    pub schema: String,
    /// Table name (e.g. `"station_reference"`).
    pub table: String,
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl DatasetDefinition {
    /// Returns the dataset identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured page size.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        match &self.fetcher {
            FetcherConfig::Arcgis { page_size, .. } | FetcherConfig::Ckan { page_size, .. } => {
                *page_size
            }
        }
    }

    /// Short fetcher kind for listings.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self.fetcher {
            FetcherConfig::Arcgis { .. } => "arcgis",
            FetcherConfig::Ckan { .. } => "ckan",
        }
    }

    /// Builds the [`PageFetcher`] for this dataset.
    #[must_use]
    pub fn fetcher(&self, client: &reqwest::Client) -> Box<dyn PageFetcher> {
        match &self.fetcher {
            FetcherConfig::Arcgis {
                layer_url,
                where_clause,
                out_fields,
                return_geometry,
                ..
            } => Box::new(ArcGisFetcher::new(
                client.clone(),
                ArcGisConfig {
                    layer_url: layer_url.clone(),
                    label: self.name.clone(),
                    where_clause: where_clause.clone(),
                    out_fields: out_fields.clone(),
                    return_geometry: *return_geometry,
                },
            )),
            FetcherConfig::Ckan {
                api_url,
                resource_id,
                filters,
                ..
            } => Box::new(self.build_ckan(client, api_url, resource_id, filters)),
        }
    }

    /// Builds the concrete CKAN fetcher, for callers that add per-run
    /// filters. Returns `None` for non-CKAN datasets.
    #[must_use]
    pub fn ckan_fetcher(&self, client: &reqwest::Client) -> Option<CkanFetcher> {
        let FetcherConfig::Ckan {
            api_url,
            resource_id,
            filters,
            ..
        } = &self.fetcher
        else {
            return None;
        };
        Some(self.build_ckan(client, api_url, resource_id, filters))
    }

    fn build_ckan(
        &self,
        client: &reqwest::Client,
        api_url: &str,
        resource_id: &str,
        filters: &BTreeMap<String, String>,
    ) -> CkanFetcher {
        CkanFetcher::new(
            client.clone(),
            CkanConfig {
                api_url: api_url.to_string(),
                resource_id: resource_id.to_string(),
                label: self.name.clone(),
                filters: filters.clone(),
            },
        )
    }
}

/// Parses a dataset definition from a TOML string.
///
/// # Errors
///
/// Returns a TOML parse error if the input is malformed.
pub fn parse_dataset_toml(toml_str: &str) -> Result<DatasetDefinition, toml::de::Error> {
    toml::from_str(toml_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arcgis_definition_with_defaults() {
        let def = parse_dataset_toml(
            r#"
            id = "stops"
            name = "Stops"

            [fetcher]
            type = "arcgis"
            layer_url = "https://example.com/FeatureServer/0"
            page_size = 500

            [target]
            schema = "bcc_open"
            table = "raw_busstops"
            "#,
        )
        .unwrap();

        assert_eq!(def.kind(), "arcgis");
        assert_eq!(def.page_size(), 500);
        assert_eq!(def.target.to_string(), "bcc_open.raw_busstops");
        match def.fetcher {
            FetcherConfig::Arcgis {
                where_clause,
                out_fields,
                return_geometry,
                ..
            } => {
                assert_eq!(where_clause, "1=1");
                assert_eq!(out_fields, "*");
                assert!(return_geometry);
            }
            FetcherConfig::Ckan { .. } => panic!("expected arcgis"),
        }
    }

    #[test]
    fn parses_ckan_filters() {
        let def = parse_dataset_toml(
            r#"
            id = "stations"
            name = "Stations"

            [fetcher]
            type = "ckan"
            api_url = "https://example.com/datastore_search"
            resource_id = "abc"
            page_size = 1000

            [fetcher.filters]
            lga = "Blacktown"

            [target]
            schema = "bcc_traffic"
            table = "station_reference"
            "#,
        )
        .unwrap();

        let client = reqwest::Client::new();
        assert!(def.ckan_fetcher(&client).is_some());
        assert_eq!(def.fetcher(&client).label(), "Stations");
    }

    #[test]
    fn rejects_unknown_fetcher_type() {
        let result = parse_dataset_toml(
            r#"
            id = "x"
            name = "X"

            [fetcher]
            type = "socrata"
            page_size = 1

            [target]
            schema = "s"
            table = "t"
            "#,
        );
        assert!(result.is_err());
    }
}
