#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Paginated remote fetchers and the record accumulator.
//!
//! Each remote API (an `ArcGIS` `FeatureServer` layer, a CKAN datastore
//! resource) implements the [`PageFetcher`] trait to retrieve a single page
//! of records. [`accumulate::RecordAccumulator`] drives repeated page
//! requests with an advancing offset until the source is exhausted.

pub mod accumulate;
pub mod arcgis;
pub mod ckan;
pub mod dataset_def;
pub mod http;
pub mod progress;
pub mod registry;

use async_trait::async_trait;
use planning_etl_source_models::Page;

/// Errors that can occur while fetching from a remote source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed (connection error, timeout).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        /// Request URL.
        url: String,
        /// Response status.
        status: reqwest::StatusCode,
        /// Truncated response body.
        body: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The response was missing the expected structure.
    #[error("{label}: {message}. Keys={keys:?}")]
    Contract {
        /// Source label.
        label: String,
        /// Description of what was missing.
        message: String,
        /// Top-level keys that were present.
        keys: Vec<String>,
    },

    /// The server embedded an error payload in an otherwise successful
    /// response.
    #[error("{label}: remote error {code}: {message}")]
    Remote {
        /// Source label.
        label: String,
        /// Remote error code.
        code: i64,
        /// Remote error message.
        message: String,
    },

    /// A page size of zero can never exhaust a source.
    #[error("{label}: page size must be at least 1")]
    InvalidPageSize {
        /// Source label.
        label: String,
    },

    /// Accumulated record count differs from the remote count (strict mode
    /// only).
    #[error("{label}: remote reports {expected} records but {actual} were fetched")]
    CountMismatch {
        /// Source label.
        label: String,
        /// Count reported by the source.
        expected: u64,
        /// Count accumulated.
        actual: u64,
    },

    /// Dataset definition could not be parsed.
    #[error("Dataset definition error: {0}")]
    Definition(#[from] toml::de::Error),

    /// No dataset with the given id is registered.
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

impl SourceError {
    /// Builds a [`SourceError::Contract`] listing the keys of `body`.
    #[must_use]
    pub fn contract(label: &str, message: impl Into<String>, body: &serde_json::Value) -> Self {
        Self::Contract {
            label: label.to_string(),
            message: message.into(),
            keys: body
                .as_object()
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

/// Retrieves one page of records from a remote paginated API.
///
/// The source identifier and filter predicate are fixed when the fetcher
/// is constructed; each call supplies only the window to fetch.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Label used in log messages and errors (e.g. `"bus stops"`).
    fn label(&self) -> &str;

    /// Issues one request for `page_size` records starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on a non-success status, a malformed body, or
    /// an error payload embedded in the response. An error is never
    /// reported as an empty page.
    async fn fetch_page(&self, offset: u64, page_size: u64) -> Result<Page, SourceError>;

    /// Total number of matching records as reported by the source, if it
    /// offers one. Advisory only.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the count request itself fails at the
    /// transport level.
    async fn total_count(&self) -> Result<Option<u64>, SourceError> {
        Ok(None)
    }
}
