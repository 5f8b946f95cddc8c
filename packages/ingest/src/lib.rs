#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! End-to-end planning data pipelines.
//!
//! Remote datasets flow through fetch → accumulate → upsert ([`traffic`])
//! or fetch → accumulate → replace → derive ([`coverage`]); local layers
//! flow through load → transform → write ([`cadastre`], and the file
//! variant in [`coverage`]). Each stage finishes before the next starts and
//! the first error ends the run.

pub mod cadastre;
pub mod config;
pub mod coverage;
pub mod report;
pub mod traffic;

use std::sync::Arc;

use planning_etl_database::DbError;
use planning_etl_database::tables::{convert_all, table_count};
use planning_etl_database::upsert::{UpsertRow, Upserter};
use planning_etl_database_models::FieldError;
use planning_etl_geometry::GeometryError;
use planning_etl_source::accumulate::RecordAccumulator;
use planning_etl_source::progress::ProgressCallback;
use planning_etl_source::{PageFetcher, SourceError};
use planning_etl_source_models::{CountCheck, Record};
use switchy_database::Database;

pub use config::EtlConfig;

/// Errors that can end a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Fetching from a remote source failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A database statement or conversion failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Loading, transforming or writing a layer failed.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// A remote count disagrees with the stored row count (strict mode
    /// only).
    #[error("{name}: API = {expected} | DB = {actual}")]
    CountMismatch {
        /// Layer or dataset name.
        name: String,
        /// Count reported by the API.
        expected: u64,
        /// Rows stored.
        actual: u64,
    },

    /// A dataset is configured with the wrong kind of fetcher.
    #[error("Dataset {id} must use a {expected} fetcher")]
    WrongFetcher {
        /// Dataset id.
        id: String,
        /// Required fetcher kind.
        expected: &'static str,
    },
}

/// Outcome of one fetch → accumulate → upsert run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Source label.
    pub label: String,
    /// Records fetched.
    pub fetched: u64,
    /// Rows written.
    pub upserted: u64,
    /// Fetched count against the total the source reported.
    pub count_check: CountCheck,
}

/// Fetches every page from `fetcher`, converts every record to `R`, and
/// upserts the rows through `upserter`.
///
/// All records are converted before anything is written, so one bad record
/// fails the run without touching the table.
///
/// # Errors
///
/// Returns [`EtlError`] on the first fetch, conversion or write failure,
/// or on a count mismatch when `strict_count` is set.
pub async fn fetch_and_upsert<R>(
    db: &dyn Database,
    fetcher: &dyn PageFetcher,
    page_size: u64,
    upserter: &Upserter,
    strict_count: bool,
    progress: Arc<dyn ProgressCallback>,
) -> Result<LoadReport, EtlError>
where
    R: UpsertRow + Sync + for<'a> TryFrom<&'a Record, Error = FieldError>,
{
    let accumulated = RecordAccumulator::new(fetcher, page_size)
        .with_progress(progress)
        .fetch_all()
        .await?;
    let count_check = accumulated.ensure_count(accumulated.reported_total, strict_count)?;

    let rows = convert_all::<R>(&accumulated.records).map_err(DbError::from)?;
    let upserted = upserter.upsert(db, &rows).await?;

    Ok(LoadReport {
        label: accumulated.label,
        fetched: accumulated.records.len() as u64,
        upserted,
        count_check,
    })
}

/// `COUNT(*)` of `table`, or `None` with a log line when it cannot be
/// counted (e.g. the table does not exist yet).
pub async fn try_table_count(db: &dyn Database, table: &str) -> Option<i64> {
    match table_count(db, table).await {
        Ok(count) => Some(count),
        Err(e) => {
            log::info!("Could not count {table} ({e})");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use planning_etl_source::{PageFetcher, SourceError};
    use planning_etl_source_models::{Page, Record};

    /// Serves slices of a fixed record list and records requested offsets.
    pub struct FakeFetcher {
        pub label: String,
        pub records: Vec<Record>,
        pub total: Option<u64>,
        pub offsets: Mutex<Vec<u64>>,
    }

    impl FakeFetcher {
        pub fn new(label: &str, records: Vec<serde_json::Value>) -> Self {
            Self {
                label: label.to_string(),
                records: records.into_iter().map(Record::from).collect(),
                total: None,
                offsets: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        fn label(&self) -> &str {
            &self.label
        }

        async fn fetch_page(&self, offset: u64, page_size: u64) -> Result<Page, SourceError> {
            self.offsets.lock().unwrap().push(offset);
            let start = usize::try_from(offset).unwrap().min(self.records.len());
            let end = (start + usize::try_from(page_size).unwrap()).min(self.records.len());
            Ok(Page {
                records: self.records[start..end].to_vec(),
                total: self.total,
                ..Page::default()
            })
        }
    }
}
