//! Traffic count loads: the station reference list and per-station yearly
//! summaries.

use std::sync::Arc;
use std::time::Duration;

use planning_etl_database::tables::station_keys;
use planning_etl_database::upsert::Upserter;
use planning_etl_database_models::{StationReference, YearlySummary};
use planning_etl_source::PageFetcher;
use planning_etl_source::progress::{ProgressCallback, null_progress};
use planning_etl_source::registry::find_dataset;
use switchy_database::Database;

use crate::{EtlConfig, EtlError, LoadReport, fetch_and_upsert, try_table_count};

/// Dataset id of the station list.
pub const STATION_REFERENCE: &str = "traffic_station_reference";

/// Dataset id of the yearly summaries.
pub const YEARLY_SUMMARY: &str = "traffic_yearly_summary";

/// Totals over every station of a yearly summary run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StationTotals {
    /// Stations processed.
    pub stations: usize,
    /// Records fetched across all stations.
    pub fetched: u64,
    /// Rows upserted across all stations.
    pub upserted: u64,
}

/// Loads every station of the configured LGA into the station reference
/// table.
///
/// # Errors
///
/// Returns [`EtlError`] if the fetch, a record conversion or the upsert
/// fails.
pub async fn station_reference(
    db: &dyn Database,
    config: &EtlConfig,
    client: &reqwest::Client,
    progress: Arc<dyn ProgressCallback>,
) -> Result<LoadReport, EtlError> {
    let dataset = find_dataset(STATION_REFERENCE)?;
    let table = dataset.target.to_string();
    let upserter = Upserter::new(&table).serialize_writers(config.serialize_writers);

    let before = try_table_count(db, &table).await;
    log::info!("{}: {} rows before load", table, before.unwrap_or(0));

    let fetcher = dataset.fetcher(client);
    let report = fetch_and_upsert::<StationReference>(
        db,
        fetcher.as_ref(),
        config.page_size_for(&dataset),
        &upserter,
        config.strict_count,
        progress,
    )
    .await?;

    let after = try_table_count(db, &table).await;
    log::info!(
        "{}: fetched={} | upserted={} | rows {} -> {}",
        table,
        report.fetched,
        report.upserted,
        before.unwrap_or(0),
        after.unwrap_or(0)
    );
    if let Some(last) = station_keys(db, &table).await?.last() {
        log::info!("{table}: last station_key={last}");
    }

    Ok(report)
}

/// Loads the yearly summaries of every known station (or only `station`)
/// one station at a time, pausing `delay` between stations.
///
/// Station keys come from the station reference table, so
/// [`station_reference`] must have run first.
///
/// # Errors
///
/// Returns [`EtlError`] on the first station that fails.
pub async fn yearly_summary(
    db: &dyn Database,
    config: &EtlConfig,
    client: &reqwest::Client,
    station: Option<&str>,
    delay: Duration,
    progress: Arc<dyn ProgressCallback>,
) -> Result<StationTotals, EtlError> {
    let stations = find_dataset(STATION_REFERENCE)?;
    let dataset = find_dataset(YEARLY_SUMMARY)?;
    let base = dataset
        .ckan_fetcher(client)
        .ok_or_else(|| EtlError::WrongFetcher {
            id: dataset.id.clone(),
            expected: "ckan",
        })?;

    let keys = match station {
        Some(key) => vec![key.to_string()],
        None => station_keys(db, &stations.target.to_string()).await?,
    };

    let upserter =
        Upserter::new(dataset.target.to_string()).serialize_writers(config.serialize_writers);

    load_stations(
        db,
        &keys,
        |key| base.with_filter("station_key", key),
        config.page_size_for(&dataset),
        &upserter,
        config.strict_count,
        delay,
        progress,
    )
    .await
}

/// Runs fetch → upsert for each station key in order.
///
/// `progress` advances once per station.
///
/// # Errors
///
/// Returns [`EtlError`] on the first station that fails. Stations before
/// it stay committed.
#[allow(clippy::too_many_arguments)]
pub async fn load_stations<F, P>(
    db: &dyn Database,
    keys: &[String],
    fetcher_for: F,
    page_size: u64,
    upserter: &Upserter,
    strict_count: bool,
    delay: Duration,
    progress: Arc<dyn ProgressCallback>,
) -> Result<StationTotals, EtlError>
where
    F: Fn(&str) -> P,
    P: PageFetcher,
{
    let mut totals = StationTotals::default();
    if keys.is_empty() {
        log::warn!("No station keys found; load the station reference first");
        progress.finish("no stations");
        return Ok(totals);
    }

    progress.expect(keys.len() as u64);
    let n = keys.len();

    for (i, key) in keys.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fetcher = fetcher_for(key);
        let report = fetch_and_upsert::<YearlySummary>(
            db,
            &fetcher,
            page_size,
            upserter,
            strict_count,
            null_progress(),
        )
        .await?;

        log::info!(
            "[{}/{n}] station_key={key} | fetched={} | upserted={}",
            i + 1,
            report.fetched,
            report.upserted
        );

        totals.stations += 1;
        totals.fetched += report.fetched;
        totals.upserted += report.upserted;
        progress.step(&format!("station {key}"));
    }

    progress.finish(&format!(
        "{} stations, {} rows",
        totals.stations, totals.upserted
    ));
    log::info!(
        "Yearly summary complete: stations={} | fetched={} | upserted={}",
        totals.stations,
        totals.fetched,
        totals.upserted
    );
    Ok(totals)
}
