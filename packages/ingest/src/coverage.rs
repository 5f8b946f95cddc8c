//! Bus stop service coverage.
//!
//! [`bus_coverage`] loads the stop and path layers from `ArcGIS` into
//! `PostGIS` and derives the coverage there. [`service_coverage_files`]
//! runs the same analysis over local `GeoJSON` files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use planning_etl_database::analysis::{CoverageTables, coverage_kpi, derive_stop_coverage};
use planning_etl_database::layers::replace_layer;
use planning_etl_database_models::CoverageKpi;
use planning_etl_geometry::io::{output_path, read_layer, write_layer};
use planning_etl_geometry::pipelines::service_coverage;
use planning_etl_source::accumulate::RecordAccumulator;
use planning_etl_source::dataset_def::DatasetDefinition;
use planning_etl_source::progress::ProgressCallback;
use planning_etl_source::registry::find_dataset;
use switchy_database::Database;

use crate::report::report_stored_count;
use crate::{EtlConfig, EtlError};

/// Dataset id of the bus stop layer.
pub const BUS_STOPS: &str = "blacktown_bus_stops";

/// Dataset id of the path layer.
pub const PATHS: &str = "blacktown_paths";

/// SRID the raw `ArcGIS` layers are stored in.
pub const RAW_SRID: u32 = 4326;

/// Fetches one `ArcGIS` layer in full and replaces its raw table.
///
/// Returns the number of rows stored.
///
/// # Errors
///
/// Returns [`EtlError`] if the fetch, the load or the stored-row count
/// fails, or on a count mismatch when strict counting is on.
pub async fn load_raw_layer(
    db: &dyn Database,
    config: &EtlConfig,
    client: &reqwest::Client,
    dataset: &DatasetDefinition,
    progress: Arc<dyn ProgressCallback>,
) -> Result<u64, EtlError> {
    let table = dataset.target.to_string();
    let fetcher = dataset.fetcher(client);

    let total = match fetcher.total_count().await {
        Ok(total) => total,
        Err(e) => {
            log::warn!("{}: count request failed: {e}", dataset.name);
            None
        }
    };

    let accumulated = RecordAccumulator::new(fetcher.as_ref(), config.page_size_for(dataset))
        .with_progress(progress)
        .fetch_all()
        .await?;

    let inserted = replace_layer(db, &table, &accumulated.records, RAW_SRID).await?;
    report_stored_count(db, &dataset.name, &table, total, config.strict_count).await?;

    Ok(inserted)
}

/// Loads both raw layers and derives the stop buffers, dissolved coverage
/// and served paths for `radius_m`.
///
/// # Errors
///
/// Returns [`EtlError`] on the first failing stage.
pub async fn bus_coverage(
    db: &dyn Database,
    config: &EtlConfig,
    client: &reqwest::Client,
    radius_m: u32,
    progress: impl Fn(&str) -> Arc<dyn ProgressCallback>,
) -> Result<CoverageKpi, EtlError> {
    let stops = find_dataset(BUS_STOPS)?;
    let paths = find_dataset(PATHS)?;

    load_raw_layer(db, config, client, &stops, progress(&stops.name)).await?;
    load_raw_layer(db, config, client, &paths, progress(&paths.name)).await?;

    let tables = CoverageTables::new(&stops.target.schema, radius_m);
    derive_stop_coverage(db, &tables, radius_m).await?;

    let kpi = coverage_kpi(db, &tables).await?;
    log_kpi(&kpi, radius_m);
    Ok(kpi)
}

/// Runs the coverage analysis on local stop and path files and writes the
/// served paths to `{out_dir}/{name}.{ext}`.
///
/// # Errors
///
/// Returns [`EtlError::Geometry`] for an unsupported extension (checked
/// before any input is read), an unreadable input, or a failed write.
pub fn service_coverage_files(
    stops: &Path,
    paths: &Path,
    radius_m: u32,
    out_dir: &Path,
    name: &str,
    ext: &str,
) -> Result<(PathBuf, CoverageKpi), EtlError> {
    let (out, format) = output_path(out_dir, name, ext)?;

    let stops = read_layer(stops, "stops")?;
    let paths = read_layer(paths, "paths")?;

    let result = service_coverage(&stops, &paths, f64::from(radius_m))?;
    write_layer(&result.served, &out, format)?;

    let kpi = CoverageKpi::from_lengths(Some(result.served_km()), Some(result.total_km()));
    log_kpi(&kpi, radius_m);
    Ok((out, kpi))
}

fn log_kpi(kpi: &CoverageKpi, radius_m: u32) {
    let km = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
    log::info!(
        "Paths within {radius_m} m of a stop: {} km of {} km ({})",
        km(kpi.served_km),
        km(kpi.total_km),
        kpi.served_percent
            .map_or_else(|| "n/a".to_string(), |p| format!("{p:.2}%"))
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const STOPS: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:7856" } },
        "features": [
            { "type": "Feature", "properties": { "stop_id": 1 },
              "geometry": { "type": "Point", "coordinates": [300000.0, 6260000.0] } }
        ]
    }"#;

    const PATHS: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:7856" } },
        "features": [
            { "type": "Feature", "properties": { "path_id": "near" },
              "geometry": { "type": "LineString",
                            "coordinates": [[299900.0, 6260000.0], [300100.0, 6260000.0]] } },
            { "type": "Feature", "properties": { "path_id": "far" },
              "geometry": { "type": "LineString",
                            "coordinates": [[305000.0, 6260000.0], [305200.0, 6260000.0]] } }
        ]
    }"#;

    fn inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let stops = dir.join("stops.geojson");
        let paths = dir.join("paths.geojson");
        std::fs::write(&stops, STOPS).unwrap();
        std::fs::write(&paths, PATHS).unwrap();
        (stops, paths)
    }

    #[test]
    fn half_the_network_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let (stops, paths) = inputs(dir.path());

        let (out, kpi) =
            service_coverage_files(&stops, &paths, 400, dir.path(), "served", "geojson").unwrap();

        assert!(out.ends_with("served.geojson"));
        assert_eq!(kpi.served_km, Some(0.2));
        assert_eq!(kpi.total_km, Some(0.4));
        assert_eq!(kpi.served_percent, Some(50.0));

        let served = read_layer(&out, "served").unwrap();
        assert_eq!(served.len(), 1);
        assert_eq!(served.features[0].text("path_id").as_deref(), Some("near"));
    }

    #[test]
    fn bad_extension_fails_before_reading_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.geojson");

        let err = service_coverage_files(&missing, &missing, 400, dir.path(), "served", "shp")
            .unwrap_err();

        assert!(err.to_string().starts_with("Unsupported extension 'shp'"), "{err}");
    }
}
