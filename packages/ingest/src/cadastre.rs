//! Cadastre clip and multi-zone slice review, over local files or over
//! the `PostGIS` tables.

use std::path::{Path, PathBuf};

use planning_etl_database::analysis::{self, ZONE_REVIEW_CADASTRE, table_srid};
use planning_etl_database_models::FeatureRow;
use planning_etl_geometry::io::{OutputFormat, output_path, read_layer, write_layer};
use planning_etl_geometry::pipelines;
use planning_etl_geometry::{Crs, Feature, GeometryError, Layer};
use switchy_database::Database;

use crate::EtlError;

/// Clips the cadastre file to one suburb of the suburbs file and writes
/// the lots to `{out_dir}/{name}.{ext}`.
///
/// # Errors
///
/// Returns [`EtlError::Geometry`] for an unsupported extension (checked
/// before any input is read), a CRS mismatch, an unknown suburb, an empty
/// clip, or a failed read or write.
pub fn clip_cadastre_files(
    cadastre: &Path,
    suburbs: &Path,
    suburb: &str,
    out_dir: &Path,
    name: &str,
    ext: &str,
) -> Result<PathBuf, EtlError> {
    let (out, format) = output_path(out_dir, name, ext)?;

    let cadastre = read_layer(cadastre, "cadastre")?;
    let suburbs = read_layer(suburbs, "suburbs")?;

    let clipped = pipelines::clip_cadastre_by_suburb(&cadastre, &suburbs, suburb)?;
    write_layer(&clipped, &out, format)?;
    Ok(out)
}

/// Writes one slice per (lot, zone) piece for every lot of the cadastre
/// file that spans more than one zone class.
///
/// # Errors
///
/// Returns [`EtlError::Geometry`] for an unsupported extension, a layer
/// without a CRS, or a failed read or write.
pub fn zone_slices_files(
    cadastre: &Path,
    zones: &Path,
    out_dir: &Path,
    name: &str,
    ext: &str,
) -> Result<PathBuf, EtlError> {
    let (out, format) = output_path(out_dir, name, ext)?;

    let cadastre = read_layer(cadastre, "cadastre")?;
    let zones = read_layer(zones, "zoning")?;

    let slices = pipelines::multi_zone_slices(&cadastre, &zones)?;
    write_layer(&slices, &out, format)?;
    Ok(out)
}

/// Clips the database cadastre to `suburb`. The result is stored in its
/// own table and, when `out` is given, also written to that file.
///
/// Returns the output table name.
///
/// # Errors
///
/// Returns [`EtlError`] if the suburb does not exist, the two tables use
/// different SRIDs, no parcel intersects the suburb, a statement fails, or
/// the export fails.
pub async fn clip_cadastre_db(
    db: &dyn Database,
    suburb: &str,
    out: Option<&Path>,
) -> Result<String, EtlError> {
    let format = out.map(format_of).transpose()?;

    let (table, rows) = analysis::clip_cadastre_by_suburb(db, suburb).await?;

    if let (Some(path), Some(format)) = (out, format) {
        let crs = table_srid(db, &table).await?.map(Crs::epsg);
        let layer = rows_to_layer(&table, crs, rows)?;
        write_layer(&layer, path, format)?;
    }
    Ok(table)
}

/// Runs the multi-zone slice review over the database tables and writes
/// the slices to `out`, labelled with the cadastre table's SRID (no CRS
/// when it has none). Returns the number of slices.
///
/// # Errors
///
/// Returns [`EtlError`] if the two tables use different SRIDs, a statement
/// fails, or the export fails.
pub async fn zone_slices_db(db: &dyn Database, out: &Path) -> Result<usize, EtlError> {
    let format = format_of(out)?;

    let rows = analysis::multi_zone_slices(db).await?;
    let crs = table_srid(db, ZONE_REVIEW_CADASTRE).await?.map(Crs::epsg);
    if crs.is_none() {
        log::warn!("{ZONE_REVIEW_CADASTRE} has no SRID; exporting without a CRS");
    }

    let layer = rows_to_layer("multi_zone_slices", crs, rows)?;
    write_layer(&layer, out, format)?;
    Ok(layer.len())
}

fn format_of(path: &Path) -> Result<OutputFormat, EtlError> {
    let ext = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or_default();
    Ok(OutputFormat::from_extension(ext)?)
}

/// Converts rows read back from `PostGIS` into a layer.
///
/// # Errors
///
/// Returns [`GeometryError::GeoJson`] if a row's geometry cannot be
/// converted.
pub fn rows_to_layer(
    name: &str,
    crs: Option<Crs>,
    rows: Vec<FeatureRow>,
) -> Result<Layer, GeometryError> {
    let features = rows
        .into_iter()
        .map(|row| Feature::from_geojson(row.properties, row.geometry))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Layer::new(name, crs, features))
}

#[cfg(test)]
mod tests {
    use planning_etl_geometry::io::parse_layer;

    use super::*;

    const SUBURBS: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::7856" } },
        "features": [
            { "type": "Feature", "properties": { "suburbname": "ROOTY HILL" },
              "geometry": { "type": "Polygon", "coordinates":
                [[[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0], [0.0, 0.0]]] } }
        ]
    }"#;

    const CADASTRE: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::7856" } },
        "features": [
            { "type": "Feature", "properties": { "cadid": 1 },
              "geometry": { "type": "Polygon", "coordinates":
                [[[10.0, 10.0], [30.0, 10.0], [30.0, 30.0], [10.0, 30.0], [10.0, 10.0]]] } },
            { "type": "Feature", "properties": { "cadid": 2 },
              "geometry": { "type": "Polygon", "coordinates":
                [[[500.0, 10.0], [520.0, 10.0], [520.0, 30.0], [500.0, 30.0], [500.0, 10.0]]] } }
        ]
    }"#;

    const ZONES: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::7856" } },
        "features": [
            { "type": "Feature", "properties": { "LAY_CLASS": "R2", "SYM_CODE": "R2" },
              "geometry": { "type": "Polygon", "coordinates":
                [[[0.0, 0.0], [20.0, 0.0], [20.0, 100.0], [0.0, 100.0], [0.0, 0.0]]] } },
            { "type": "Feature", "properties": { "LAY_CLASS": "B4", "SYM_CODE": "B4" },
              "geometry": { "type": "Polygon", "coordinates":
                [[[20.0, 0.0], [100.0, 0.0], [100.0, 100.0], [20.0, 100.0], [20.0, 0.0]]] } }
        ]
    }"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn clips_file_cadastre_to_suburb() {
        let dir = tempfile::tempdir().unwrap();
        let cadastre = write(dir.path(), "cadastre.geojson", CADASTRE);
        let suburbs = write(dir.path(), "suburbs.geojson", SUBURBS);

        let out = clip_cadastre_files(
            &cadastre,
            &suburbs,
            "Rooty Hill",
            &dir.path().join("out"),
            "Rooty_Hill_cadastre",
            "geojson",
        )
        .unwrap();

        let clipped = read_layer(&out, "clipped").unwrap();
        assert_eq!(clipped.crs, Some(Crs::MGA2020_56));
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped.features[0].text("cadid").as_deref(), Some("1"));
    }

    #[test]
    fn unsupported_extension_is_rejected_first() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.geojson");

        let err = clip_cadastre_files(&missing, &missing, "X", dir.path(), "out", "kml")
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Unsupported extension 'kml'. Use one of: geojson, json, geojsonl, gpkg"
        );
    }

    #[test]
    fn writes_zone_slices_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let cadastre = write(dir.path(), "cadastre.geojson", CADASTRE);
        let zones = write(dir.path(), "zones.geojson", ZONES);

        let out = zone_slices_files(&cadastre, &zones, dir.path(), "slices", "geojsonl").unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn database_rows_become_a_layer() {
        let source = parse_layer(CADASTRE, "cadastre").unwrap();
        let rows: Vec<FeatureRow> = serde_json::from_str::<geojson::FeatureCollection>(CADASTRE)
            .unwrap()
            .features
            .into_iter()
            .map(|f| FeatureRow {
                properties: f.properties.unwrap_or_default(),
                geometry: f.geometry,
            })
            .collect();

        let layer = rows_to_layer("cadastre", Some(Crs::MGA2020_56), rows).unwrap();

        assert_eq!(layer, source);
    }

    #[test]
    fn rows_without_srid_export_without_crs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi_zone_slices.geojson");
        let rows = vec![FeatureRow {
            properties: serde_json::Map::new(),
            geometry: None,
        }];

        let layer = rows_to_layer("multi_zone_slices", None, rows).unwrap();
        write_layer(&layer, &path, format_of(&path).unwrap()).unwrap();

        let back = read_layer(&path, "back").unwrap();
        assert_eq!(back.crs, None);
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn export_path_needs_known_extension() {
        assert_eq!(
            format_of(Path::new("out/slices.GEOJSONL")).unwrap(),
            OutputFormat::Geojsonl
        );
        assert_eq!(
            format_of(Path::new("output/rooty_hill_cadastre.gpkg")).unwrap(),
            OutputFormat::Gpkg
        );
        assert!(format_of(Path::new("out/slices")).is_err());
    }
}
