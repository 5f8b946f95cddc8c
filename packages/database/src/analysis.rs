//! Spatial derivations that run inside `PostGIS`.
//!
//! Distances and areas are computed in GDA2020 / MGA zone 56
//! (EPSG:7856), so buffers are in metres and lengths convert directly to
//! kilometres. Raw layers stay in EPSG:4326.

use moosicbox_json_utils::database::ToValue as _;
use planning_etl_database_models::{CoverageKpi, FeatureRow};
use switchy_database::{Database, DatabaseValue};

use crate::layers::ensure_spatial_index;
use crate::{DbError, quote_literal, table_ident};

/// Projected CRS for length and area math.
pub const PROJECTED_SRID: u32 = 7856;

/// Cadastre table for the multi-zone review.
pub const ZONE_REVIEW_CADASTRE: &str = "zone_review.state_cadastre";

/// Zoning table for the multi-zone review.
pub const ZONE_REVIEW_ZONES: &str = "zone_review.state_zone";

/// Suburb boundaries used by the database clip.
pub const CLIP_SUBURBS: &str = "clip_cadastre.blacktown_suburbs";

/// Cadastre used by the database clip.
pub const CLIP_CADASTRE: &str = "clip_cadastre.cadastre";

/// Table names produced by the bus stop coverage derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageTables {
    /// Raw bus stops (EPSG:4326).
    pub raw_stops: String,
    /// Raw paths (EPSG:4326).
    pub raw_paths: String,
    /// Projected bus stops.
    pub stops: String,
    /// Projected paths.
    pub paths: String,
    /// Per-stop buffers.
    pub buffers: String,
    /// Dissolved coverage.
    pub coverage: String,
    /// Path portions inside the coverage.
    pub served: String,
}

impl CoverageTables {
    /// Table names in `schema` for a buffer of `radius_m` metres.
    #[must_use]
    pub fn new(schema: &str, radius_m: u32) -> Self {
        Self {
            raw_stops: format!("{schema}.raw_busstops"),
            raw_paths: format!("{schema}.raw_paths"),
            stops: format!("{schema}.busstops_{PROJECTED_SRID}"),
            paths: format!("{schema}.paths_{PROJECTED_SRID}"),
            buffers: format!("{schema}.busstops_buffer_{radius_m}"),
            coverage: format!("{schema}.busstops_{radius_m}_cov"),
            served: format!("{schema}.paths_served_{radius_m}m"),
        }
    }

    /// Statements creating the projected copies of the raw layers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if a table name is invalid.
    pub fn projection_statements(&self) -> Result<Vec<String>, DbError> {
        let raw_stops = table_ident(&self.raw_stops)?;
        let raw_paths = table_ident(&self.raw_paths)?;
        let stops = table_ident(&self.stops)?;
        let paths = table_ident(&self.paths)?;

        Ok(vec![
            format!("DROP TABLE IF EXISTS {stops}"),
            format!("CREATE TABLE {stops} AS SELECT * FROM {raw_stops}"),
            format!(
                "ALTER TABLE {stops} ALTER COLUMN geom TYPE geometry(Point, {PROJECTED_SRID}) \
                 USING ST_Transform(geom, {PROJECTED_SRID})"
            ),
            format!("DROP TABLE IF EXISTS {paths}"),
            format!("CREATE TABLE {paths} AS SELECT * FROM {raw_paths}"),
            format!(
                "ALTER TABLE {paths} ALTER COLUMN geom TYPE geometry(MultiLineString, {PROJECTED_SRID}) \
                 USING ST_Multi(ST_Transform(geom, {PROJECTED_SRID}))"
            ),
        ])
    }

    /// Statements creating the buffers, the dissolved coverage and the
    /// served paths.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if a table name is invalid.
    pub fn coverage_statements(&self, radius_m: u32) -> Result<Vec<String>, DbError> {
        let stops = table_ident(&self.stops)?;
        let paths = table_ident(&self.paths)?;
        let buffers = table_ident(&self.buffers)?;
        let coverage = table_ident(&self.coverage)?;
        let served = table_ident(&self.served)?;

        Ok(vec![
            format!("DROP TABLE IF EXISTS {buffers}"),
            format!(
                "CREATE TABLE {buffers} AS \
                 SELECT fid, suburb, ST_Buffer(geom, {radius_m}) AS geom FROM {stops}"
            ),
            format!("DROP TABLE IF EXISTS {coverage}"),
            format!(
                "CREATE TABLE {coverage} AS \
                 SELECT ST_UnaryUnion(ST_Collect(geom)) AS geom FROM {buffers}"
            ),
            format!("DROP TABLE IF EXISTS {served}"),
            format!(
                "CREATE TABLE {served} AS \
                 SELECT p.fid, ST_Multi(ST_CollectionExtract(ST_Intersection(p.geom, c.geom), 2)) AS geom \
                 FROM {paths} AS p \
                 JOIN {coverage} AS c ON ST_Intersects(p.geom, c.geom) \
                 WHERE NOT ST_IsEmpty(ST_Intersection(p.geom, c.geom))"
            ),
        ])
    }
}

async fn run_statements(db: &dyn Database, statements: &[String]) -> Result<(), DbError> {
    for sql in statements {
        log::debug!("{sql}");
        db.exec_raw(sql).await?;
    }
    Ok(())
}

/// Builds the projected copies, buffers, dissolved coverage and served
/// paths, each with a `GiST` index.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails.
pub async fn derive_stop_coverage(
    db: &dyn Database,
    tables: &CoverageTables,
    radius_m: u32,
) -> Result<(), DbError> {
    log::info!("Projecting bus stops and paths to EPSG:{PROJECTED_SRID}");
    run_statements(db, &tables.projection_statements()?).await?;
    ensure_spatial_index(db, &tables.stops).await?;
    ensure_spatial_index(db, &tables.paths).await?;

    log::info!("Buffering bus stops by {radius_m} m and clipping paths");
    run_statements(db, &tables.coverage_statements(radius_m)?).await?;
    ensure_spatial_index(db, &tables.buffers).await?;
    ensure_spatial_index(db, &tables.coverage).await?;
    ensure_spatial_index(db, &tables.served).await?;

    Ok(())
}

async fn length_km(db: &dyn Database, table: &str) -> Result<Option<f64>, DbError> {
    let table = table_ident(table)?;
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT ROUND((SUM(ST_Length(geom)) / 1000.0)::numeric, 3)::double precision AS km \
                 FROM {table}"
            ),
            &[],
        )
        .await?;

    Ok(rows
        .first()
        .and_then(|row| row.to_value::<Option<f64>>("km").ok())
        .flatten())
}

/// Served and total path length and the served percentage.
///
/// # Errors
///
/// Returns [`DbError`] if either length query fails.
pub async fn coverage_kpi(db: &dyn Database, tables: &CoverageTables) -> Result<CoverageKpi, DbError> {
    let served_km = length_km(db, &tables.served).await?;
    let total_km = length_km(db, &tables.paths).await?;
    Ok(CoverageKpi::from_lengths(served_km, total_km))
}

/// Reads the rows of `select` as [`FeatureRow`]s: every column except
/// `geom` becomes a property, `geom` is decoded from `ST_AsGeoJSON`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be decoded.
pub async fn fetch_features(db: &dyn Database, select: &str) -> Result<Vec<FeatureRow>, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT (to_jsonb(f) - 'geom')::text AS properties, \
                 ST_AsGeoJSON(f.geom) AS geometry \
                 FROM ({select}) AS f"
            ),
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| {
            let properties: String = row.to_value("properties").map_err(|e| DbError::Conversion {
                message: format!("Failed to read feature properties: {e}"),
            })?;
            let geometry: Option<String> =
                row.to_value("geometry").map_err(|e| DbError::Conversion {
                    message: format!("Failed to read feature geometry: {e}"),
                })?;
            decode_feature(&properties, geometry.as_deref())
        })
        .collect()
}

/// SRID of the first non-null geometry in `table`. `None` for an empty
/// table or SRID 0.
///
/// # Errors
///
/// Returns [`DbError`] if the table name is invalid, the query fails or
/// the SRID cannot be read.
pub async fn table_srid(db: &dyn Database, table: &str) -> Result<Option<u32>, DbError> {
    let table = table_ident(table)?;
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT ST_SRID(geom)::bigint AS srid FROM {table} WHERE geom IS NOT NULL LIMIT 1"
            ),
            &[],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let srid: i64 = row.to_value("srid").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse SRID of {table}: {e}"),
    })?;
    Ok(u32::try_from(srid).ok().filter(|srid| *srid != 0))
}

/// Fails when both SRIDs are known and differ. A table without an SRID
/// (empty, or SRID 0) is not compared.
///
/// # Errors
///
/// Returns [`DbError::CrsMismatch`] naming both tables.
pub fn ensure_same_srid(
    left_table: &str,
    left: Option<u32>,
    right_table: &str,
    right: Option<u32>,
) -> Result<(), DbError> {
    match (left, right) {
        (Some(left), Some(right)) if left != right => Err(DbError::CrsMismatch {
            left_table: left_table.to_string(),
            left,
            right_table: right_table.to_string(),
            right,
        }),
        _ => Ok(()),
    }
}

/// Reads the SRIDs of both tables and checks them with
/// [`ensure_same_srid`]. Nothing is written.
///
/// # Errors
///
/// Returns [`DbError::CrsMismatch`] if they differ, or [`DbError`] if a
/// lookup fails.
pub async fn check_same_srid(db: &dyn Database, left: &str, right: &str) -> Result<(), DbError> {
    let left_srid = table_srid(db, left).await?;
    let right_srid = table_srid(db, right).await?;
    log::debug!("SRIDs: {left}={left_srid:?}, {right}={right_srid:?}");
    ensure_same_srid(left, left_srid, right, right_srid)
}

fn decode_feature(properties: &str, geometry: Option<&str>) -> Result<FeatureRow, DbError> {
    let properties = match serde_json::from_str(properties) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(other) => {
            return Err(DbError::Conversion {
                message: format!("Feature properties are not an object: {other}"),
            });
        }
        Err(e) => {
            return Err(DbError::Conversion {
                message: format!("Failed to parse feature properties: {e}"),
            });
        }
    };

    let geometry = geometry
        .map(serde_json::from_str::<geojson::Geometry>)
        .transpose()
        .map_err(|e| DbError::Conversion {
            message: format!("Failed to parse feature geometry: {e}"),
        })?;

    Ok(FeatureRow {
        properties,
        geometry,
    })
}

/// `SELECT` for lots covered by more than one zoning class, one row per
/// (lot, zone) slice with `cad_area`, `slice_area` and `coverage` percent.
#[must_use]
pub fn multi_zone_select(cadastre: &str, zones: &str) -> String {
    format!(
        "WITH intersected AS ( \
             SELECT c.cadid, ST_Area(c.geom) AS cad_area, z.\"LAY_CLASS\", z.\"SYM_CODE\", \
                    ST_Intersection(c.geom, z.geom) AS geom \
             FROM {cadastre} AS c \
             JOIN {zones} AS z ON ST_Intersects(c.geom, z.geom) \
         ), \
         multi_zones AS ( \
             SELECT cadid FROM intersected \
             GROUP BY cadid \
             HAVING COUNT(DISTINCT \"LAY_CLASS\") > 1 \
         ), \
         slices AS ( \
             SELECT i.cadid, i.cad_area, i.\"LAY_CLASS\", i.\"SYM_CODE\", \
                    ST_Area(i.geom) AS slice_area, i.geom \
             FROM intersected AS i \
             JOIN multi_zones AS m ON i.cadid = m.cadid \
         ) \
         SELECT cadid, \"LAY_CLASS\", \"SYM_CODE\", cad_area, slice_area, \
                slice_area / NULLIF(cad_area, 0) * 100 AS coverage, geom \
         FROM slices"
    )
}

/// Runs the multi-zone slice review over the `zone_review` tables.
///
/// # Errors
///
/// Returns [`DbError::CrsMismatch`] if the two tables use different SRIDs,
/// or [`DbError`] if indexing or the query fails.
pub async fn multi_zone_slices(db: &dyn Database) -> Result<Vec<FeatureRow>, DbError> {
    let cadastre = table_ident(ZONE_REVIEW_CADASTRE)?;
    let zones = table_ident(ZONE_REVIEW_ZONES)?;
    check_same_srid(db, cadastre, zones).await?;

    ensure_spatial_index(db, cadastre).await?;
    ensure_spatial_index(db, zones).await?;

    let slices = fetch_features(db, &multi_zone_select(cadastre, zones)).await?;
    log::info!("{} slices on lots with more than one zone", slices.len());
    Ok(slices)
}

/// Output table name for a suburb clip (`ROOTY HILL` ->
/// `clip_cadastre.rooty_hill_cadastre`).
#[must_use]
pub fn clip_output_table(suburb: &str) -> String {
    let mut slug = String::with_capacity(suburb.len());
    for c in suburb.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let slug = if slug.starts_with(|c: char| c.is_ascii_digit()) || slug.is_empty() {
        format!("s_{slug}")
    } else {
        slug.to_string()
    };
    format!("clip_cadastre.{slug}_cadastre")
}

/// Clips `clip_cadastre.cadastre` to one suburb of
/// `clip_cadastre.blacktown_suburbs`, stores the result in
/// [`clip_output_table`] and returns it.
///
/// The suburb is matched case-insensitively. The suburb and the SRIDs of
/// both tables are checked before the output table is dropped.
///
/// # Errors
///
/// Returns [`DbError::EmptySelection`] if no suburb matches,
/// [`DbError::CrsMismatch`] if the tables use different SRIDs,
/// [`DbError::EmptyResult`] if no parcel intersects the suburb, or
/// [`DbError`] if any statement fails.
pub async fn clip_cadastre_by_suburb(
    db: &dyn Database,
    suburb: &str,
) -> Result<(String, Vec<FeatureRow>), DbError> {
    let suburbs = table_ident(CLIP_SUBURBS)?;
    let cadastre = table_ident(CLIP_CADASTRE)?;

    let rows = db
        .query_raw_params(
            &format!("SELECT COUNT(*) AS count FROM {suburbs} WHERE UPPER(suburbname) = UPPER($1)"),
            &[DatabaseValue::String(suburb.to_string())],
        )
        .await?;
    let matches: i64 = match rows.first() {
        Some(row) => row.to_value("count").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse suburb count: {e}"),
        })?,
        None => 0,
    };
    if matches == 0 {
        return Err(DbError::EmptySelection {
            table: suburbs.to_string(),
            field: "suburbname".to_string(),
            value: suburb.to_string(),
        });
    }
    check_same_srid(db, suburbs, cadastre).await?;

    let output = clip_output_table(suburb);
    let out = table_ident(&output)?;
    log::info!("Clipping {cadastre} to {suburb} into {out}");

    run_statements(
        db,
        &[
            format!("DROP TABLE IF EXISTS {out}"),
            format!(
                "CREATE TABLE {out} AS \
                 SELECT c.*, s.suburbname AS clip_suburb, \
                        ST_Intersection(c.geom, s.geom) AS clip_geom \
                 FROM {cadastre} AS c \
                 JOIN {suburbs} AS s ON ST_Intersects(c.geom, s.geom) \
                 WHERE UPPER(s.suburbname) = UPPER({}) \
                   AND NOT ST_IsEmpty(ST_Intersection(c.geom, s.geom))",
                quote_literal(suburb)
            ),
            format!("ALTER TABLE {out} DROP COLUMN geom"),
            format!("ALTER TABLE {out} RENAME COLUMN clip_geom TO geom"),
        ],
    )
    .await?;
    ensure_spatial_index(db, out).await?;

    let parcels = fetch_features(db, &format!("SELECT * FROM {out}")).await?;
    if parcels.is_empty() {
        return Err(DbError::EmptyResult {
            message: format!("No cadastre parcels intersect {suburb}; {out} is empty"),
        });
    }
    log::info!("{} parcels in {suburb}", parcels.len());
    Ok((output, parcels))
}
