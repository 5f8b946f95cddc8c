//! End-to-end local GIS pipelines built from [`crate::ops`].

use std::collections::{BTreeMap, BTreeSet};

use geo::{Area, Geometry};
use serde_json::{Map, Value, json};

use crate::ops::{
    buffer, clip, dissolve, ensure_same_crs, length, overlay_intersection, reproject,
    select_eq_ignore_case, with_area,
};
use crate::{Crs, Feature, GeometryError, Layer};

/// Suburb name attribute on the suburbs layer.
pub const SUBURB_FIELD: &str = "suburbname";

/// Attributes kept on each multi-zone slice, in output order.
pub const SLICE_COLUMNS: [&str; 6] = [
    "cadid",
    "LAY_CLASS",
    "SYM_CODE",
    "cad_area",
    "slice_area",
    "coverage",
];

/// Clips the cadastre to one suburb, matched case-insensitively on
/// [`SUBURB_FIELD`].
///
/// # Errors
///
/// Fails on a CRS mismatch (checked first), when no suburb matches, or
/// when the clip leaves nothing.
pub fn clip_cadastre_by_suburb(
    cadastre: &Layer,
    suburbs: &Layer,
    suburb: &str,
) -> Result<Layer, GeometryError> {
    ensure_same_crs(cadastre, suburbs)?;

    let selected = select_eq_ignore_case(suburbs, SUBURB_FIELD, suburb)?;
    let clipped = clip(cadastre, &selected)?;

    if clipped.is_empty() {
        return Err(GeometryError::EmptyResult {
            message: format!("Clip result is empty for suburb '{suburb}'. Check inputs."),
        });
    }
    Ok(clipped)
}

/// Finds cadastre lots split across more than one zone class and returns
/// one slice per (lot, zone) piece with its share of the lot area.
///
/// Both layers are reprojected to EPSG:7856 first so areas are in square
/// metres.
///
/// # Errors
///
/// Fails if either layer has no CRS or a CRS cannot be reprojected.
pub fn multi_zone_slices(cadastre: &Layer, zones: &Layer) -> Result<Layer, GeometryError> {
    cadastre.require_crs()?;
    zones.require_crs()?;

    let cadastre = with_area(&reproject(cadastre, Crs::MGA2020_56)?, "cad_area");
    let zones = reproject(zones, Crs::MGA2020_56)?;

    let intersected = overlay_intersection(&cadastre, &zones)?;

    let mut classes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for feature in &intersected.features {
        if let (Some(cadid), Some(class)) = (feature.text("cadid"), feature.text("LAY_CLASS")) {
            classes.entry(cadid).or_default().insert(class);
        }
    }

    let slices: Vec<Feature> = intersected
        .features
        .iter()
        .filter(|f| {
            f.text("cadid")
                .and_then(|cadid| classes.get(&cadid))
                .is_some_and(|c| c.len() > 1)
        })
        .map(|f| {
            let slice_area = f.geometry.as_ref().map_or(0.0, Area::unsigned_area);
            let cad_area = f.properties.get("cad_area").and_then(Value::as_f64);

            let mut properties = Map::new();
            for column in &SLICE_COLUMNS[..3] {
                properties.insert(
                    (*column).to_string(),
                    f.properties.get(*column).cloned().unwrap_or(Value::Null),
                );
            }
            properties.insert("cad_area".to_string(), json!(cad_area));
            properties.insert("slice_area".to_string(), json!(slice_area));
            properties.insert(
                "coverage".to_string(),
                json!(cad_area.filter(|a| *a > 0.0).map(|a| slice_area / a * 100.0)),
            );
            Feature::new(properties, f.geometry.clone())
        })
        .collect();

    log::info!(
        "{} slices across {} multi-zone lots",
        slices.len(),
        classes.values().filter(|c| c.len() > 1).count()
    );
    Ok(Layer::new(
        "multi_zone_slices",
        Some(Crs::MGA2020_56),
        slices,
    ))
}

/// Result of [`service_coverage`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCoverage {
    /// Dissolved stop buffers, one feature.
    pub coverage: Layer,
    /// Path pieces inside the coverage.
    pub served: Layer,
    /// Served path length in metres.
    pub served_m: f64,
    /// Total path length in metres.
    pub total_m: f64,
}

impl ServiceCoverage {
    /// Served length in kilometres, three decimals.
    #[must_use]
    pub fn served_km(&self) -> f64 {
        round_km(self.served_m)
    }

    /// Total length in kilometres, three decimals.
    #[must_use]
    pub fn total_km(&self) -> f64 {
        round_km(self.total_m)
    }
}

fn round_km(metres: f64) -> f64 {
    metres.round() / 1000.0
}

/// Buffers every stop by `radius_m`, dissolves the buffers, and measures
/// how much of the path network falls inside. Works in EPSG:7856.
///
/// # Errors
///
/// Fails if either layer has no CRS or a CRS cannot be reprojected.
pub fn service_coverage(
    stops: &Layer,
    paths: &Layer,
    radius_m: f64,
) -> Result<ServiceCoverage, GeometryError> {
    stops.require_crs()?;
    paths.require_crs()?;

    let stops = reproject(stops, Crs::MGA2020_56)?;
    let paths = reproject(paths, Crs::MGA2020_56)?;

    let mut properties = Map::new();
    properties.insert("radius_m".to_string(), json!(radius_m));
    let coverage = Layer::new(
        format!("{}_{radius_m}_cov", stops.name),
        Some(Crs::MGA2020_56),
        vec![Feature::new(
            properties,
            Some(Geometry::MultiPolygon(dissolve(&buffer(&stops, radius_m)))),
        )],
    );

    let served = clip(&paths, &coverage)?;
    let total_of = |layer: &Layer| -> f64 {
        layer
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .map(length)
            .sum()
    };
    let served_m = total_of(&served);
    let total_m = total_of(&paths);

    log::info!(
        "{} of {} path metres within {radius_m} m of a stop",
        served_m.round(),
        total_m.round()
    );
    Ok(ServiceCoverage {
        coverage,
        served,
        served_m,
        total_m,
    })
}
