//! Layer transforms used by the pipelines.
//!
//! Every cross-layer operation checks CRS agreement before it touches a
//! geometry. Polygonal work goes through `geo`'s boolean ops; overlay
//! candidates are found with an `rstar` envelope index.

use std::collections::BTreeSet;

use geo::{
    Area, BooleanOps, BoundingRect, Buffer, Geometry, Intersects, LineString, MapCoords,
    MultiLineString, MultiPoint, MultiPolygon, Polygon,
};
use rstar::{AABB, Envelope as _, RTree, RTreeObject};
use serde_json::{Map, Value};

use crate::crs::Transform;
use crate::{Crs, Feature, GeometryError, Layer};

/// Returns the shared CRS of two layers.
///
/// # Errors
///
/// Returns [`GeometryError::MissingCrs`] if either layer has no CRS, or
/// [`GeometryError::CrsMismatch`] if they differ.
pub fn ensure_same_crs(left: &Layer, right: &Layer) -> Result<Crs, GeometryError> {
    let left_crs = left.require_crs()?;
    let right_crs = right.require_crs()?;

    if left_crs != right_crs {
        return Err(GeometryError::CrsMismatch {
            left_layer: left.name.clone(),
            left: left_crs,
            right_layer: right.name.clone(),
            right: right_crs,
        });
    }
    Ok(left_crs)
}

/// Keeps the features whose `field` equals `value`, ignoring case.
///
/// # Errors
///
/// Returns [`GeometryError::EmptySelection`] naming `value` when nothing
/// matches.
pub fn select_eq_ignore_case(
    layer: &Layer,
    field: &str,
    value: &str,
) -> Result<Layer, GeometryError> {
    let wanted = value.trim().to_uppercase();
    let selected: Vec<Feature> = layer
        .features
        .iter()
        .filter(|f| f.text(field).is_some_and(|v| v.trim().to_uppercase() == wanted))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(GeometryError::EmptySelection {
            layer: layer.name.clone(),
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    log::info!("{value} has been selected ({} features)", selected.len());
    Ok(layer.with_features(selected))
}

/// Reprojects every geometry into `to`. A layer already in `to` is
/// returned unchanged.
///
/// # Errors
///
/// Returns [`GeometryError`] if the layer has no CRS or either CRS is
/// unsupported.
pub fn reproject(layer: &Layer, to: Crs) -> Result<Layer, GeometryError> {
    let from = layer.require_crs()?;
    if from == to {
        return Ok(layer.clone());
    }

    let transform = Transform::new(from, to)?;
    let features = layer
        .features
        .iter()
        .map(|f| {
            Feature::new(
                f.properties.clone(),
                f.geometry
                    .as_ref()
                    .map(|g| g.map_coords(|c| transform.apply(c))),
            )
        })
        .collect();

    log::info!("{} reprojected to {to}", layer.name);
    Ok(Layer::new(layer.name.clone(), Some(to), features))
}

/// Polygonal part of a geometry.
#[must_use]
pub fn polygonal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    let polygons = match geometry {
        Geometry::Polygon(p) => vec![p.clone()],
        Geometry::MultiPolygon(mp) => mp.0.clone(),
        Geometry::Rect(r) => vec![r.to_polygon()],
        Geometry::Triangle(t) => vec![t.to_polygon()],
        Geometry::GeometryCollection(gc) => gc
            .iter()
            .filter_map(polygonal)
            .flat_map(|mp| mp.0)
            .collect(),
        _ => Vec::new(),
    };
    (!polygons.is_empty()).then(|| MultiPolygon(polygons))
}

/// Lineal part of a geometry.
#[must_use]
pub fn lineal(geometry: &Geometry<f64>) -> Option<MultiLineString<f64>> {
    let lines = match geometry {
        Geometry::Line(l) => vec![LineString::from(vec![l.start, l.end])],
        Geometry::LineString(ls) => vec![ls.clone()],
        Geometry::MultiLineString(mls) => mls.0.clone(),
        Geometry::GeometryCollection(gc) => {
            gc.iter().filter_map(lineal).flat_map(|mls| mls.0).collect()
        }
        _ => Vec::new(),
    };
    (!lines.is_empty()).then(|| MultiLineString(lines))
}

fn punctal(geometry: &Geometry<f64>) -> Option<MultiPoint<f64>> {
    match geometry {
        Geometry::Point(p) => Some(MultiPoint(vec![*p])),
        Geometry::MultiPoint(mp) => Some(mp.clone()),
        _ => None,
    }
}

/// Planar length in CRS units.
#[must_use]
pub fn length(geometry: &Geometry<f64>) -> f64 {
    lineal(geometry).map_or(0.0, |mls| {
        mls.iter()
            .flat_map(LineString::lines)
            .map(|l| l.dx().hypot(l.dy()))
            .sum()
    })
}

fn collapse(polygons: MultiPolygon<f64>) -> Geometry<f64> {
    match <[Polygon<f64>; 1]>::try_from(polygons.0) {
        Ok([polygon]) => Geometry::Polygon(polygon),
        Err(polygons) => Geometry::MultiPolygon(MultiPolygon(polygons)),
    }
}

fn clip_geometry(geometry: &Geometry<f64>, mask: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    if let Some(polygons) = polygonal(geometry) {
        let clipped = polygons.intersection(mask);
        return (!clipped.0.is_empty()).then(|| collapse(clipped));
    }
    if let Some(lines) = lineal(geometry) {
        let clipped = mask.clip(&lines, false);
        return (!clipped.0.is_empty()).then_some(Geometry::MultiLineString(clipped));
    }
    if let Some(points) = punctal(geometry) {
        let inside: Vec<_> = points.into_iter().filter(|p| mask.intersects(p)).collect();
        return match inside.len() {
            0 => None,
            1 => Some(Geometry::Point(inside[0])),
            _ => Some(Geometry::MultiPoint(MultiPoint(inside))),
        };
    }
    None
}

/// Clips `layer` to the union of the polygons in `mask`. Attributes are
/// kept; features falling entirely outside are dropped.
///
/// # Errors
///
/// Returns [`GeometryError`] if the two layers do not share a CRS.
pub fn clip(layer: &Layer, mask: &Layer) -> Result<Layer, GeometryError> {
    ensure_same_crs(layer, mask)?;

    let mask_polygons = dissolve(mask);
    let Some(mask_envelope) = envelope(&mask_polygons) else {
        return Ok(layer.with_features(Vec::new()));
    };

    let features: Vec<Feature> = layer
        .features
        .iter()
        .filter_map(|f| {
            let geometry = f.geometry.as_ref()?;
            let rect = geometry.bounding_rect()?;
            if !mask_envelope.intersects(&aabb(rect)) {
                return None;
            }
            clip_geometry(geometry, &mask_polygons)
                .map(|clipped| Feature::new(f.properties.clone(), Some(clipped)))
        })
        .collect();

    log::info!(
        "{} clipped to {}: {} of {} features kept",
        layer.name,
        mask.name,
        features.len(),
        layer.len()
    );
    Ok(layer.with_features(features))
}

struct IndexedPolygons {
    index: usize,
    envelope: AABB<[f64; 2]>,
    polygons: MultiPolygon<f64>,
}

impl RTreeObject for IndexedPolygons {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn aabb(rect: geo::Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

fn envelope(polygons: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    polygons.bounding_rect().map(aabb)
}

fn property_names(layer: &Layer) -> BTreeSet<&str> {
    layer
        .features
        .iter()
        .flat_map(|f| f.properties.keys().map(String::as_str))
        .collect()
}

fn merge_properties(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    shared: &BTreeSet<&str>,
) -> Map<String, Value> {
    let mut merged = Map::new();
    for (side, suffix) in [(left, "_1"), (right, "_2")] {
        for (name, value) in side {
            let name = if shared.contains(name.as_str()) {
                format!("{name}{suffix}")
            } else {
                name.clone()
            };
            merged.insert(name, value.clone());
        }
    }
    merged
}

/// Polygon intersection overlay: one output feature per overlapping
/// pair, carrying the attributes of both sides. Attribute names present on
/// both layers get `_1` (left) and `_2` (right) suffixes.
///
/// # Errors
///
/// Returns [`GeometryError`] if the two layers do not share a CRS.
pub fn overlay_intersection(left: &Layer, right: &Layer) -> Result<Layer, GeometryError> {
    ensure_same_crs(left, right)?;

    let index = RTree::bulk_load(
        right
            .features
            .iter()
            .enumerate()
            .filter_map(|(index, f)| {
                let polygons = polygonal(f.geometry.as_ref()?)?;
                Some(IndexedPolygons {
                    index,
                    envelope: envelope(&polygons)?,
                    polygons,
                })
            })
            .collect(),
    );

    let left_names = property_names(left);
    let shared: BTreeSet<&str> = property_names(right)
        .intersection(&left_names)
        .copied()
        .collect();

    let mut features = Vec::new();
    for feature in &left.features {
        let Some(polygons) = feature.geometry.as_ref().and_then(polygonal) else {
            continue;
        };
        let Some(query) = envelope(&polygons) else {
            continue;
        };

        let mut candidates: Vec<&IndexedPolygons> =
            index.locate_in_envelope_intersecting(&query).collect();
        candidates.sort_by_key(|c| c.index);

        for candidate in candidates {
            let piece = polygons.intersection(&candidate.polygons);
            if piece.0.is_empty() {
                continue;
            }
            features.push(Feature::new(
                merge_properties(
                    &feature.properties,
                    &right.features[candidate.index].properties,
                    &shared,
                ),
                Some(collapse(piece)),
            ));
        }
    }

    log::info!(
        "{} x {} overlay: {} intersections",
        left.name,
        right.name,
        features.len()
    );
    Ok(Layer::new(
        format!("{}_{}", left.name, right.name),
        left.crs,
        features,
    ))
}

/// Buffers every geometry by `distance` CRS units.
#[must_use]
pub fn buffer(layer: &Layer, distance: f64) -> Layer {
    let features = layer
        .features
        .iter()
        .map(|f| {
            Feature::new(
                f.properties.clone(),
                f.geometry
                    .as_ref()
                    .map(|g| Geometry::MultiPolygon(g.buffer(distance))),
            )
        })
        .collect();
    layer.with_features(features)
}

/// Unions every polygon in the layer into one multipolygon.
#[must_use]
pub fn dissolve(layer: &Layer) -> MultiPolygon<f64> {
    let polygons: Vec<Polygon<f64>> = layer
        .features
        .iter()
        .filter_map(|f| f.geometry.as_ref().and_then(polygonal))
        .flat_map(|mp| mp.0)
        .collect();
    geo::unary_union(&polygons)
}

/// Writes each feature's planar area into `field`.
#[must_use]
pub fn with_area(layer: &Layer, field: &str) -> Layer {
    let features = layer
        .features
        .iter()
        .map(|f| {
            let mut f = f.clone();
            let area = f.geometry.as_ref().map_or(0.0, Area::unsigned_area);
            f.properties.insert(field.to_string(), Value::from(area));
            f
        })
        .collect();
    layer.with_features(features)
}

#[cfg(test)]
mod tests {
    use geo::{Point, Rect, coord, line_string};
    use serde_json::json;

    use super::*;

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(
            Rect::new(coord! { x: x, y: y }, coord! { x: x + size, y: y + size }).to_polygon(),
        )
    }

    fn layer(name: &str, crs: Crs, features: Vec<(Value, Geometry<f64>)>) -> Layer {
        Layer::new(
            name,
            Some(crs),
            features
                .into_iter()
                .map(|(p, g)| Feature::new(props(p), Some(g)))
                .collect(),
        )
    }

    #[test]
    fn mismatched_crs_is_rejected() {
        let a = layer("cadastre", Crs::MGA2020_56, vec![]);
        let b = layer("suburbs", Crs::epsg(28356), vec![]);

        let err = ensure_same_crs(&a, &b).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CRS mismatch: cadastre=EPSG:7856, suburbs=EPSG:28356"
        );
        assert!(matches!(
            overlay_intersection(&a, &b),
            Err(GeometryError::CrsMismatch { .. })
        ));
    }

    #[test]
    fn missing_crs_is_rejected() {
        let a = layer("cadastre", Crs::MGA2020_56, vec![]);
        let b = Layer::new("zoning", None, vec![]);
        assert_eq!(
            ensure_same_crs(&a, &b).unwrap_err().to_string(),
            "zoning layer has no CRS defined"
        );
    }

    #[test]
    fn selection_ignores_case() {
        let suburbs = layer(
            "suburbs",
            Crs::MGA2020_56,
            vec![
                (json!({"suburbname": "MARSDEN PARK"}), square(0.0, 0.0, 1.0)),
                (json!({"suburbname": "ROOTY HILL"}), square(5.0, 0.0, 1.0)),
            ],
        );

        let selected = select_eq_ignore_case(&suburbs, "suburbname", "Marsden Park").unwrap();
        assert_eq!(selected.len(), 1);

        let err = select_eq_ignore_case(&suburbs, "suburbname", "Atlantis").unwrap_err();
        assert!(err.to_string().contains("'Atlantis'"));
        assert!(err.to_string().contains("'suburbname'"));
    }

    #[test]
    fn clip_cuts_polygons_lines_and_points() {
        let mask = layer("mask", Crs::MGA2020_56, vec![(json!({}), square(0.0, 0.0, 10.0))]);
        let input = layer(
            "input",
            Crs::MGA2020_56,
            vec![
                (json!({"id": 1}), square(5.0, 5.0, 10.0)),
                (json!({"id": 2}), square(20.0, 20.0, 1.0)),
                (
                    json!({"id": 3}),
                    Geometry::LineString(line_string![(x: -5.0, y: 5.0), (x: 5.0, y: 5.0)]),
                ),
                (json!({"id": 4}), Geometry::Point(Point::new(1.0, 1.0))),
            ],
        );

        let clipped = clip(&input, &mask).unwrap();
        let ids: Vec<String> = clipped.features.iter().filter_map(|f| f.text("id")).collect();
        assert_eq!(ids, vec!["1", "3", "4"]);

        let area = clipped.features[0].geometry.as_ref().unwrap().unsigned_area();
        assert!((area - 25.0).abs() < 1e-9);
        assert!((length(clipped.features[1].geometry.as_ref().unwrap()) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn overlay_suffixes_shared_attributes() {
        let lots = layer(
            "cadastre",
            Crs::MGA2020_56,
            vec![(json!({"cadid": 7, "name": "lot"}), square(0.0, 0.0, 10.0))],
        );
        let zones = layer(
            "zoning",
            Crs::MGA2020_56,
            vec![
                (json!({"LAY_CLASS": "R2", "name": "a"}), square(-5.0, 0.0, 10.0)),
                (json!({"LAY_CLASS": "RE1", "name": "b"}), square(5.0, 0.0, 10.0)),
                (json!({"LAY_CLASS": "SP2", "name": "c"}), square(50.0, 0.0, 10.0)),
            ],
        );

        let slices = overlay_intersection(&lots, &zones).unwrap();
        assert_eq!(slices.len(), 2);
        let first = &slices.features[0].properties;
        assert_eq!(first["cadid"], json!(7));
        assert_eq!(first["name_1"], json!("lot"));
        assert_eq!(first["name_2"], json!("a"));
        assert_eq!(first["LAY_CLASS"], json!("R2"));

        let total: f64 = slices
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .map(Area::unsigned_area)
            .sum();
        assert!((total - 100.0).abs() < 1e-6);
    }

    #[test]
    fn dissolve_merges_overlaps() {
        let squares = layer(
            "buffers",
            Crs::MGA2020_56,
            vec![
                (json!({}), square(0.0, 0.0, 2.0)),
                (json!({}), square(1.0, 0.0, 2.0)),
            ],
        );
        let merged = dissolve(&squares);
        assert_eq!(merged.0.len(), 1);
        assert!((merged.unsigned_area() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn buffered_point_approximates_circle() {
        let stops = layer(
            "stops",
            Crs::MGA2020_56,
            vec![(json!({}), Geometry::Point(Point::new(0.0, 0.0)))],
        );
        let buffered = buffer(&stops, 400.0);
        let area = buffered.features[0].geometry.as_ref().unwrap().unsigned_area();
        let circle = std::f64::consts::PI * 400.0 * 400.0;
        assert!((area - circle).abs() / circle < 0.05);
    }

    #[test]
    fn reprojection_is_skipped_for_same_crs() {
        let stops = layer(
            "stops",
            Crs::WGS84,
            vec![(json!({}), Geometry::Point(Point::new(153.0, 0.0)))],
        );
        assert_eq!(reproject(&stops, Crs::WGS84).unwrap(), stops);

        let projected = reproject(&stops, Crs::MGA2020_56).unwrap();
        assert_eq!(projected.crs, Some(Crs::MGA2020_56));
        let Some(Geometry::Point(p)) = projected.features[0].geometry else {
            panic!("expected a point");
        };
        assert!((p.x() - 500_000.0).abs() < 1e-6);
        assert!((p.y() - 10_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn area_is_written_to_field() {
        let lots = layer("cadastre", Crs::MGA2020_56, vec![(json!({}), square(0.0, 0.0, 3.0))]);
        let with = with_area(&lots, "cad_area");
        assert_eq!(with.features[0].properties["cad_area"], json!(9.0));
    }
}
