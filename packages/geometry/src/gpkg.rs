//! `GeoPackage` output.
//!
//! One layer per file, named after the file stem. Property columns are
//! typed from the values seen across all features, and geometries are
//! promoted to the multi type of their family so polygon and multipolygon
//! slices share one layer.

use std::path::Path;

use geo::{Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon};
use rusqlite_gpkg::{ColumnSpec, ColumnType, Dimension, Gpkg, GeometryType, Value};
use serde_json::Value as Json;

use crate::{Crs, GeometryError, Layer};

const GEOMETRY_COLUMN: &str = "geom";

/// Columns `create_layer` adds itself.
const RESERVED_COLUMNS: [&str; 2] = ["fid", GEOMETRY_COLUMN];

/// Registered in every new `GeoPackage` as "undefined geographic".
const UNDEFINED_SRS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Point,
    Line,
    Polygon,
    Mixed,
}

fn family(geometry: &Geometry<f64>) -> Family {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Family::Point,
        Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => Family::Line,
        Geometry::Polygon(_)
        | Geometry::MultiPolygon(_)
        | Geometry::Rect(_)
        | Geometry::Triangle(_) => Family::Polygon,
        Geometry::GeometryCollection(_) => Family::Mixed,
    }
}

/// Declared geometry type of the layer. A layer of plain points stays
/// `Point`; lines and polygons are always declared as their multi type.
fn layer_geometry_type(layer: &Layer) -> GeometryType {
    let mut geometries = layer.features.iter().filter_map(|f| f.geometry.as_ref());
    let Some(first) = geometries.next() else {
        return GeometryType::GeometryCollection;
    };

    let mut kind = family(first);
    let mut all_points = matches!(first, Geometry::Point(_));
    for geometry in geometries {
        if family(geometry) != kind {
            kind = Family::Mixed;
        }
        all_points &= matches!(geometry, Geometry::Point(_));
    }

    match kind {
        Family::Point if all_points => GeometryType::Point,
        Family::Point => GeometryType::MultiPoint,
        Family::Line => GeometryType::MultiLineString,
        Family::Polygon => GeometryType::MultiPolygon,
        Family::Mixed => GeometryType::GeometryCollection,
    }
}

/// Converts `geometry` to the layer's declared type where the family
/// allows it. A missing geometry becomes an empty one.
fn promote(geometry: Option<&Geometry<f64>>, target: GeometryType) -> Geometry<f64> {
    let Some(geometry) = geometry else {
        return match target {
            GeometryType::MultiPolygon => Geometry::MultiPolygon(MultiPolygon::new(vec![])),
            GeometryType::MultiLineString => {
                Geometry::MultiLineString(MultiLineString::new(vec![]))
            }
            GeometryType::MultiPoint => Geometry::MultiPoint(MultiPoint::new(vec![])),
            _ => Geometry::GeometryCollection(GeometryCollection::default()),
        };
    };

    match (geometry, target) {
        (Geometry::Point(p), GeometryType::MultiPoint) => {
            Geometry::MultiPoint(MultiPoint::new(vec![*p]))
        }
        (Geometry::Line(l), GeometryType::MultiLineString) => {
            Geometry::MultiLineString(MultiLineString::new(vec![LineString::from(*l)]))
        }
        (Geometry::LineString(l), GeometryType::MultiLineString) => {
            Geometry::MultiLineString(MultiLineString::new(vec![l.clone()]))
        }
        (Geometry::Polygon(p), GeometryType::MultiPolygon) => {
            Geometry::MultiPolygon(MultiPolygon::new(vec![p.clone()]))
        }
        (Geometry::Rect(r), GeometryType::MultiPolygon) => {
            Geometry::MultiPolygon(MultiPolygon::new(vec![r.to_polygon()]))
        }
        (Geometry::Triangle(t), GeometryType::MultiPolygon) => {
            Geometry::MultiPolygon(MultiPolygon::new(vec![t.to_polygon()]))
        }
        (other, _) => other.clone(),
    }
}

fn column_type(values: impl Iterator<Item = Json>) -> ColumnType {
    let mut seen = None;
    for value in values {
        let kind = match value {
            Json::Null => continue,
            Json::Bool(_) => ColumnType::Boolean,
            Json::Number(n) if n.is_i64() => ColumnType::Integer,
            Json::Number(_) => ColumnType::Double,
            Json::String(_) | Json::Array(_) | Json::Object(_) => ColumnType::Varchar,
        };
        seen = Some(match (seen, kind) {
            (None, kind) => kind,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Integer), ColumnType::Double)
            | (Some(ColumnType::Double), ColumnType::Integer) => ColumnType::Double,
            _ => ColumnType::Varchar,
        });
    }
    seen.unwrap_or(ColumnType::Varchar)
}

/// A property column: its `GeoPackage` definition and the property it reads.
struct Column {
    definition: ColumnSpec,
    property: String,
}

/// Property columns in first-seen order. Names that collide with the
/// primary key or geometry column get a `_src` suffix.
fn columns(layer: &Layer) -> Vec<Column> {
    let mut names: Vec<&String> = vec![];
    for feature in &layer.features {
        for name in feature.properties.keys() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    names
        .into_iter()
        .map(|property| {
            let values = layer
                .features
                .iter()
                .filter_map(|f| f.properties.get(property).cloned());
            let name = if RESERVED_COLUMNS
                .iter()
                .any(|r| r.eq_ignore_ascii_case(property))
            {
                format!("{property}_src")
            } else {
                property.clone()
            };
            Column {
                definition: ColumnSpec {
                    name,
                    column_type: column_type(values),
                },
                property: property.clone(),
            }
        })
        .collect()
}

fn to_value(value: Option<&Json>, column_type: ColumnType) -> Value {
    match (value, column_type) {
        (None | Some(Json::Null), _) => Value::Null,
        (Some(Json::Bool(b)), ColumnType::Boolean) => Value::Integer(i64::from(*b)),
        (Some(Json::Number(n)), ColumnType::Integer) => {
            n.as_i64().map_or(Value::Null, Value::Integer)
        }
        (Some(Json::Number(n)), ColumnType::Double) => {
            n.as_f64().map_or(Value::Null, Value::Real)
        }
        (Some(Json::String(s)), _) => Value::Text(s.clone()),
        (Some(other), _) => Value::Text(other.to_string()),
    }
}

fn srs_id(gpkg: &Gpkg, crs: Option<Crs>) -> Result<u32, rusqlite_gpkg::GpkgError> {
    let Some(crs) = crs else {
        return Ok(UNDEFINED_SRS);
    };
    if crs == Crs::WGS84 {
        return Ok(crs.code());
    }

    let code = i32::try_from(crs.code()).map_err(|_| {
        rusqlite_gpkg::GpkgError::Message(format!("EPSG code out of range: {crs}"))
    })?;
    // Readers resolve the definition from the EPSG organization code.
    gpkg.register_srs(&crs.to_string(), code, "EPSG", code, "undefined", &crs.to_string())?;
    Ok(crs.code())
}

/// Writes `layer` to a new `GeoPackage` at `path`, replacing any existing
/// file.
///
/// # Errors
///
/// Returns [`GeometryError::Io`] if an existing file cannot be removed, or
/// [`GeometryError::Gpkg`] if creating the layer or inserting a feature
/// fails.
pub fn write_gpkg(layer: &Layer, path: &Path) -> Result<(), GeometryError> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(GeometryError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    }

    let table = path
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or(layer.name.as_str());
    let geometry_type = layer_geometry_type(layer);
    let columns = columns(layer);
    let definitions: Vec<ColumnSpec> = columns.iter().map(|c| c.definition.clone()).collect();

    let write = || -> Result<(), rusqlite_gpkg::GpkgError> {
        let gpkg = Gpkg::open(path)?;
        let srs = srs_id(&gpkg, layer.crs)?;
        let out = gpkg.create_layer(
            table,
            GEOMETRY_COLUMN,
            geometry_type,
            Dimension::Xy,
            srs,
            &definitions,
        )?;

        for feature in &layer.features {
            let values: Vec<Value> = columns
                .iter()
                .map(|c| to_value(feature.properties.get(&c.property), c.definition.column_type))
                .collect();
            out.insert(promote(feature.geometry.as_ref(), geometry_type), values)?;
        }
        Ok(())
    };

    write().map_err(|e| GeometryError::Gpkg {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
