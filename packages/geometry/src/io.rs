//! `GeoJSON` loading and extension-selected output.

use std::path::{Path, PathBuf};

use geojson::{FeatureCollection, GeoJson, JsonObject};
use serde_json::{Value, json};
use strum::IntoEnumIterator as _;
use strum_macros::{AsRefStr, EnumIter, EnumString};

use crate::gpkg::write_gpkg;
use crate::{Crs, Feature, GeometryError, Layer};

/// Output container, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    /// A `GeoJSON` feature collection.
    Geojson,
    /// A `GeoJSON` feature collection with a `.json` extension.
    Json,
    /// One `GeoJSON` feature per line.
    Geojsonl,
    /// A single-layer `GeoPackage`.
    Gpkg,
}

impl OutputFormat {
    /// Normalizes `ext` (trim, lowercase, strip a leading dot) and picks the
    /// matching format.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedFormat`] naming the allowed
    /// extensions.
    pub fn from_extension(ext: &str) -> Result<Self, GeometryError> {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        ext.parse().map_err(|_| GeometryError::UnsupportedFormat {
            allowed: Self::iter()
                .map(|f| f.as_ref().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            ext,
        })
    }
}

/// Builds `{dir}/{name}.{ext}` after validating the extension.
///
/// # Errors
///
/// Returns [`GeometryError::UnsupportedFormat`] for an unknown extension.
pub fn output_path(
    dir: &Path,
    name: &str,
    ext: &str,
) -> Result<(PathBuf, OutputFormat), GeometryError> {
    let format = OutputFormat::from_extension(ext)?;
    Ok((dir.join(format!("{name}.{}", format.as_ref())), format))
}

/// Reads a `GeoJSON` file into a [`Layer`] called `name`.
///
/// The CRS comes from the legacy `crs` member. Files without one are
/// EPSG:4326; an explicit `"crs": null` leaves the layer without a CRS.
///
/// # Errors
///
/// Returns [`GeometryError`] if the file cannot be read or parsed.
pub fn read_layer(path: &Path, name: &str) -> Result<Layer, GeometryError> {
    let text = std::fs::read_to_string(path).map_err(|source| GeometryError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let layer = parse_layer(&text, name)?;

    log::info!(
        "{name} has been loaded: {} features, crs={}",
        layer.len(),
        layer
            .crs
            .map_or_else(|| "none".to_string(), |crs| crs.to_string())
    );
    Ok(layer)
}

/// Parses `GeoJSON` text into a [`Layer`].
///
/// # Errors
///
/// Returns [`GeometryError`] if the text is not valid `GeoJSON` or holds an
/// unconvertible geometry.
pub fn parse_layer(text: &str, name: &str) -> Result<Layer, GeometryError> {
    let (crs_member, features) = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => (
            collection
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs").cloned()),
            collection.features,
        ),
        GeoJson::Feature(feature) => (
            feature
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs").cloned()),
            vec![feature],
        ),
        GeoJson::Geometry(geometry) => (
            geometry
                .foreign_members
                .as_ref()
                .and_then(|members| members.get("crs").cloned()),
            vec![geojson::Feature::from(geometry)],
        ),
    };

    let crs = match crs_member {
        None => Some(Crs::WGS84),
        Some(member) => crs_from_member(&member, name),
    };

    let features = features
        .into_iter()
        .map(|feature| {
            Feature::from_geojson(feature.properties.unwrap_or_default(), feature.geometry)
        })
        .collect::<Result<Vec<_>, GeometryError>>()?;

    Ok(Layer::new(name, crs, features))
}

fn crs_from_member(member: &Value, layer: &str) -> Option<Crs> {
    if member.is_null() {
        return None;
    }
    let properties = member.get("properties");
    let crs = properties
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .and_then(Crs::parse)
        .or_else(|| {
            properties
                .and_then(|p| p.get("code"))
                .and_then(Value::as_u64)
                .and_then(|code| u32::try_from(code).ok())
                .map(Crs::epsg)
        });

    if crs.is_none() {
        log::warn!("{layer}: unrecognized crs member {member}");
    }
    crs
}

fn crs_member(crs: Crs) -> Value {
    json!({
        "type": "name",
        "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.code()) }
    })
}

fn to_geojson(feature: &Feature) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: feature
            .geometry
            .as_ref()
            .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
        id: None,
        properties: Some(feature.properties.clone()),
        foreign_members: None,
    }
}

/// Writes `layer` to `path` in `format`, creating the parent directory.
///
/// `GeoJSON` collections carry a legacy `crs` member, `null` for a layer
/// without a CRS so it reads back the same way.
///
/// # Errors
///
/// Returns [`GeometryError`] if serialization or the write fails.
pub fn write_layer(layer: &Layer, path: &Path, format: OutputFormat) -> Result<(), GeometryError> {
    let io_error = |source| GeometryError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }

    match format {
        OutputFormat::Geojson | OutputFormat::Json => {
            let mut members = JsonObject::new();
            members.insert(
                "crs".to_string(),
                layer.crs.map_or(Value::Null, crs_member),
            );
            let collection = FeatureCollection {
                bbox: None,
                features: layer.features.iter().map(to_geojson).collect(),
                foreign_members: Some(members),
            };
            std::fs::write(path, serde_json::to_string(&collection)?).map_err(io_error)?;
        }
        OutputFormat::Geojsonl => {
            let mut lines = String::new();
            for feature in &layer.features {
                lines.push_str(&serde_json::to_string(&to_geojson(feature))?);
                lines.push('\n');
            }
            std::fs::write(path, lines).map_err(io_error)?;
        }
        OutputFormat::Gpkg => write_gpkg(layer, path)?,
    }

    log::info!("{} features written to {}", layer.len(), path.display());
    Ok(())
}
