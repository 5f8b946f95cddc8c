//! In-memory vector layers.

use geo::Geometry;
use serde_json::{Map, Value};

use crate::{Crs, GeometryError};

/// One feature: attributes plus an optional geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Attribute values by name.
    pub properties: Map<String, Value>,
    /// Geometry, if any.
    pub geometry: Option<Geometry<f64>>,
}

impl Feature {
    /// Creates a feature.
    #[must_use]
    pub const fn new(properties: Map<String, Value>, geometry: Option<Geometry<f64>>) -> Self {
        Self {
            properties,
            geometry,
        }
    }

    /// Converts `GeoJSON` parts into a feature.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::GeoJson`] if the geometry cannot be
    /// converted.
    pub fn from_geojson(
        properties: Map<String, Value>,
        geometry: Option<geojson::Geometry>,
    ) -> Result<Self, GeometryError> {
        Ok(Self::new(
            properties,
            geometry.map(Geometry::<f64>::try_from).transpose()?,
        ))
    }

    /// Returns the attribute as text, if present and a string or number.
    #[must_use]
    pub fn text(&self, field: &str) -> Option<String> {
        match self.properties.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// A named collection of features in one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Name used in log lines and errors.
    pub name: String,
    /// Declared CRS, or `None` when the source declares none.
    pub crs: Option<Crs>,
    /// Features.
    pub features: Vec<Feature>,
}

impl Layer {
    /// Creates a layer.
    #[must_use]
    pub fn new(name: impl Into<String>, crs: Option<Crs>, features: Vec<Feature>) -> Self {
        Self {
            name: name.into(),
            crs,
            features,
        }
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the layer has no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Returns the declared CRS.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::MissingCrs`] if the layer has none.
    pub fn require_crs(&self) -> Result<Crs, GeometryError> {
        self.crs.ok_or_else(|| GeometryError::MissingCrs {
            layer: self.name.clone(),
        })
    }

    /// Same layer with different features.
    #[must_use]
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self::new(self.name.clone(), self.crs, features)
    }
}
