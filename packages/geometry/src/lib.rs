#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Local vector-layer pipelines: load, transform, write.
//!
//! [`io`] reads `GeoJSON` layers (with their declared CRS) and writes
//! results by file extension, to `GeoJSON` or to a [`gpkg`] `GeoPackage`. [`ops`] holds the individual transforms
//! (CRS checks, attribute selection, reprojection to MGA, clip, overlay,
//! buffer, dissolve, area), and [`pipelines`] chains them into the
//! cadastre clip, the multi-zone slice review and the stop coverage
//! analysis.

pub mod crs;
pub mod gpkg;
pub mod io;
pub mod layer;
pub mod ops;
pub mod pipelines;

pub use crs::Crs;
pub use layer::{Feature, Layer};

/// Errors that can occur while loading, transforming or writing layers.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The input is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Two layers in one operation declare different CRSs.
    #[error("CRS mismatch: {left_layer}={left}, {right_layer}={right}")]
    CrsMismatch {
        /// First layer name.
        left_layer: String,
        /// First layer CRS.
        left: Crs,
        /// Second layer name.
        right_layer: String,
        /// Second layer CRS.
        right: Crs,
    },

    /// A layer has no CRS defined.
    #[error("{layer} layer has no CRS defined")]
    MissingCrs {
        /// Layer name.
        layer: String,
    },

    /// No transform is available for this CRS.
    #[error("Unsupported CRS {crs}; expected a geographic GDA/WGS84 CRS or an MGA zone")]
    UnsupportedCrs {
        /// The CRS.
        crs: Crs,
    },

    /// A filter value matched no features.
    #[error("No features found for {layer} '{value}' in '{field}' field")]
    EmptySelection {
        /// Layer name.
        layer: String,
        /// Attribute that was matched.
        field: String,
        /// Value that matched nothing.
        value: String,
    },

    /// An operation produced no features.
    #[error("{message}")]
    EmptyResult {
        /// Description of the empty result.
        message: String,
    },

    /// Writing a `GeoPackage` failed.
    #[error("GeoPackage error on {path}: {message}")]
    Gpkg {
        /// File path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// The output extension is not one of the supported formats.
    #[error("Unsupported extension '{ext}'. Use one of: {allowed}")]
    UnsupportedFormat {
        /// Normalized extension.
        ext: String,
        /// Supported extensions.
        allowed: String,
    },
}
