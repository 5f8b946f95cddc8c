//! Dataset registry, loading every dataset definition from embedded TOML.
//!
//! Each `.toml` file in `packages/source/datasets/` is baked into the binary
//! at compile time via [`include_str!`]. Adding a dataset means creating a
//! new TOML file and adding it to the list below.

use crate::SourceError;
use crate::dataset_def::{DatasetDefinition, parse_dataset_toml};

/// TOML configs embedded at compile time.
const DATASET_TOMLS: &[(&str, &str)] = &[
    // ── ArcGIS layers ────────────────────────────────────────────────
    (
        "blacktown_bus_stops",
        include_str!("../datasets/blacktown_bus_stops.toml"),
    ),
    (
        "blacktown_paths",
        include_str!("../datasets/blacktown_paths.toml"),
    ),
    // ── CKAN resources ───────────────────────────────────────────────
    (
        "traffic_station_reference",
        include_str!("../datasets/traffic_station_reference.toml"),
    ),
    (
        "traffic_yearly_summary",
        include_str!("../datasets/traffic_yearly_summary.toml"),
    ),
];

/// Total number of configured datasets (used in tests).
#[cfg(test)]
const EXPECTED_DATASET_COUNT: usize = 4;

/// Returns all configured dataset definitions, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this is caught by the registry tests).
#[must_use]
pub fn all_datasets() -> Vec<DatasetDefinition> {
    DATASET_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_dataset_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Looks up a dataset by id.
///
/// # Errors
///
/// Returns [`SourceError::UnknownDataset`] if no dataset has that id, or
/// [`SourceError::Definition`] if its TOML is malformed.
pub fn find_dataset(id: &str) -> Result<DatasetDefinition, SourceError> {
    let (_, toml) = DATASET_TOMLS
        .iter()
        .find(|(name, _)| *name == id)
        .ok_or_else(|| SourceError::UnknownDataset(id.to_string()))?;
    Ok(parse_dataset_toml(toml)?)
}
