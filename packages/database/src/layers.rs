//! Wholesale replacement of raw feature layers.
//!
//! `ArcGIS` layers are stored as they arrive: one column per attribute,
//! typed from the values seen, plus a `geom` column in EPSG:4326 filled
//! with `ST_GeomFromGeoJSON`. Each load drops and recreates the table.

use std::collections::BTreeMap;

use planning_etl_source_models::Record;
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, quote_ident, table_ident};

/// Name of the geometry column on every layer table.
pub const GEOMETRY_COLUMN: &str = "geom";

/// SQL type inferred for an attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ColumnType {
    /// Every value is a boolean.
    Boolean,
    /// Every value is an integer.
    BigInt,
    /// Every value is numeric.
    Double,
    /// Anything else.
    Text,
}

impl ColumnType {
    /// `PostgreSQL` type name.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Text => "TEXT",
        }
    }

    fn of(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(_) => Some(Self::Boolean),
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::BigInt),
            serde_json::Value::Number(_) => Some(Self::Double),
            _ => Some(Self::Text),
        }
    }

    /// Widens `self` so both kinds of value fit.
    fn merge(self, other: Self) -> Self {
        if self == other {
            return self;
        }
        match (self, other) {
            (Self::BigInt | Self::Double, Self::BigInt | Self::Double) => Self::Double,
            _ => Self::Text,
        }
    }

    fn bind(self, value: Option<&serde_json::Value>) -> DatabaseValue {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return DatabaseValue::Null;
        };
        match (self, value) {
            (Self::Boolean, serde_json::Value::Bool(b)) => DatabaseValue::Bool(*b),
            (Self::BigInt, serde_json::Value::Number(n)) => {
                n.as_i64().map_or(DatabaseValue::Null, DatabaseValue::Int64)
            }
            (Self::Double, serde_json::Value::Number(n)) => {
                n.as_f64().map_or(DatabaseValue::Null, DatabaseValue::Real64)
            }
            (_, serde_json::Value::String(s)) => DatabaseValue::String(s.clone()),
            (_, other) => DatabaseValue::String(other.to_string()),
        }
    }
}

/// Infers one column per attribute name seen on any record. Attributes
/// whose name collides with `gid` or the geometry column are dropped.
#[must_use]
pub fn infer_columns(records: &[Record]) -> BTreeMap<String, ColumnType> {
    let mut columns: BTreeMap<String, Option<ColumnType>> = BTreeMap::new();

    for record in records {
        for (name, value) in &record.fields {
            if name.eq_ignore_ascii_case(GEOMETRY_COLUMN) || name.eq_ignore_ascii_case("gid") {
                continue;
            }
            let seen = columns.entry(name.clone()).or_default();
            if let Some(kind) = ColumnType::of(value) {
                *seen = Some(seen.map_or(kind, |prev| prev.merge(kind)));
            }
        }
    }

    columns
        .into_iter()
        .map(|(name, kind)| (name, kind.unwrap_or(ColumnType::Text)))
        .collect()
}

/// Drops and recreates `table`, loads every record, and adds a `GiST`
/// index on the geometry column. Returns the number of rows inserted.
///
/// # Errors
///
/// Returns [`DbError`] if the table name is invalid, a geometry cannot be
/// serialized, or any statement fails.
pub async fn replace_layer(
    db: &dyn Database,
    table: &str,
    records: &[Record],
    srid: u32,
) -> Result<u64, DbError> {
    let table = table_ident(table)?;
    let columns = infer_columns(records);

    let definitions: Vec<String> = columns
        .iter()
        .map(|(name, kind)| format!("{} {}", quote_ident(name), kind.sql()))
        .chain(std::iter::once(format!(
            "{GEOMETRY_COLUMN} geometry(Geometry, {srid})"
        )))
        .collect();

    db.exec_raw(&format!("DROP TABLE IF EXISTS {table}")).await?;
    db.exec_raw(&format!(
        "CREATE TABLE {table} (gid SERIAL PRIMARY KEY, {})",
        definitions.join(", ")
    ))
    .await?;

    let names: Vec<String> = columns
        .keys()
        .map(|n| quote_ident(n))
        .chain(std::iter::once(GEOMETRY_COLUMN.to_string()))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len())
        .map(|i| format!("${i}"))
        .chain(std::iter::once(format!(
            "ST_SetSRID(ST_GeomFromGeoJSON(${}), {srid})",
            columns.len() + 1
        )))
        .collect();
    let insert = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );

    let txn = db.begin_transaction().await?;
    let mut inserted = 0u64;
    for record in records {
        let mut params: Vec<DatabaseValue> = columns
            .iter()
            .map(|(name, kind)| kind.bind(record.fields.get(name)))
            .collect();
        params.push(match &record.geometry {
            Some(geometry) => {
                DatabaseValue::String(serde_json::to_string(geometry).map_err(|e| {
                    DbError::Conversion {
                        message: format!("Failed to serialize geometry for {table}: {e}"),
                    }
                })?)
            }
            None => DatabaseValue::Null,
        });

        inserted += txn.exec_raw_params(&insert, &params).await?;
    }
    txn.commit().await?;

    ensure_spatial_index(db, table).await?;

    log::info!("{table}: loaded {inserted} features");
    Ok(inserted)
}

/// Adds a `GiST` index on `table.geom` if it is missing.
///
/// # Errors
///
/// Returns [`DbError`] if the table name is invalid or the statement fails.
pub async fn ensure_spatial_index(db: &dyn Database, table: &str) -> Result<(), DbError> {
    let table = table_ident(table)?;
    let index = format!("{}_geom_gix", table.rsplit('.').next().unwrap_or(table));
    db.exec_raw(&format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} USING gist ({GEOMETRY_COLUMN})"
    ))
    .await?;
    Ok(())
}
