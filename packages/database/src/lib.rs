#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `PostGIS` persistence for the planning ETL pipelines.
//!
//! Uses `switchy_database` raw parameterized SQL for every statement and
//! `switchy_schema` for embedded migrations. Keyed tables are written with
//! [`upsert::Upserter`]; raw `ArcGIS` layers are replaced wholesale with
//! [`layers::replace_layer`]; the spatial derivations in [`analysis`] run
//! entirely inside the database.

pub mod analysis;
pub mod db;
pub mod layers;
pub mod tables;
pub mod upsert;

use include_dir::{Dir, include_dir};
use planning_etl_database_models::FieldError;
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// Could not open a connection.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// A record could not be converted into a typed row.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// A filter value matched no rows.
    #[error("{value:?} not found in {table}.{field}")]
    EmptySelection {
        /// Table that was searched.
        table: String,
        /// Column that was matched.
        field: String,
        /// Value that matched nothing.
        value: String,
    },

    /// A derivation produced no rows.
    #[error("{message}")]
    EmptyResult {
        /// Description of the empty result.
        message: String,
    },

    /// Two tables in one spatial operation hold geometries in different
    /// SRIDs.
    #[error("CRS mismatch: {left_table}=EPSG:{left}, {right_table}=EPSG:{right}")]
    CrsMismatch {
        /// First table.
        left_table: String,
        /// SRID of the first table.
        left: u32,
        /// Second table.
        right_table: String,
        /// SRID of the second table.
        right: u32,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

/// Validates a (possibly schema-qualified) table name before it is
/// interpolated into SQL. Only lowercase letters, digits and underscores
/// are allowed in each part.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the name is empty or contains any
/// other character.
pub fn table_ident(name: &str) -> Result<&str, DbError> {
    let valid = !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            part.chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        });

    if valid {
        Ok(name)
    } else {
        Err(DbError::Conversion {
            message: format!("Invalid table name: {name:?}"),
        })
    }
}

/// Quotes an arbitrary column name as a SQL identifier.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string as a SQL literal, for statements (`CREATE TABLE .. AS`)
/// that cannot take bind parameters.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ident_accepts_schema_qualified_names() {
        assert!(table_ident("bcc_traffic.station_reference").is_ok());
        assert!(table_ident("paths_7856").is_ok());
    }

    #[test]
    fn table_ident_rejects_injection() {
        assert!(table_ident("").is_err());
        assert!(table_ident("a.b.c").is_err());
        assert!(table_ident("t; DROP TABLE x").is_err());
        assert!(table_ident("Upper").is_err());
        assert!(table_ident("7856_paths").is_err());
    }

    #[test]
    fn quoting_doubles_delimiters() {
        assert_eq!(quote_ident("LAY_CLASS"), "\"LAY_CLASS\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("O'CONNELL"), "'O''CONNELL'");
    }
}
