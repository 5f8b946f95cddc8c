//! Typed access to the keyed traffic tables.

use moosicbox_json_utils::database::ToValue as _;
use planning_etl_database_models::FieldError;
use planning_etl_source_models::Record;
use switchy_database::Database;

use crate::upsert::{UpsertRow, Upserter};
use crate::{DbError, table_ident};

/// Converts every record before anything is written, so one bad record
/// fails the whole batch instead of leaving it half applied.
///
/// # Errors
///
/// Returns the [`FieldError`] of the first record that does not convert.
pub fn convert_all<'a, R>(records: &'a [Record]) -> Result<Vec<R>, FieldError>
where
    R: TryFrom<&'a Record, Error = FieldError>,
{
    records.iter().map(R::try_from).collect()
}

/// Converts `records` into `R` rows and upserts them.
///
/// # Errors
///
/// Returns [`DbError::Field`] if any record is missing a required field, or
/// [`DbError::Database`] if a write fails.
pub async fn upsert_records<'a, R>(
    db: &dyn Database,
    upserter: &Upserter,
    records: &'a [Record],
) -> Result<u64, DbError>
where
    R: UpsertRow + Sync + TryFrom<&'a Record, Error = FieldError>,
{
    let rows = convert_all::<R>(records)?;
    upserter.upsert(db, &rows).await
}

/// Returns `COUNT(*)` for `table`.
///
/// # Errors
///
/// Returns [`DbError`] if the table name is invalid or the query fails
/// (e.g. the table does not exist yet).
pub async fn table_count(db: &dyn Database, table: &str) -> Result<i64, DbError> {
    let table = table_ident(table)?;
    let rows = db
        .query_raw_params(&format!("SELECT COUNT(*) AS count FROM {table}"), &[])
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("COUNT(*) on {table} returned no row"),
    })?;

    row.to_value("count").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse count for {table}: {e}"),
    })
}

/// Returns every `station_key` in `table`, sorted.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a key cannot be read.
pub async fn station_keys(db: &dyn Database, table: &str) -> Result<Vec<String>, DbError> {
    let table = table_ident(table)?;
    let rows = db
        .query_raw_params(
            &format!("SELECT station_key FROM {table} ORDER BY station_key"),
            &[],
        )
        .await?;

    rows.iter()
        .map(|row| {
            row.to_value::<String>("station_key")
                .map_err(|e| DbError::Conversion {
                    message: format!("Failed to parse station_key: {e}"),
                })
        })
        .collect()
}
