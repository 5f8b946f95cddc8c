//! Keyed insert-or-update of typed rows.
//!
//! An [`UpsertRow`] declares its natural key and the columns a conflict
//! overwrites. [`Upserter`] turns that declaration into one
//! `INSERT .. ON CONFLICT (key) DO UPDATE SET col = EXCLUDED.col` statement
//! and executes it once per row inside a single transaction.

use std::fmt::Write as _;

use planning_etl_database_models::{StationReference, YearlySummary};
use switchy_database::{Database, DatabaseTransaction, DatabaseValue};

use crate::{DbError, table_ident};

/// How a column takes part in conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Part of the natural key. Never overwritten.
    Key,
    /// Overwritten with the incoming value on conflict.
    Mutable,
}

/// One bound column of an [`UpsertRow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Conflict role.
    pub role: ColumnRole,
}

impl Column {
    /// A natural-key column.
    #[must_use]
    pub const fn key(name: &'static str) -> Self {
        Self {
            name,
            role: ColumnRole::Key,
        }
    }

    /// A column overwritten on conflict.
    #[must_use]
    pub const fn mutable(name: &'static str) -> Self {
        Self {
            name,
            role: ColumnRole::Mutable,
        }
    }
}

/// A `PostGIS` point column built from two bound coordinate columns
/// (`ST_SetSRID(ST_MakePoint(lon, lat), srid)`). Always mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointColumn {
    /// Geometry column name.
    pub name: &'static str,
    /// Bound column holding the longitude.
    pub lon: &'static str,
    /// Bound column holding the latitude.
    pub lat: &'static str,
    /// Spatial reference id.
    pub srid: u32,
}

/// A typed row that can be upserted.
pub trait UpsertRow {
    /// Bound columns, in the order [`UpsertRow::values`] returns them.
    const COLUMNS: &'static [Column];

    /// Point geometry derived from two of the bound columns, if any.
    const POINT: Option<PointColumn> = None;

    /// Values for [`UpsertRow::COLUMNS`], in order.
    fn values(&self) -> Vec<DatabaseValue>;
}

fn text(value: &str) -> DatabaseValue {
    DatabaseValue::String(value.to_string())
}

fn opt_text(value: Option<&String>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone()))
}

impl UpsertRow for StationReference {
    const COLUMNS: &'static [Column] = &[
        Column::key("station_key"),
        Column::mutable("station_id"),
        Column::mutable("lga"),
        Column::mutable("suburb"),
        Column::mutable("road_name"),
        Column::mutable("wgs84_latitude"),
        Column::mutable("wgs84_longitude"),
    ];

    const POINT: Option<PointColumn> = Some(PointColumn {
        name: "geom",
        lon: "wgs84_longitude",
        lat: "wgs84_latitude",
        srid: 4326,
    });

    fn values(&self) -> Vec<DatabaseValue> {
        vec![
            text(&self.station_key),
            text(&self.station_id),
            opt_text(self.lga.as_ref()),
            opt_text(self.suburb.as_ref()),
            opt_text(self.road_name.as_ref()),
            DatabaseValue::Real64(self.wgs84_latitude),
            DatabaseValue::Real64(self.wgs84_longitude),
        ]
    }
}

impl UpsertRow for YearlySummary {
    const COLUMNS: &'static [Column] = &[
        Column::key("station_key"),
        Column::key("year"),
        Column::key("period"),
        Column::key("count_type"),
        Column::mutable("classification_type"),
        Column::key("traffic_direction_seq"),
        Column::key("cardinal_direction_seq"),
        Column::mutable("traffic_count"),
    ];

    fn values(&self) -> Vec<DatabaseValue> {
        vec![
            text(&self.station_key),
            DatabaseValue::Int32(self.year),
            text(&self.period),
            text(&self.count_type),
            opt_text(self.classification_type.as_ref()),
            DatabaseValue::Int32(self.traffic_direction_seq),
            DatabaseValue::Int32(self.cardinal_direction_seq),
            DatabaseValue::Int64(self.traffic_count),
        ]
    }
}

/// Writes [`UpsertRow`]s into one table.
#[derive(Debug, Clone)]
pub struct Upserter {
    table: String,
    serialize_writers: bool,
    spatial: bool,
}

impl Upserter {
    /// Creates an upserter for `table` (optionally schema-qualified).
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            serialize_writers: false,
            spatial: true,
        }
    }

    /// Takes a transaction-scoped advisory lock on the table name before
    /// writing, so overlapping runs against the same table queue up
    /// instead of interleaving. Requires `PostgreSQL`.
    #[must_use]
    pub const fn serialize_writers(mut self, enabled: bool) -> Self {
        self.serialize_writers = enabled;
        self
    }

    /// Skips the derived point column, for stores without `PostGIS`.
    #[must_use]
    pub const fn without_geometry(mut self) -> Self {
        self.spatial = false;
        self
    }

    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Builds the upsert statement for `R`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Conversion`] if the table name is invalid, `R`
    /// declares no key column, or the point column refers to a column `R`
    /// does not bind.
    pub fn statement<R: UpsertRow>(&self) -> Result<String, DbError> {
        let table = table_ident(&self.table)?;

        let keys: Vec<&str> = R::COLUMNS
            .iter()
            .filter(|c| c.role == ColumnRole::Key)
            .map(|c| c.name)
            .collect();
        if keys.is_empty() {
            return Err(DbError::Conversion {
                message: format!("Upsert into {table} has no key column"),
            });
        }

        let mut columns: Vec<&str> = R::COLUMNS.iter().map(|c| c.name).collect();
        let mut values: Vec<String> = (1..=R::COLUMNS.len()).map(|i| format!("${i}")).collect();
        let mut updates: Vec<&str> = R::COLUMNS
            .iter()
            .filter(|c| c.role == ColumnRole::Mutable)
            .map(|c| c.name)
            .collect();

        if let Some(point) = R::POINT.filter(|_| self.spatial) {
            let lon = placeholder_of::<R>(point.lon, table)?;
            let lat = placeholder_of::<R>(point.lat, table)?;
            columns.push(point.name);
            values.push(format!(
                "ST_SetSRID(ST_MakePoint({lon}, {lat}), {})",
                point.srid
            ));
            updates.push(point.name);
        }

        let mut sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({})",
            columns.join(", "),
            values.join(", "),
            keys.join(", ")
        );

        if updates.is_empty() {
            sql.push_str(" DO NOTHING");
        } else {
            sql.push_str(" DO UPDATE SET ");
            for (i, name) in updates.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                let _ = write!(sql, "{name} = EXCLUDED.{name}");
            }
        }

        Ok(sql)
    }

    /// Upserts every row inside one transaction. Rows are executed in
    /// order, so a later row with the same key wins.
    ///
    /// Returns the number of rows executed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] on the first failing statement. The transaction
    /// is rolled back and no row from this call is kept.
    pub async fn upsert<R: UpsertRow + Sync>(
        &self,
        db: &dyn Database,
        rows: &[R],
    ) -> Result<u64, DbError> {
        if rows.is_empty() {
            log::debug!("{}: nothing to upsert", self.table);
            return Ok(0);
        }

        let sql = self.statement::<R>()?;
        log::debug!("{}: {sql}", self.table);

        let txn = db.begin_transaction().await?;

        match self.write_rows(txn.as_ref(), &sql, rows).await {
            Ok(executed) => {
                txn.commit().await?;
                log::info!("{}: upserted {executed} rows", self.table);
                Ok(executed)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    log::warn!("{}: rollback failed: {rollback}", self.table);
                }
                Err(e)
            }
        }
    }

    async fn write_rows<R: UpsertRow + Sync>(
        &self,
        txn: &dyn DatabaseTransaction,
        sql: &str,
        rows: &[R],
    ) -> Result<u64, DbError> {
        if self.serialize_writers {
            txn.query_raw_params(
                "SELECT pg_advisory_xact_lock(hashtext($1))",
                &[text(&self.table)],
            )
            .await?;
        }

        let mut executed = 0u64;
        for row in rows {
            txn.exec_raw_params(sql, &row.values()).await?;
            executed += 1;
        }
        Ok(executed)
    }
}

fn placeholder_of<R: UpsertRow>(column: &str, table: &str) -> Result<String, DbError> {
    R::COLUMNS
        .iter()
        .position(|c| c.name == column)
        .map(|i| format!("${}", i + 1))
        .ok_or_else(|| DbError::Conversion {
            message: format!("Point column for {table} refers to unbound column {column}"),
        })
}

#[cfg(test)]
mod tests {
    use moosicbox_json_utils::database::ToValue as _;

    use super::*;

    fn station(key: &str, station_id: &str, lat: f64) -> StationReference {
        StationReference {
            station_key: key.to_string(),
            station_id: station_id.to_string(),
            lga: Some("Blacktown".to_string()),
            suburb: Some("Rooty Hill".to_string()),
            road_name: None,
            wgs84_latitude: lat,
            wgs84_longitude: 150.84,
        }
    }

    fn summary(key: &str, year: i32, count: i64) -> YearlySummary {
        YearlySummary {
            station_key: key.to_string(),
            year,
            period: "ALL DAYS".to_string(),
            count_type: "VEHICLES".to_string(),
            traffic_direction_seq: 1,
            cardinal_direction_seq: 3,
            classification_type: None,
            traffic_count: count,
        }
    }

    async fn sqlite() -> Box<dyn Database> {
        let db = switchy_database_connection::init_sqlite_rusqlite(None).unwrap();
        db.exec_raw(
            "CREATE TABLE station_reference (
                station_key TEXT PRIMARY KEY,
                station_id TEXT NOT NULL,
                lga TEXT,
                suburb TEXT,
                road_name TEXT,
                wgs84_latitude REAL NOT NULL,
                wgs84_longitude REAL NOT NULL
            )",
        )
        .await
        .unwrap();
        db.exec_raw(
            "CREATE TABLE yearly_summary (
                station_key TEXT NOT NULL,
                year INTEGER NOT NULL,
                period TEXT NOT NULL,
                count_type TEXT NOT NULL,
                classification_type TEXT,
                traffic_direction_seq INTEGER NOT NULL,
                cardinal_direction_seq INTEGER NOT NULL,
                traffic_count INTEGER NOT NULL,
                UNIQUE (station_key, year, period, count_type,
                        traffic_direction_seq, cardinal_direction_seq)
            )",
        )
        .await
        .unwrap();
        db
    }

    async fn count(db: &dyn Database, table: &str) -> i64 {
        let rows = db
            .query_raw_params(&format!("SELECT COUNT(*) AS count FROM {table}"), &[])
            .await
            .unwrap();
        rows[0].to_value("count").unwrap()
    }

    #[test]
    fn station_statement_builds_point_from_bound_coordinates() {
        let sql = Upserter::new("bcc_traffic.station_reference")
            .statement::<StationReference>()
            .unwrap();

        assert_eq!(
            sql,
            "INSERT INTO bcc_traffic.station_reference \
             (station_key, station_id, lga, suburb, road_name, wgs84_latitude, wgs84_longitude, geom) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, ST_SetSRID(ST_MakePoint($7, $6), 4326)) \
             ON CONFLICT (station_key) DO UPDATE SET \
             station_id = EXCLUDED.station_id, lga = EXCLUDED.lga, suburb = EXCLUDED.suburb, \
             road_name = EXCLUDED.road_name, wgs84_latitude = EXCLUDED.wgs84_latitude, \
             wgs84_longitude = EXCLUDED.wgs84_longitude, geom = EXCLUDED.geom"
        );
    }

    #[test]
    fn yearly_statement_uses_composite_key() {
        let sql = Upserter::new("bcc_traffic.yearly_summary")
            .statement::<YearlySummary>()
            .unwrap();

        assert!(sql.contains(
            "ON CONFLICT (station_key, year, period, count_type, traffic_direction_seq, cardinal_direction_seq)"
        ));
        assert!(sql.ends_with(
            "DO UPDATE SET classification_type = EXCLUDED.classification_type, \
             traffic_count = EXCLUDED.traffic_count"
        ));
    }

    #[test]
    fn statement_rejects_invalid_table() {
        assert!(
            Upserter::new("x; DROP TABLE y")
                .statement::<YearlySummary>()
                .is_err()
        );
    }

    #[tokio::test]
    async fn same_key_twice_leaves_one_row_with_latest_values() {
        let db = sqlite().await;
        let upserter = Upserter::new("station_reference").without_geometry();

        upserter
            .upsert(db.as_ref(), &[station("57299", "T1", -33.70)])
            .await
            .unwrap();
        upserter
            .upsert(db.as_ref(), &[station("57299", "T2", -33.80)])
            .await
            .unwrap();

        assert_eq!(count(db.as_ref(), "station_reference").await, 1);

        let rows = db
            .query_raw_params(
                "SELECT station_key, station_id, wgs84_latitude FROM station_reference",
                &[],
            )
            .await
            .unwrap();
        let key: String = rows[0].to_value("station_key").unwrap();
        let station_id: String = rows[0].to_value("station_id").unwrap();
        let lat: f64 = rows[0].to_value("wgs84_latitude").unwrap();
        assert_eq!(key, "57299");
        assert_eq!(station_id, "T2");
        assert!((lat + 33.80).abs() < 1e-9);
    }

    #[tokio::test]
    async fn different_keys_produce_two_rows() {
        let db = sqlite().await;
        let upserter = Upserter::new("yearly_summary");

        let executed = upserter
            .upsert(
                db.as_ref(),
                &[summary("57299", 2019, 100), summary("57299", 2020, 200)],
            )
            .await
            .unwrap();

        assert_eq!(executed, 2);
        assert_eq!(count(db.as_ref(), "yearly_summary").await, 2);
    }

    #[tokio::test]
    async fn composite_key_conflict_overwrites_mutable_columns_only() {
        let db = sqlite().await;
        let upserter = Upserter::new("yearly_summary");

        upserter
            .upsert(
                db.as_ref(),
                &[summary("57299", 2019, 100), summary("57299", 2019, 150)],
            )
            .await
            .unwrap();

        assert_eq!(count(db.as_ref(), "yearly_summary").await, 1);
        let rows = db
            .query_raw_params("SELECT year, traffic_count FROM yearly_summary", &[])
            .await
            .unwrap();
        let year: i64 = rows[0].to_value("year").unwrap();
        let traffic: i64 = rows[0].to_value("traffic_count").unwrap();
        assert_eq!(year, 2019);
        assert_eq!(traffic, 150);
    }

    #[tokio::test]
    async fn store_error_is_surfaced() {
        let db = sqlite().await;
        let err = Upserter::new("no_such_table")
            .upsert(db.as_ref(), &[summary("1", 2019, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Database(_)));

        let upserted = Upserter::new("yearly_summary")
            .upsert::<YearlySummary>(db.as_ref(), &[])
            .await
            .unwrap();
        assert_eq!(upserted, 0);
        assert_eq!(count(db.as_ref(), "yearly_summary").await, 0);
    }
}
