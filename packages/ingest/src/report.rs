//! Remote count vs stored row count.

use planning_etl_database::tables::table_count;
use planning_etl_source_models::CountCheck;
use switchy_database::Database;

use crate::EtlError;

/// Counts the rows stored in `table` and reports them against `api` with
/// [`report_count`].
///
/// # Errors
///
/// Returns [`EtlError::Database`] if the table cannot be counted, or
/// [`EtlError::CountMismatch`] as [`report_count`] does.
pub async fn report_stored_count(
    db: &dyn Database,
    name: &str,
    table: &str,
    api: Option<u64>,
    strict: bool,
) -> Result<CountCheck, EtlError> {
    let stored = table_count(db, table).await?;
    report_count(name, api, stored, strict)
}

/// Compares the count a source reported with the rows stored for it and
/// logs `API = a | DB = b | Match = m`.
///
/// A mismatch is only an error when `strict` is set; a negative `stored`
/// (never produced by `COUNT(*)`) counts as zero.
///
/// # Errors
///
/// Returns [`EtlError::CountMismatch`] if `strict` is set and the counts
/// differ.
pub fn report_count(
    name: &str,
    api: Option<u64>,
    stored: i64,
    strict: bool,
) -> Result<CountCheck, EtlError> {
    let stored = u64::try_from(stored).unwrap_or(0);
    let check = CountCheck::compare(api, stored);

    match check {
        CountCheck::Unavailable => {
            log::info!("{name}: API count unavailable -> DB = {stored}");
        }
        CountCheck::Match => {
            log::info!("{name}: API = {stored} | DB = {stored} | Match = true");
        }
        CountCheck::Mismatch { expected, actual } => {
            log::warn!("{name}: API = {expected} | DB = {actual} | Match = false");
            if strict {
                return Err(EtlError::CountMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }
        }
    }

    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_counts() {
        assert_eq!(
            report_count("bus stops", Some(1520), 1520, true).unwrap(),
            CountCheck::Match
        );
    }

    #[test]
    fn missing_api_count_is_reported_not_failed() {
        assert_eq!(
            report_count("paths", None, 42, true).unwrap(),
            CountCheck::Unavailable
        );
    }

    #[test]
    fn mismatch_only_fails_when_strict() {
        assert!(
            report_count("paths", Some(10), 9, false)
                .unwrap()
                .is_mismatch()
        );

        let err = report_count("paths", Some(10), 9, true).unwrap_err();
        assert_eq!(err.to_string(), "paths: API = 10 | DB = 9");
    }

    async fn sqlite_with_paths(rows: usize) -> Box<dyn Database> {
        let db = switchy_database_connection::init_sqlite_rusqlite(None).unwrap();
        db.exec_raw("CREATE TABLE raw_paths (fid INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        for _ in 0..rows {
            db.exec_raw("INSERT INTO raw_paths DEFAULT VALUES")
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn stored_rows_are_counted() {
        let db = sqlite_with_paths(3).await;

        let check = report_stored_count(db.as_ref(), "paths", "raw_paths", Some(3), true)
            .await
            .unwrap();

        assert_eq!(check, CountCheck::Match);
    }

    #[tokio::test]
    async fn failed_count_is_an_error_not_a_mismatch() {
        let db = sqlite_with_paths(0).await;

        let err = report_stored_count(db.as_ref(), "paths", "missing_paths", Some(3), true)
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Database(_)), "{err}");
    }
}
