//! Database connection utilities.

use std::time::Duration;

use switchy_database::Database;
use switchy_database_connection::Credentials;

use crate::DbError;

/// Opens a `PostGIS` connection.
///
/// Sets `statement_timeout` so a stalled query fails with an error instead
/// of hanging the run.
///
/// # Errors
///
/// Returns [`DbError::Connection`] if the URL cannot be parsed or the
/// connection fails, or [`DbError::Database`] if the timeout cannot be set.
pub async fn connect(url: &str, statement_timeout: Duration) -> Result<Box<dyn Database>, DbError> {
    // Strip query parameters (e.g. ?sslmode=require) that the Credentials
    // parser doesn't understand. TLS is handled by the native-tls connector.
    let url_base = url.split('?').next().unwrap_or(url);

    let creds = Credentials::from_url(url_base).map_err(|e| DbError::Connection {
        message: format!("Invalid database URL: {e}"),
    })?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection {
            message: e.to_string(),
        })?;

    db.exec_raw(&format!(
        "SET statement_timeout = '{}s'",
        statement_timeout.as_secs().max(1)
    ))
    .await?;

    log::debug!("Connected to {}", redact(url_base));

    Ok(db)
}

/// Replaces the password in a connection URL for logging.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    let user = userinfo.split(':').next().unwrap_or(userinfo);
    format!("{scheme}://{user}:***@{host}")
}
