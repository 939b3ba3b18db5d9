//! Database connection utilities.

use switchy_database::Database;
use switchy_database_connection::Credentials;

use crate::DbError;

/// Opens a connection to the `PostGIS` database at `url`.
///
/// Configures a `statement_timeout` so a stalled merge fails with an error
/// instead of holding the batch transaction open forever.
///
/// # Errors
///
/// Returns [`DbError::Connection`] if the URL cannot be parsed or the
/// server cannot be reached.
pub async fn connect(url: &str) -> Result<Box<dyn Database>, DbError> {
    // Strip query parameters (e.g. ?sslmode=require) that the Credentials
    // parser doesn't understand. TLS is handled by the native-tls connector.
    let url_base = url.split('?').next().unwrap_or(url);

    let creds = Credentials::from_url(url_base).map_err(|e| DbError::Connection {
        message: format!("invalid database URL: {e}"),
    })?;
    let db = switchy_database_connection::init_postgres_raw_native_tls(creds)
        .await
        .map_err(|e| DbError::Connection {
            message: e.to_string(),
        })?;

    db.exec_raw("SET statement_timeout = '600s'").await?;

    log::debug!("Connected to database");
    Ok(db)
}
