//! Queries against the acquisition ledger (`acquisition_data_control`).
//!
//! Every imported page writes one row dated with the window it was
//! requested for, so all pages of a window share `(start_date, end_date)`
//! and their `num_rows` add up to the window's total.

use chrono::{NaiveDate, NaiveDateTime};
use hotspot_sync_database_models::{AcquisitionControlRecord, LedgerEntry};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

/// Ledger table name.
pub const LEDGER_TABLE: &str = "acquisition_data_control";

fn conversion(column: &str, e: impl std::fmt::Display) -> DbError {
    DbError::Conversion {
        message: format!("Failed to read {column}: {e}"),
    }
}

fn parse_date(raw: &str, column: &str) -> Result<NaiveDate, DbError> {
    raw.parse().map_err(|e| DbError::Conversion {
        message: format!("Invalid {column} {raw:?}: {e}"),
    })
}

fn parse_timestamp(raw: &str, column: &str) -> Result<NaiveDateTime, DbError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map_err(|e| DbError::Conversion {
        message: format!("Invalid {column} {raw:?}: {e}"),
    })
}

fn text_column(row: &Row, column: &str) -> Result<String, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn optional_text_column(row: &Row, column: &str) -> Result<Option<String>, DbError> {
    row.to_value(column).map_err(|e| conversion(column, e))
}

fn id_column(row: &Row) -> Result<i64, DbError> {
    row.to_value("id").map_err(|e| conversion("ledger id", e))
}

fn count_column(row: &Row, column: &str) -> Result<u64, DbError> {
    let raw: i64 = row.to_value(column).map_err(|e| conversion(column, e))?;
    u64::try_from(raw).map_err(|_| DbError::Conversion {
        message: format!("Negative {column}: {raw}"),
    })
}

fn control_record(row: &Row) -> Result<AcquisitionControlRecord, DbError> {
    let reloaded: bool = row
        .to_value("reloaded")
        .map_err(|e| conversion("reloaded", e))?;
    let processed_at = optional_text_column(row, "processed_at")?
        .map(|raw| parse_timestamp(&raw, "processed_at"))
        .transpose()?;

    Ok(AcquisitionControlRecord {
        id: id_column(row)?,
        start_date: parse_date(&text_column(row, "start_date")?, "start_date")?,
        end_date: parse_date(&text_column(row, "end_date")?, "end_date")?,
        num_rows: count_column(row, "num_rows")?,
        reloaded,
        processed_at,
        origin_data: optional_text_column(row, "origin_data")?,
    })
}

/// Latest `end_date` across all ledger rows, or `None` if the ledger is
/// empty.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the date cannot be parsed.
pub async fn max_end_date(db: &dyn Database) -> Result<Option<NaiveDate>, DbError> {
    let rows = db
        .query_raw_params(
            &format!("SELECT MAX(end_date)::text AS max_end FROM {LEDGER_TABLE}"),
            &[],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    optional_text_column(row, "max_end")?
        .map(|d| parse_date(&d, "max_end"))
        .transpose()
}

/// `SELECT` for every open row of the `limit` most recently processed open
/// windows, newest window first, pages of a window in id order.
#[must_use]
pub fn recent_open_rows_sql() -> String {
    format!(
        "WITH recent AS (
             SELECT start_date, end_date,
                    MAX(processed_at) AS last_processed, MAX(id) AS last_id
             FROM {LEDGER_TABLE}
             WHERE NOT reloaded
             GROUP BY start_date, end_date
             ORDER BY last_processed DESC NULLS LAST, last_id DESC
             LIMIT $1
         )
         SELECT c.id, c.start_date::text AS start_date, c.end_date::text AS end_date,
                c.num_rows::bigint AS num_rows, c.reloaded,
                c.processed_at::text AS processed_at, c.origin_data
         FROM {LEDGER_TABLE} c
         JOIN recent r ON r.start_date = c.start_date AND r.end_date = c.end_date
         WHERE NOT c.reloaded
         ORDER BY r.last_processed DESC NULLS LAST, r.last_id DESC, c.id"
    )
}

/// Open rows of the `limit` most recently processed open windows.
///
/// The limit counts windows rather than rows, so a window imported in
/// several pages is always returned whole.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a row cannot be decoded.
pub async fn recent_open_rows(
    db: &dyn Database,
    limit: u32,
) -> Result<Vec<AcquisitionControlRecord>, DbError> {
    let rows = db
        .query_raw_params(
            &recent_open_rows_sql(),
            &[DatabaseValue::Int64(i64::from(limit))],
        )
        .await?;

    rows.iter().map(control_record).collect()
}

/// Ids of the open rows recorded for exactly `start..=end`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or an id cannot be decoded.
pub async fn open_row_ids(
    db: &dyn Database,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<i64>, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT id FROM {LEDGER_TABLE}
                 WHERE NOT reloaded AND start_date = $1::text::date AND end_date = $2::text::date
                 ORDER BY id"
            ),
            &[
                DatabaseValue::String(start.to_string()),
                DatabaseValue::String(end.to_string()),
            ],
        )
        .await?;

    rows.iter().map(id_column).collect()
}

/// Flags a ledger row as superseded by a complete reload.
///
/// # Errors
///
/// * [`DbError::MissingLedgerRow`] if no row has `id`.
/// * [`DbError::Database`] if the update fails.
pub async fn mark_reloaded(db: &dyn Database, id: i64) -> Result<(), DbError> {
    let updated = db
        .exec_raw_params(
            &format!("UPDATE {LEDGER_TABLE} SET reloaded = TRUE WHERE id = $1"),
            &[DatabaseValue::Int64(id)],
        )
        .await?;

    if updated == 0 {
        return Err(DbError::MissingLedgerRow { id });
    }
    Ok(())
}

/// `INSERT` recording the staging table's row count against a window.
#[must_use]
pub fn insert_from_staging_sql(staging_table: &str) -> String {
    format!(
        "INSERT INTO {LEDGER_TABLE} (start_date, end_date, num_rows, reloaded, origin_data)
         SELECT $1::text::date, $2::text::date, COUNT(*), FALSE, $3
         FROM {staging_table}
         HAVING COUNT(*) > 0
         RETURNING id, start_date::text AS start_date, end_date::text AS end_date,
                   num_rows::bigint AS num_rows"
    )
}

/// Writes one ledger row for the batch in the staging table, dated with
/// the window `start..=end` it was requested for.
///
/// Returns `None` without writing when the staging table is empty.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails or the returned row cannot be
/// decoded.
pub async fn insert_from_staging(
    db: &dyn Database,
    staging_table: &str,
    start: NaiveDate,
    end: NaiveDate,
    origin: &str,
) -> Result<Option<LedgerEntry>, DbError> {
    let rows = db
        .query_raw_params(
            &insert_from_staging_sql(staging_table),
            &[
                DatabaseValue::String(start.to_string()),
                DatabaseValue::String(end.to_string()),
                DatabaseValue::String(origin.to_string()),
            ],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    Ok(Some(LedgerEntry {
        id: id_column(row)?,
        start_date: parse_date(&text_column(row, "start_date")?, "start_date")?,
        end_date: parse_date(&text_column(row, "end_date")?, "end_date")?,
        num_rows: count_column(row, "num_rows")?,
    }))
}
