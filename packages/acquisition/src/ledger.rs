//! Read access to the acquisition ledger.

use async_trait::async_trait;
use chrono::NaiveDate;
use hotspot_sync_acquisition_models::AcquisitionWindow;
use hotspot_sync_database::{DbError, ledger};
use hotspot_sync_database_models::AcquisitionControlRecord;
use switchy_database::Database;

/// The ledger queries the resolver, the checker, and backfills need.
#[async_trait]
pub trait AcquisitionLedger: Send + Sync {
    /// Latest `end_date` recorded, or `None` if nothing was imported yet.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger cannot be read.
    async fn max_end_date(&self) -> Result<Option<NaiveDate>, DbError>;

    /// Open rows of the `limit` most recently processed open windows,
    /// newest window first. Every open row of a returned window is
    /// included.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger cannot be read.
    async fn recent_open_rows(&self, limit: u32)
    -> Result<Vec<AcquisitionControlRecord>, DbError>;

    /// Ids of the open rows recorded for exactly `window`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger cannot be read.
    async fn open_row_ids(&self, window: AcquisitionWindow) -> Result<Vec<i64>, DbError>;
}

/// [`AcquisitionLedger`] over the `acquisition_data_control` table.
pub struct DatabaseLedger<'a> {
    db: &'a dyn Database,
}

impl<'a> DatabaseLedger<'a> {
    /// Wraps a database handle.
    #[must_use]
    pub const fn new(db: &'a dyn Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AcquisitionLedger for DatabaseLedger<'_> {
    async fn max_end_date(&self) -> Result<Option<NaiveDate>, DbError> {
        ledger::max_end_date(self.db).await
    }

    async fn recent_open_rows(
        &self,
        limit: u32,
    ) -> Result<Vec<AcquisitionControlRecord>, DbError> {
        ledger::recent_open_rows(self.db, limit).await
    }

    async fn open_row_ids(&self, window: AcquisitionWindow) -> Result<Vec<i64>, DbError> {
        ledger::open_row_ids(self.db, window.start_date(), window.end_date()).await
    }
}
