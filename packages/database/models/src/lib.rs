#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Row types for the acquisition ledger.
//!
//! The ledger (`acquisition_data_control`) is the durable record of what
//! has been imported and audited. Rows are written once per imported batch
//! and only ever change by having `reloaded` flipped to `true`.

use chrono::{NaiveDate, NaiveDateTime};
use hotspot_sync_acquisition_models::AcquisitionWindow;
use serde::{Deserialize, Serialize};

/// One row of the acquisition ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionControlRecord {
    /// Primary key.
    pub id: i64,
    /// Earliest detection day in the imported batch.
    pub start_date: NaiveDate,
    /// Latest detection day in the imported batch.
    pub end_date: NaiveDate,
    /// Rows in the imported batch.
    pub num_rows: u64,
    /// Set once a later reconciliation re-imported this window with a
    /// matching count.
    pub reloaded: bool,
    /// When the batch was committed.
    pub processed_at: Option<NaiveDateTime>,
    /// Free-form tag naming where the batch came from.
    pub origin_data: Option<String>,
}

impl AcquisitionControlRecord {
    /// The window covered by this row, or `None` if the stored dates are
    /// inverted.
    #[must_use]
    pub fn window(&self) -> Option<AcquisitionWindow> {
        AcquisitionWindow::new(self.start_date, self.end_date).ok()
    }
}

/// Summary of a staged batch, as written to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Id of the newly inserted ledger row.
    pub id: i64,
    /// Earliest detection day in the batch.
    pub start_date: NaiveDate,
    /// Latest detection day in the batch.
    pub end_date: NaiveDate,
    /// Rows in the batch.
    pub num_rows: u64,
}
