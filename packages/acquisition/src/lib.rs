#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Hotspot acquisition and completeness reconciliation.
//!
//! Two scheduled entry points drive the pipeline:
//!
//! * **acquire-current** asks the [`period`] resolver which window is due,
//!   downloads it page by page, and hands each page to the [`importer`].
//! * **reconcile-past** runs the completeness [`checker`] over the most
//!   recent ledger windows and re-acquires every window whose summed stored
//!   count fell short of the service's count, closing the window's old
//!   ledger rows once the reload is complete.
//!
//! The [`orchestrator::UpdateOrchestrator`] ties these together and reports
//! one [`WindowOutcome`](hotspot_sync_acquisition_models::WindowOutcome)
//! per window, so a failure in one window never hides the others.

pub mod checker;
pub mod importer;
pub mod ledger;
pub mod orchestrator;
pub mod period;

#[cfg(test)]
mod testing;

use hotspot_sync_acquisition_models::InvalidWindowError;
use hotspot_sync_database::DbError;
use hotspot_sync_dataset::DatasetError;
use hotspot_sync_wfs::WfsError;

/// Errors surfaced by the acquisition pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// The feature service failed or returned something unusable.
    #[error(transparent)]
    Service(#[from] WfsError),

    /// A downloaded batch could not be read.
    #[error("Unreadable batch {file}: {source}")]
    DataFormat {
        /// Batch file.
        file: String,
        /// Decode failure.
        source: DatasetError,
    },

    /// Writing a batch to the database failed; its transaction was rolled
    /// back.
    #[error("Import of {file} failed: {source}")]
    DataImport {
        /// Batch file.
        file: String,
        /// Database failure.
        source: DbError,
    },

    /// Connection, migration, or ledger query failure outside a batch.
    #[error(transparent)]
    Database(#[from] DbError),

    /// An operator-supplied window is invalid.
    #[error("{0}")]
    InvalidWindow(String),
}

impl From<InvalidWindowError> for AcquisitionError {
    fn from(value: InvalidWindowError) -> Self {
        Self::InvalidWindow(value.to_string())
    }
}
