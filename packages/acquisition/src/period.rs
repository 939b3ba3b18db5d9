//! Decides which date window is due for acquisition.
//!
//! The service publishes a day's detections once the day is over, so the
//! newest window ever requested ends yesterday. Windows pick up from the
//! day after the ledger's latest `end_date`.

use chrono::NaiveDate;
use hotspot_sync_acquisition_models::AcquisitionWindow;

use crate::AcquisitionError;
use crate::ledger::AcquisitionLedger;

/// The window due given the ledger's latest `end_date` and today's date.
///
/// * empty ledger: `[yesterday, yesterday]`
/// * `stored_max < yesterday`: `[stored_max + 1, yesterday]`
/// * `stored_max >= yesterday`: `None`, nothing is due
///
/// The returned window never reaches `today`.
#[must_use]
pub fn resolve_window(stored_max: Option<NaiveDate>, today: NaiveDate) -> Option<AcquisitionWindow> {
    let yesterday = today.pred_opt()?;

    let Some(stored_max) = stored_max else {
        return Some(AcquisitionWindow::single_day(yesterday));
    };

    if stored_max > yesterday {
        log::warn!(
            "Ledger already covers {stored_max}, which is not before today ({today}); \
             nothing to acquire"
        );
        return None;
    }

    let start = stored_max.succ_opt()?;
    AcquisitionWindow::new(start, yesterday).ok()
}

/// Reads the ledger and resolves the window due on `today`.
///
/// # Errors
///
/// Returns [`AcquisitionError::Database`] if the ledger cannot be read.
pub async fn next_window<L: AcquisitionLedger + ?Sized>(
    ledger: &L,
    today: NaiveDate,
) -> Result<Option<AcquisitionWindow>, AcquisitionError> {
    let stored_max = ledger.max_end_date().await?;
    let window = resolve_window(stored_max, today);
    match (stored_max, window) {
        (_, Some(w)) => log::info!("Next acquisition window: {w}"),
        (Some(max), None) => log::info!("Ledger is current through {max}, nothing due"),
        (None, None) => {}
    }
    Ok(window)
}
