//! Entry points: acquire the current window, reconcile past windows,
//! backfill an explicit window, or just check completeness.

use std::path::PathBuf;

use chrono::NaiveDate;
use hotspot_sync_acquisition_models::{AcquisitionWindow, RunKind, RunSummary, WindowOutcome};
use hotspot_sync_wfs::FeatureSource;

use crate::AcquisitionError;
use crate::checker::find_incomplete_windows;
use crate::importer::BatchImporter;
use crate::ledger::AcquisitionLedger;
use crate::period::next_window;

/// Drives downloads and imports, one window at a time.
pub struct UpdateOrchestrator<S, L, I> {
    source: S,
    ledger: L,
    importer: I,
    output_dir: PathBuf,
}

impl<S, L, I> UpdateOrchestrator<S, L, I>
where
    S: FeatureSource,
    L: AcquisitionLedger,
    I: BatchImporter,
{
    /// Creates an orchestrator writing page archives under `output_dir`.
    pub fn new(source: S, ledger: L, importer: I, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            ledger,
            importer,
            output_dir: output_dir.into(),
        }
    }

    /// Acquires the window that is due on `today`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Database`] if the ledger cannot be read.
    /// Download and import failures are reported in the summary.
    pub async fn acquire_current(
        &mut self,
        today: NaiveDate,
    ) -> Result<RunSummary, AcquisitionError> {
        let mut summary = RunSummary::new(RunKind::AcquireCurrent);

        let due = next_window(&self.ledger, today).await?;
        match due {
            Some(window) => summary.push(self.acquire_window(window, &[], None).await),
            None => summary.push(WindowOutcome::NothingDue),
        }

        Ok(summary)
    }

    /// Acquires an operator-supplied window.
    ///
    /// Open ledger rows already recorded for exactly this window are
    /// superseded: they are closed by the last imported page, so the
    /// window is never counted twice.
    ///
    /// # Errors
    ///
    /// * [`AcquisitionError::InvalidWindow`] if the window is not entirely
    ///   before `today`.
    /// * [`AcquisitionError::Database`] if the ledger cannot be read.
    pub async fn backfill(
        &mut self,
        window: AcquisitionWindow,
        today: NaiveDate,
    ) -> Result<RunSummary, AcquisitionError> {
        if window.end_date() >= today {
            return Err(AcquisitionError::InvalidWindow(format!(
                "window {window} must end before today ({today})"
            )));
        }

        let superseded = self.ledger.open_row_ids(window).await?;
        if !superseded.is_empty() {
            log::info!("{window} already has ledger rows {superseded:?}, they will be superseded");
        }

        let mut summary = RunSummary::new(RunKind::Backfill);
        summary.push(self.acquire_window(window, &superseded, None).await);
        Ok(summary)
    }

    /// Re-acquires every recent window whose stored count fell short.
    ///
    /// A window's open ledger rows are closed only if the fresh download
    /// has exactly the count captured when the window was flagged;
    /// otherwise nothing is imported and the next sweep tries again.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Database`] if the ledger cannot be read.
    pub async fn reconcile_past(&mut self, lookback: u32) -> Result<RunSummary, AcquisitionError> {
        let mut summary = RunSummary::new(RunKind::ReconcilePast);
        let report = find_incomplete_windows(&self.ledger, &mut self.source, lookback).await?;

        for failure in report.failures {
            summary.push(WindowOutcome::Skipped {
                ids: failure.ids,
                window: failure.window,
                reason: failure.message,
            });
        }

        if report.flagged.is_empty() {
            log::info!("All {} checked window(s) are complete", report.examined);
        }

        for candidate in &report.flagged {
            let outcome = self
                .acquire_window(
                    candidate.window,
                    &candidate.ids,
                    Some(candidate.official_rows),
                )
                .await;
            summary.push(outcome);
        }

        Ok(summary)
    }

    /// Reports incomplete windows without reloading them.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Database`] if the ledger cannot be read.
    pub async fn check(&mut self, lookback: u32) -> Result<RunSummary, AcquisitionError> {
        let mut summary = RunSummary::new(RunKind::Check);
        let report = find_incomplete_windows(&self.ledger, &mut self.source, lookback).await?;

        for candidate in report.flagged {
            summary.push(WindowOutcome::Incomplete {
                ids: candidate.ids,
                window: candidate.window,
                imported: candidate.imported_rows,
                official: candidate.official_rows,
            });
        }
        for failure in report.failures {
            summary.push(WindowOutcome::Skipped {
                ids: failure.ids,
                window: failure.window,
                reason: failure.message,
            });
        }

        Ok(summary)
    }

    /// Downloads `window` and imports its pages in order.
    ///
    /// `supersedes` are the open ledger rows this acquisition replaces.
    /// Only the last page closes them, so they stay open unless every page
    /// commits. With `expected_rows` set, nothing is imported unless the
    /// download matches that count.
    async fn acquire_window(
        &mut self,
        window: AcquisitionWindow,
        supersedes: &[i64],
        expected_rows: Option<u64>,
    ) -> WindowOutcome {
        let download = match self.source.download(window, &self.output_dir).await {
            Ok(d) => d,
            Err(e) => {
                log::error!("Download of {window} failed: {e}");
                return WindowOutcome::Failed {
                    window,
                    message: e.to_string(),
                };
            }
        };

        if download.rows == 0 || download.pages.is_empty() {
            log::info!("No records at source for {window}");
            return WindowOutcome::Empty { window };
        }

        if let Some(expected) = expected_rows.filter(|n| *n != download.rows) {
            log::warn!(
                "Source count for {window} moved from {expected} to {} since the check, \
                 leaving ledger rows {supersedes:?} for the next sweep",
                download.rows
            );
            return WindowOutcome::CountChanged {
                ids: supersedes.to_vec(),
                window,
                expected,
                downloaded: download.rows,
            };
        }

        let default_crs = self.source.default_crs().await;
        let last = download.pages.len() - 1;

        for (idx, page) in download.pages.iter().enumerate() {
            let closes = if idx == last { supersedes } else { &[] };
            if let Err(e) = self
                .importer
                .import_file(page, window, default_crs, closes)
                .await
            {
                log::error!("{window}: {e}");
                return WindowOutcome::Failed {
                    window,
                    message: e.to_string(),
                };
            }
        }

        let pages = download.page_count;
        if supersedes.is_empty() {
            WindowOutcome::Imported {
                window,
                rows: download.rows,
                pages,
            }
        } else {
            WindowOutcome::Reloaded {
                ids: supersedes.to_vec(),
                window,
                rows: download.rows,
                pages,
            }
        }
    }
}
