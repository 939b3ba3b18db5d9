#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Acquisition windows, reconciliation results, and run summaries.
//!
//! These types are shared by the period resolver, the completeness
//! checker, and the update orchestrator. A [`RunSummary`] is the value an
//! entry point hands back to the scheduler: a success flag plus one
//! [`WindowOutcome`] per window touched.

use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Error constructing an [`AcquisitionWindow`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid acquisition window: start {start} is after end {end}")]
pub struct InvalidWindowError {
    /// Requested start date.
    pub start: NaiveDate,
    /// Requested end date.
    pub end: NaiveDate,
}

#[derive(Deserialize)]
struct WindowBounds {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// An inclusive date range used as the filter for one acquisition or
/// reconciliation unit.
///
/// Always satisfies `start_date <= end_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "WindowBounds")]
pub struct AcquisitionWindow {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl AcquisitionWindow {
    /// Creates a window covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidWindowError`] if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidWindowError> {
        if start > end {
            return Err(InvalidWindowError { start, end });
        }
        Ok(Self {
            start_date: start,
            end_date: end,
        })
    }

    /// Creates a window covering exactly one day.
    #[must_use]
    pub const fn single_day(day: NaiveDate) -> Self {
        Self {
            start_date: day,
            end_date: day,
        }
    }

    /// First day of the window.
    #[must_use]
    pub const fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Last day of the window (inclusive).
    #[must_use]
    pub const fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// The day after the window ends, i.e. the exclusive upper bound.
    #[must_use]
    pub fn end_exclusive(&self) -> NaiveDate {
        self.end_date
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Whether `day` falls inside the window.
    #[must_use]
    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

impl TryFrom<WindowBounds> for AcquisitionWindow {
    type Error = InvalidWindowError;

    fn try_from(value: WindowBounds) -> Result<Self, Self::Error> {
        Self::new(value.start_date, value.end_date)
    }
}

impl fmt::Display for AcquisitionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.start_date, self.end_date)
    }
}

/// A window whose open ledger rows add up to less than the authoritative
/// count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadCandidate {
    /// Open ledger rows for the window (one per imported page), all marked
    /// as reloaded once the gap is closed.
    pub ids: Vec<i64>,
    /// The window the ledger rows cover.
    pub window: AcquisitionWindow,
    /// Rows recorded across the window's open ledger rows.
    pub imported_rows: u64,
    /// Rows the service reports now. A reload is only accepted when the
    /// fresh download matches this number exactly.
    pub official_rows: u64,
}

/// A window whose open ledger rows add up to more than the authoritative
/// count.
///
/// Never reloaded; surfaced so an operator can look into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAnomaly {
    /// Open ledger rows for the window.
    pub ids: Vec<i64>,
    /// The window the ledger rows cover.
    pub window: AcquisitionWindow,
    /// Rows recorded across the window's open ledger rows.
    pub imported_rows: u64,
    /// Rows the service reports now.
    pub official_rows: u64,
}

/// A window that could not be evaluated during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    /// Open ledger rows for the window.
    pub ids: Vec<i64>,
    /// The window the ledger rows cover.
    pub window: AcquisitionWindow,
    /// Why the count query failed.
    pub message: String,
}

/// Result of one completeness sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Number of windows examined.
    pub examined: usize,
    /// Windows to reload, most recent first.
    pub flagged: Vec<ReloadCandidate>,
    /// Windows holding more rows than the service reports.
    pub anomalies: Vec<CountAnomaly>,
    /// Windows skipped because the count query failed.
    pub failures: Vec<CheckFailure>,
}

/// Which entry point produced a [`RunSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Acquire the window that is currently due.
    AcquireCurrent,
    /// Re-acquire incomplete past windows.
    ReconcilePast,
    /// Acquire an operator-supplied window.
    Backfill,
    /// Report incomplete windows without reloading.
    Check,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AcquireCurrent => "acquire-current",
            Self::ReconcilePast => "reconcile-past",
            Self::Backfill => "backfill",
            Self::Check => "check",
        })
    }
}

/// What happened to a single window during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WindowOutcome {
    /// The ledger is already up to date with yesterday.
    NothingDue,
    /// The window was downloaded and imported.
    Imported {
        /// Window acquired.
        window: AcquisitionWindow,
        /// Authoritative row count at download time.
        rows: u64,
        /// Number of page files imported.
        pages: u64,
    },
    /// The source reported no records for the window.
    Empty {
        /// Window queried.
        window: AcquisitionWindow,
    },
    /// A window was re-imported and its earlier ledger rows closed.
    Reloaded {
        /// Ledger rows marked as reloaded.
        ids: Vec<i64>,
        /// Window re-acquired.
        window: AcquisitionWindow,
        /// Rows downloaded.
        rows: u64,
        /// Number of page files imported.
        pages: u64,
    },
    /// The re-download disagreed with the flagged count; left for the next
    /// sweep.
    CountChanged {
        /// Ledger rows left open.
        ids: Vec<i64>,
        /// Window re-acquired.
        window: AcquisitionWindow,
        /// Count captured when the window was flagged.
        expected: u64,
        /// Count reported at re-download time.
        downloaded: u64,
    },
    /// The window is short and needs a reload (check-only runs).
    Incomplete {
        /// Open ledger rows for the window.
        ids: Vec<i64>,
        /// Window checked.
        window: AcquisitionWindow,
        /// Rows recorded at import.
        imported: u64,
        /// Rows the service reports now.
        official: u64,
    },
    /// The window could not be evaluated and was skipped for this sweep.
    Skipped {
        /// Open ledger rows for the window.
        ids: Vec<i64>,
        /// Window skipped.
        window: AcquisitionWindow,
        /// Why.
        reason: String,
    },
    /// Download or import failed for the window.
    Failed {
        /// Window attempted.
        window: AcquisitionWindow,
        /// Error description.
        message: String,
    },
}

impl WindowOutcome {
    /// Whether this outcome should fail the run.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for WindowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingDue => write!(f, "nothing due, ledger is current"),
            Self::Imported {
                window,
                rows,
                pages,
            } => write!(f, "{window}: imported {rows} rows in {pages} page(s)"),
            Self::Empty { window } => write!(f, "{window}: no records at source"),
            Self::Reloaded {
                ids,
                window,
                rows,
                pages,
            } => write!(
                f,
                "{window}: reloaded {rows} rows in {pages} page(s), closed ledger rows {}",
                RowIds(ids)
            ),
            Self::CountChanged {
                ids,
                window,
                expected,
                downloaded,
            } => write!(
                f,
                "{window}: source count changed ({expected} -> {downloaded}), ledger rows {} left open",
                RowIds(ids)
            ),
            Self::Incomplete {
                ids,
                window,
                imported,
                official,
            } => write!(
                f,
                "{window}: ledger rows {} hold {imported} of {official} rows",
                RowIds(ids)
            ),
            Self::Skipped { ids, window, reason } => {
                write!(f, "{window}: ledger rows {} skipped ({reason})", RowIds(ids))
            }
            Self::Failed { window, message } => write!(f, "{window}: FAILED: {message}"),
        }
    }
}

/// Comma-separated ledger ids.
struct RowIds<'a>(&'a [i64]);

impl fmt::Display for RowIds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Result of one entry-point invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Entry point that ran.
    pub kind: RunKind,
    /// Per-window outcomes in processing order.
    pub outcomes: Vec<WindowOutcome>,
}

impl RunSummary {
    /// Creates an empty summary.
    #[must_use]
    pub const fn new(kind: RunKind) -> Self {
        Self {
            kind,
            outcomes: Vec::new(),
        }
    }

    /// Records an outcome.
    pub fn push(&mut self, outcome: WindowOutcome) {
        self.outcomes.push(outcome);
    }

    /// `true` unless some window failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(WindowOutcome::is_failure)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() { "succeeded" } else { "failed" };
        writeln!(f, "{} {status}", self.kind)?;
        if self.outcomes.is_empty() {
            writeln!(f, "  no windows to process")?;
        }
        for outcome in &self.outcomes {
            writeln!(f, "  {outcome}")?;
        }
        Ok(())
    }
}
