//! Completeness checker.
//!
//! Compares what the ledger says was imported for each recent window
//! against what the feature service reports for the same window today.
//! The service keeps receiving late detections for a few days, so windows
//! imported early come up short and are flagged for a reload.
//!
//! A window imported in several pages has one ledger row per page; the
//! rows are summed before comparing.

use std::collections::HashMap;

use hotspot_sync_acquisition_models::{
    AcquisitionWindow, CheckFailure, CheckReport, CountAnomaly, ReloadCandidate,
};
use hotspot_sync_database_models::AcquisitionControlRecord;
use hotspot_sync_wfs::FeatureSource;

use crate::AcquisitionError;
use crate::ledger::AcquisitionLedger;

/// Open ledger rows sharing one window.
#[derive(Debug)]
struct WindowRows {
    window: AcquisitionWindow,
    ids: Vec<i64>,
    imported: u64,
}

/// Groups rows by window, keeping the order in which windows first appear.
fn group_by_window(rows: Vec<AcquisitionControlRecord>) -> Vec<WindowRows> {
    let mut groups: Vec<WindowRows> = Vec::new();
    let mut index: HashMap<AcquisitionWindow, usize> = HashMap::new();

    for row in rows {
        let Some(window) = row.window() else {
            log::warn!(
                "Ledger row {} has inverted dates ({} > {}), skipping",
                row.id,
                row.start_date,
                row.end_date
            );
            continue;
        };

        let slot = *index.entry(window).or_insert_with(|| {
            groups.push(WindowRows {
                window,
                ids: Vec::new(),
                imported: 0,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        group.ids.push(row.id);
        group.imported = group.imported.saturating_add(row.num_rows);
    }

    groups
}

/// Examines the `lookback` most recent open windows in the ledger.
///
/// A window is flagged when the sum of its open rows is below the
/// service's count; the flag carries the service count so the reload can
/// be verified against it. A window above the service count is reported as
/// an anomaly and never flagged. A failed count query is logged and
/// recorded for that window only; the sweep continues.
///
/// # Errors
///
/// Returns [`AcquisitionError::Database`] if the ledger cannot be read.
pub async fn find_incomplete_windows<L, S>(
    ledger: &L,
    source: &mut S,
    lookback: u32,
) -> Result<CheckReport, AcquisitionError>
where
    L: AcquisitionLedger + ?Sized,
    S: FeatureSource + ?Sized,
{
    let groups = group_by_window(ledger.recent_open_rows(lookback).await?);
    log::info!("Checking {} window(s) for completeness", groups.len());

    let mut report = CheckReport {
        examined: groups.len(),
        ..CheckReport::default()
    };

    for WindowRows {
        window,
        ids,
        imported,
    } in groups
    {
        let official = match source.count(window).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("Count for {window} failed: {e}");
                report.failures.push(CheckFailure {
                    ids,
                    window,
                    message: e.to_string(),
                });
                continue;
            }
        };

        match imported.cmp(&official) {
            std::cmp::Ordering::Less => {
                log::info!("{window}: {imported} of {official} rows, needs reload");
                report.flagged.push(ReloadCandidate {
                    ids,
                    window,
                    imported_rows: imported,
                    official_rows: official,
                });
            }
            std::cmp::Ordering::Greater => {
                log::warn!(
                    "{window}: {imported} rows imported but service reports {official}"
                );
                report.anomalies.push(CountAnomaly {
                    ids,
                    window,
                    imported_rows: imported,
                    official_rows: official,
                });
            }
            std::cmp::Ordering::Equal => {
                log::debug!("{window}: complete ({imported} rows)");
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::testing::{FakeLedger, FakeSource};

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn row(id: i64, start: &str, end: &str, num_rows: u64) -> AcquisitionControlRecord {
        AcquisitionControlRecord {
            id,
            start_date: day(start),
            end_date: day(end),
            num_rows,
            reloaded: false,
            processed_at: None,
            origin_data: None,
        }
    }

    #[tokio::test]
    async fn flags_short_window_with_official_count() {
        let ledger = FakeLedger::with_rows(vec![row(7, "2024-05-01", "2024-05-01", 120)]);
        let mut source = FakeSource::default();
        source.set_count(AcquisitionWindow::single_day(day("2024-05-01")), 150);

        let report = find_incomplete_windows(&ledger, &mut source, 10)
            .await
            .unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(
            report.flagged,
            vec![ReloadCandidate {
                ids: vec![7],
                window: AcquisitionWindow::single_day(day("2024-05-01")),
                imported_rows: 120,
                official_rows: 150,
            }]
        );
    }

    #[tokio::test]
    async fn complete_multi_page_window_is_not_flagged() {
        let ledger = FakeLedger::with_rows(vec![
            row(3, "2024-05-01", "2024-05-01", 3_500),
            row(2, "2024-05-01", "2024-05-01", 10_000),
            row(1, "2024-05-01", "2024-05-01", 10_000),
        ]);
        let mut source = FakeSource::default();
        source.set_count(AcquisitionWindow::single_day(day("2024-05-01")), 23_500);

        let report = find_incomplete_windows(&ledger, &mut source, 5)
            .await
            .unwrap();

        assert_eq!(report.examined, 1);
        assert!(report.flagged.is_empty());
        assert!(report.anomalies.is_empty());
        assert_eq!(source.count_calls(), 1);
    }

    #[tokio::test]
    async fn short_multi_page_window_is_flagged_once_with_every_row() {
        let ledger = FakeLedger::with_rows(vec![
            row(5, "2024-05-01", "2024-05-01", 3_400),
            row(4, "2024-05-01", "2024-05-01", 10_000),
            row(3, "2024-05-01", "2024-05-01", 10_000),
        ]);
        let mut source = FakeSource::default();
        source.set_count(AcquisitionWindow::single_day(day("2024-05-01")), 23_500);

        let report = find_incomplete_windows(&ledger, &mut source, 5)
            .await
            .unwrap();

        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].ids, vec![5, 4, 3]);
        assert_eq!(report.flagged[0].imported_rows, 23_400);
    }

    #[tokio::test]
    async fn equal_and_excess_counts_are_not_flagged() {
        let ledger = FakeLedger::with_rows(vec![
            row(1, "2024-05-02", "2024-05-02", 80),
            row(2, "2024-05-01", "2024-05-01", 90),
        ]);
        let mut source = FakeSource::default();
        source.set_count(AcquisitionWindow::single_day(day("2024-05-02")), 80);
        source.set_count(AcquisitionWindow::single_day(day("2024-05-01")), 85);

        let report = find_incomplete_windows(&ledger, &mut source, 10)
            .await
            .unwrap();

        assert!(report.flagged.is_empty());
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].ids, vec![2]);
    }

    #[tokio::test]
    async fn count_failure_skips_only_that_window() {
        let ledger = FakeLedger::with_rows(vec![
            row(3, "2024-05-03", "2024-05-03", 10),
            row(2, "2024-05-02", "2024-05-02", 10),
            row(1, "2024-05-01", "2024-05-01", 10),
        ]);
        let mut source = FakeSource::default();
        source.set_count(AcquisitionWindow::single_day(day("2024-05-03")), 12);
        source.fail_count(AcquisitionWindow::single_day(day("2024-05-02")));
        source.set_count(AcquisitionWindow::single_day(day("2024-05-01")), 11);

        let report = find_incomplete_windows(&ledger, &mut source, 10)
            .await
            .unwrap();

        assert_eq!(report.examined, 3);
        let flagged: Vec<Vec<i64>> = report.flagged.iter().map(|c| c.ids.clone()).collect();
        assert_eq!(flagged, vec![vec![3], vec![1]]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].ids, vec![2]);
    }

    #[tokio::test]
    async fn lookback_counts_windows() {
        let ledger = FakeLedger::with_rows(vec![
            row(4, "2024-05-03", "2024-05-03", 1),
            row(3, "2024-05-03", "2024-05-03", 1),
            row(2, "2024-05-02", "2024-05-02", 1),
            row(1, "2024-05-01", "2024-05-01", 1),
        ]);
        let mut source = FakeSource::default();

        let report = find_incomplete_windows(&ledger, &mut source, 2)
            .await
            .unwrap();

        assert_eq!(report.examined, 2);
        assert_eq!(source.count_calls(), 2);
    }
}
