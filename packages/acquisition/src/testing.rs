//! In-memory fakes for the feature service, ledger, and importer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use hotspot_sync_acquisition_models::AcquisitionWindow;
use hotspot_sync_database::DbError;
use hotspot_sync_database_models::AcquisitionControlRecord;
use hotspot_sync_wfs::{DownloadResult, FeatureSource, WfsError, plan_pages};

use crate::AcquisitionError;
use crate::importer::{BatchImporter, ImportSummary};
use crate::ledger::AcquisitionLedger;

#[derive(Default)]
pub struct FakeSource {
    counts: BTreeMap<AcquisitionWindow, u64>,
    failing_counts: BTreeSet<AcquisitionWindow>,
    failing_downloads: BTreeSet<AcquisitionWindow>,
    pub page_limit: u64,
    pub download_count_override: Option<u64>,
    count_calls: usize,
    download_calls: usize,
}

impl FakeSource {
    pub fn set_count(&mut self, window: AcquisitionWindow, count: u64) {
        self.counts.insert(window, count);
    }

    pub fn fail_count(&mut self, window: AcquisitionWindow) {
        self.failing_counts.insert(window);
    }

    pub fn fail_download(&mut self, window: AcquisitionWindow) {
        self.failing_downloads.insert(window);
    }

    pub const fn count_calls(&self) -> usize {
        self.count_calls
    }

    pub const fn download_calls(&self) -> usize {
        self.download_calls
    }
}

#[async_trait]
impl FeatureSource for FakeSource {
    async fn count(&mut self, window: AcquisitionWindow) -> Result<u64, WfsError> {
        self.count_calls += 1;
        if self.failing_counts.contains(&window) {
            return Err(WfsError::ServiceUnavailable {
                message: "hits query timed out".to_string(),
            });
        }
        Ok(self.counts.get(&window).copied().unwrap_or(0))
    }

    async fn download(
        &mut self,
        window: AcquisitionWindow,
        output_dir: &Path,
    ) -> Result<DownloadResult, WfsError> {
        self.download_calls += 1;
        if self.failing_downloads.contains(&window) {
            return Err(WfsError::ServiceUnavailable {
                message: "page 1 returned HTTP 503".to_string(),
            });
        }

        let rows = self
            .download_count_override
            .unwrap_or_else(|| self.counts.get(&window).copied().unwrap_or(0));
        let limit = if self.page_limit == 0 {
            10_000
        } else {
            self.page_limit
        };
        let prefix = output_dir.join(format!(
            "focos_{}_{}",
            window.start_date(),
            window.end_date()
        ));
        let pages: Vec<PathBuf> = plan_pages(rows, limit)
            .iter()
            .enumerate()
            .map(|(i, _)| PathBuf::from(format!("{}_part{}.zip", prefix.display(), i + 1)))
            .collect();

        Ok(DownloadResult {
            rows,
            prefix,
            page_count: pages.len() as u64,
            pages,
        })
    }

    async fn default_crs(&mut self) -> u32 {
        4674
    }
}

#[derive(Default)]
pub struct FakeLedger {
    max_end: Option<NaiveDate>,
    rows: Vec<AcquisitionControlRecord>,
}

impl FakeLedger {
    pub fn with_max(max_end: NaiveDate) -> Self {
        Self {
            max_end: Some(max_end),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(rows: Vec<AcquisitionControlRecord>) -> Self {
        Self {
            max_end: rows.iter().map(|r| r.end_date).max(),
            rows,
        }
    }
}

#[async_trait]
impl AcquisitionLedger for FakeLedger {
    async fn max_end_date(&self) -> Result<Option<NaiveDate>, DbError> {
        Ok(self.max_end)
    }

    async fn recent_open_rows(
        &self,
        limit: u32,
    ) -> Result<Vec<AcquisitionControlRecord>, DbError> {
        let open = self.rows.iter().filter(|r| !r.reloaded);
        let mut windows: Vec<(NaiveDate, NaiveDate)> = Vec::new();
        for row in open.clone() {
            let key = (row.start_date, row.end_date);
            if !windows.contains(&key) {
                windows.push(key);
            }
        }
        windows.truncate(limit as usize);

        Ok(windows
            .iter()
            .flat_map(|key| {
                open.clone()
                    .filter(move |r| (r.start_date, r.end_date) == *key)
                    .cloned()
            })
            .collect())
    }

    async fn open_row_ids(&self, window: AcquisitionWindow) -> Result<Vec<i64>, DbError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| !r.reloaded && r.window() == Some(window))
            .map(|r| r.id)
            .collect())
    }
}

#[derive(Default)]
pub struct FakeImporter {
    calls: Mutex<Vec<(String, u32, Vec<i64>)>>,
    fail_suffix: Option<String>,
}

impl FakeImporter {
    pub fn fail_on(&mut self, suffix: &str) {
        self.fail_suffix = Some(suffix.to_string());
    }

    pub fn calls(&self) -> Vec<(String, u32, Vec<i64>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchImporter for FakeImporter {
    async fn import_file(
        &self,
        file: &Path,
        _window: AcquisitionWindow,
        default_crs: u32,
        reloaded_ids: &[i64],
    ) -> Result<ImportSummary, AcquisitionError> {
        let name = file.display().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((name.clone(), default_crs, reloaded_ids.to_vec()));

        if self
            .fail_suffix
            .as_deref()
            .is_some_and(|suffix| name.ends_with(suffix))
        {
            return Err(AcquisitionError::DataImport {
                file: name,
                source: DbError::Conversion {
                    message: "merge failed".to_string(),
                },
            });
        }

        Ok(ImportSummary {
            file: file.to_path_buf(),
            staged: 1,
            merged: 1,
            ledger: None,
            reloaded: reloaded_ids.to_vec(),
        })
    }
}
