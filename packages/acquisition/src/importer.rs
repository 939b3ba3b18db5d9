//! Imports one downloaded batch into `PostGIS`.
//!
//! Every batch is written in a single transaction following
//! [`batch_steps`]: replace the staging table, load it, classify each
//! hotspot by biome, merge new hotspots into the canonical table, close the
//! ledger rows being reloaded, and record a ledger row for the batch. Any
//! failure rolls the whole batch back.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hotspot_sync_acquisition_models::AcquisitionWindow;
use hotspot_sync_config::StoreConfig;
use hotspot_sync_database::{DbError, ledger, staging};
use hotspot_sync_database_models::LedgerEntry;
use hotspot_sync_dataset::{Dataset, DatasetReader};
use switchy_database::Database;

use crate::AcquisitionError;

/// What importing one batch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Batch file.
    pub file: PathBuf,
    /// Rows staged from the batch.
    pub staged: u64,
    /// Rows new to the canonical table.
    pub merged: u64,
    /// Ledger row written for the batch (`None` for an empty batch).
    pub ledger: Option<LedgerEntry>,
    /// Ledger rows closed as reloaded.
    pub reloaded: Vec<i64>,
}

/// Imports batch files.
#[async_trait]
pub trait BatchImporter: Send + Sync {
    /// Imports `file`, one page of `window`, assuming `default_crs` when the
    /// batch declares none. The ledger rows in `reloaded_ids` are marked
    /// reloaded in the same transaction.
    ///
    /// # Errors
    ///
    /// * [`AcquisitionError::DataFormat`] if the batch cannot be read.
    /// * [`AcquisitionError::DataImport`] if any database step fails; the
    ///   batch's transaction is rolled back.
    async fn import_file(
        &self,
        file: &Path,
        window: AcquisitionWindow,
        default_crs: u32,
        reloaded_ids: &[i64],
    ) -> Result<ImportSummary, AcquisitionError>;
}

/// One statement group of a batch write, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStep {
    /// Drop and recreate the staging table.
    ReplaceStaging,
    /// Load the batch's hotspots into staging.
    LoadStaging,
    /// Classify staged hotspots by biome.
    EnrichBiomes,
    /// Copy new hotspots into the canonical table.
    MergeHotspots,
    /// Mark a superseded ledger row as reloaded.
    CloseLedgerRow(i64),
    /// Record the batch's own ledger row.
    RecordLedgerRow,
}

/// Steps of a batch write. Superseded rows are closed before the new row
/// is recorded, and both happen after the merge, so a rolled back batch
/// leaves neither merged hotspots nor ledger changes behind.
#[must_use]
pub fn batch_steps(reloaded_ids: &[i64]) -> Vec<BatchStep> {
    let mut steps = vec![
        BatchStep::ReplaceStaging,
        BatchStep::LoadStaging,
        BatchStep::EnrichBiomes,
        BatchStep::MergeHotspots,
    ];
    steps.extend(reloaded_ids.iter().map(|id| BatchStep::CloseLedgerRow(*id)));
    steps.push(BatchStep::RecordLedgerRow);
    steps
}

/// A decoded batch ready to be written.
#[derive(Debug, Clone, Copy)]
pub struct Batch<'b> {
    /// Window the batch was requested for.
    pub window: AcquisitionWindow,
    /// Decoded contents.
    pub dataset: &'b Dataset,
    /// Ledger rows superseded by this batch.
    pub reloaded_ids: &'b [i64],
}

/// Result of writing a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWrite {
    /// Rows staged.
    pub staged: u64,
    /// Rows new to the canonical table.
    pub merged: u64,
    /// Ledger row recorded for the batch.
    pub ledger: Option<LedgerEntry>,
}

/// Writes decoded batches atomically.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Runs [`batch_steps`] for `batch` as one unit.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any step fails; nothing is kept.
    async fn write(&self, batch: Batch<'_>) -> Result<BatchWrite, DbError>;
}

/// [`BatchStore`] writing to `PostGIS` through `switchy_database`.
pub struct PostgisStore<'a> {
    db: &'a dyn Database,
    store: StoreConfig,
    origin: String,
}

impl<'a> PostgisStore<'a> {
    /// Creates a store. `origin` is written to each ledger row's
    /// `origin_data`.
    #[must_use]
    pub fn new(db: &'a dyn Database, store: StoreConfig, origin: impl Into<String>) -> Self {
        Self {
            db,
            store,
            origin: origin.into(),
        }
    }

    async fn run_steps(&self, db: &dyn Database, batch: Batch<'_>) -> Result<BatchWrite, DbError> {
        let store = &self.store;
        let srid = batch.dataset.epsg;
        let mut write = BatchWrite {
            staged: 0,
            merged: 0,
            ledger: None,
        };

        for step in batch_steps(batch.reloaded_ids) {
            match step {
                BatchStep::ReplaceStaging => {
                    staging::replace_staging_table(db, &store.staging_table, srid).await?;
                }
                BatchStep::LoadStaging => {
                    write.staged = staging::insert_staging_rows(
                        db,
                        &store.staging_table,
                        srid,
                        &batch.dataset.records,
                    )
                    .await?;
                }
                BatchStep::EnrichBiomes => {
                    staging::enrich_biomes(db, &store.staging_table, &store.biome_table).await?;
                }
                BatchStep::MergeHotspots => {
                    write.merged =
                        staging::merge_into_hotspots(db, &store.staging_table, &store.hotspot_table)
                            .await?;
                }
                BatchStep::CloseLedgerRow(id) => ledger::mark_reloaded(db, id).await?,
                BatchStep::RecordLedgerRow => {
                    write.ledger = ledger::insert_from_staging(
                        db,
                        &store.staging_table,
                        batch.window.start_date(),
                        batch.window.end_date(),
                        &self.origin,
                    )
                    .await?;
                }
            }
        }

        Ok(write)
    }
}

#[async_trait]
impl BatchStore for PostgisStore<'_> {
    async fn write(&self, batch: Batch<'_>) -> Result<BatchWrite, DbError> {
        let tx = self.db.begin_transaction().await?;

        match self.run_steps(tx.as_ref(), batch).await {
            Ok(write) => {
                tx.commit().await?;
                Ok(write)
            }
            Err(e) => {
                log::error!("Batch for {} failed, rolling back: {e}", batch.window);
                if let Err(rollback) = tx.rollback().await {
                    log::error!("Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

/// [`BatchImporter`] that decodes with a [`DatasetReader`] and writes with
/// a [`BatchStore`].
pub struct Importer<R, W> {
    reader: R,
    store: W,
}

impl<R: DatasetReader, W: BatchStore> Importer<R, W> {
    /// Creates an importer.
    #[must_use]
    pub const fn new(reader: R, store: W) -> Self {
        Self { reader, store }
    }
}

#[async_trait]
impl<R: DatasetReader, W: BatchStore> BatchImporter for Importer<R, W> {
    async fn import_file(
        &self,
        file: &Path,
        window: AcquisitionWindow,
        default_crs: u32,
        reloaded_ids: &[i64],
    ) -> Result<ImportSummary, AcquisitionError> {
        let dataset =
            self.reader
                .read(file, default_crs)
                .map_err(|source| AcquisitionError::DataFormat {
                    file: file.display().to_string(),
                    source,
                })?;

        if dataset.records.is_empty() {
            log::warn!("{} holds no hotspots, nothing to import", file.display());
            if !reloaded_ids.is_empty() {
                log::warn!("Ledger rows {reloaded_ids:?} left open, the reload batch was empty");
            }
            return Ok(ImportSummary {
                file: file.to_path_buf(),
                staged: 0,
                merged: 0,
                ledger: None,
                reloaded: Vec::new(),
            });
        }

        let outside = dataset
            .records
            .iter()
            .filter(|r| !window.contains(r.observed_on()))
            .count();
        if outside > 0 {
            log::warn!(
                "{}: {outside} hotspot(s) observed outside {window}",
                file.display()
            );
        }

        let batch = Batch {
            window,
            dataset: &dataset,
            reloaded_ids,
        };
        let write = self
            .store
            .write(batch)
            .await
            .map_err(|source| AcquisitionError::DataImport {
                file: file.display().to_string(),
                source,
            })?;

        log::info!(
            "Imported {}: {} staged, {} new{}",
            file.display(),
            write.staged,
            write.merged,
            if reloaded_ids.is_empty() {
                String::new()
            } else {
                format!(", closed ledger rows {reloaded_ids:?}")
            }
        );

        Ok(ImportSummary {
            file: file.to_path_buf(),
            staged: write.staged,
            merged: write.merged,
            ledger: write.ledger,
            reloaded: reloaded_ids.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use geo::Point;
    use hotspot_sync_dataset::DatasetError;
    use hotspot_sync_hotspot_models::{AttributeValue, HotspotRecord};

    use super::*;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn hotspot(id: &str, observed: &str) -> HotspotRecord {
        let attributes = BTreeMap::from([
            ("foco_id".to_string(), AttributeValue::Text(id.to_string())),
            (
                "datahora".to_string(),
                AttributeValue::Text(observed.to_string()),
            ),
        ]);
        HotspotRecord::from_attributes(&attributes, Point::new(-47.5, -15.25)).unwrap()
    }

    /// Returns a fixed dataset, or a decode error when `records` is `None`.
    struct FixedReader {
        records: Option<Vec<HotspotRecord>>,
    }

    impl DatasetReader for FixedReader {
        fn read(&self, archive: &Path, _default_crs: u32) -> Result<Dataset, DatasetError> {
            self.records.as_ref().map_or_else(
                || Err(DatasetError::MissingShapefile(archive.display().to_string())),
                |records| {
                    Ok(Dataset {
                        epsg: 4674,
                        records: records.clone(),
                    })
                },
            )
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        writes: Mutex<Vec<(AcquisitionWindow, usize, Vec<i64>)>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchStore for RecordingStore {
        async fn write(&self, batch: Batch<'_>) -> Result<BatchWrite, DbError> {
            self.writes.lock().unwrap().push((
                batch.window,
                batch.dataset.records.len(),
                batch.reloaded_ids.to_vec(),
            ));
            if self.fail {
                return Err(DbError::MissingLedgerRow { id: 9 });
            }
            Ok(BatchWrite {
                staged: batch.dataset.records.len() as u64,
                merged: 1,
                ledger: Some(LedgerEntry {
                    id: 100,
                    start_date: batch.window.start_date(),
                    end_date: batch.window.end_date(),
                    num_rows: batch.dataset.records.len() as u64,
                }),
            })
        }
    }

    fn importer(
        records: Option<Vec<HotspotRecord>>,
        fail: bool,
    ) -> Importer<FixedReader, RecordingStore> {
        Importer::new(
            FixedReader { records },
            RecordingStore {
                fail,
                ..RecordingStore::default()
            },
        )
    }

    fn may_10() -> AcquisitionWindow {
        AcquisitionWindow::single_day(day("2024-05-10"))
    }

    #[test]
    fn superseded_rows_close_before_the_new_row_is_recorded() {
        assert_eq!(
            batch_steps(&[4, 5]),
            vec![
                BatchStep::ReplaceStaging,
                BatchStep::LoadStaging,
                BatchStep::EnrichBiomes,
                BatchStep::MergeHotspots,
                BatchStep::CloseLedgerRow(4),
                BatchStep::CloseLedgerRow(5),
                BatchStep::RecordLedgerRow,
            ]
        );
        assert_eq!(batch_steps(&[]).last(), Some(&BatchStep::RecordLedgerRow));
        assert!(!batch_steps(&[]).contains(&BatchStep::CloseLedgerRow(4)));
    }

    #[tokio::test]
    async fn writes_batch_with_window_and_reloaded_rows() {
        let importer = importer(
            Some(vec![
                hotspot("a1", "2024-05-10 13:45:00"),
                hotspot("b2", "2024-05-10 18:00:00"),
            ]),
            false,
        );

        let summary = importer
            .import_file(Path::new("/data/p1.zip"), may_10(), 4674, &[7])
            .await
            .unwrap();

        assert_eq!(summary.staged, 2);
        assert_eq!(summary.reloaded, vec![7]);
        assert_eq!(summary.ledger.unwrap().start_date, day("2024-05-10"));
        assert_eq!(
            *importer.store.writes.lock().unwrap(),
            vec![(may_10(), 2, vec![7])]
        );
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let importer = importer(Some(Vec::new()), false);

        let summary = importer
            .import_file(Path::new("/data/p1.zip"), may_10(), 4674, &[7])
            .await
            .unwrap();

        assert_eq!(summary.ledger, None);
        assert!(summary.reloaded.is_empty());
        assert!(importer.store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreadable_batch_is_a_data_format_error() {
        let importer = importer(None, false);

        let err = importer
            .import_file(Path::new("/data/p1.zip"), may_10(), 4674, &[])
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::DataFormat { .. }));
        assert!(importer.store.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_a_data_import_error() {
        let importer = importer(Some(vec![hotspot("a1", "2024-05-10 13:45:00")]), true);

        let err = importer
            .import_file(Path::new("/data/p1.zip"), may_10(), 4674, &[9])
            .await
            .unwrap_err();

        match err {
            AcquisitionError::DataImport { file, source } => {
                assert_eq!(file, "/data/p1.zip");
                assert!(matches!(source, DbError::MissingLedgerRow { id: 9 }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
