#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Readers for downloaded hotspot batches.
//!
//! A batch is one `SHAPE-ZIP` page: a zip holding `.shp`, `.shx`, `.dbf`
//! and usually a `.prj`. [`ShapeZipReader`] unpacks it into a private
//! scratch directory, decodes every feature into a [`HotspotRecord`], and
//! removes the scratch directory again on every exit path.

pub mod prj;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use geo::Point;
use hotspot_sync_hotspot_models::{AttributeValue, HotspotRecord, RecordError};
use shapefile::Shape;
use shapefile::dbase::{Date, FieldValue};

/// Errors that can occur while reading a batch.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// I/O error on the archive or scratch directory.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The archive could not be opened or unpacked.
    #[error("Invalid archive {path}: {source}")]
    Archive {
        /// Archive path.
        path: String,
        /// Underlying error.
        source: zip::result::ZipError,
    },

    /// The archive holds no `.shp` file.
    #[error("No shapefile found in {0}")]
    MissingShapefile(String),

    /// The shapefile itself is unreadable.
    #[error("Shapefile error in {path}: {source}")]
    Shapefile {
        /// Shapefile path.
        path: String,
        /// Underlying error.
        source: shapefile::Error,
    },

    /// The `.prj` declares a CRS with no recognisable EPSG code.
    #[error("Unrecognised CRS in {path}: {wkt}")]
    UnrecognisedCrs {
        /// Sidecar path.
        path: String,
        /// Start of the declaration, for diagnostics.
        wkt: String,
    },

    /// A feature has a non-point geometry.
    #[error("Feature {index} in {path} is not a point ({shape})")]
    UnsupportedGeometry {
        /// Shapefile path.
        path: String,
        /// Zero-based feature index.
        index: usize,
        /// Geometry type found.
        shape: String,
    },

    /// A feature's attributes do not decode into a hotspot.
    #[error("Feature {index} in {path}: {source}")]
    Record {
        /// Shapefile path.
        path: String,
        /// Zero-based feature index.
        index: usize,
        /// Decode failure.
        source: RecordError,
    },
}

/// The decoded contents of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// EPSG code the point geometries are expressed in: the batch's own
    /// declaration, or the caller's default when it has none.
    pub epsg: u32,
    /// Decoded hotspots in file order.
    pub records: Vec<HotspotRecord>,
}

/// Turns a downloaded batch file into a [`Dataset`].
pub trait DatasetReader: Send + Sync {
    /// Reads `archive`, assuming `default_crs` only when the batch declares
    /// no CRS of its own.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the archive or any feature in it cannot
    /// be decoded.
    fn read(&self, archive: &Path, default_crs: u32) -> Result<Dataset, DatasetError>;
}

/// Reads `SHAPE-ZIP` archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeZipReader;

/// Scratch directory removed when dropped.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove scratch dir {}: {e}", self.0.display()),
        }
    }
}

/// `{archive_dir}/tmp/{archive_stem}`.
fn scratch_path(archive: &Path) -> PathBuf {
    let parent = archive.parent().unwrap_or_else(|| Path::new("."));
    let stem = archive
        .file_stem()
        .map_or_else(|| "batch".into(), |s| s.to_string_lossy());
    parent.join("tmp").join(stem.as_ref())
}

fn io_error(path: &Path, source: std::io::Error) -> DatasetError {
    DatasetError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn unpack(archive: &Path, into: &Path) -> Result<(), DatasetError> {
    let file = std::fs::File::open(archive).map_err(|e| io_error(archive, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| DatasetError::Archive {
        path: archive.display().to_string(),
        source: e,
    })?;
    zip.extract(into).map_err(|e| DatasetError::Archive {
        path: archive.display().to_string(),
        source: e,
    })
}

/// First `.shp` found below `dir`, searching nested directories too.
fn find_shapefile(dir: &Path) -> Result<Option<PathBuf>, DatasetError> {
    let mut pending = vec![dir.to_path_buf()];
    let mut found: Vec<PathBuf> = Vec::new();
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).map_err(|e| io_error(&current, e))? {
            let path = entry.map_err(|e| io_error(&current, e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    if found.len() > 1 {
        log::warn!(
            "{} shapefiles in {}, reading {}",
            found.len(),
            dir.display(),
            found[0].display()
        );
    }
    Ok(found.into_iter().next())
}

impl ShapeZipReader {
    fn read_shapefile(shp: &Path, default_crs: u32) -> Result<Dataset, DatasetError> {
        let epsg = match prj::read_sidecar(shp)? {
            Some(code) => code,
            None => {
                log::info!(
                    "{} declares no CRS, assuming EPSG:{default_crs}",
                    shp.display()
                );
                default_crs
            }
        };

        let shapefile_error = |source| DatasetError::Shapefile {
            path: shp.display().to_string(),
            source,
        };

        let mut reader = shapefile::Reader::from_path(shp).map_err(shapefile_error)?;
        let mut records = Vec::new();

        for (index, item) in reader.iter_shapes_and_records().enumerate() {
            let (shape, record) = item.map_err(shapefile_error)?;
            let location = point_of(&shape).ok_or_else(|| DatasetError::UnsupportedGeometry {
                path: shp.display().to_string(),
                index,
                shape: format!("{:?}", shape.shapetype()),
            })?;

            let attributes: BTreeMap<String, AttributeValue> =
                HashMap::<String, FieldValue>::from(record)
                    .into_iter()
                    .map(|(name, value)| (name, attribute_value(value)))
                    .collect();

            let hotspot = HotspotRecord::from_attributes(&attributes, location).map_err(
                |source| DatasetError::Record {
                    path: shp.display().to_string(),
                    index,
                    source,
                },
            )?;
            records.push(hotspot);
        }

        Ok(Dataset { epsg, records })
    }
}

impl DatasetReader for ShapeZipReader {
    fn read(&self, archive: &Path, default_crs: u32) -> Result<Dataset, DatasetError> {
        let scratch = ScratchDir(scratch_path(archive));
        if scratch.0.exists() {
            std::fs::remove_dir_all(&scratch.0).map_err(|e| io_error(&scratch.0, e))?;
        }
        std::fs::create_dir_all(&scratch.0).map_err(|e| io_error(&scratch.0, e))?;

        unpack(archive, &scratch.0)?;

        let shp = find_shapefile(&scratch.0)?
            .ok_or_else(|| DatasetError::MissingShapefile(archive.display().to_string()))?;

        let dataset = Self::read_shapefile(&shp, default_crs)?;
        log::info!(
            "{}: {} hotspots (EPSG:{})",
            archive.display(),
            dataset.records.len(),
            dataset.epsg
        );
        Ok(dataset)
    }
}

fn point_of(shape: &Shape) -> Option<Point<f64>> {
    match shape {
        Shape::Point(p) => Some(Point::new(p.x, p.y)),
        Shape::PointM(p) => Some(Point::new(p.x, p.y)),
        Shape::PointZ(p) => Some(Point::new(p.x, p.y)),
        Shape::Multipoint(mp) if mp.points().len() == 1 => {
            mp.points().first().map(|p| Point::new(p.x, p.y))
        }
        _ => None,
    }
}

/// Maps a dBase cell onto an [`AttributeValue`].
fn attribute_value(value: FieldValue) -> AttributeValue {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => AttributeValue::Text(s),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) | FieldValue::Currency(n) => {
            AttributeValue::Number(n)
        }
        FieldValue::Float(Some(n)) => AttributeValue::Number(f64::from(n)),
        FieldValue::Integer(n) => AttributeValue::Number(f64::from(n)),
        FieldValue::Logical(Some(b)) => AttributeValue::Text(b.to_string()),
        FieldValue::Date(Some(d)) => {
            calendar_day(&d).map_or(AttributeValue::Null, AttributeValue::Date)
        }
        FieldValue::DateTime(dt) => {
            let time = dt.time();
            calendar_day(&dt.date())
                .and_then(|day| day.and_hms_opt(time.hours(), time.minutes(), time.seconds()))
                .map_or(AttributeValue::Null, AttributeValue::DateTime)
        }
        _ => AttributeValue::Null,
    }
}

fn calendar_day(d: &Date) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(i32::try_from(d.year()).ok()?, d.month(), d.day())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use shapefile::dbase::{DateTime, FieldName, Record, TableWriterBuilder, Time};

    use super::*;

    const SIRGAS_PRJ: &str = r#"GEOGCS["GCS_SIRGAS_2000",DATUM["D_SIRGAS_2000",SPHEROID["GRS_1980",6378137.0,298.257222101]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hotspot_sync_dataset_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    /// Writes `focos.shp/.shx/.dbf` (plus `focos.prj` when given) under
    /// `dir/src` and zips them into `dir/{name}`.
    fn write_point_batch(
        dir: &Path,
        name: &str,
        prj: Option<&str>,
        rows: &[(&str, &str, f64, f64)],
    ) -> PathBuf {
        let src = dir.join("src");
        std::fs::create_dir_all(&src).unwrap();

        let table = TableWriterBuilder::new()
            .add_character_field(FieldName::try_from("foco_id").unwrap(), 40)
            .add_character_field(FieldName::try_from("datahora").unwrap(), 19)
            .add_character_field(FieldName::try_from("satelite").unwrap(), 20);
        {
            let mut writer = shapefile::Writer::from_path(src.join("focos.shp"), table).unwrap();
            for (id, observed, x, y) in rows {
                let mut record = Record::default();
                record.insert(
                    "foco_id".to_string(),
                    FieldValue::Character(Some((*id).to_string())),
                );
                record.insert(
                    "datahora".to_string(),
                    FieldValue::Character(Some((*observed).to_string())),
                );
                record.insert(
                    "satelite".to_string(),
                    FieldValue::Character(Some("AQUA_M-T".to_string())),
                );
                writer
                    .write_shape_and_record(&shapefile::Point::new(*x, *y), &record)
                    .unwrap();
            }
        }
        if let Some(wkt) = prj {
            std::fs::write(src.join("focos.prj"), wkt).unwrap();
        }

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for ext in ["shp", "shx", "dbf", "prj"] {
            let path = src.join("focos").with_extension(ext);
            if path.exists() {
                files.push((format!("focos.{ext}"), std::fs::read(&path).unwrap()));
            }
        }
        let entries: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();

        let archive = dir.join(name);
        write_zip(&archive, &entries);
        archive
    }

    #[test]
    fn reads_points_and_attributes_from_shape_zip() {
        let dir = scratch("round_trip");
        let archive = write_point_batch(
            &dir,
            "focos_2024-05-10_2024-05-10_part1.zip",
            Some(SIRGAS_PRJ),
            &[
                ("a1b2", "2024-05-10 13:45:00", -47.5, -15.25),
                ("c3d4", "2024-05-10 17:05:30", -60.0, -3.5),
            ],
        );

        let dataset = ShapeZipReader.read(&archive, 4326).unwrap();

        assert_eq!(dataset.epsg, 4674);
        assert_eq!(dataset.records.len(), 2);
        let first = &dataset.records[0];
        assert_eq!(first.foco_id, "a1b2");
        assert_eq!(first.observed_at.to_string(), "2024-05-10 13:45:00");
        assert_eq!(first.satellite.as_deref(), Some("AQUA_M-T"));
        assert_eq!(first.location, Point::new(-47.5, -15.25));
        assert!((first.latitude - -15.25).abs() < f64::EPSILON);
        assert_eq!(dataset.records[1].foco_id, "c3d4");
        assert!(!dir.join("tmp").join("focos_2024-05-10_2024-05-10_part1").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_prj_falls_back_to_default_crs() {
        let dir = scratch("no_prj");
        let archive = write_point_batch(
            &dir,
            "batch_part1.zip",
            None,
            &[("a1b2", "2024-05-10 13:45:00", -47.5, -15.25)],
        );

        let dataset = ShapeZipReader.read(&archive, 4326).unwrap();
        assert_eq!(dataset.epsg, 4326);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unrecognised_prj_is_not_overridden() {
        let dir = scratch("projected_prj");
        let archive = write_point_batch(
            &dir,
            "batch_part1.zip",
            Some(r#"PROJCS["Brazil_Albers",GEOGCS["GCS_SIRGAS_2000",DATUM["D_SIRGAS_2000"]],PROJECTION["Albers"]]"#),
            &[("a1b2", "2024-05-10 13:45:00", 5_120_000.0, 8_340_000.0)],
        );

        let err = ShapeZipReader.read(&archive, 4674).unwrap_err();
        assert!(matches!(err, DatasetError::UnrecognisedCrs { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn archive_without_shapefile_is_rejected() {
        let dir = scratch("no_shp");
        let archive = dir.join("focos_2024-05-10_2024-05-10_part1.zip");
        write_zip(
            &archive,
            &[("readme.txt", b"nothing here"), ("focos.cst", b"UTF-8")],
        );

        let err = ShapeZipReader.read(&archive, 4674).unwrap_err();
        assert!(matches!(err, DatasetError::MissingShapefile(_)));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn scratch_dir_is_removed_after_failure() {
        let dir = scratch("cleanup");
        let archive = dir.join("batch_part1.zip");
        write_zip(&archive, &[("notes.txt", b"x")]);

        let _ = ShapeZipReader.read(&archive, 4674);
        assert!(!dir.join("tmp").join("batch_part1").exists());
        assert!(archive.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_archive_is_an_archive_error() {
        let dir = scratch("corrupt");
        let archive = dir.join("broken_part1.zip");
        std::fs::write(&archive, b"<ows:ExceptionReport/>").unwrap();

        let err = ShapeZipReader.read(&archive, 4674).unwrap_err();
        assert!(matches!(err, DatasetError::Archive { .. }));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn finds_nested_shapefile() {
        let dir = scratch("nested");
        std::fs::create_dir_all(dir.join("inner")).unwrap();
        std::fs::write(dir.join("inner").join("focos.SHP"), b"").unwrap();
        std::fs::write(dir.join("focos.dbf"), b"").unwrap();

        let found = find_shapefile(&dir).unwrap().unwrap();
        assert!(found.ends_with("inner/focos.SHP"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn maps_dbase_values() {
        assert_eq!(
            attribute_value(FieldValue::Character(Some("AQUA_M-T".to_string()))),
            AttributeValue::Text("AQUA_M-T".to_string())
        );
        assert_eq!(
            attribute_value(FieldValue::Numeric(Some(-3.25))),
            AttributeValue::Number(-3.25)
        );
        assert_eq!(
            attribute_value(FieldValue::Integer(7)),
            AttributeValue::Number(7.0)
        );
        assert_eq!(
            attribute_value(FieldValue::Character(None)),
            AttributeValue::Null
        );
        assert_eq!(attribute_value(FieldValue::Numeric(None)), AttributeValue::Null);
    }

    #[test]
    fn maps_dbase_timestamps() {
        let value = FieldValue::DateTime(DateTime::new(
            Date::new(10, 5, 2024),
            Time::new(13, 45, 0),
        ));
        assert_eq!(
            attribute_value(value),
            AttributeValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 5, 10)
                    .unwrap()
                    .and_hms_opt(13, 45, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn scratch_path_sits_next_to_the_archive() {
        let path = scratch_path(Path::new("/data/focos_2024-05-10_2024-05-10_part2.zip"));
        assert_eq!(
            path,
            PathBuf::from("/data/tmp/focos_2024-05-10_2024-05-10_part2")
        );
    }
}
