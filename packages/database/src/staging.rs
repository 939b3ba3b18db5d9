//! Staging, biome enrichment, and merge statements for one imported batch.
//!
//! These run inside the batch transaction, in order:
//!
//! 1. [`replace_staging_table`] drops and recreates the staging table.
//! 2. [`insert_staging_rows`] loads the batch's hotspots.
//! 3. [`enrich_biomes`] fills `bioma_nb` from the biome polygons.
//! 4. [`merge_into_hotspots`] copies new rows into the canonical table.

use std::fmt::Write as _;

use hotspot_sync_hotspot_models::HotspotRecord;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// `PostgreSQL` bind-parameter limit per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// SRID of the canonical hotspot table (SIRGAS 2000).
pub const CANONICAL_SRID: u32 = 4674;

/// Each staged row binds: `foco_id, datahora, satelite, pais, estado,
/// municipio, bioma, latitude, longitude, x, y`.
const PARAMS_PER_ROW: usize = 11;

/// `DROP` + `CREATE` statements for the staging table.
#[must_use]
pub fn staging_ddl(staging_table: &str, srid: u32) -> [String; 2] {
    [
        format!("DROP TABLE IF EXISTS {staging_table}"),
        format!(
            "CREATE TABLE {staging_table} (
                foco_id TEXT NOT NULL,
                datahora TIMESTAMP NOT NULL,
                satelite TEXT,
                pais TEXT,
                estado TEXT,
                municipio TEXT,
                bioma TEXT,
                bioma_nb TEXT,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                geometry geometry(Point, {srid})
            )"
        ),
    ]
}

/// Replaces the staging table with an empty one whose geometry column uses
/// `srid`.
///
/// # Errors
///
/// Returns [`DbError`] if either statement fails.
pub async fn replace_staging_table(
    db: &dyn Database,
    staging_table: &str,
    srid: u32,
) -> Result<(), DbError> {
    for statement in staging_ddl(staging_table, srid) {
        db.exec_raw(&statement).await?;
    }
    Ok(())
}

/// Builds one multi-row `INSERT` for `chunk`, returning the SQL and its
/// parameters.
#[must_use]
pub fn staging_insert(
    staging_table: &str,
    srid: u32,
    chunk: &[HotspotRecord],
) -> (String, Vec<DatabaseValue>) {
    let mut sql = format!(
        "INSERT INTO {staging_table}
            (foco_id, datahora, satelite, pais, estado, municipio, bioma, latitude, longitude, geometry)
         VALUES "
    );
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(chunk.len() * PARAMS_PER_ROW);
    let mut idx = 1u32;

    let text = |value: &Option<String>| {
        value
            .as_ref()
            .map_or(DatabaseValue::Null, |v| DatabaseValue::String(v.clone()))
    };

    for (i, record) in chunk.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        write!(
            sql,
            "(${idx}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, ${}, \
             ST_SetSRID(ST_MakePoint(${}, ${}), {srid}))",
            idx + 1,
            idx + 2,
            idx + 3,
            idx + 4,
            idx + 5,
            idx + 6,
            idx + 7,
            idx + 8,
            idx + 9,
            idx + 10,
        )
        .unwrap();

        params.push(DatabaseValue::String(record.foco_id.clone()));
        params.push(DatabaseValue::DateTime(record.observed_at));
        params.push(text(&record.satellite));
        params.push(text(&record.country));
        params.push(text(&record.state));
        params.push(text(&record.municipality));
        params.push(text(&record.legacy_biome));
        params.push(DatabaseValue::Real64(record.latitude));
        params.push(DatabaseValue::Real64(record.longitude));
        params.push(DatabaseValue::Real64(record.location.x()));
        params.push(DatabaseValue::Real64(record.location.y()));
        idx += 11;
    }

    (sql, params)
}

/// Loads `records` into the staging table in parameter-limited chunks.
///
/// # Errors
///
/// Returns [`DbError`] if any chunk fails to insert.
pub async fn insert_staging_rows(
    db: &dyn Database,
    staging_table: &str,
    srid: u32,
    records: &[HotspotRecord],
) -> Result<u64, DbError> {
    let chunk_size = PG_MAX_PARAMS / PARAMS_PER_ROW;
    let mut inserted = 0u64;

    for chunk in records.chunks(chunk_size) {
        let (sql, params) = staging_insert(staging_table, srid, chunk);
        inserted += db.exec_raw_params(&sql, &params).await?;
    }

    log::debug!("Staged {inserted} rows into {staging_table}");
    Ok(inserted)
}

/// The biome enrichment `UPDATE`.
///
/// Geometries are compared in the biome layer's SRID so batches in any
/// declared CRS are classified correctly.
#[must_use]
pub fn enrich_sql(staging_table: &str, biome_table: &str) -> String {
    format!(
        "UPDATE {staging_table} AS s
         SET bioma_nb = b.bioma
         FROM {biome_table} AS b
         WHERE ST_CoveredBy(ST_Transform(s.geometry, ST_SRID(b.geom)), b.geom)"
    )
}

/// Sets `bioma_nb` on every staged row covered by a biome polygon.
///
/// Rows outside every polygon keep a `NULL` biome.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub async fn enrich_biomes(
    db: &dyn Database,
    staging_table: &str,
    biome_table: &str,
) -> Result<u64, DbError> {
    let updated = db
        .exec_raw_params(&enrich_sql(staging_table, biome_table), &[])
        .await?;
    log::debug!("Classified {updated} staged rows by biome");
    Ok(updated)
}

/// The insert-if-absent merge from staging into the canonical table.
#[must_use]
pub fn merge_sql(staging_table: &str, hotspot_table: &str) -> String {
    format!(
        "INSERT INTO {hotspot_table}
            (uuid, data, satelite, pais, estado, municipio, bioma, bioma_old,
             latitude, longitude, geom)
         SELECT foco_id, datahora::date, satelite, pais, estado, municipio, bioma_nb, bioma,
                latitude, longitude, ST_Transform(geometry, {CANONICAL_SRID})
         FROM {staging_table}
         ON CONFLICT (uuid) DO NOTHING"
    )
}

/// Copies staged rows whose `uuid` is not yet present into the canonical
/// table. Returns the number of rows actually inserted.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn merge_into_hotspots(
    db: &dyn Database,
    staging_table: &str,
    hotspot_table: &str,
) -> Result<u64, DbError> {
    let inserted = db
        .exec_raw_params(&merge_sql(staging_table, hotspot_table), &[])
        .await?;
    log::debug!("Merged {inserted} new rows into {hotspot_table}");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use geo::Point;

    use super::*;

    fn record(id: &str) -> HotspotRecord {
        HotspotRecord {
            foco_id: id.to_string(),
            observed_at: NaiveDate::from_ymd_opt(2024, 5, 10)
                .unwrap()
                .and_hms_opt(17, 40, 0)
                .unwrap(),
            satellite: Some("AQUA_M-T".to_string()),
            country: Some("Brasil".to_string()),
            state: None,
            municipality: None,
            legacy_biome: Some("Cerrado".to_string()),
            latitude: -15.8,
            longitude: -47.9,
            location: Point::new(-47.9, -15.8),
        }
    }

    #[test]
    fn staging_ddl_uses_batch_srid() {
        let [drop, create] = staging_ddl("focuses", 4326);
        assert_eq!(drop, "DROP TABLE IF EXISTS focuses");
        assert!(create.contains("geometry geometry(Point, 4326)"));
        assert!(create.contains("bioma_nb TEXT"));
    }

    #[test]
    fn staging_insert_numbers_parameters_per_row() {
        let (sql, params) = staging_insert("focuses", 4674, &[record("a"), record("b")]);
        assert_eq!(params.len(), 22);
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9, ST_SetSRID(ST_MakePoint($10, $11), 4674))"));
        assert!(sql.contains("($12, $13, $14, $15, $16, $17, $18, $19, $20, ST_SetSRID(ST_MakePoint($21, $22), 4674))"));
        assert!(matches!(params[4], DatabaseValue::Null));
    }

    #[test]
    fn chunk_size_respects_parameter_limit() {
        assert!((PG_MAX_PARAMS / PARAMS_PER_ROW) * PARAMS_PER_ROW <= PG_MAX_PARAMS);
    }

    #[test]
    fn merge_keeps_source_biome_as_legacy() {
        let sql = merge_sql("focuses", "focos_aqua_referencia");
        assert!(sql.contains("bioma_nb, bioma,"));
        assert!(sql.contains("ON CONFLICT (uuid) DO NOTHING"));
        assert!(sql.contains("ST_Transform(geometry, 4674)"));
    }

    #[test]
    fn enrichment_transforms_into_biome_srid() {
        let sql = enrich_sql("focuses", "lm_bioma_250");
        assert!(sql.contains("ST_CoveredBy(ST_Transform(s.geometry, ST_SRID(b.geom)), b.geom)"));
    }
}
