//! CRS detection from `.prj` sidecar files.
//!
//! OGC WKT carries `AUTHORITY["EPSG","4674"]`; the ESRI flavour GeoServer
//! writes often does not, so a few well-known geographic CRS names are
//! recognised as well.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::DatasetError;

static AUTHORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"AUTHORITY\[[ \t]*"EPSG"[ \t]*,[ \t]*"?([0-9]+)"?[ \t]*\]"#).expect("valid regex")
});

/// Geographic CRS names as they appear in ESRI WKT.
const KNOWN_GEOGCS: &[(&str, u32)] = &[
    ("GCS_SIRGAS_2000", 4674),
    ("SIRGAS 2000", 4674),
    ("GCS_WGS_1984", 4326),
    ("WGS 84", 4326),
    ("GCS_South_American_1969", 4618),
];

/// EPSG code declared by a WKT string.
///
/// The last `AUTHORITY["EPSG", ...]` wins, as WKT nests the datum and
/// spheroid authorities before the one for the whole CRS.
#[must_use]
pub fn epsg_from_wkt(wkt: &str) -> Option<u32> {
    if let Some(code) = AUTHORITY_RE
        .captures_iter(wkt)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
    {
        return Some(code);
    }

    if wkt.trim_start().starts_with("PROJCS") {
        return None;
    }
    KNOWN_GEOGCS
        .iter()
        .find(|(name, _)| wkt.contains(&format!("GEOGCS[\"{name}\"")))
        .map(|(_, code)| *code)
}

/// Reads the `.prj` next to `shp`.
///
/// Returns `Ok(None)` when there is no sidecar at all.
///
/// # Errors
///
/// * [`DatasetError::Io`] if the sidecar exists but cannot be read.
/// * [`DatasetError::UnrecognisedCrs`] if it declares a CRS with no known
///   EPSG code, so the caller never guesses over a real declaration.
pub fn read_sidecar(shp: &Path) -> Result<Option<u32>, DatasetError> {
    let Some(prj) = ["prj", "PRJ"]
        .iter()
        .map(|ext| shp.with_extension(ext))
        .find(|p| p.exists())
    else {
        return Ok(None);
    };

    let wkt = std::fs::read_to_string(&prj).map_err(|source| DatasetError::Io {
        path: prj.display().to_string(),
        source,
    })?;
    if wkt.trim().is_empty() {
        log::warn!("{} is empty, treating the CRS as undeclared", prj.display());
        return Ok(None);
    }

    epsg_from_wkt(&wkt)
        .map(Some)
        .ok_or_else(|| DatasetError::UnrecognisedCrs {
            path: prj.display().to_string(),
            wkt: wkt.chars().take(120).collect(),
        })
}
