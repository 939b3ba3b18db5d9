#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Hotspot observation types.
//!
//! A [`HotspotRecord`] is one active-fire detection as published by the
//! feature service layer. Records are decoded from the attribute table of
//! a downloaded batch via [`HotspotRecord::from_attributes`], which keeps
//! the column naming of the service in one place ([`HotspotField`]).

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use geo::Point;
use strum_macros::{AsRefStr, Display, EnumString};

/// Attribute columns published by the hotspot layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HotspotField {
    /// Stable identity of the detection (a UUID string).
    FocoId,
    /// Detection timestamp.
    Datahora,
    /// Satellite that produced the detection.
    Satelite,
    /// Country name.
    Pais,
    /// State name.
    Estado,
    /// Municipality name.
    Municipio,
    /// Biome classification carried by the source.
    Bioma,
    /// Latitude attribute (degrees).
    Latitude,
    /// Longitude attribute (degrees).
    Longitude,
}

/// A decoded attribute value from a feature's attribute table.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Character data.
    Text(String),
    /// Any numeric column.
    Number(f64),
    /// A calendar date column.
    Date(NaiveDate),
    /// A timestamp column.
    DateTime(NaiveDateTime),
    /// Empty cell.
    Null,
}

impl AttributeValue {
    fn as_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Self::Number(n) => Some(n.to_string()),
            Self::Date(d) => Some(d.to_string()),
            Self::DateTime(dt) => Some(dt.to_string()),
            Self::Null => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            Self::Date(d) => Some(d.and_time(NaiveTime::MIN)),
            Self::Text(s) => parse_timestamp(s),
            Self::Number(_) | Self::Null => None,
        }
    }
}

/// Timestamp layouts seen in the `datahora` column across output formats.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y/%m/%d %H:%M:%S",
];

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Error decoding a feature into a [`HotspotRecord`].
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A required column was absent or empty.
    #[error("Missing required attribute: {0}")]
    MissingAttribute(HotspotField),

    /// A column was present but could not be interpreted.
    #[error("Invalid value for {field}: {value}")]
    InvalidAttribute {
        /// Offending column.
        field: HotspotField,
        /// Raw value, for diagnostics.
        value: String,
    },
}

/// One hotspot detection.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotRecord {
    /// Stable identity, stored as `uuid` in the canonical table.
    pub foco_id: String,
    /// Detection timestamp as published (no timezone conversion).
    pub observed_at: NaiveDateTime,
    /// Satellite name.
    pub satellite: Option<String>,
    /// Country.
    pub country: Option<String>,
    /// State.
    pub state: Option<String>,
    /// Municipality.
    pub municipality: Option<String>,
    /// Biome carried by the source (kept as `bioma_old`).
    pub legacy_biome: Option<String>,
    /// Latitude attribute, or the geometry's y when the column is missing.
    pub latitude: f64,
    /// Longitude attribute, or the geometry's x when the column is missing.
    pub longitude: f64,
    /// Point geometry in the batch's coordinate reference system.
    pub location: Point<f64>,
}

impl HotspotRecord {
    /// Builds a record from a feature's attributes and point geometry.
    ///
    /// Attribute names are matched case-insensitively against
    /// [`HotspotField`].
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the identity or timestamp is missing or
    /// cannot be parsed.
    pub fn from_attributes(
        attributes: &BTreeMap<String, AttributeValue>,
        location: Point<f64>,
    ) -> Result<Self, RecordError> {
        let lookup = |field: HotspotField| -> Option<&AttributeValue> {
            attributes.get(field.as_ref()).or_else(|| {
                attributes
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(field.as_ref()))
                    .map(|(_, v)| v)
            })
        };
        let text = |field: HotspotField| lookup(field).and_then(AttributeValue::as_text);

        let foco_id = text(HotspotField::FocoId).ok_or(RecordError::MissingAttribute(
            HotspotField::FocoId,
        ))?;

        let raw_time = lookup(HotspotField::Datahora)
            .ok_or(RecordError::MissingAttribute(HotspotField::Datahora))?;
        let observed_at = raw_time
            .as_datetime()
            .ok_or_else(|| RecordError::InvalidAttribute {
                field: HotspotField::Datahora,
                value: format!("{raw_time:?}"),
            })?;

        let latitude = lookup(HotspotField::Latitude)
            .and_then(AttributeValue::as_f64)
            .unwrap_or_else(|| location.y());
        let longitude = lookup(HotspotField::Longitude)
            .and_then(AttributeValue::as_f64)
            .unwrap_or_else(|| location.x());

        Ok(Self {
            foco_id,
            observed_at,
            satellite: text(HotspotField::Satelite),
            country: text(HotspotField::Pais),
            state: text(HotspotField::Estado),
            municipality: text(HotspotField::Municipio),
            legacy_biome: text(HotspotField::Bioma),
            latitude,
            longitude,
            location,
        })
    }

    /// Calendar day of the detection.
    #[must_use]
    pub fn observed_on(&self) -> NaiveDate {
        self.observed_at.date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttributeValue)]) -> BTreeMap<String, AttributeValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn decodes_full_record() {
        let a = attrs(&[
            ("foco_id", AttributeValue::Text("0b5e-4c1a".to_string())),
            (
                "datahora",
                AttributeValue::Text("2024-05-10 17:40:00".to_string()),
            ),
            ("satelite", AttributeValue::Text("AQUA_M-T".to_string())),
            ("pais", AttributeValue::Text("Brasil".to_string())),
            ("estado", AttributeValue::Text("PARÁ".to_string())),
            ("municipio", AttributeValue::Text("ALTAMIRA".to_string())),
            ("bioma", AttributeValue::Text("Amazônia".to_string())),
            ("latitude", AttributeValue::Number(-3.2)),
            ("longitude", AttributeValue::Number(-52.2)),
        ]);

        let record = HotspotRecord::from_attributes(&a, Point::new(-52.2, -3.2)).unwrap();
        assert_eq!(record.foco_id, "0b5e-4c1a");
        assert_eq!(record.observed_on().to_string(), "2024-05-10");
        assert_eq!(record.satellite.as_deref(), Some("AQUA_M-T"));
        assert_eq!(record.legacy_biome.as_deref(), Some("Amazônia"));
        assert!((record.latitude - -3.2).abs() < f64::EPSILON);
    }

    #[test]
    fn matches_uppercase_columns() {
        let a = attrs(&[
            ("FOCO_ID", AttributeValue::Text("abc".to_string())),
            (
                "DATAHORA",
                AttributeValue::Date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
            ),
        ]);
        let record = HotspotRecord::from_attributes(&a, Point::new(1.0, 2.0)).unwrap();
        assert_eq!(record.foco_id, "abc");
        assert_eq!(record.observed_at.to_string(), "2024-05-01 00:00:00");
    }

    #[test]
    fn falls_back_to_geometry_coordinates() {
        let a = attrs(&[
            ("foco_id", AttributeValue::Text("abc".to_string())),
            (
                "datahora",
                AttributeValue::Text("2024-05-01T03:00:00".to_string()),
            ),
        ]);
        let record = HotspotRecord::from_attributes(&a, Point::new(-47.9, -15.8)).unwrap();
        assert!((record.longitude - -47.9).abs() < f64::EPSILON);
        assert!((record.latitude - -15.8).abs() < f64::EPSILON);
        assert!(record.satellite.is_none());
    }

    #[test]
    fn rejects_missing_identity() {
        let a = attrs(&[
            ("foco_id", AttributeValue::Text("   ".to_string())),
            (
                "datahora",
                AttributeValue::Text("2024-05-01 00:00:00".to_string()),
            ),
        ]);
        let err = HotspotRecord::from_attributes(&a, Point::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            RecordError::MissingAttribute(HotspotField::FocoId)
        ));
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        let a = attrs(&[
            ("foco_id", AttributeValue::Text("abc".to_string())),
            ("datahora", AttributeValue::Text("yesterday".to_string())),
        ]);
        let err = HotspotRecord::from_attributes(&a, Point::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(
            err,
            RecordError::InvalidAttribute {
                field: HotspotField::Datahora,
                ..
            }
        ));
    }
}
