//! Typed `GetFeature` / `GetCapabilities` query parameters.

use hotspot_sync_acquisition_models::AcquisitionWindow;

const SERVICE: &str = "WFS";
const VERSION: &str = "2.0.0";
const EXCEPTIONS: &str = "text/xml";

/// What a `GetFeature` request should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode<'a> {
    /// Only the number of matching features (`resultType=hits`).
    Hits,
    /// One page of features.
    Page {
        /// Page size (`count`).
        count: u64,
        /// Attribute that gives the paging a stable order (`sortBy`).
        sort_by: &'a str,
        /// Zero-based offset of the first feature (`startIndex`).
        start_index: u64,
    },
}

/// A `GetFeature` request against one layer and one date window.
#[derive(Debug, Clone)]
pub struct GetFeatureQuery<'a> {
    /// Layer name (`typeName`).
    pub type_name: &'a str,
    /// Output projection (`srsName`).
    pub srs_name: &'a str,
    /// Output format for page requests (`outputFormat`).
    pub output_format: &'a str,
    /// Date attribute the window filters on.
    pub date_attribute: &'a str,
    /// Window to select.
    pub window: AcquisitionWindow,
    /// Additional CQL predicate.
    pub extra_filter: Option<&'a str>,
    /// Hits or page.
    pub mode: ResultMode<'a>,
}

impl GetFeatureQuery<'_> {
    /// The `CQL_FILTER` value.
    ///
    /// The date attribute is a timestamp, so the inclusive day range is
    /// expressed as `>= start AND < end + 1 day` to keep every detection on
    /// the last day.
    #[must_use]
    pub fn cql_filter(&self) -> String {
        let attr = self.date_attribute;
        let mut filter = format!(
            "{attr} >= '{}' AND {attr} < '{}'",
            self.window.start_date(),
            self.window.end_exclusive()
        );
        if let Some(extra) = self.extra_filter.map(str::trim).filter(|e| !e.is_empty()) {
            filter.push_str(" AND (");
            filter.push_str(extra);
            filter.push(')');
        }
        filter
    }

    /// Query pairs in request order.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("service", SERVICE.to_string()),
            ("request", "GetFeature".to_string()),
            ("version", VERSION.to_string()),
            ("exceptions", EXCEPTIONS.to_string()),
            ("srsName", self.srs_name.to_string()),
            ("typeName", self.type_name.to_string()),
            ("CQL_FILTER", self.cql_filter()),
        ];

        match self.mode {
            ResultMode::Hits => {
                pairs.push(("resultType", "hits".to_string()));
            }
            ResultMode::Page {
                count,
                sort_by,
                start_index,
            } => {
                pairs.push(("outputFormat", self.output_format.to_string()));
                pairs.push(("count", count.to_string()));
                pairs.push(("sortBy", sort_by.to_string()));
                pairs.push(("startIndex", start_index.to_string()));
            }
        }

        pairs
    }
}

/// Query pairs for `GetCapabilities`.
#[must_use]
pub fn capabilities_pairs() -> Vec<(&'static str, String)> {
    vec![
        ("service", SERVICE.to_string()),
        ("version", VERSION.to_string()),
        ("request", "GetCapabilities".to_string()),
    ]
}
