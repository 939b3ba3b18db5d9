//! Paged `GetFeature` downloads and hit counts for one date window.

use std::path::{Path, PathBuf};

use hotspot_sync_acquisition_models::AcquisitionWindow;
use hotspot_sync_config::ServiceConfig;

use crate::query::{GetFeatureQuery, ResultMode, capabilities_pairs};
use crate::transport::WfsTransport;
use crate::xml::{self, Capabilities};
use crate::WfsError;

/// EPSG code used when neither the capabilities nor the configuration name
/// one (SIRGAS 2000).
const FALLBACK_EPSG: u32 = 4674;

/// Files written by a [`FeatureServiceClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Authoritative record count at download time.
    pub rows: u64,
    /// Path prefix shared by every page (`{dir}/{layer}_{start}_{end}`).
    pub prefix: PathBuf,
    /// Number of pages written.
    pub page_count: u64,
    /// Page archives in page order.
    pub pages: Vec<PathBuf>,
}

/// Start indices for paging `total` records `limit` at a time.
///
/// `plan_pages(23_500, 10_000)` is `[0, 10_000, 20_000]`.
#[must_use]
pub fn plan_pages(total: u64, limit: u64) -> Vec<u64> {
    let limit = limit.max(1);
    std::iter::successors(Some(0_u64), |start| start.checked_add(limit))
        .take_while(|start| *start < total)
        .collect()
}

/// Client for one WFS layer.
pub struct FeatureServiceClient<T> {
    transport: T,
    config: ServiceConfig,
    endpoint: String,
    window: Option<AcquisitionWindow>,
    capabilities: Option<Capabilities>,
}

impl<T: WfsTransport> FeatureServiceClient<T> {
    /// Creates a client for the layer described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::InvalidConfiguration`] if the endpoint or layer
    /// is missing or the page limit is zero.
    pub fn new(transport: T, config: ServiceConfig) -> Result<Self, WfsError> {
        if config.base_url.trim().is_empty() || config.layer.trim().is_empty() {
            return Err(WfsError::InvalidConfiguration {
                message: "base URL and layer name are required".to_string(),
            });
        }
        if config.default_page_limit == 0 {
            return Err(WfsError::InvalidConfiguration {
                message: "default page limit must be greater than zero".to_string(),
            });
        }

        let endpoint = config.endpoint();
        log::debug!("WFS endpoint {endpoint}, layer {}", config.layer);

        Ok(Self {
            transport,
            config,
            endpoint,
            window: None,
            capabilities: None,
        })
    }

    /// Sets the window every subsequent query filters on.
    pub const fn set_period(&mut self, window: AcquisitionWindow) {
        self.window = Some(window);
    }

    /// File stem for the pages of `window`: `{layer}_{start}_{end}`.
    #[must_use]
    pub fn file_stem(&self, window: AcquisitionWindow) -> String {
        format!(
            "{}_{}_{}",
            self.config.layer,
            window.start_date(),
            window.end_date()
        )
    }

    fn query(&self, window: AcquisitionWindow, mode: ResultMode<'_>) -> Vec<(&'static str, String)> {
        GetFeatureQuery {
            type_name: &self.config.layer,
            srs_name: &self.config.srs_name,
            output_format: &self.config.output_format,
            date_attribute: &self.config.date_attribute,
            window,
            extra_filter: self.config.extra_filter.as_deref(),
            mode,
        }
        .to_pairs()
    }

    /// Number of records matching the active window.
    ///
    /// # Errors
    ///
    /// * [`WfsError::MissingPeriod`] if no window was set.
    /// * [`WfsError::ServiceUnavailable`] on an error status or a response
    ///   without a usable `numberMatched`.
    /// * [`WfsError::Http`] on transport failure.
    pub async fn count_max(&self) -> Result<u64, WfsError> {
        let window = self.window.ok_or(WfsError::MissingPeriod)?;
        let response = self
            .transport
            .get(&self.endpoint, &self.query(window, ResultMode::Hits))
            .await?;

        if !response.is_success() {
            return Err(WfsError::unavailable(format!(
                "hits query for {window} returned HTTP {}",
                response.status
            )));
        }

        let matched = xml::parse_number_matched(&response.text())?;
        log::info!("{}: {matched} records match {window}", self.config.layer);
        Ok(matched)
    }

    /// Fetches and caches the capabilities document.
    ///
    /// An error status or unreadable document is logged and treated as
    /// advertising nothing, so callers fall back to configured values.
    async fn capabilities(&mut self) -> Result<Capabilities, WfsError> {
        if let Some(caps) = self.capabilities {
            return Ok(caps);
        }

        let response = self
            .transport
            .get(&self.endpoint, &capabilities_pairs())
            .await?;

        let caps = if response.is_success() {
            match xml::parse_capabilities(&response.text(), &self.config.layer) {
                Ok(caps) => caps,
                Err(e) => {
                    log::warn!("Unreadable capabilities document, using defaults: {e}");
                    Capabilities::default()
                }
            }
        } else {
            log::warn!(
                "GetCapabilities returned HTTP {}, using defaults",
                response.status
            );
            Capabilities::default()
        };

        self.capabilities = Some(caps);
        Ok(caps)
    }

    /// Per-request record ceiling advertised by the server, or the
    /// configured default.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::Http`] if the capabilities request cannot be
    /// sent.
    pub async fn server_limit(&mut self) -> Result<u64, WfsError> {
        let caps = self.capabilities().await?;
        Ok(caps
            .count_default
            .filter(|limit| *limit > 0)
            .unwrap_or(self.config.default_page_limit))
    }

    /// EPSG code of the layer's default CRS.
    ///
    /// Falls back to the configured `srs_name`, then to SIRGAS 2000.
    pub async fn default_crs(&mut self) -> u32 {
        let advertised = match self.capabilities().await {
            Ok(caps) => caps.default_crs,
            Err(e) => {
                log::warn!("Could not read capabilities for default CRS: {e}");
                None
            }
        };
        advertised
            .or_else(|| xml::epsg_code(&self.config.srs_name))
            .unwrap_or(FALLBACK_EPSG)
    }

    /// Downloads every record of the active window into `output_dir`.
    ///
    /// Pages are written as `{layer}_{start}_{end}_part{N}.zip`, `N` from 1.
    /// A zero count writes nothing.
    ///
    /// # Errors
    ///
    /// * [`WfsError::MissingPeriod`] if no window was set.
    /// * [`WfsError::ServiceUnavailable`] if the count or any page fails.
    ///   Pages written before the failing one are left on disk.
    /// * [`WfsError::Io`] if the directory or a page cannot be written.
    pub async fn download(&mut self, output_dir: &Path) -> Result<DownloadResult, WfsError> {
        let window = self.window.ok_or(WfsError::MissingPeriod)?;

        tokio::fs::create_dir_all(output_dir).await?;

        let limit = self.server_limit().await?;
        let total = self.count_max().await?;
        let prefix = output_dir.join(self.file_stem(window));
        let starts = plan_pages(total, limit);
        let page_count = starts.len() as u64;

        log::info!(
            "{}: downloading {total} records for {window} in {page_count} page(s) of {limit}",
            self.config.layer
        );

        let mut pages = Vec::with_capacity(starts.len());
        for (idx, start_index) in starts.into_iter().enumerate() {
            let part = idx + 1;
            let query = self.query(
                window,
                ResultMode::Page {
                    count: limit,
                    sort_by: &self.config.sort_attribute,
                    start_index,
                },
            );
            let response = self.transport.get(&self.endpoint, &query).await?;

            if !response.is_success() {
                return Err(WfsError::unavailable(format!(
                    "page {part} of {window} returned HTTP {}",
                    response.status
                )));
            }
            if let Some(message) = xml::exception_message(&response.body) {
                return Err(WfsError::unavailable(format!(
                    "page {part} of {window}: {message}"
                )));
            }

            let mut file_name = prefix.as_os_str().to_owned();
            file_name.push(format!("_part{part}.zip"));
            let path = PathBuf::from(file_name);
            tokio::fs::write(&path, &response.body).await?;

            log::info!(
                "  page {part}/{page_count} (startIndex={start_index}): {} bytes -> {}",
                response.body.len(),
                path.display()
            );
            pages.push(path);
        }

        Ok(DownloadResult {
            rows: total,
            prefix,
            page_count,
            pages,
        })
    }
}
