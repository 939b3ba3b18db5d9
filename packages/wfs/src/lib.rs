#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! WFS 2.0 client for the hotspot layer.
//!
//! The [`FeatureServiceClient`] answers two questions for a date window:
//! how many records the service holds ([`FeatureServiceClient::count_max`])
//! and what they are, downloaded page by page as `SHAPE-ZIP` archives
//! ([`FeatureServiceClient::download`]). The per-request ceiling is read
//! once from the `GetCapabilities` document.
//!
//! All HTTP goes through the [`WfsTransport`] trait so the paging logic can
//! be exercised without a network.

pub mod client;
pub mod query;
pub mod transport;
pub mod xml;

use std::path::Path;

use async_trait::async_trait;
use hotspot_sync_acquisition_models::AcquisitionWindow;

pub use client::{DownloadResult, FeatureServiceClient, plan_pages};
pub use query::{GetFeatureQuery, ResultMode};
pub use transport::{ReqwestTransport, WfsResponse, WfsTransport};

/// Errors that can occur while talking to the feature service.
#[derive(Debug, thiserror::Error)]
pub enum WfsError {
    /// A query was attempted before [`FeatureServiceClient::set_period`].
    #[error("Missing period to filter data, call set_period first")]
    MissingPeriod,

    /// The client configuration cannot produce a valid request.
    #[error("Invalid service configuration: {message}")]
    InvalidConfiguration {
        /// What is wrong.
        message: String,
    },

    /// The service answered with an error status, an exception report, or
    /// a document that is not what was asked for.
    #[error("Feature service unavailable: {message}")]
    ServiceUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing a page to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WfsError {
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }
}

/// A source of hotspot records that can be counted and downloaded by
/// window.
///
/// Implemented by [`FeatureServiceClient`]; the orchestrator and the
/// completeness checker depend only on this trait.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Authoritative number of records in `window`.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError`] if the count cannot be obtained.
    async fn count(&mut self, window: AcquisitionWindow) -> Result<u64, WfsError>;

    /// Downloads every record in `window` into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError`] if any page fails. Pages written before the
    /// failure stay on disk.
    async fn download(
        &mut self,
        window: AcquisitionWindow,
        output_dir: &Path,
    ) -> Result<DownloadResult, WfsError>;

    /// EPSG code to assume for batches that do not declare one.
    async fn default_crs(&mut self) -> u32;
}

#[async_trait]
impl<T: WfsTransport> FeatureSource for FeatureServiceClient<T> {
    async fn count(&mut self, window: AcquisitionWindow) -> Result<u64, WfsError> {
        self.set_period(window);
        self.count_max().await
    }

    async fn download(
        &mut self,
        window: AcquisitionWindow,
        output_dir: &Path,
    ) -> Result<DownloadResult, WfsError> {
        self.set_period(window);
        Self::download(self, output_dir).await
    }

    async fn default_crs(&mut self) -> u32 {
        Self::default_crs(self).await
    }
}
