//! HTTP transport for WFS requests.

use std::time::Duration;

use async_trait::async_trait;

use crate::WfsError;

/// Raw response from the service.
#[derive(Debug, Clone)]
pub struct WfsResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl WfsResponse {
    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The body decoded as UTF-8 (lossy).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Performs GET requests against the WFS endpoint.
#[async_trait]
pub trait WfsTransport: Send + Sync {
    /// Sends `GET url?query`.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::Http`] on connection or timeout failures. HTTP
    /// error statuses are returned as a normal [`WfsResponse`].
    async fn get(&self, url: &str, query: &[(&'static str, String)])
    -> Result<WfsResponse, WfsError>;
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`WfsTransport`] backed by `reqwest`, with optional basic auth.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
}

impl ReqwestTransport {
    /// Builds a transport. Only connection setup is time-limited; a page
    /// download runs for as long as the server keeps streaming.
    ///
    /// # Errors
    ///
    /// Returns [`WfsError::Http`] if the HTTP client cannot be built.
    pub fn new(credentials: Option<(String, String)>) -> Result<Self, WfsError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("hotspot-sync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }

    fn request(&self, url: &str, query: &[(&'static str, String)]) -> reqwest::RequestBuilder {
        let request = self.client.get(url).query(query);
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }
}

#[async_trait]
impl WfsTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> Result<WfsResponse, WfsError> {
        let response = self.request(url, query).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        log::debug!("GET {url} -> HTTP {status}, {} bytes", body.len());

        Ok(WfsResponse { status, body })
    }
}
