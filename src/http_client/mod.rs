//! HTTP collaborator: page fetches and header handling.

mod user_agent;

pub use user_agent::{pick_user_agent, random_user_agent, BROWSER_USER_AGENTS};

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Result, ScrapeError};

/// Convert configured headers into a reqwest header map, skipping entries
/// that aren't valid HTTP.
pub fn header_map(headers: &IndexMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header '{}'", name),
        }
    }
    map
}

/// Page-fetching client shared by one worker.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    user_agent: String,
}

impl HttpClient {
    /// Build a client from the run settings: one user agent picked for the
    /// whole run, the configured default headers and the page-fetch timeout.
    pub fn new(settings: &Settings) -> Result<Self> {
        let user_agent = pick_user_agent(&settings.user_agents);
        Self::with_user_agent(
            user_agent,
            &settings.headers,
            settings.timeouts.page_fetch(),
        )
    }

    pub fn with_user_agent(
        user_agent: String,
        headers: &IndexMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&user_agent)
            .default_headers(header_map(headers))
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()?;
        debug!("HTTP client using user agent: {}", user_agent);
        Ok(Self { client, user_agent })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Underlying reqwest client, for streaming transfers.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch a page as text.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        self.fetch_with_headers(url, &IndexMap::new()).await
    }

    /// Fetch a document with extra request headers.
    pub async fn fetch_with_headers(
        &self,
        url: &str,
        headers: &IndexMap<String, String>,
    ) -> Result<String> {
        debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .headers(header_map(headers))
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ScrapeError::NotFound(format!("{} returned {}", url, status)));
        }
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }
}
