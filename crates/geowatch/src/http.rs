//! Minimal HTTP client abstraction for geo and home-country lookups

use std::time::Duration;

use async_trait::async_trait;

use crate::geo::GeoError;

/// Fetches a URL and returns the body of a successful response
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, GeoError>;
}

/// `reqwest` backed client with a per-request timeout
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self, GeoError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("geowatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GeoError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get_text(&self, url: &str) -> Result<String, GeoError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GeoError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Http(format!("{} returned {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| GeoError::BadResponse(e.to_string()))
    }
}
