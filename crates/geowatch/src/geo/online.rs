//! Networked attribution tier (ip-api.com, then ipinfo.io)

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geowatch_common::GeoAttribution;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use super::countries::country_name;
use super::{GeoError, GeoTier};
use crate::http::HttpClient;

pub const IP_API_URL: &str = "http://ip-api.com/json/{ip}?fields=status,message,country,city,org,as";
pub const IPINFO_URL: &str = "https://ipinfo.io/{ip}/json";

const WINDOW: Duration = Duration::from_secs(60);

/// Per-address spacing plus a global sliding per-minute budget
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    per_minute: usize,
    last_request: HashMap<String, Instant>,
    window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration, per_minute: usize) -> Self {
        Self {
            min_spacing,
            per_minute,
            last_request: HashMap::new(),
            window: VecDeque::new(),
        }
    }

    pub fn try_acquire(&mut self, address: &str) -> Result<(), GeoError> {
        self.try_acquire_at(address, Instant::now())
    }

    /// Reserve one request for `address` at `now`, or say why not
    pub fn try_acquire_at(&mut self, address: &str, now: Instant) -> Result<(), GeoError> {
        if let Some(last) = self.last_request.get(address) {
            if now.saturating_duration_since(*last) < self.min_spacing {
                return Err(GeoError::RateLimited(format!(
                    "{} queried less than {:?} ago",
                    address, self.min_spacing
                )));
            }
        }

        while let Some(oldest) = self.window.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
        if self.window.len() >= self.per_minute {
            return Err(GeoError::RateLimited(format!(
                "{} requests in the last minute",
                self.window.len()
            )));
        }

        self.window.push_back(now);
        self.last_request.insert(address.to_string(), now);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    org: String,
    #[serde(default, rename = "as")]
    asn: String,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    org: String,
    #[serde(default)]
    bogon: bool,
}

/// Online lookups behind a [`RateLimiter`]
pub struct OnlineTier {
    http: Arc<dyn HttpClient>,
    limiter: Mutex<RateLimiter>,
    ip_api_url: String,
    ipinfo_url: String,
}

impl OnlineTier {
    pub fn new(http: Arc<dyn HttpClient>, limiter: RateLimiter) -> Self {
        Self {
            http,
            limiter: Mutex::new(limiter),
            ip_api_url: IP_API_URL.to_string(),
            ipinfo_url: IPINFO_URL.to_string(),
        }
    }

    /// Override the service URL templates; `{ip}` is substituted
    pub fn with_urls(mut self, ip_api: impl Into<String>, ipinfo: impl Into<String>) -> Self {
        self.ip_api_url = ip_api.into();
        self.ipinfo_url = ipinfo.into();
        self
    }

    async fn query_ip_api(&self, address: &str) -> Result<GeoAttribution, GeoError> {
        let body = self
            .http
            .get_text(&self.ip_api_url.replace("{ip}", address))
            .await?;
        let data: IpApiResponse =
            serde_json::from_str(&body).map_err(|e| GeoError::BadResponse(e.to_string()))?;

        if data.status != "success" {
            return Err(GeoError::BadResponse(format!(
                "ip-api status {}: {}",
                data.status,
                data.message.unwrap_or_default()
            )));
        }

        let organization = if data.org.is_empty() { data.asn } else { data.org };
        Ok(GeoAttribution::new(
            data.city,
            country_name(&data.country),
            organization,
        ))
    }

    async fn query_ipinfo(&self, address: &str) -> Result<GeoAttribution, GeoError> {
        let body = self
            .http
            .get_text(&self.ipinfo_url.replace("{ip}", address))
            .await?;
        let data: IpInfoResponse =
            serde_json::from_str(&body).map_err(|e| GeoError::BadResponse(e.to_string()))?;

        if data.bogon {
            return Err(GeoError::BadResponse(format!("{} is a bogon", address)));
        }

        Ok(GeoAttribution::new(
            data.city,
            country_name(&data.country),
            strip_asn_prefix(&data.org),
        ))
    }

    async fn lookup(&self, address: &str) -> Result<GeoAttribution, GeoError> {
        self.limiter.lock().try_acquire(address)?;

        match self.query_ip_api(address).await {
            Ok(geo) if geo.is_trusted() => return Ok(geo),
            Ok(geo) => debug!("ip-api had no country for {} ({:?})", address, geo.country),
            Err(e) => debug!("ip-api lookup of {} failed: {}", address, e),
        }

        self.query_ipinfo(address).await
    }
}

/// `AS15169 Google LLC` → `Google LLC`
fn strip_asn_prefix(org: &str) -> String {
    match org.split_once(' ') {
        Some((asn, rest))
            if asn.len() > 2
                && asn.starts_with("AS")
                && asn[2..].chars().all(|c| c.is_ascii_digit()) =>
        {
            rest.trim().to_string()
        }
        _ => org.trim().to_string(),
    }
}

#[async_trait]
impl GeoTier for OnlineTier {
    fn name(&self) -> &'static str {
        "online"
    }

    async fn try_resolve(&self, address: &str) -> Option<GeoAttribution> {
        match self.lookup(address).await {
            Ok(geo) => Some(geo).filter(GeoAttribution::is_trusted),
            Err(e) => {
                debug!("online lookup of {} declined: {}", address, e);
                None
            }
        }
    }
}
