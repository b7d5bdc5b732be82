//! Tiered geographic attribution
//!
//! Addresses are resolved through an ordered list of [`GeoTier`]s behind a
//! persistent [`GeoCache`]. Non-public addresses never reach a tier.

pub mod cache;
pub mod countries;
pub mod local_db;
pub mod online;
pub mod range_table;

#[cfg(test)]
mod tests;

use std::net::IpAddr;

use async_trait::async_trait;
use geowatch_common::GeoAttribution;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::classify::classify;

pub use cache::{CacheEntry, CacheError, FlushPolicy, GeoCache, DEFAULT_RETENTION};
pub use countries::country_name;
pub use local_db::LocalDbTier;
pub use online::{OnlineTier, RateLimiter};
pub use range_table::{IpRange, RangeTable};

/// Geo lookup errors
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Malformed response: {0}")]
    BadResponse(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

/// One attribution source in the resolver's fallback chain.
///
/// Implementations swallow their own errors: a failed lookup is a decline.
#[async_trait]
pub trait GeoTier: Send + Sync {
    /// Short name shown in the summary line
    fn name(&self) -> &'static str;

    /// Attribute `address`, or `None` to let the next tier try
    async fn try_resolve(&self, address: &str) -> Option<GeoAttribution>;
}

/// Cache-fronted resolver over an ordered tier list
pub struct GeoResolver {
    tiers: Vec<Box<dyn GeoTier>>,
    cache: GeoCache,
}

impl GeoResolver {
    pub fn new(tiers: Vec<Box<dyn GeoTier>>, cache: GeoCache) -> Self {
        info!(
            "Geo resolver tiers: [{}], {} cached entries",
            tiers.iter().map(|t| t.name()).collect::<Vec<_>>().join(", "),
            cache.len()
        );
        Self { tiers, cache }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn cache(&self) -> &GeoCache {
        &self.cache
    }

    /// Resolve `address`, degrading to `("", "Unknown", "")` on any failure
    pub async fn resolve(&mut self, address: &str) -> GeoAttribution {
        match self.try_resolve(address).await {
            Ok(geo) => geo,
            Err(e) => {
                debug!("{}", e);
                GeoAttribution::unknown()
            }
        }
    }

    /// Resolve `address`; only a malformed lookup key is an error.
    ///
    /// Unresolvable public addresses yield `("", "Unknown", "")` and are not
    /// cached, so a later call may still succeed.
    pub async fn try_resolve(&mut self, address: &str) -> Result<GeoAttribution, GeoError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(GeoError::InvalidAddress(address.to_string()));
        }

        if !classify(address).is_public() {
            return Ok(GeoAttribution::private());
        }

        let bare = address.split('%').next().unwrap_or(address);
        if bare.parse::<IpAddr>().is_err() {
            return Err(GeoError::InvalidAddress(address.to_string()));
        }

        if let Some(hit) = self.cache.get(address).cloned() {
            self.cache.maybe_flush();
            return Ok(hit);
        }

        for tier in &self.tiers {
            if let Some(geo) = tier.try_resolve(address).await {
                if geo.is_trusted() {
                    debug!("{} resolved {} → {}", tier.name(), address, geo.country);
                    self.cache.insert(address, geo.clone());
                    self.cache.maybe_flush();
                    return Ok(geo);
                }
            }
        }

        debug!("No tier could attribute {}", address);
        Ok(GeoAttribution::unknown())
    }

    /// Write pending cache entries if the flush policy says they are due
    pub fn maybe_flush(&mut self) -> bool {
        self.cache.maybe_flush()
    }

    /// Persist any pending cache writes
    pub fn close(&mut self) {
        if !self.cache.is_dirty() {
            return;
        }
        if let Err(e) = self.cache.flush() {
            warn!("Failed to save geo cache on close: {}", e);
        }
    }
}

impl Drop for GeoResolver {
    fn drop(&mut self) {
        self.close();
    }
}
