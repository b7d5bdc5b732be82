//! geowatch library
//!
//! Enumerates the host's network connections and attributes each remote
//! peer to a city, country and organization.

pub mod annotate;
pub mod classify;
pub mod config;
pub mod export;
pub mod geo;
pub mod home;
pub mod http;
pub mod network;
pub mod report;

pub use annotate::{ConnectionAnnotator, CycleSummary, Schedule};
pub use classify::{classify, AddressClass};
pub use config::Config;
pub use geo::{GeoError, GeoResolver, GeoTier};
pub use home::HomeCountryDetector;
pub use network::ConnectionEnumerator;
