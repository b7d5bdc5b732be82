//! MaxMind GeoLite2 database tier

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use geowatch_common::GeoAttribution;
use maxminddb::{geoip2, Reader};
use tracing::{debug, info, warn};

use super::{GeoError, GeoTier};

/// Local City + ASN database lookups
pub struct LocalDbTier {
    city: Option<Reader<Vec<u8>>>,
    asn: Option<Reader<Vec<u8>>>,
}

impl LocalDbTier {
    /// Open whichever databases exist. Returns `None` if neither opens.
    pub fn open(city: Option<&Path>, asn: Option<&Path>) -> Option<Self> {
        let city = city.and_then(|p| open_reader(p, "City"));
        let asn = asn.and_then(|p| open_reader(p, "ASN"));

        if city.is_none() && asn.is_none() {
            return None;
        }
        Some(Self { city, asn })
    }

    pub fn has_city(&self) -> bool {
        self.city.is_some()
    }

    pub fn has_asn(&self) -> bool {
        self.asn.is_some()
    }

    /// Look up `address` in both databases.
    ///
    /// Returns `Ok(None)` when the address is simply not in the data.
    pub fn lookup(&self, address: &str) -> Result<Option<GeoAttribution>, GeoError> {
        let ip: IpAddr = address
            .parse()
            .map_err(|_| GeoError::InvalidAddress(address.to_string()))?;

        let (city, country) = match &self.city {
            Some(reader) => city_lookup(reader, ip)?,
            None => (String::new(), String::new()),
        };
        let organization = match &self.asn {
            Some(reader) => asn_lookup(reader, ip)?,
            None => String::new(),
        };

        if country.is_empty() {
            return Ok(None);
        }
        Ok(Some(GeoAttribution::new(city, country, organization)))
    }
}

fn open_reader(path: &Path, kind: &str) -> Option<Reader<Vec<u8>>> {
    match Reader::open_readfile(path) {
        Ok(reader) => {
            info!("Opened GeoLite2 {} database {:?}", kind, path);
            Some(reader)
        }
        Err(e) => {
            warn!("Cannot open GeoLite2 {} database {:?}: {}", kind, path, e);
            None
        }
    }
}

fn is_not_found(e: &maxminddb::MaxMindDBError) -> bool {
    matches!(e, maxminddb::MaxMindDBError::AddressNotFoundError(_))
}

fn city_lookup(reader: &Reader<Vec<u8>>, ip: IpAddr) -> Result<(String, String), GeoError> {
    let record: geoip2::City = match reader.lookup(ip) {
        Ok(record) => record,
        Err(e) if is_not_found(&e) => return Ok((String::new(), String::new())),
        Err(e) => return Err(GeoError::Database(e.to_string())),
    };

    let city = record
        .city
        .and_then(|c| c.names)
        .and_then(|names| names.get("en").map(|s| s.to_string()))
        .unwrap_or_default();
    let country = record
        .country
        .and_then(|c| c.names)
        .and_then(|names| names.get("en").map(|s| s.to_string()))
        .unwrap_or_default();

    Ok((city, country))
}

fn asn_lookup(reader: &Reader<Vec<u8>>, ip: IpAddr) -> Result<String, GeoError> {
    match reader.lookup::<geoip2::Asn>(ip) {
        Ok(record) => Ok(record
            .autonomous_system_organization
            .map(str::to_string)
            .unwrap_or_default()),
        Err(e) if is_not_found(&e) => Ok(String::new()),
        Err(e) => Err(GeoError::Database(e.to_string())),
    }
}

#[async_trait]
impl GeoTier for LocalDbTier {
    fn name(&self) -> &'static str {
        "local-db"
    }

    async fn try_resolve(&self, address: &str) -> Option<GeoAttribution> {
        match self.lookup(address) {
            Ok(found) => found,
            Err(e) => {
                debug!("local-db lookup of {} failed: {}", address, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_files_is_none() {
        assert!(LocalDbTier::open(None, None).is_none());
    }

    #[test]
    fn test_open_missing_and_corrupt_files_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let corrupt = dir.path().join("GeoLite2-City.mmdb");
        std::fs::write(&corrupt, b"definitely not a maxmind database").unwrap();
        let missing = dir.path().join("GeoLite2-ASN.mmdb");

        assert!(LocalDbTier::open(Some(&corrupt), Some(&missing)).is_none());
    }
}
