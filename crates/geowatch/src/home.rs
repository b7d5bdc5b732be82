//! Home country detection
//!
//! Runs at most once per process: manual override, then public-IP discovery
//! through the geo resolver, then a direct country query, then the default.

use std::net::IpAddr;
use std::sync::Arc;

use geowatch_common::{DetectionMethod, HomeCountry};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::geo::{country_name, GeoResolver};
use crate::http::HttpClient;

/// Public IP echo services, tried in order
pub const ECHO_SERVICES: &[&str] = &[
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
];

pub const IP_API_SELF_URL: &str = "http://ip-api.com/json/?fields=status,country";
pub const IPAPI_CO_URL: &str = "https://ipapi.co/country_name/";

/// Values that name a region or a sentinel rather than a country
const REJECTED_COUNTRIES: &[&str] = &[
    "Europe",
    "Asia",
    "Africa",
    "North America",
    "South America",
    "Oceania",
    "Antarctica",
    "Unknown",
    "Private",
    "Local Network",
    "",
];

pub fn is_acceptable_country(country: &str) -> bool {
    !REJECTED_COUNTRIES.contains(&country.trim())
}

#[derive(Debug, Deserialize)]
struct SelfLookup {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
}

/// Determines the operator's country once and remembers it
pub struct HomeCountryDetector {
    default_country: String,
    manual_override: Option<String>,
    online: bool,
    http: Arc<dyn HttpClient>,
    detected: Option<HomeCountry>,
}

impl HomeCountryDetector {
    pub fn new(default_country: impl Into<String>, http: Arc<dyn HttpClient>) -> Self {
        Self {
            default_country: default_country.into(),
            manual_override: None,
            online: true,
            http,
            detected: None,
        }
    }

    /// Skip detection and use `country` for the whole run
    pub fn with_override(mut self, country: Option<String>) -> Self {
        self.manual_override = country.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// The previously detected value, if any
    pub fn cached(&self) -> Option<&HomeCountry> {
        self.detected.as_ref()
    }

    /// Detect the home country. Later calls return the first result.
    pub async fn detect(&mut self, resolver: &mut GeoResolver) -> HomeCountry {
        if let Some(home) = &self.detected {
            return home.clone();
        }

        let home = self.run_detection(resolver).await;
        info!("Home country: {}", home);
        self.detected = Some(home.clone());
        home
    }

    async fn run_detection(&self, resolver: &mut GeoResolver) -> HomeCountry {
        if let Some(country) = &self.manual_override {
            return HomeCountry::new(country.trim(), DetectionMethod::ManualOverride);
        }

        if !self.online {
            debug!("Online lookups disabled, using default home country");
            return self.fallback();
        }

        if let Some(ip) = self.discover_public_ip().await {
            let geo = resolver.resolve(&ip.to_string()).await;
            let country = country_name(&geo.country);
            if is_acceptable_country(&country) {
                return HomeCountry::new(country, DetectionMethod::AutoDetected);
            }
            debug!("Public IP {} resolved to unusable country {:?}", ip, geo.country);
        }

        if let Some(country) = self.query_direct().await {
            return HomeCountry::new(country, DetectionMethod::AutoDetected);
        }

        warn!(
            "Could not detect home country, using default {:?}",
            self.default_country
        );
        self.fallback()
    }

    fn fallback(&self) -> HomeCountry {
        HomeCountry::new(self.default_country.clone(), DetectionMethod::DefaultFallback)
    }

    async fn discover_public_ip(&self) -> Option<IpAddr> {
        for url in ECHO_SERVICES {
            match self.http.get_text(url).await {
                Ok(body) => match body.trim().parse::<IpAddr>() {
                    Ok(ip) => {
                        debug!("Public IP {} from {}", ip, url);
                        return Some(ip);
                    }
                    Err(_) => debug!("{} returned a non-address body", url),
                },
                Err(e) => debug!("Echo service {} failed: {}", url, e),
            }
        }
        None
    }

    async fn query_direct(&self) -> Option<String> {
        match self.http.get_text(IP_API_SELF_URL).await {
            Ok(body) => match serde_json::from_str::<SelfLookup>(&body) {
                Ok(data) if data.status == "success" && is_full_name(&data.country) => {
                    return Some(data.country.trim().to_string());
                }
                Ok(data) => debug!("ip-api self lookup unusable: {:?}", data),
                Err(e) => debug!("ip-api self lookup malformed: {}", e),
            },
            Err(e) => debug!("ip-api self lookup failed: {}", e),
        }

        match self.http.get_text(IPAPI_CO_URL).await {
            Ok(body) if is_full_name(&body) => Some(body.trim().to_string()),
            Ok(body) => {
                debug!("ipapi.co returned unusable country {:?}", body.trim());
                None
            }
            Err(e) => {
                debug!("ipapi.co lookup failed: {}", e);
                None
            }
        }
    }
}

/// Direct services sometimes answer with a bare code; only full names count
fn is_full_name(country: &str) -> bool {
    let country = country.trim();
    country.chars().count() > 2 && is_acceptable_country(country)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoCache, GeoError, RangeTable};
    use crate::http::MockHttpClient;
    use mockall::predicate::*;

    fn resolver() -> GeoResolver {
        GeoResolver::new(vec![Box::new(RangeTable::builtin())], GeoCache::in_memory())
    }

    fn offline_mock() -> MockHttpClient {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .returning(|url| Err(GeoError::Http(format!("{}: network unreachable", url))));
        mock
    }

    #[tokio::test]
    async fn test_no_connectivity_falls_back_to_default() {
        let mut detector = HomeCountryDetector::new("United States", Arc::new(offline_mock()));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home.country, "United States");
        assert_eq!(home.method, DetectionMethod::DefaultFallback);
    }

    #[tokio::test]
    async fn test_override_wins_without_requests() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text().never();

        let mut detector = HomeCountryDetector::new("United States", Arc::new(mock))
            .with_override(Some("Germany".to_string()));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home, HomeCountry::new("Germany", DetectionMethod::ManualOverride));
    }

    #[tokio::test]
    async fn test_offline_mode_skips_network() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text().never();

        let mut detector =
            HomeCountryDetector::new("Canada", Arc::new(mock)).with_online(false);
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home, HomeCountry::new("Canada", DetectionMethod::DefaultFallback));
    }

    #[tokio::test]
    async fn test_public_ip_resolved_through_resolver() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .with(eq("https://api.ipify.org"))
            .times(1)
            .returning(|_| Ok("46.4.84.25\n".to_string()));

        let mut detector = HomeCountryDetector::new("United States", Arc::new(mock));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home, HomeCountry::new("Germany", DetectionMethod::AutoDetected));
    }

    #[tokio::test]
    async fn test_echo_services_tried_in_order() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .with(eq("https://api.ipify.org"))
            .returning(|_| Ok("<html>rate limited</html>".to_string()));
        mock.expect_get_text()
            .with(eq("https://ifconfig.me/ip"))
            .returning(|_| Ok("8.8.8.8".to_string()));

        let mut detector = HomeCountryDetector::new("Canada", Arc::new(mock));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home.country, "United States");
        assert_eq!(home.method, DetectionMethod::AutoDetected);
    }

    #[tokio::test]
    async fn test_direct_query_when_ip_unresolvable() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .with(eq("https://api.ipify.org"))
            .returning(|_| Ok("203.0.113.50".to_string()));
        mock.expect_get_text()
            .with(eq(IP_API_SELF_URL))
            .returning(|_| Ok(r#"{"status":"success","country":"Netherlands"}"#.to_string()));

        let mut detector = HomeCountryDetector::new("United States", Arc::new(mock));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home, HomeCountry::new("Netherlands", DetectionMethod::AutoDetected));
    }

    #[tokio::test]
    async fn test_direct_text_service_rejects_codes() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .withf(|url| ECHO_SERVICES.contains(&url))
            .returning(|_| Err(GeoError::Http("timeout".to_string())));
        mock.expect_get_text()
            .with(eq(IP_API_SELF_URL))
            .returning(|_| Ok(r#"{"status":"fail"}"#.to_string()));
        mock.expect_get_text()
            .with(eq(IPAPI_CO_URL))
            .returning(|_| Ok("DE".to_string()));

        let mut detector = HomeCountryDetector::new("United States", Arc::new(mock));
        let home = detector.detect(&mut resolver()).await;

        assert_eq!(home.method, DetectionMethod::DefaultFallback);
    }

    #[tokio::test]
    async fn test_detected_once() {
        let mut mock = MockHttpClient::new();
        mock.expect_get_text()
            .times(1)
            .returning(|_| Ok("46.4.84.25".to_string()));

        let mut detector = HomeCountryDetector::new("United States", Arc::new(mock));
        let mut resolver = resolver();
        let first = detector.detect(&mut resolver).await;
        let second = detector.detect(&mut resolver).await;

        assert_eq!(first, second);
        assert_eq!(detector.cached(), Some(&first));
    }

    #[test]
    fn test_region_names_rejected() {
        assert!(!is_acceptable_country("Europe"));
        assert!(!is_acceptable_country("Local Network"));
        assert!(!is_acceptable_country(""));
        assert!(is_acceptable_country("Germany"));
        assert!(!is_full_name("US"));
        assert!(is_full_name("United States\n"));
    }
}
