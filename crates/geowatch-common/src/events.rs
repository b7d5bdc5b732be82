//! Connection and attribution types shared across geowatch

use std::fmt;

use serde::{Deserialize, Serialize};

/// Country value used when no tier could attribute an address
pub const UNKNOWN_COUNTRY: &str = "Unknown";
/// Country value for private, loopback and unspecified addresses
pub const PRIVATE_COUNTRY: &str = "Private";
/// Organization value paired with [`PRIVATE_COUNTRY`]
pub const LOCAL_NETWORK: &str = "Local Network";
/// Organization value recorded when a lookup failed outright
pub const LOOKUP_ERROR: &str = "Lookup Error";

/// Country values that never count as a real attribution
const SENTINEL_COUNTRIES: &[&str] = &["", UNKNOWN_COUNTRY, LOCAL_NETWORK, PRIVATE_COUNTRY];

/// Returns true if `country` names an actual country
pub fn is_real_country(country: &str) -> bool {
    !SENTINEL_COUNTRIES.contains(&country)
}

/// Network protocol type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// Parse a protocol column token such as `tcp`, `TCP`, `tcp6` or `udp46`
    pub fn from_token(token: &str) -> Option<Self> {
        let lower = token.to_ascii_lowercase();
        if lower.starts_with("tcp") {
            Some(Self::Tcp)
        } else if lower.starts_with("udp") {
            Some(Self::Udp)
        } else {
            None
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_str().to_uppercase())
    }
}

/// Socket state, normalized from each tool's vocabulary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    /// Stateless socket (UDP)
    None,
    Unknown,
}

impl ConnectionState {
    /// Normalize a state column from netstat (Linux, macOS, Windows) or ss
    pub fn normalize(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase().replace('-', "_");
        match upper.as_str() {
            "ESTABLISHED" | "ESTAB" => Self::Established,
            "SYN_SENT" => Self::SynSent,
            "SYN_RECV" | "SYN_RECEIVED" | "SYN_RCVD" => Self::SynRecv,
            "FIN_WAIT1" | "FIN_WAIT_1" => Self::FinWait1,
            "FIN_WAIT2" | "FIN_WAIT_2" => Self::FinWait2,
            "TIME_WAIT" => Self::TimeWait,
            "CLOSE" | "CLOSED" => Self::Close,
            "CLOSE_WAIT" => Self::CloseWait,
            "LAST_ACK" => Self::LastAck,
            "LISTEN" | "LISTENING" => Self::Listen,
            "CLOSING" => Self::Closing,
            "UNCONN" | "" => Self::None,
            _ => Self::Unknown,
        }
    }

    /// Returns true if `raw` is a token from the known state vocabulary
    pub fn is_state_token(raw: &str) -> bool {
        !raw.is_empty() && Self::normalize(raw) != Self::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Established => "ESTABLISHED",
            Self::SynSent => "SYN_SENT",
            Self::SynRecv => "SYN_RECV",
            Self::FinWait1 => "FIN_WAIT1",
            Self::FinWait2 => "FIN_WAIT2",
            Self::TimeWait => "TIME_WAIT",
            Self::Close => "CLOSE",
            Self::CloseWait => "CLOSE_WAIT",
            Self::LastAck => "LAST_ACK",
            Self::Listen => "LISTEN",
            Self::Closing => "CLOSING",
            Self::None => "",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Geographic and organizational attribution for one address
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeoAttribution {
    pub city: String,
    pub country: String,
    pub organization: String,
}

impl GeoAttribution {
    pub fn new(
        city: impl Into<String>,
        country: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
            organization: organization.into(),
        }
    }

    /// `("", "Unknown", "")`
    pub fn unknown() -> Self {
        Self::new("", UNKNOWN_COUNTRY, "")
    }

    /// `("", "Private", "Local Network")`
    pub fn private() -> Self {
        Self::new("", PRIVATE_COUNTRY, LOCAL_NETWORK)
    }

    /// `("", "Unknown", "Lookup Error")`
    pub fn lookup_error() -> Self {
        Self::new("", UNKNOWN_COUNTRY, LOOKUP_ERROR)
    }

    /// A result is trusted only when it carries a real country
    pub fn is_trusted(&self) -> bool {
        is_real_country(&self.country)
    }
}

/// Strip the port from an `address:port` endpoint.
///
/// Bracketed IPv6 literals are unwrapped (`[::1]:80` → `::1`). Unbracketed
/// text is split at the last colon, which matches how Linux netstat prints
/// IPv6 endpoints (`::1:631`, `:::*`). Text without a colon is returned as-is.
pub fn endpoint_address(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => rest,
        };
    }

    match endpoint.rsplit_once(':') {
        Some((addr, _port)) => addr,
        None => endpoint,
    }
}

/// One normalized row of connection-listing output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub protocol: Protocol,
    /// Local endpoint, `address:port`
    pub local: String,
    /// Remote endpoint, `address:port` or a wildcard such as `*:*`
    pub remote: String,
    pub state: ConnectionState,
    /// Owning process, when the listing tool exposes it
    pub pid: Option<u32>,
    /// Address-only projection of `remote`, the resolver's lookup key
    remote_address: String,
    pub city: String,
    pub country: String,
    pub organization: String,
}

impl ConnectionRecord {
    pub fn new(
        protocol: Protocol,
        local: impl Into<String>,
        remote: impl Into<String>,
        state: ConnectionState,
        pid: Option<u32>,
    ) -> Self {
        let remote = remote.into();
        let remote_address = endpoint_address(&remote).to_string();
        // UDP carries no state regardless of what the tool printed
        let state = match protocol {
            Protocol::Udp => ConnectionState::None,
            Protocol::Tcp => state,
        };

        Self {
            protocol,
            local: local.into(),
            remote,
            state,
            pid,
            remote_address,
            city: String::new(),
            country: String::new(),
            organization: String::new(),
        }
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn local_address(&self) -> &str {
        endpoint_address(&self.local)
    }

    pub fn apply_attribution(&mut self, geo: GeoAttribution) {
        self.city = geo.city;
        self.country = geo.country;
        self.organization = geo.organization;
    }

    pub fn attribution(&self) -> GeoAttribution {
        GeoAttribution::new(&self.city, &self.country, &self.organization)
    }

    /// Foreign iff the country is real and differs from `home_country`.
    ///
    /// Comparison is exact; no normalization between names and codes.
    pub fn is_foreign(&self, home_country: &str) -> bool {
        is_real_country(&self.country) && self.country != home_country
    }
}

/// How the home country was determined
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    AutoDetected,
    ManualOverride,
    DefaultFallback,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoDetected => write!(f, "auto-detected"),
            Self::ManualOverride => write!(f, "manual"),
            Self::DefaultFallback => write!(f, "default"),
        }
    }
}

/// The country every connection is classified against for one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HomeCountry {
    pub country: String,
    pub method: DetectionMethod,
}

impl HomeCountry {
    pub fn new(country: impl Into<String>, method: DetectionMethod) -> Self {
        Self {
            country: country.into(),
            method,
        }
    }
}

impl fmt::Display for HomeCountry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.country, self.method)
    }
}
