//! Private/local address classification
//!
//! Works on the textual address as printed by the listing tools, so zone
//! suffixes (`fe80::1%eth0`) and wildcards (`*`) are handled without a
//! successful `IpAddr` parse.

use std::net::{IpAddr, Ipv4Addr};

/// Classification of an address for geo lookup purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// RFC1918, IPv4 link-local, IPv6 link-local or unique-local
    Private,
    Loopback,
    /// `0.0.0.0`, `::`, `*` or empty
    Unspecified,
    Public,
}

impl AddressClass {
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Classify a textual address
pub fn classify(address: &str) -> AddressClass {
    let address = address.trim();
    if address.is_empty() || address == "*" {
        return AddressClass::Unspecified;
    }

    // Zone ids and bound-device suffixes do not change the class
    let bare = address.split('%').next().unwrap_or(address);

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => classify_v4(v4),
        Ok(IpAddr::V6(v6)) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return classify_v4(v4);
            }
            if v6.is_loopback() {
                AddressClass::Loopback
            } else if v6.is_unspecified() {
                AddressClass::Unspecified
            } else {
                classify_v6_prefix(bare)
            }
        }
        Err(_) => classify_v6_prefix(bare),
    }
}

fn classify_v4(addr: Ipv4Addr) -> AddressClass {
    let octets = addr.octets();

    if addr.is_unspecified() {
        AddressClass::Unspecified
    } else if octets[0] == 127 {
        AddressClass::Loopback
    } else if octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 169 && octets[1] == 254)
    {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

fn classify_v6_prefix(addr: &str) -> AddressClass {
    let lower = addr.to_ascii_lowercase();

    if lower == "::1" {
        AddressClass::Loopback
    } else if lower.starts_with("fe80:")
        || lower.starts_with("fc00:")
        || (lower.starts_with("fd") && lower.contains(':'))
    {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

/// Convenience wrapper for the common "is this worth looking up" test
pub fn is_public(address: &str) -> bool {
    classify(address).is_public()
}
