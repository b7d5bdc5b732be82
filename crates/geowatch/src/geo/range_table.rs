//! Built-in IPv4 range table for well-known providers
//!
//! Covers the large cloud and DNS networks most hosts talk to, so common
//! peers resolve without a database file or network access.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use geowatch_common::GeoAttribution;

use super::GeoTier;

/// An inclusive IPv4 interval with its attribution
#[derive(Debug, Clone, Copy)]
pub struct IpRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    pub city: &'static str,
    pub country: &'static str,
    pub organization: &'static str,
}

impl IpRange {
    const fn new(
        start: [u8; 4],
        end: [u8; 4],
        city: &'static str,
        country: &'static str,
        organization: &'static str,
    ) -> Self {
        Self {
            start: Ipv4Addr::new(start[0], start[1], start[2], start[3]),
            end: Ipv4Addr::new(end[0], end[1], end[2], end[3]),
            city,
            country,
            organization,
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        u32::from(self.start) <= value && value <= u32::from(self.end)
    }

    fn attribution(&self) -> GeoAttribution {
        GeoAttribution::new(self.city, self.country, self.organization)
    }
}

const US: &str = "United States";

const BUILTIN_RANGES: &[IpRange] = &[
    // Google
    IpRange::new([8, 8, 8, 0], [8, 8, 8, 255], "Mountain View", US, "Google LLC"),
    IpRange::new([8, 8, 4, 0], [8, 8, 4, 255], "Mountain View", US, "Google LLC"),
    IpRange::new([142, 250, 0, 0], [142, 251, 255, 255], "Mountain View", US, "Google LLC"),
    IpRange::new([172, 217, 0, 0], [172, 217, 255, 255], "Mountain View", US, "Google LLC"),
    IpRange::new([216, 58, 192, 0], [216, 58, 223, 255], "Mountain View", US, "Google LLC"),
    // Cloudflare
    IpRange::new([1, 1, 1, 0], [1, 1, 1, 255], "San Francisco", US, "Cloudflare Inc"),
    IpRange::new([1, 0, 0, 0], [1, 0, 0, 255], "San Francisco", US, "Cloudflare Inc"),
    IpRange::new([104, 16, 0, 0], [104, 31, 255, 255], "San Francisco", US, "Cloudflare Inc"),
    // Amazon, with OVH's 54.36/14 carved out
    IpRange::new([52, 0, 0, 0], [52, 255, 255, 255], "Seattle", US, "Amazon.com Inc"),
    IpRange::new([54, 0, 0, 0], [54, 35, 255, 255], "Seattle", US, "Amazon.com Inc"),
    IpRange::new([54, 40, 0, 0], [54, 255, 255, 255], "Seattle", US, "Amazon.com Inc"),
    IpRange::new([13, 32, 0, 0], [13, 35, 255, 255], "Seattle", US, "Amazon CloudFront"),
    // Microsoft
    IpRange::new([13, 64, 0, 0], [13, 107, 255, 255], "Redmond", US, "Microsoft Corporation"),
    IpRange::new([20, 0, 0, 0], [20, 255, 255, 255], "Redmond", US, "Microsoft Corporation"),
    IpRange::new([40, 0, 0, 0], [40, 255, 255, 255], "Redmond", US, "Microsoft Corporation"),
    // Meta
    IpRange::new([31, 13, 24, 0], [31, 13, 127, 255], "Menlo Park", US, "Meta Platforms Inc"),
    IpRange::new([157, 240, 0, 0], [157, 240, 255, 255], "Menlo Park", US, "Meta Platforms Inc"),
    IpRange::new([173, 252, 64, 0], [173, 252, 127, 255], "Menlo Park", US, "Meta Platforms Inc"),
    // GitHub
    IpRange::new([140, 82, 112, 0], [140, 82, 127, 255], "San Francisco", US, "GitHub Inc"),
    IpRange::new([185, 199, 108, 0], [185, 199, 111, 255], "San Francisco", US, "GitHub Inc"),
    // Hetzner
    IpRange::new([46, 4, 0, 0], [46, 4, 255, 255], "Falkenstein", "Germany", "Hetzner Online GmbH"),
    IpRange::new([78, 46, 0, 0], [78, 47, 255, 255], "Falkenstein", "Germany", "Hetzner Online GmbH"),
    IpRange::new([88, 99, 0, 0], [88, 99, 255, 255], "Falkenstein", "Germany", "Hetzner Online GmbH"),
    // DigitalOcean
    IpRange::new([104, 131, 0, 0], [104, 131, 255, 255], "New York", US, "DigitalOcean LLC"),
    IpRange::new([159, 89, 0, 0], [159, 89, 255, 255], "New York", US, "DigitalOcean LLC"),
    IpRange::new([185, 70, 40, 0], [185, 70, 43, 255], "Amsterdam", "Netherlands", "DigitalOcean LLC"),
    // OVH
    IpRange::new([51, 68, 0, 0], [51, 68, 255, 255], "Roubaix", "France", "OVH SAS"),
    IpRange::new([54, 36, 0, 0], [54, 39, 255, 255], "Roubaix", "France", "OVH SAS"),
    // Linode
    IpRange::new([45, 33, 0, 0], [45, 33, 255, 255], "Fremont", US, "Linode LLC"),
    IpRange::new([50, 116, 0, 0], [50, 116, 255, 255], "Fremont", US, "Linode LLC"),
    // Public resolvers
    IpRange::new([208, 67, 222, 0], [208, 67, 222, 255], "San Francisco", US, "OpenDNS"),
    IpRange::new([208, 67, 220, 0], [208, 67, 220, 255], "San Francisco", US, "OpenDNS"),
    IpRange::new([9, 9, 9, 0], [9, 9, 9, 255], "Berkeley", US, "Quad9 DNS"),
    IpRange::new([149, 112, 112, 0], [149, 112, 112, 255], "Berkeley", US, "Quad9 DNS"),
];

/// Linear-scan interval table; first containing range wins
#[derive(Debug, Clone)]
pub struct RangeTable {
    ranges: Vec<IpRange>,
}

impl RangeTable {
    pub fn builtin() -> Self {
        Self::from_ranges(BUILTIN_RANGES.to_vec())
    }

    pub fn from_ranges(ranges: Vec<IpRange>) -> Self {
        Self { ranges }
    }

    pub fn ranges(&self) -> &[IpRange] {
        &self.ranges
    }

    /// Attribute an IPv4 address; anything else, or a miss, is `Unknown`
    pub fn lookup(&self, address: &str) -> GeoAttribution {
        // Dual-stack sockets report IPv4 peers as ::ffff:a.b.c.d
        let text = address.trim();
        let text = text.split_once('%').map_or(text, |(addr, _)| addr);
        let addr = match text.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => v4,
            Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return GeoAttribution::unknown(),
            },
            Err(_) => return GeoAttribution::unknown(),
        };

        self.ranges
            .iter()
            .find(|range| range.contains(addr))
            .map(IpRange::attribution)
            .unwrap_or_else(GeoAttribution::unknown)
    }
}

#[async_trait]
impl GeoTier for RangeTable {
    fn name(&self) -> &'static str {
        "range-table"
    }

    async fn try_resolve(&self, address: &str) -> Option<GeoAttribution> {
        Some(self.lookup(address)).filter(GeoAttribution::is_trusted)
    }
}
