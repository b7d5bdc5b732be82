//! JSON export of annotated connections

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geowatch_common::{ConnectionRecord, HomeCountry};
use serde::Serialize;

use crate::annotate::CycleSummary;

#[derive(Debug, Serialize)]
pub struct ExportedConnection<'a> {
    pub protocol: &'static str,
    pub local_address: &'a str,
    pub remote_address: &'a str,
    pub state: &'static str,
    pub pid: Option<u32>,
    pub city: &'a str,
    pub country: &'a str,
    pub organization: &'a str,
    pub foreign: bool,
}

/// One cycle's snapshot
#[derive(Debug, Serialize)]
pub struct ExportDocument<'a> {
    pub exported_at: DateTime<Utc>,
    pub host: String,
    pub home_country: &'a HomeCountry,
    pub summary: &'a CycleSummary,
    pub connections: Vec<ExportedConnection<'a>>,
}

impl<'a> ExportDocument<'a> {
    pub fn new(
        records: &'a [ConnectionRecord],
        home_country: &'a HomeCountry,
        summary: &'a CycleSummary,
    ) -> Self {
        let connections = records
            .iter()
            .map(|r| ExportedConnection {
                protocol: r.protocol.as_str(),
                local_address: &r.local,
                remote_address: &r.remote,
                state: r.state.as_str(),
                pid: r.pid,
                city: &r.city,
                country: &r.country,
                organization: &r.organization,
                foreign: r.is_foreign(&home_country.country),
            })
            .collect();

        Self {
            exported_at: Utc::now(),
            host: host_name(),
            home_country,
            summary,
            connections,
        }
    }

    /// Write the document as pretty JSON, replacing `path` atomically
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize export")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create export directory {:?}", parent))?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use geowatch_common::{ConnectionState, DetectionMethod, GeoAttribution, Protocol};

    use super::*;
    use crate::annotate::count;

    fn records() -> Vec<ConnectionRecord> {
        let mut german = ConnectionRecord::new(
            Protocol::Tcp,
            "192.168.1.20:40222",
            "46.4.84.25:443",
            ConnectionState::Established,
            Some(2314),
        );
        german.apply_attribution(GeoAttribution::new(
            "Falkenstein",
            "Germany",
            "Hetzner Online GmbH",
        ));

        let mut lan = ConnectionRecord::new(
            Protocol::Udp,
            "192.168.1.20:5353",
            "192.168.1.1:53",
            ConnectionState::None,
            None,
        );
        lan.apply_attribution(GeoAttribution::private());

        vec![german, lan]
    }

    #[test]
    fn test_export_document_shape() {
        let records = records();
        let home = HomeCountry::new("United States", DetectionMethod::AutoDetected);
        let summary = count(&records, &home);

        let doc = ExportDocument::new(&records, &home, &summary);
        let value = serde_json::to_value(&doc).unwrap();

        assert!(value["exported_at"].is_string());
        assert!(value["host"].is_string());
        assert_eq!(value["home_country"]["country"], "United States");
        assert_eq!(value["home_country"]["method"], "auto_detected");
        assert_eq!(value["summary"]["foreign"], 1);

        let connections = value["connections"].as_array().unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0]["protocol"], "tcp");
        assert_eq!(connections[0]["remote_address"], "46.4.84.25:443");
        assert_eq!(connections[0]["state"], "ESTABLISHED");
        assert_eq!(connections[0]["pid"], 2314);
        assert_eq!(connections[0]["foreign"], true);
        assert_eq!(connections[1]["pid"], serde_json::Value::Null);
        assert_eq!(connections[1]["country"], "Private");
        assert_eq!(connections[1]["foreign"], false);
    }

    #[test]
    fn test_write_to_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exports").join("connections.json");

        let records = records();
        let home = HomeCountry::new("Germany", DetectionMethod::ManualOverride);
        let summary = count(&records, &home);
        ExportDocument::new(&records, &home, &summary)
            .write_to(&path)
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["summary"]["foreign"], 0);
        assert_eq!(written["connections"][0]["foreign"], false);
    }
}
