//! Plain-text listing and summary line

use std::fmt::Write;

use geowatch_common::{ConnectionRecord, HomeCountry};

use crate::annotate::CycleSummary;

const FOREIGN_MARK: &str = "!";

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

/// Column-formatted table; foreign rows are flagged in the first column
pub fn format_listing(records: &[ConnectionRecord], home: &HomeCountry) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "  {:<5} {:<28} {:<28} {:<12} {:>7}  {:<18} {:<16} {}",
        "PROTO", "LOCAL", "REMOTE", "STATE", "PID", "COUNTRY", "CITY", "ORGANIZATION"
    );

    for record in records {
        let mark = if record.is_foreign(&home.country) {
            FOREIGN_MARK
        } else {
            " "
        };
        let pid = record.pid.map(|p| p.to_string()).unwrap_or_default();

        let _ = writeln!(
            out,
            "{} {:<5} {:<28} {:<28} {:<12} {:>7}  {:<18} {:<16} {}",
            mark,
            record.protocol,
            truncate(&record.local, 28),
            truncate(&record.remote, 28),
            record.state,
            pid,
            truncate(&record.country, 18),
            truncate(&record.city, 16),
            record.organization
        );
    }

    out
}

pub fn format_summary(summary: &CycleSummary, home: &HomeCountry) -> String {
    format!(
        "{} connections ({} established): {} foreign, {} domestic | home: {} | tiers: {} | cache: {} entries",
        summary.total,
        summary.established,
        summary.foreign,
        summary.domestic,
        home,
        if summary.tiers.is_empty() {
            "none".to_string()
        } else {
            summary.tiers.join(", ")
        },
        summary.cached_entries
    )
}
