//! Parsers for netstat (Linux, macOS, Windows) and ss output
//!
//! Every parser skips lines it cannot make sense of instead of failing the
//! batch.

use std::sync::OnceLock;

use geowatch_common::{ConnectionRecord, ConnectionState, Protocol};
use regex::Regex;

/// Header prefixes printed by the various netstat and ss builds
const HEADER_PREFIXES: &[&str] = &["Active", "Proto", "State", "Netid", "("];

fn is_header(line: &str) -> bool {
    HEADER_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// Parse Linux `netstat -antp` / `-anup` output.
///
/// Columns: `Proto Recv-Q Send-Q Local Foreign [State] [PID/Program]`.
/// UDP rows may omit the state, so the trailing columns are matched by shape.
pub fn parse_netstat_linux(output: &str, protocol: Protocol) -> Vec<ConnectionRecord> {
    parse_legacy(output, protocol, |endpoint| endpoint.to_string())
}

/// Parse macOS `netstat -an -p tcp|udp` output.
///
/// BSD netstat separates the port with a dot (`10.0.0.5.443`, `*.*`), which
/// is rewritten to `address:port` here.
pub fn parse_netstat_macos(output: &str, protocol: Protocol) -> Vec<ConnectionRecord> {
    parse_legacy(output, protocol, bsd_endpoint)
}

fn parse_legacy<F>(output: &str, protocol: Protocol, endpoint: F) -> Vec<ConnectionRecord>
where
    F: Fn(&str) -> String,
{
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || is_header(line) {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if Protocol::from_token(parts[0]) != Some(protocol) {
            continue;
        }
        if parts.len() < 5 {
            continue;
        }

        let mut state = ConnectionState::None;
        let mut pid = None;
        for column in &parts[5..] {
            if state == ConnectionState::None && ConnectionState::is_state_token(column) {
                state = ConnectionState::normalize(column);
            } else if pid.is_none() {
                pid = extract_program_pid(column);
            }
        }

        records.push(ConnectionRecord::new(
            protocol,
            endpoint(parts[3]),
            endpoint(parts[4]),
            state,
            pid,
        ));
    }

    records
}

/// Parse Windows `netstat -ano -p TCP|UDP` output.
///
/// Columns: `Proto Local Foreign State PID`; UDP rows have no state column.
pub fn parse_netstat_windows(output: &str, protocol: Protocol) -> Vec<ConnectionRecord> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || is_header(line) {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if Protocol::from_token(parts[0]) != Some(protocol) {
            continue;
        }

        let (state, pid_column) = match protocol {
            Protocol::Tcp if parts.len() >= 5 => (ConnectionState::normalize(parts[3]), parts[4]),
            Protocol::Udp if parts.len() >= 4 => (ConnectionState::None, parts[parts.len() - 1]),
            _ => continue,
        };

        records.push(ConnectionRecord::new(
            protocol,
            parts[1],
            parts[2],
            state,
            pid_column.parse().ok(),
        ));
    }

    records
}

/// Parse `ss -antp` / `-anup` output.
///
/// Columns: `State Recv-Q Send-Q Local Peer [Process]`. A leading Netid
/// column (present when several protocols are listed at once) is skipped.
pub fn parse_ss(output: &str, protocol: Protocol) -> Vec<ConnectionRecord> {
    let mut records = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || is_header(line) {
            continue;
        }

        let mut parts: Vec<&str> = line.split_whitespace().collect();
        if let Some(netid) = Protocol::from_token(parts[0]) {
            if netid != protocol {
                continue;
            }
            parts.remove(0);
        }
        if parts.len() < 5 {
            continue;
        }

        let pid = if parts.len() > 5 {
            extract_pid(&parts[5..].join(" "))
        } else {
            None
        };

        records.push(ConnectionRecord::new(
            protocol,
            parts[3],
            parts[4],
            ConnectionState::normalize(parts[0]),
            pid,
        ));
    }

    records
}

/// Parse a bare `local remote [state]` capture, one connection per line.
///
/// Rows carry no protocol column and are read as TCP.
pub fn parse_plain(output: &str) -> Vec<ConnectionRecord> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_header(line) && !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            Some(ConnectionRecord::new(
                Protocol::Tcp,
                parts[0],
                parts[1],
                ConnectionState::normalize(parts[2]),
                None,
            ))
        })
        .collect()
}

fn pid_pattern() -> &'static Regex {
    static PID: OnceLock<Regex> = OnceLock::new();
    PID.get_or_init(|| Regex::new(r"pid=(\d+)").expect("pid pattern is valid"))
}

/// Extract the first `pid=<digits>` from an ss process descriptor such as
/// `users:(("firefox",pid=2314,fd=87))`
pub fn extract_pid(descriptor: &str) -> Option<u32> {
    pid_pattern()
        .captures(descriptor)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Extract the pid from a netstat `PID/Program name` column (`1234/nginx`)
fn extract_program_pid(column: &str) -> Option<u32> {
    column.split_once('/').and_then(|(pid, _)| pid.parse().ok())
}

/// Rewrite a BSD `address.port` endpoint to `address:port`
pub fn bsd_endpoint(endpoint: &str) -> String {
    match endpoint.rsplit_once('.') {
        Some((addr, port)) if addr.contains(':') => format!("[{}]:{}", addr, port),
        Some((addr, port)) => format!("{}:{}", addr, port),
        None => endpoint.to_string(),
    }
}
