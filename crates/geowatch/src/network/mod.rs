//! Network connection enumeration
//!
//! Invokes the host's connection-listing tool and normalizes its output into
//! [`ConnectionRecord`]s.

mod parse;
mod runner;


use std::sync::Arc;

use geowatch_common::{ConnectionRecord, ConnectionState, OsFamily, PlatformResult, Protocol};
use tracing::{debug, warn};

use crate::classify::{classify, AddressClass};

pub use parse::{
    bsd_endpoint, extract_pid, parse_netstat_linux, parse_netstat_macos, parse_netstat_windows,
    parse_plain, parse_ss,
};
pub use runner::{CommandRunner, SystemCommandRunner, ToolCapabilities, DEFAULT_COMMAND_TIMEOUT};

/// Connection enumerator bound to one OS family and one probe result
pub struct ConnectionEnumerator {
    family: OsFamily,
    capabilities: ToolCapabilities,
    runner: Arc<dyn CommandRunner>,
}

impl ConnectionEnumerator {
    /// Detect the host family and probe its tools once
    pub async fn detect(runner: Arc<dyn CommandRunner>) -> Self {
        let (family, exact) = OsFamily::detect();
        if !exact {
            warn!(
                "Unrecognised platform '{}', using the Linux tool set with reduced guarantees",
                std::env::consts::OS
            );
        }

        let capabilities = ToolCapabilities::probe(family, &runner).await;
        Self::with_capabilities(family, capabilities, runner)
    }

    /// Build an enumerator from an already known probe result
    pub fn with_capabilities(
        family: OsFamily,
        capabilities: ToolCapabilities,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            family,
            capabilities,
            runner,
        }
    }

    pub fn family(&self) -> OsFamily {
        self.family
    }

    pub fn capabilities(&self) -> ToolCapabilities {
        self.capabilities
    }

    /// List connections for one protocol, noise-filtered.
    ///
    /// Listening sockets are dropped unless `include_listening` is set. A
    /// failing tool yields an empty list, never an error.
    pub async fn list_connections(
        &self,
        protocol: Protocol,
        include_listening: bool,
    ) -> Vec<ConnectionRecord> {
        let mut records = match self.collect(protocol).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list {} connections: {}", protocol, e);
                Vec::new()
            }
        };

        let before = records.len();
        retain_visible(&mut records, include_listening);
        debug!(
            "{} {} connections ({} filtered)",
            records.len(),
            protocol,
            before - records.len()
        );

        records
    }

    /// List TCP then UDP connections
    pub async fn list_all(&self, include_listening: bool) -> Vec<ConnectionRecord> {
        let mut records = self.list_connections(Protocol::Tcp, include_listening).await;
        records.extend(self.list_connections(Protocol::Udp, include_listening).await);
        records
    }

    async fn collect(&self, protocol: Protocol) -> PlatformResult<Vec<ConnectionRecord>> {
        match self.family {
            OsFamily::Windows => {
                let flag = match protocol {
                    Protocol::Tcp => "TCP",
                    Protocol::Udp => "UDP",
                };
                let output = self.runner.run("netstat", &["-ano", "-p", flag]).await?;
                Ok(parse_netstat_windows(&output, protocol))
            }
            OsFamily::MacOs => {
                let output = self
                    .runner
                    .run("netstat", &["-an", "-p", protocol.as_str()])
                    .await?;
                Ok(parse_netstat_macos(&output, protocol))
            }
            OsFamily::Linux => self.collect_linux(protocol).await,
        }
    }

    /// Prefer netstat, fall back to ss when netstat is missing or fails
    async fn collect_linux(&self, protocol: Protocol) -> PlatformResult<Vec<ConnectionRecord>> {
        let flags = match protocol {
            Protocol::Tcp => "-antp",
            Protocol::Udp => "-anup",
        };

        if self.capabilities.netstat {
            match self.runner.run("netstat", &[flags]).await {
                Ok(output) => return Ok(parse_netstat_linux(&output, protocol)),
                Err(e) if self.capabilities.ss => {
                    warn!("netstat failed ({}), falling back to ss", e);
                }
                Err(e) => return Err(e),
            }
        }

        if self.capabilities.ss {
            let output = self.runner.run("ss", &[flags]).await?;
            return Ok(parse_ss(&output, protocol));
        }

        Ok(Vec::new())
    }
}

/// Parse a saved listing captured with the `family` host's tool.
///
/// The capture may hold TCP and UDP rows together. Linux captures are read
/// as ss output when they carry ss column headers, otherwise as netstat. An
/// ss capture without a Netid column is read as TCP only. A capture that no
/// tool dialect recognises is read as bare `local remote state` rows.
pub fn parse_listing(
    family: OsFamily,
    output: &str,
    include_listening: bool,
) -> Vec<ConnectionRecord> {
    let ss = family == OsFamily::Linux && is_ss_listing(output);
    let parser: fn(&str, Protocol) -> Vec<ConnectionRecord> = match family {
        OsFamily::Windows => parse_netstat_windows,
        OsFamily::MacOs => parse_netstat_macos,
        OsFamily::Linux if ss => parse_ss,
        OsFamily::Linux => parse_netstat_linux,
    };

    let mut records = parser(output, Protocol::Tcp);
    if !ss || has_netid_column(output) {
        records.extend(parser(output, Protocol::Udp));
    }
    if records.is_empty() {
        records = parse_plain(output);
    }

    retain_visible(&mut records, include_listening);
    debug!("{} connections parsed from saved listing", records.len());
    records
}

fn is_ss_listing(output: &str) -> bool {
    output
        .lines()
        .map(str::trim_start)
        .any(|line| (line.starts_with("State") || line.starts_with("Netid")) && line.contains("Peer"))
}

fn has_netid_column(output: &str) -> bool {
    output.lines().any(|line| line.trim_start().starts_with("Netid"))
}

fn retain_visible(records: &mut Vec<ConnectionRecord>, include_listening: bool) {
    records.retain(|r| {
        (include_listening || r.state != ConnectionState::Listen) && !is_uninteresting(r)
    });
}

/// Records nobody wants to see: UDP sockets without a peer, and traffic
/// that never leaves the loopback interface
pub fn is_uninteresting(record: &ConnectionRecord) -> bool {
    let remote = classify(record.remote_address());

    if record.protocol == Protocol::Udp && remote == AddressClass::Unspecified {
        return true;
    }

    remote == AddressClass::Loopback && classify(record.local_address()) == AddressClass::Loopback
}
