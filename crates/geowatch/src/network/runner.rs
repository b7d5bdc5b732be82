//! External command invocation and one-time tool probing

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geowatch_common::{OsFamily, PlatformError, PlatformResult};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default time box for one listing command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs an external program and returns its stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str]) -> PlatformResult<String>;
}

/// Runs commands on the host with a timeout
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> PlatformResult<String> {
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| PlatformError::Timeout(self.timeout))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => PlatformError::ToolUnavailable(program.to_string()),
                _ => PlatformError::CommandFailed(format!("{}: {}", program, e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatformError::CommandFailed(format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Which listing tools the host offers, probed once per process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolCapabilities {
    /// Legacy `netstat`
    pub netstat: bool,
    /// Modern `ss` (Linux only)
    pub ss: bool,
}

impl ToolCapabilities {
    /// Probe the tools relevant to `family`.
    ///
    /// Windows and macOS ship netstat in the base system and have no `ss`, so
    /// only Linux runs a probe.
    pub async fn probe(family: OsFamily, runner: &Arc<dyn CommandRunner>) -> Self {
        let caps = match family {
            OsFamily::Windows | OsFamily::MacOs => Self {
                netstat: true,
                ss: false,
            },
            OsFamily::Linux => Self {
                netstat: check_tool_available(runner, "netstat").await,
                ss: check_tool_available(runner, "ss").await,
            },
        };

        if !caps.netstat && !caps.ss {
            warn!("Neither netstat nor ss is available - connection listing will be empty");
        } else {
            info!(
                "Connection tools on {}: netstat={} ss={}",
                family, caps.netstat, caps.ss
            );
        }

        caps
    }
}

/// Check if a tool answers `--version`
async fn check_tool_available(runner: &Arc<dyn CommandRunner>, program: &str) -> bool {
    match runner.run(program, &["--version"]).await {
        Ok(_) => true,
        Err(e) => {
            debug!("{} probe failed: {}", program, e);
            false
        }
    }
}
