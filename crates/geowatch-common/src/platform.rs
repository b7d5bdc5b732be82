//! Platform detection and the error type for OS tool invocation

use std::fmt;

use thiserror::Error;

/// Errors that can occur while invoking OS connection-listing tools
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Platform not supported: {0}")]
    NotSupported(String),

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Host OS family, which decides the listing tool and its output dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    MacOs,
    /// Linux and any other Unix-like system
    Linux,
}

impl OsFamily {
    /// Detect the family of the running host.
    ///
    /// Unrecognised systems are treated as Linux; `is_exact` reports whether
    /// the detection was a direct match.
    pub fn detect() -> (Self, bool) {
        Self::from_os_name(std::env::consts::OS)
    }

    pub fn from_os_name(os: &str) -> (Self, bool) {
        match os {
            "windows" => (Self::Windows, true),
            "macos" => (Self::MacOs, true),
            "linux" => (Self::Linux, true),
            _ => (Self::Linux, false),
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::MacOs => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_mapping() {
        assert_eq!(OsFamily::from_os_name("windows"), (OsFamily::Windows, true));
        assert_eq!(OsFamily::from_os_name("macos"), (OsFamily::MacOs, true));
        assert_eq!(OsFamily::from_os_name("linux"), (OsFamily::Linux, true));
        assert_eq!(OsFamily::from_os_name("freebsd"), (OsFamily::Linux, false));
    }
}
