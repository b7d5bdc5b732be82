//! Configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then `GEOWATCH_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const CITY_DB_FILE: &str = "GeoLite2-City.mmdb";
const ASN_DB_FILE: &str = "GeoLite2-ASN.mmdb";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "geowatch", "geowatch")
}

/// Runtime configuration for the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// GeoLite2 City database
    #[serde(default)]
    pub city_db: Option<PathBuf>,

    /// GeoLite2 ASN database
    #[serde(default)]
    pub asn_db: Option<PathBuf>,

    /// Attribution cache file
    #[serde(default = "default_cache_path")]
    pub cache_path: Option<PathBuf>,

    /// Seconds between monitoring cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Home country used when detection fails
    #[serde(default = "default_country")]
    pub default_country: String,

    /// Fixed home country; disables detection
    #[serde(default)]
    pub home_country: Option<String>,

    /// Show listening sockets
    #[serde(default)]
    pub include_listening: bool,

    /// Allow networked lookups (attribution and home detection)
    #[serde(default = "default_true")]
    pub online_lookups: bool,

    /// Timeout for each HTTP request and listing command
    #[serde(default = "default_timeout")]
    pub lookup_timeout_secs: u64,

    /// Minimum seconds between online lookups of the same address
    #[serde(default = "default_spacing")]
    pub min_request_spacing_secs: u64,

    /// Global online lookup budget
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,

    /// Write each cycle's annotated connections to this JSON file
    #[serde(default)]
    pub export: Option<PathBuf>,

    /// Run a single cycle and exit
    #[serde(default)]
    pub once: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Annotate a saved connection listing once instead of polling the host
    #[serde(skip)]
    pub input: Option<PathBuf>,

    /// Print an example config and exit
    #[serde(skip)]
    pub gen_config: bool,

    /// Print usage and exit
    #[serde(skip)]
    pub help: bool,

    /// Problems found while layering, reported once logging is up
    #[serde(skip)]
    pub warnings: Vec<String>,
}

fn default_cache_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().join("geo_cache.json"))
}

fn default_interval() -> u64 {
    5
}

fn default_country() -> String {
    "United States".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    5
}

fn default_spacing() -> u64 {
    30
}

fn default_requests_per_minute() -> usize {
    40
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            city_db: None,
            asn_db: None,
            cache_path: default_cache_path(),
            interval_secs: default_interval(),
            default_country: default_country(),
            home_country: None,
            include_listening: false,
            online_lookups: true,
            lookup_timeout_secs: default_timeout(),
            min_request_spacing_secs: default_spacing(),
            requests_per_minute: default_requests_per_minute(),
            export: None,
            once: false,
            log_level: default_log_level(),
            input: None,
            gen_config: false,
            help: false,
            warnings: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the process arguments and environment
    pub fn load() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        Self::load_from(&args, |key| std::env::var(key).ok())
    }

    /// Load from explicit arguments and an environment lookup
    pub fn load_from<F>(args: &[String], env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = config_flag(args).or_else(|| env("GEOWATCH_CONFIG").map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)
                .with_context(|| format!("Failed to load config file {:?}", path))?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)
                    .with_context(|| format!("Failed to load config file {:?}", path))?,
                None => Self::default(),
            },
        };

        config.apply_env(env);
        config.apply_args(args);
        config.normalize();
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Load config from a TOML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = env("GEOWATCH_CITY_DB") {
            self.city_db = Some(PathBuf::from(path));
        }
        if let Some(path) = env("GEOWATCH_ASN_DB") {
            self.asn_db = Some(PathBuf::from(path));
        }
        if let Some(path) = env("GEOWATCH_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env("GEOWATCH_INTERVAL") {
            self.set_parsed("GEOWATCH_INTERVAL", &value, |c, v: u64| c.interval_secs = v);
        }
        if let Some(country) = env("GEOWATCH_DEFAULT_COUNTRY") {
            self.default_country = country;
        }
        if let Some(country) = env("GEOWATCH_HOME_COUNTRY") {
            self.home_country = Some(country);
        }
        if let Some(value) = env("GEOWATCH_INCLUDE_LISTENING") {
            self.set_bool("GEOWATCH_INCLUDE_LISTENING", &value, |c, v| {
                c.include_listening = v
            });
        }
        if let Some(value) = env("GEOWATCH_ONLINE_LOOKUPS") {
            self.set_bool("GEOWATCH_ONLINE_LOOKUPS", &value, |c, v| c.online_lookups = v);
        }
        if let Some(value) = env("GEOWATCH_LOOKUP_TIMEOUT") {
            self.set_parsed("GEOWATCH_LOOKUP_TIMEOUT", &value, |c, v: u64| {
                c.lookup_timeout_secs = v
            });
        }
        if let Some(value) = env("GEOWATCH_MIN_REQUEST_SPACING") {
            self.set_parsed("GEOWATCH_MIN_REQUEST_SPACING", &value, |c, v: u64| {
                c.min_request_spacing_secs = v
            });
        }
        if let Some(value) = env("GEOWATCH_REQUESTS_PER_MINUTE") {
            self.set_parsed("GEOWATCH_REQUESTS_PER_MINUTE", &value, |c, v: usize| {
                c.requests_per_minute = v
            });
        }
        if let Some(path) = env("GEOWATCH_EXPORT") {
            self.export = Some(PathBuf::from(path));
        }
        if let Some(level) = env("GEOWATCH_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = env("GEOWATCH_INPUT") {
            self.input = Some(PathBuf::from(path));
        }
    }

    fn apply_args(&mut self, args: &[String]) {
        let mut i = 0;
        while i < args.len() {
            let value = args.get(i + 1);
            let mut consumed = false;

            match args[i].as_str() {
                "--config" | "-c" => consumed = value.is_some(),
                "--city-db" => {
                    if let Some(path) = value {
                        self.city_db = Some(PathBuf::from(path));
                        consumed = true;
                    }
                }
                "--asn-db" => {
                    if let Some(path) = value {
                        self.asn_db = Some(PathBuf::from(path));
                        consumed = true;
                    }
                }
                "--cache" => {
                    if let Some(path) = value {
                        self.cache_path = Some(PathBuf::from(path));
                        consumed = true;
                    }
                }
                "--interval" | "-i" => {
                    if let Some(v) = value {
                        self.set_parsed("--interval", v, |c, v: u64| c.interval_secs = v);
                        consumed = true;
                    }
                }
                "--default-country" => {
                    if let Some(country) = value {
                        self.default_country = country.clone();
                        consumed = true;
                    }
                }
                "--home-country" => {
                    if let Some(country) = value {
                        self.home_country = Some(country.clone());
                        consumed = true;
                    }
                }
                "--timeout" => {
                    if let Some(v) = value {
                        self.set_parsed("--timeout", v, |c, v: u64| c.lookup_timeout_secs = v);
                        consumed = true;
                    }
                }
                "--min-spacing" => {
                    if let Some(v) = value {
                        self.set_parsed("--min-spacing", v, |c, v: u64| {
                            c.min_request_spacing_secs = v
                        });
                        consumed = true;
                    }
                }
                "--requests-per-minute" => {
                    if let Some(v) = value {
                        self.set_parsed("--requests-per-minute", v, |c, v: usize| {
                            c.requests_per_minute = v
                        });
                        consumed = true;
                    }
                }
                "--input" => {
                    if let Some(path) = value {
                        self.input = Some(PathBuf::from(path));
                        consumed = true;
                    }
                }
                "--export" | "-e" => {
                    if let Some(path) = value {
                        self.export = Some(PathBuf::from(path));
                        consumed = true;
                    }
                }
                "--log-level" => {
                    if let Some(level) = value {
                        self.log_level = level.clone();
                        consumed = true;
                    }
                }
                "--listening" | "-l" => self.include_listening = true,
                "--offline" => self.online_lookups = false,
                "--once" | "-1" => self.once = true,
                "--gen-config" => self.gen_config = true,
                "--help" | "-h" => self.help = true,
                path if !path.starts_with('-') && self.input.is_none() => {
                    self.input = Some(PathBuf::from(path));
                }
                other => self.warnings.push(format!("Ignoring unknown argument {:?}", other)),
            }

            i += if consumed { 2 } else { 1 };
        }
    }

    fn set_parsed<T: std::str::FromStr>(
        &mut self,
        source: &str,
        value: &str,
        set: impl FnOnce(&mut Self, T),
    ) {
        match value.trim().parse() {
            Ok(parsed) => set(self, parsed),
            Err(_) => self
                .warnings
                .push(format!("Ignoring invalid value {:?} for {}", value, source)),
        }
    }

    fn set_bool(&mut self, source: &str, value: &str, set: impl FnOnce(&mut Self, bool)) {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => set(self, true),
            "0" | "false" | "no" | "off" => set(self, false),
            _ => self
                .warnings
                .push(format!("Ignoring invalid value {:?} for {}", value, source)),
        }
    }

    fn normalize(&mut self) {
        if self.interval_secs == 0 {
            self.warnings
                .push("interval_secs must be at least 1, using 1".to_string());
            self.interval_secs = 1;
        }
        if self.lookup_timeout_secs == 0 {
            self.warnings
                .push("lookup_timeout_secs must be at least 1, using 1".to_string());
            self.lookup_timeout_secs = 1;
        }
        if self.requests_per_minute == 0 {
            self.warnings
                .push("requests_per_minute of 0 disables online attribution".to_string());
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_secs(self.min_request_spacing_secs)
    }

    /// Configured City database, else the default location when present
    pub fn city_db_path(&self) -> Option<PathBuf> {
        self.city_db.clone().or_else(|| default_db_path(CITY_DB_FILE))
    }

    /// Configured ASN database, else the default location when present
    pub fn asn_db_path(&self) -> Option<PathBuf> {
        self.asn_db.clone().or_else(|| default_db_path(ASN_DB_FILE))
    }

    /// Generate example TOML config
    pub fn example_toml() -> &'static str {
        r##"# geowatch configuration
# ======================
# Every key is optional. Environment variables (GEOWATCH_*) override this
# file and command-line flags override both.

# Seconds between monitoring cycles
interval_secs = 5

# Home country when automatic detection fails
default_country = "United States"

# Skip detection and always use this country
# home_country = "Germany"

# Show listening sockets as well as connections
include_listening = false

# ============================================================================
# Attribution
# ============================================================================

# MaxMind GeoLite2 databases (optional)
# city_db = "/usr/share/GeoIP/GeoLite2-City.mmdb"
# asn_db = "/usr/share/GeoIP/GeoLite2-ASN.mmdb"

# Attribution cache; entries expire after 7 days
# cache_path = "~/.cache/geowatch/geo_cache.json"

# Query ip-api.com / ipinfo.io for addresses not found locally
online_lookups = true

# Per-request timeout in seconds
lookup_timeout_secs = 5

# Never query the same address more often than this
min_request_spacing_secs = 30

# Global online lookup budget
requests_per_minute = 40

# ============================================================================
# Output
# ============================================================================

# Write each cycle's connections as JSON
# export = "connections.json"

# trace, debug, info, warn, error
log_level = "info"
"##
    }
}

/// `--config <file>` from the raw arguments, looked up before layering
fn config_flag(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--config" || a == "-c")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

fn default_db_path(file: &str) -> Option<PathBuf> {
    let dirs = project_dirs()?;
    [
        dirs.data_dir().join(file),
        PathBuf::from("/usr/share/GeoIP").join(file),
        PathBuf::from("/var/lib/GeoIP").join(file),
    ]
    .into_iter()
    .find(|p| p.exists())
}

pub fn print_help() {
    println!("geowatch - network connections with geographic attribution");
    println!();
    println!("USAGE:");
    println!("    geowatch [OPTIONS] [FILE]");
    println!();
    println!("ARGS:");
    println!("    [FILE]                      Saved connection listing to annotate once");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>         Config file (TOML)");
    println!("    -i, --interval <SECS>       Seconds between cycles (default: 5)");
    println!("    -1, --once                  Run a single cycle and exit");
    println!("    -l, --listening             Include listening sockets");
    println!("        --offline               Disable online lookups");
    println!("        --home-country <NAME>   Fixed home country");
    println!("        --default-country <NAME>");
    println!("                                Fallback home country (default: United States)");
    println!("        --city-db <FILE>        GeoLite2 City database");
    println!("        --asn-db <FILE>         GeoLite2 ASN database");
    println!("        --cache <FILE>          Attribution cache file");
    println!("        --timeout <SECS>        Lookup and command timeout (default: 5)");
    println!("        --min-spacing <SECS>    Seconds between lookups of one address (default: 30)");
    println!("        --requests-per-minute <N>");
    println!("                                Online lookup budget (default: 40)");
    println!("        --input <FILE>          Annotate a saved listing once and exit");
    println!("    -e, --export <FILE>         Write connections as JSON each cycle");
    println!("        --log-level <LEVEL>     trace, debug, info, warn, error");
    println!("        --gen-config            Print an example config and exit");
    println!("    -h, --help                  Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    GEOWATCH_CONFIG               Config file path");
    println!("    GEOWATCH_CITY_DB              GeoLite2 City database");
    println!("    GEOWATCH_ASN_DB               GeoLite2 ASN database");
    println!("    GEOWATCH_CACHE_PATH           Attribution cache file");
    println!("    GEOWATCH_INTERVAL             Seconds between cycles");
    println!("    GEOWATCH_DEFAULT_COUNTRY      Fallback home country");
    println!("    GEOWATCH_HOME_COUNTRY         Fixed home country");
    println!("    GEOWATCH_INCLUDE_LISTENING    Include listening sockets (true/false)");
    println!("    GEOWATCH_ONLINE_LOOKUPS       Allow online lookups (true/false)");
    println!("    GEOWATCH_LOOKUP_TIMEOUT       Lookup and command timeout in seconds");
    println!("    GEOWATCH_MIN_REQUEST_SPACING  Seconds between lookups of one address");
    println!("    GEOWATCH_REQUESTS_PER_MINUTE  Online lookup budget");
    println!("    GEOWATCH_EXPORT               JSON export file");
    println!("    GEOWATCH_LOG_LEVEL            Log level");
    println!("    GEOWATCH_INPUT                Saved listing to annotate");
}
