//! Persistent geo attribution cache
//!
//! A single JSON file maps address → attribution + write timestamp. Entries
//! older than the retention window are dropped on load. Writes are batched:
//! the file is rewritten only after enough pending inserts or enough time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use geowatch_common::GeoAttribution;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Entries older than this are pruned on load
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors from reading or writing the cache file
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One cached attribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub geo: GeoAttribution,
    /// Time of first resolution; never refreshed by reads
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    saved_at: DateTime<Utc>,
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
}

/// When pending writes are persisted
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    /// Flush once this many inserts are pending
    pub max_pending: usize,
    /// Flush pending inserts at least this often
    pub max_interval: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_pending: 25,
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Address → attribution cache, optionally backed by a file
pub struct GeoCache {
    path: Option<PathBuf>,
    entries: HashMap<String, CacheEntry>,
    policy: FlushPolicy,
    pending: usize,
    last_flush: Instant,
    saved_at: Option<DateTime<Utc>>,
}

impl GeoCache {
    /// A cache that is never persisted
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
            policy: FlushPolicy::default(),
            pending: 0,
            last_flush: Instant::now(),
            saved_at: None,
        }
    }

    /// Load the cache at `path` with the default retention window
    pub fn load(path: impl Into<PathBuf>) -> Self {
        Self::load_with_retention(path, DEFAULT_RETENTION)
    }

    /// Load the cache at `path`, pruning entries older than `retention`.
    ///
    /// A missing or unreadable file yields an empty cache that will still be
    /// written back to `path`.
    pub fn load_with_retention(path: impl Into<PathBuf>, retention: Duration) -> Self {
        let path = path.into();
        let mut cache = Self::in_memory();

        match read_cache_file(&path) {
            Ok(Some(file)) => {
                let loaded = file.entries.len();
                let cutoff = chrono::Duration::from_std(retention)
                    .ok()
                    .and_then(|r| Utc::now().checked_sub_signed(r))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);

                cache.entries = file
                    .entries
                    .into_iter()
                    .filter(|(_, entry)| entry.timestamp > cutoff)
                    .collect();
                cache.saved_at = Some(file.saved_at);

                info!(
                    "Loaded {} cached geo entries from {:?} ({} expired)",
                    cache.entries.len(),
                    path,
                    loaded - cache.entries.len()
                );
            }
            Ok(None) => debug!("No geo cache at {:?}, starting empty", path),
            Err(e) => warn!("Ignoring unreadable geo cache {:?}: {}", path, e),
        }

        cache.path = Some(path);
        cache
    }

    pub fn with_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, address: &str) -> Option<&GeoAttribution> {
        self.entries.get(address).map(|entry| &entry.geo)
    }

    pub fn entry(&self, address: &str) -> Option<&CacheEntry> {
        self.entries.get(address)
    }

    /// Record a resolution made now
    pub fn insert(&mut self, address: &str, geo: GeoAttribution) {
        self.insert_at(address, geo, Utc::now());
    }

    /// Record a resolution with an explicit timestamp
    pub fn insert_at(&mut self, address: &str, geo: GeoAttribution, timestamp: DateTime<Utc>) {
        self.entries
            .insert(address.to_string(), CacheEntry { geo, timestamp });
        self.pending += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether inserts are waiting to be written
    pub fn is_dirty(&self) -> bool {
        self.pending > 0
    }

    /// Time of the last successful write, from this run or a previous one
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.saved_at
    }

    /// Flush if the policy says so. Returns true if a write happened.
    pub fn maybe_flush(&mut self) -> bool {
        if !self.is_dirty() {
            return false;
        }

        let due = self.pending >= self.policy.max_pending
            || self.last_flush.elapsed() >= self.policy.max_interval;
        if !due {
            return false;
        }

        match self.flush() {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save geo cache: {} (continuing in memory)", e);
                // Back off until the next interval instead of retrying every insert
                self.last_flush = Instant::now();
                false
            }
        }
    }

    /// Write all entries now
    pub fn flush(&mut self) -> Result<(), CacheError> {
        let Some(path) = self.path.clone() else {
            self.pending = 0;
            return Ok(());
        };

        let saved_at = Utc::now();
        let file = CacheFile {
            saved_at,
            entries: self.entries.clone(),
        };
        write_cache_file(&path, &file)?;

        debug!("Saved {} geo entries to {:?}", self.entries.len(), path);
        self.pending = 0;
        self.last_flush = Instant::now();
        self.saved_at = Some(saved_at);
        Ok(())
    }
}

fn read_cache_file(path: &Path) -> Result<Option<CacheFile>, CacheError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(serde_json::from_str(&contents)?))
}

/// Write via a temporary sibling and rename, so readers never see a torn file
fn write_cache_file(path: &Path, file: &CacheFile) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(file)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hetzner() -> GeoAttribution {
        GeoAttribution::new("Falkenstein", "Germany", "Hetzner Online GmbH")
    }

    #[test]
    fn test_round_trip_within_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let mut cache = GeoCache::load(&path);
        assert!(cache.is_empty());
        cache.insert("46.4.84.25", hetzner());
        cache.flush().unwrap();
        assert!(cache.saved_at().is_some());

        let reloaded = GeoCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("46.4.84.25"), Some(&hetzner()));
        assert_eq!(reloaded.entry("46.4.84.25"), cache.entry("46.4.84.25"));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_expired_entries_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let mut cache = GeoCache::load(&path);
        cache.insert_at("46.4.84.25", hetzner(), Utc::now() - chrono::Duration::days(8));
        cache.insert_at(
            "1.1.1.1",
            GeoAttribution::new("San Francisco", "United States", "Cloudflare Inc"),
            Utc::now() - chrono::Duration::days(6),
        );
        cache.flush().unwrap();

        let reloaded = GeoCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get("46.4.84.25").is_none());
        assert!(reloaded.get("1.1.1.1").is_some());
    }

    #[test]
    fn test_custom_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let mut cache = GeoCache::load(&path);
        cache.insert_at("46.4.84.25", hetzner(), Utc::now() - chrono::Duration::hours(2));
        cache.flush().unwrap();

        let reloaded = GeoCache::load_with_retention(&path, Duration::from_secs(3600));
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");
        fs::write(&path, b"not json").unwrap();

        let mut cache = GeoCache::load(&path);
        assert!(cache.is_empty());

        // The file is still ours to overwrite
        cache.insert("46.4.84.25", hetzner());
        cache.flush().unwrap();
        assert_eq!(GeoCache::load(&path).len(), 1);
    }

    #[test]
    fn test_flush_is_batched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("geo_cache.json");

        let mut cache = GeoCache::load(&path).with_policy(FlushPolicy {
            max_pending: 3,
            max_interval: Duration::from_secs(3600),
        });

        cache.insert("1.0.0.1", hetzner());
        assert!(!cache.maybe_flush());
        cache.insert("1.0.0.2", hetzner());
        assert!(!cache.maybe_flush());
        assert!(!path.exists());

        cache.insert("1.0.0.3", hetzner());
        assert!(cache.maybe_flush());
        assert!(path.exists());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn test_flush_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let mut cache = GeoCache::load(&path).with_policy(FlushPolicy {
            max_pending: 100,
            max_interval: Duration::ZERO,
        });

        assert!(!cache.maybe_flush());
        cache.insert("1.0.0.1", hetzner());
        assert!(cache.maybe_flush());
    }

    #[test]
    fn test_in_memory_flush_is_noop() {
        let mut cache = GeoCache::in_memory();
        cache.insert("1.0.0.1", hetzner());
        assert!(cache.is_dirty());
        cache.flush().unwrap();
        assert!(!cache.is_dirty());
        assert!(cache.path().is_none());
    }
}
