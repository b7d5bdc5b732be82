//! Resolver tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;

// ============================================================================
// Fixtures
// ============================================================================

/// Tier returning a fixed answer and counting how often it was asked
struct CountingTier {
    name: &'static str,
    answer: Option<GeoAttribution>,
    calls: Arc<AtomicUsize>,
}

impl CountingTier {
    fn new(name: &'static str, answer: Option<GeoAttribution>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                answer,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl GeoTier for CountingTier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn try_resolve(&self, _address: &str) -> Option<GeoAttribution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

fn hetzner() -> GeoAttribution {
    GeoAttribution::new("Falkenstein", "Germany", "Hetzner Online GmbH")
}

fn single_tier(answer: Option<GeoAttribution>) -> (GeoResolver, Arc<AtomicUsize>) {
    let (tier, calls) = CountingTier::new("counting", answer);
    (
        GeoResolver::new(vec![Box::new(tier)], GeoCache::in_memory()),
        calls,
    )
}

// ============================================================================
// Resolution order
// ============================================================================

mod resolve_tests {
    use super::*;

    #[tokio::test]
    async fn test_private_addresses_skip_tiers() {
        let (mut resolver, calls) = single_tier(Some(hetzner()));

        let addresses = [
            "192.168.1.10",
            "10.0.0.1",
            "172.16.5.4",
            "169.254.0.7",
            "127.0.0.1",
            "::1",
            "fe80::1%eth0",
            "*",
        ];
        for address in addresses {
            assert_eq!(resolver.resolve(address).await, GeoAttribution::private(), "{}", address);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_second_resolution_hits_cache() {
        let (mut resolver, calls) = single_tier(Some(hetzner()));

        let first = resolver.resolve("46.4.84.25").await;
        let second = resolver.resolve("46.4.84.25").await;

        assert_eq!(first, hetzner());
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_untrusted_results_fall_through() {
        let (declining, declining_calls) = CountingTier::new("declining", None);
        let (sentinel, sentinel_calls) = CountingTier::new("sentinel", Some(GeoAttribution::unknown()));
        let (answering, answering_calls) = CountingTier::new("answering", Some(hetzner()));

        let mut resolver = GeoResolver::new(
            vec![Box::new(declining), Box::new(sentinel), Box::new(answering)],
            GeoCache::in_memory(),
        );

        assert_eq!(resolver.resolve("46.4.84.25").await, hetzner());
        assert_eq!(declining_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sentinel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(answering_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.tier_names(), vec!["declining", "sentinel", "answering"]);
    }

    #[tokio::test]
    async fn test_first_trusted_tier_wins() {
        let (first, _) = CountingTier::new("first", Some(hetzner()));
        let (second, second_calls) = CountingTier::new(
            "second",
            Some(GeoAttribution::new("Paris", "France", "Other")),
        );
        let mut resolver =
            GeoResolver::new(vec![Box::new(first), Box::new(second)], GeoCache::in_memory());

        assert_eq!(resolver.resolve("46.4.84.25").await, hetzner());
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unresolved_is_unknown_and_not_cached() {
        let (mut resolver, calls) = single_tier(None);

        assert_eq!(resolver.resolve("203.0.113.9").await, GeoAttribution::unknown());
        assert_eq!(resolver.resolve("203.0.113.9").await, GeoAttribution::unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_addresses() {
        let (mut resolver, calls) = single_tier(Some(hetzner()));

        assert!(matches!(resolver.try_resolve("").await, Err(GeoError::InvalidAddress(_))));
        assert!(matches!(
            resolver.try_resolve("not-an-address").await,
            Err(GeoError::InvalidAddress(_))
        ));
        assert_eq!(resolver.resolve("").await, GeoAttribution::unknown());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_builtin_range_tier_scenario() {
        let mut resolver =
            GeoResolver::new(vec![Box::new(RangeTable::builtin())], GeoCache::in_memory());

        assert_eq!(
            resolver.resolve("8.8.8.8").await,
            GeoAttribution::new("Mountain View", "United States", "Google LLC")
        );
    }

    #[tokio::test]
    async fn test_ipv4_mapped_peer_matches_plain_form() {
        let mut resolver =
            GeoResolver::new(vec![Box::new(RangeTable::builtin())], GeoCache::in_memory());

        let plain = resolver.resolve("8.8.8.8").await;
        let mapped = resolver.resolve("::ffff:8.8.8.8").await;

        assert!(plain.is_trusted());
        assert_eq!(plain, mapped);
    }
}

// ============================================================================
// Persistence
// ============================================================================

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_flushes_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let (tier, _) = CountingTier::new("counting", Some(hetzner()));
        let mut resolver = GeoResolver::new(vec![Box::new(tier)], GeoCache::load(&path));
        resolver.resolve("46.4.84.25").await;
        assert!(!path.exists());

        resolver.close();
        assert!(path.exists());

        let reloaded = GeoCache::load(&path);
        assert_eq!(reloaded.get("46.4.84.25"), Some(&hetzner()));
    }

    #[tokio::test]
    async fn test_drop_flushes_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        {
            let (tier, _) = CountingTier::new("counting", Some(hetzner()));
            let mut resolver = GeoResolver::new(vec![Box::new(tier)], GeoCache::load(&path));
            resolver.resolve("46.4.84.25").await;
        }

        assert_eq!(GeoCache::load(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_cached_entry_survives_restart_without_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        {
            let (tier, _) = CountingTier::new("counting", Some(hetzner()));
            let mut resolver = GeoResolver::new(vec![Box::new(tier)], GeoCache::load(&path));
            resolver.resolve("46.4.84.25").await;
            resolver.close();
        }

        let (tier, calls) = CountingTier::new("counting", None);
        let mut resolver = GeoResolver::new(vec![Box::new(tier)], GeoCache::load(&path));
        assert_eq!(resolver.resolve("46.4.84.25").await, hetzner());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batched_flush_during_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let cache = GeoCache::load(&path).with_policy(FlushPolicy {
            max_pending: 2,
            max_interval: std::time::Duration::from_secs(3600),
        });
        let (tier, _) = CountingTier::new("counting", Some(hetzner()));
        let mut resolver = GeoResolver::new(vec![Box::new(tier)], cache);

        resolver.resolve("46.4.84.25").await;
        assert!(!path.exists());
        resolver.resolve("46.4.84.26").await;
        assert!(path.exists());
        assert!(!resolver.cache().is_dirty());
    }

    #[tokio::test]
    async fn test_interval_flush_on_cache_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let cache = GeoCache::load(&path).with_policy(FlushPolicy {
            max_pending: 100,
            max_interval: std::time::Duration::from_millis(200),
        });
        let (tier, calls) = CountingTier::new("counting", Some(hetzner()));
        let mut resolver = GeoResolver::new(vec![Box::new(tier)], cache);

        resolver.resolve("46.4.84.25").await;
        assert!(!path.exists());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert_eq!(resolver.resolve("46.4.84.25").await, hetzner());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(path.exists());
        assert!(!resolver.cache().is_dirty());
    }

    #[tokio::test]
    async fn test_maybe_flush_waits_for_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geo_cache.json");

        let cache = GeoCache::load(&path).with_policy(FlushPolicy {
            max_pending: 100,
            max_interval: std::time::Duration::from_millis(200),
        });
        let (tier, _) = CountingTier::new("counting", Some(hetzner()));
        let mut resolver = GeoResolver::new(vec![Box::new(tier)], cache);

        resolver.resolve("46.4.84.25").await;
        assert!(!resolver.maybe_flush());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(resolver.maybe_flush());
        assert!(path.exists());
    }
}
