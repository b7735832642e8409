//! Moka Tier - In-Memory Local Backend
//!
//! High-performance concurrent cache for the process-local tier.

use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::traits::{CacheTier, TierStats};

/// Cache entry with per-key TTL information.
///
/// Moka's builder-level TTL is uniform across the cache, so per-key TTLs are
/// tracked here and enforced on read.
#[derive(Debug, Clone)]
struct MokaEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl MokaEntry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Configuration for [`MokaTier`].
#[derive(Debug, Clone, Copy)]
pub struct MokaTierConfig {
    /// Max number of entries before LRU eviction kicks in.
    pub max_capacity: u64,
    /// Upper bound on entry lifetime, applied on top of per-key TTLs.
    pub time_to_live: Duration,
    /// Entries untouched for this long are evicted.
    pub time_to_idle: Duration,
}

impl Default for MokaTierConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            time_to_live: Duration::from_secs(3600),
            time_to_idle: Duration::from_secs(600),
        }
    }
}

/// Moka-backed local tier with per-key TTL support.
///
/// This is the default local backend: sub-millisecond access, capacity-bound
/// LRU eviction, and statistics tracking.
pub struct MokaTier {
    cache: Cache<String, MokaEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl MokaTier {
    #[must_use]
    pub fn new(config: MokaTierConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.time_to_live)
            .time_to_idle(config.time_to_idle)
            .build();

        info!(
            capacity = config.max_capacity,
            "Moka local tier initialized"
        );

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

impl Default for MokaTier {
    fn default() -> Self {
        Self::new(MokaTierConfig::default())
    }
}

#[async_trait]
impl CacheTier for MokaTier {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.cache.get(key).await {
            if entry.is_expired() {
                self.cache.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.value));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.cache
            .insert(key.to_string(), MokaEntry::new(value, ttl))
            .await;
        self.puts.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Moka] Cached key");
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        self.evictions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        // run_pending_tasks makes the invalidation visible to entry_count.
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> bool {
        match self.cache.get(key).await {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    async fn size(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn name(&self) -> &'static str {
        "Moka"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn per_key_ttl_is_enforced_on_read() {
        let tier = MokaTier::default();
        tier.put("short", json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tier.put("long", json!(2), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(tier.get("short").await.unwrap(), None);
        assert_eq!(tier.get("long").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn clear_empties_the_tier() {
        let tier = MokaTier::default();
        tier.put("a", json!("x"), None).await.unwrap();
        tier.put("b", json!("y"), None).await.unwrap();
        tier.clear().await.unwrap();
        assert_eq!(tier.size().await, 0);
        assert_eq!(tier.get("a").await.unwrap(), None);
    }
}
