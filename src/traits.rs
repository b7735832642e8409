//! Tier capability traits.
//!
//! The engine orchestrates two backing stores behind these traits: a fast
//! process-local tier and a shared remote tier. The engine never implements
//! storage or eviction itself; it composes calls to whatever backends the
//! caller supplies.
//!
//! - [`CacheTier`]: the CRUD surface every tier must provide
//! - [`RemoteTier`]: extends [`CacheTier`] with Pub/Sub, connectivity probing
//!   and TTL manipulation, as needed for cross-instance sync and degradation
//! - [`MessageHandler`]: callback invoked for each Pub/Sub message
//!
//! Implementations must be individually thread-safe; the engine performs no
//! additional synchronization around them and enforces no per-call timeout.
//! Any timeout belongs inside the tier implementation.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Core key-value operations shared by both tiers.
///
/// Values are opaque JSON blobs; tiers are unaware of each other and own
/// their entries independently. Fallible operations return `anyhow::Result`
/// so backends can attach whatever context fits their transport; the engine
/// maps those into its own error taxonomy.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Look up a key. `Ok(None)` is a miss; `Err` is a tier failure, which
    /// the engine treats as a miss on the read path.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value. `ttl: None` means the entry does not expire (or the
    /// backend applies its own default policy).
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn evict(&self, key: &str) -> Result<()>;

    /// Remove every entry held by this tier.
    async fn clear(&self) -> Result<()>;

    /// Whether the tier currently holds a non-expired entry for `key`.
    async fn contains_key(&self, key: &str) -> bool;

    /// Number of entries currently held.
    async fn size(&self) -> u64;

    /// Batch lookup. Missing keys are simply absent from the result.
    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Batch store with a shared TTL.
    async fn multi_put(&self, entries: HashMap<String, Value>, ttl: Option<Duration>) -> Result<()> {
        for (key, value) in entries {
            self.put(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Batch removal.
    async fn multi_evict(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.evict(key).await?;
        }
        Ok(())
    }

    /// Counters accumulated by this tier since construction.
    fn stats(&self) -> TierStats;

    /// Identifier used in logs.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// Callback for Pub/Sub message delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, channel: &str, payload: &str);
}

/// Extended capabilities of the shared remote tier.
///
/// Delivery and ordering guarantees of `publish`/`subscribe` are exactly
/// those of the underlying transport; the engine adds none.
#[async_trait]
pub trait RemoteTier: CacheTier {
    /// Publish a payload on a channel, visible to every subscribed instance
    /// including this one.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Register a handler for a channel. The handler is invoked for each
    /// delivered message until `unsubscribe` is called.
    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Stop delivering messages for a channel.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Probe connectivity to the backing store.
    async fn is_connected(&self) -> bool;

    /// Set or replace the TTL of an existing key. Returns `false` when the
    /// key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL of a key. `None` when the key is absent or has no
    /// expiration.
    async fn get_expire(&self, key: &str) -> Option<Duration>;
}

/// Per-tier counters, monotonically increasing for the tier's lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
}

impl TierStats {
    /// Hits over total lookups. `1.0` when the tier has seen no lookups.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let requests = self.hits + self.misses;
        if requests == 0 {
            1.0
        } else {
            self.hits as f64 / requests as f64
        }
    }
}
