//! Tiered Cache
//!
//! A two-tier caching engine that orchestrates a fast process-local tier and
//! an optional shared remote tier behind one facade:
//!
//! - **Routing strategies**: per-call choice of `LocalFirst`, `RemoteFirst`,
//!   `LocalOnly`, `RemoteOnly`, `WriteThrough` or `WriteBehind`
//! - **Circuit breaker**: consecutive remote failures open the circuit and
//!   remote calls are skipped until a periodic timer closes it again
//! - **Async replication**: backfill and write-behind copies run on a bounded
//!   worker pool, never on the caller's critical path
//! - **Cross-instance sync**: local mutations are broadcast over the remote
//!   tier's Pub/Sub so peer instances converge, with origin filtering to
//!   prevent loops
//! - **Graceful degradation**: a missing or failing remote tier never breaks
//!   reads; the engine falls back to local-only behavior
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tiered_cache::{Strategy, TieredCacheBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tiered_cache::CacheError> {
//!     let cache = TieredCacheBuilder::new().build().await?;
//!
//!     let user = serde_json::json!({"name": "alice", "score": 100});
//!     cache.put("user:1", user, Strategy::LocalFirst, None).await?;
//!
//!     if let Some(cached) = cache.get("user:1", Strategy::LocalFirst).await {
//!         tracing::info!("cached: {cached}");
//!     }
//!
//!     let stats = cache.stats();
//!     tracing::info!("hit rate: {:.2}", stats.hit_rate);
//!
//!     cache.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Consistency model
//!
//! Eventual. Tiers own their entries independently; strategies define the
//! write order, the replication pool and sync channel carry copies across
//! tiers and instances with no ordering or delivery guarantee beyond the
//! transport's. Readers may observe stale or divergent values in the window
//! between a write and its propagation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod backends;
pub mod breaker;
mod builder;
pub mod config;
pub mod error;
pub mod metrics;
mod replicator;
pub mod router;
pub mod sync;
pub mod traits;

pub use builder::TieredCacheBuilder;
pub use config::{BreakerConfig, CacheConfig, MetricsConfig, ReplicatorConfig, SyncConfig};
pub use error::{CacheError, CacheResult};
pub use metrics::CacheStats;
pub use router::Strategy;
pub use sync::SyncStats;
pub use traits::{CacheTier, MessageHandler, RemoteTier, TierStats};

use breaker::CircuitBreaker;
use metrics::MetricsCollector;
use replicator::AsyncReplicator;
use router::StrategyRouter;
use sync::{SyncBroadcaster, SyncSubscriber};

/// The engine facade. One instance per process; cheap to share via `Arc`.
///
/// All mutating operations take the routing [`Strategy`] per call. Background
/// work (breaker reset timer, reconciliation tick, replication workers) runs
/// until [`TieredCache::shutdown`] is called.
pub struct TieredCache {
    router: StrategyRouter,
    breaker: Arc<CircuitBreaker>,
    replicator: Arc<AsyncReplicator>,
    metrics: Arc<MetricsCollector>,
    broadcaster: Option<SyncBroadcaster>,
    subscriber: Option<Arc<SyncSubscriber>>,
    sync_channel: String,
    task_shutdown: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

impl TieredCache {
    pub(crate) async fn assemble(
        local: Arc<dyn CacheTier>,
        remote: Option<Arc<dyn RemoteTier>>,
        config: CacheConfig,
    ) -> CacheResult<Self> {
        let breaker = Arc::new(CircuitBreaker::new(&config.breaker));
        let metrics = Arc::new(MetricsCollector::new(&config.metrics));
        let replicator = Arc::new(AsyncReplicator::new(
            Arc::clone(&local),
            remote.clone(),
            Arc::clone(&breaker),
            &config.replicator,
        ));
        let router = StrategyRouter::new(
            Arc::clone(&local),
            remote.clone(),
            Arc::clone(&breaker),
            Arc::clone(&replicator),
            Arc::clone(&metrics),
        );

        let (broadcaster, subscriber) = match remote.clone() {
            Some(remote) if config.sync.enabled => {
                let broadcaster = SyncBroadcaster::new(
                    Arc::clone(&remote),
                    config.sync.channel.clone(),
                    config.sync.node_id.clone(),
                );
                let subscriber = Arc::new(SyncSubscriber::new(
                    Arc::clone(&local),
                    config.sync.channel.clone(),
                    config.sync.node_id.clone(),
                ));
                subscriber.start(&remote).await?;
                (Some(broadcaster), Some(subscriber))
            }
            _ => (None, None),
        };
        let sync_on = broadcaster.is_some();

        let (task_shutdown, _) = broadcast::channel(1);

        let engine = Self {
            router,
            breaker,
            replicator,
            metrics,
            broadcaster,
            subscriber,
            sync_channel: config.sync.channel.clone(),
            task_shutdown,
            shut_down: AtomicBool::new(false),
        };
        engine.spawn_breaker_reset(config.breaker.reset_interval);
        if let Some(subscriber) = &engine.subscriber {
            engine.spawn_reconcile(Arc::clone(subscriber), config.sync.reconcile_interval);
        }

        info!(
            local = engine.router.local_tier().name(),
            remote = engine.router.remote_tier().map_or("none", |r| r.name()),
            sync = sync_on,
            "tiered cache engine started"
        );
        Ok(engine)
    }

    /// Blunt timer: every interval the breaker is closed and its failure
    /// count zeroed, regardless of remote health. This bounds the window in
    /// which failures count as consecutive; a still-failing remote re-opens
    /// the breaker within a few calls.
    fn spawn_breaker_reset(&self, interval: Duration) {
        let breaker = Arc::clone(&self.breaker);
        let mut shutdown_rx = self.task_shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => breaker.reset(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    fn spawn_reconcile(&self, subscriber: Arc<SyncSubscriber>, interval: Duration) {
        let mut shutdown_rx = self.task_shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => subscriber.reconcile(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // ===== Data operations =====

    /// Look up a key. Misses, tier failures and an open breaker all read as
    /// `None`; the read path never errors.
    pub async fn get(&self, key: &str, strategy: Strategy) -> Option<Value> {
        self.router.get(key, strategy).await
    }

    /// Store a value under a strategy.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriteFailure`] when the synchronous half of a
    /// `WriteThrough` or `*Only` write fails. Other strategies log and absorb
    /// tier failures.
    pub async fn put(
        &self,
        key: &str,
        value: Value,
        strategy: Strategy,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let broadcast_value = self
            .should_broadcast(strategy)
            .then(|| value.clone());
        self.router.put(key, value, strategy, ttl).await?;
        if let (Some(broadcaster), Some(value)) = (&self.broadcaster, broadcast_value) {
            broadcaster.broadcast_put(key, value).await;
        }
        Ok(())
    }

    /// Remove a key from the tiers the strategy touches.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriteFailure`] when the local removal fails, or
    /// when the remote removal fails under `WriteThrough`/`RemoteOnly`.
    pub async fn evict(&self, key: &str, strategy: Strategy) -> CacheResult<()> {
        self.router.evict(key, strategy).await?;
        if self.should_broadcast(strategy) {
            if let Some(broadcaster) = &self.broadcaster {
                broadcaster.broadcast_evict(key).await;
            }
        }
        Ok(())
    }

    /// Remove every entry from both tiers.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WriteFailure`] when either tier rejects the
    /// clear. An unavailable remote tier is skipped, not an error.
    pub async fn clear(&self) -> CacheResult<()> {
        self.router.clear().await?;
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.broadcast_clear().await;
        }
        Ok(())
    }

    /// Batch lookup. Missing keys are absent from the result map.
    pub async fn multi_get(&self, keys: &[String], strategy: Strategy) -> HashMap<String, Value> {
        self.router.multi_get(keys, strategy).await
    }

    /// Batch store with a shared TTL.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`TieredCache::put`], applied to the batch.
    pub async fn multi_put(
        &self,
        entries: HashMap<String, Value>,
        strategy: Strategy,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let broadcast_entries = self
            .should_broadcast(strategy)
            .then(|| entries.clone());
        self.router.multi_put(entries, strategy, ttl).await?;
        if let (Some(broadcaster), Some(entries)) = (&self.broadcaster, broadcast_entries) {
            for (key, value) in entries {
                broadcaster.broadcast_put(&key, value).await;
            }
        }
        Ok(())
    }

    /// Batch removal.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`TieredCache::evict`], applied to the batch.
    pub async fn multi_evict(&self, keys: &[String], strategy: Strategy) -> CacheResult<()> {
        self.router.multi_evict(keys, strategy).await?;
        if self.should_broadcast(strategy) {
            if let Some(broadcaster) = &self.broadcaster {
                for key in keys {
                    broadcaster.broadcast_evict(key).await;
                }
            }
        }
        Ok(())
    }

    /// Peer instances mirror local mutations, so only mutations that landed
    /// in the local tier are announced.
    fn should_broadcast(&self, strategy: Strategy) -> bool {
        self.broadcaster.is_some() && self.router.mutates_local(strategy)
    }

    // ===== Introspection =====

    /// Aggregated request counters and hit rate.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Zero all request counters. Operator action; tier-level counters are
    /// unaffected.
    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    /// Counters of the local tier backend.
    #[must_use]
    pub fn local_tier_stats(&self) -> TierStats {
        self.router.local_tier().stats()
    }

    /// Counters of the remote tier backend, when one is configured.
    #[must_use]
    pub fn remote_tier_stats(&self) -> Option<TierStats> {
        self.router.remote_tier().map(|remote| remote.stats())
    }

    /// Subscriber-side sync counters, when sync is running.
    #[must_use]
    pub fn sync_stats(&self) -> Option<SyncStats> {
        self.subscriber.as_ref().map(|s| s.stats())
    }

    /// Whether the circuit breaker is currently rejecting remote calls.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Probe both tiers. Healthy means the local tier answers a write/read
    /// round-trip; a disconnected remote tier only degrades the engine and is
    /// logged, not reported as unhealthy.
    pub async fn health_check(&self) -> bool {
        let probe_key = "tiered-cache:health-probe";
        let probe_value = serde_json::json!({"probe": true});
        let local = self.router.local_tier();

        let local_ok = match local.put(probe_key, probe_value.clone(), Some(Duration::from_secs(10))).await {
            Ok(()) => match local.get(probe_key).await {
                Ok(Some(read_back)) => {
                    let _ = local.evict(probe_key).await;
                    read_back == probe_value
                }
                _ => false,
            },
            Err(_) => false,
        };

        if let Some(remote) = self.router.remote_tier() {
            if !remote.is_connected().await {
                warn!("remote tier unreachable, engine degraded to local-only");
            }
        }
        local_ok
    }

    /// Stop background tasks, drain the replication pool within its grace
    /// period and drop the sync subscription. Idempotent; data operations
    /// afterwards still work against whatever tiers remain reachable, but
    /// nothing is replicated or broadcast.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed");
            return;
        }
        info!("shutting down tiered cache engine");
        let _ = self.task_shutdown.send(());
        self.replicator.shutdown().await;
        if self.subscriber.is_some() {
            if let Some(remote) = self.router.remote_tier() {
                if let Err(e) = remote.unsubscribe(&self.sync_channel).await {
                    warn!(channel = %self.sync_channel, error = %e, "failed to drop sync subscription");
                }
            }
        }
        info!(
            replicated = self.replicator.completed(),
            replication_failures = self.replicator.failed(),
            "tiered cache engine stopped"
        );
    }
}
