//! Engine configuration.
//!
//! Plain structs with sensible defaults. There is no configuration-file
//! loading here; callers construct a [`CacheConfig`] (or take the default)
//! and hand it to the builder.

use std::time::Duration;
use uuid::Uuid;

/// Circuit breaker tuning for the remote tier.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Interval of the periodic task that unconditionally closes the breaker.
    pub reset_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_interval: Duration::from_secs(60),
        }
    }
}

/// Cross-instance synchronization settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether local mutations are broadcast to peer instances.
    ///
    /// Sync also requires a remote tier; without one this flag is ignored.
    pub enabled: bool,
    /// Pub/Sub channel carrying sync events.
    pub channel: String,
    /// Identity tagged onto outbound events, used to suppress re-applying
    /// our own echoes. Defaults to a random per-process id.
    pub node_id: String,
    /// Interval of the periodic reconciliation tick.
    pub reconcile_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "cache-sync".to_string(),
            node_id: format!("node-{}", Uuid::new_v4()),
            reconcile_interval: Duration::from_secs(1),
        }
    }
}

/// Background replication pool settings.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Number of worker tasks. Defaults to available parallelism.
    pub workers: usize,
    /// Bound of the task queue. Enqueueing never blocks; tasks submitted to a
    /// full queue are dropped with a warning.
    pub queue_depth: usize,
    /// How long `shutdown` waits for in-flight tasks before abandoning them.
    pub shutdown_grace: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            queue_depth: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Hit-rate watchdog settings.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Hit rate below which a warning is logged.
    pub hit_rate_warn_threshold: f64,
    /// Requests to observe before the watchdog starts evaluating.
    pub warmup_requests: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            hit_rate_warn_threshold: 0.8,
            warmup_requests: 100,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub breaker: BreakerConfig,
    pub sync: SyncConfig,
    pub replicator: ReplicatorConfig,
    pub metrics: MetricsConfig,
}
