//! Hit/miss accounting and the hit-rate watchdog.
//!
//! Counters are atomic and monotonically increasing for the process lifetime;
//! only an explicit [`MetricsCollector::reset`] clears them. The watchdog is
//! purely observational: once enough requests have been seen it logs a
//! warning when the rolling hit rate drops below the configured threshold.
//! It never changes routing behavior.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

use crate::config::MetricsConfig;

/// Atomic counters shared across every caller-facing operation.
pub struct MetricsCollector {
    total_requests: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    /// Set while the watchdog is in a degraded episode, so the warning fires
    /// once per episode instead of once per request.
    degraded: AtomicBool,
    warn_threshold: f64,
    warmup_requests: u64,
}

impl MetricsCollector {
    pub fn new(config: &MetricsConfig) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            local_hits: AtomicU64::new(0),
            remote_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            warn_threshold: config.hit_rate_warn_threshold,
            warmup_requests: config.warmup_requests,
        }
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.check_hit_rate();
    }

    pub fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.check_hit_rate();
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.check_hit_rate();
    }

    fn check_hit_rate(&self) {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total <= self.warmup_requests {
            return;
        }
        let hits = self.local_hits.load(Ordering::Relaxed) + self.remote_hits.load(Ordering::Relaxed);
        let rate = hits as f64 / total as f64;
        if rate < self.warn_threshold {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                warn!(
                    hit_rate = format!("{:.2}%", rate * 100.0),
                    threshold = format!("{:.2}%", self.warn_threshold * 100.0),
                    total_requests = total,
                    "cache hit rate below threshold"
                );
            }
        } else {
            self.degraded.store(false, Ordering::Relaxed);
        }
    }

    /// Point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> CacheStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let remote_hits = self.remote_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            total_requests,
            local_hits,
            remote_hits,
            total_hits: local_hits + remote_hits,
            misses,
            hit_rate: if total_requests > 0 {
                (local_hits + remote_hits) as f64 / total_requests as f64
            } else {
                0.0
            },
        }
    }

    /// Operator action: zero every counter.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.local_hits.store(0, Ordering::Relaxed);
        self.remote_hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.degraded.store(false, Ordering::Relaxed);
        info!("cache metrics reset");
    }
}

/// Engine-level counters exposed to callers.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub total_requests: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub total_hits: u64,
    pub misses: u64,
    /// Hits over total requests, `0.0` before any request.
    pub hit_rate: f64,
}
