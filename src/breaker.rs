//! Circuit breaker guarding the remote tier.
//!
//! Two states only, `Closed` and `Open`. Consecutive failures open the
//! breaker; while open, every remote call is skipped without touching the
//! network and the router treats the tier as unavailable. A periodic task
//! unconditionally closes the breaker again, letting the next real call probe
//! the remote tier. There is no half-open trial step.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;

/// Lock-free circuit breaker shared by every remote-tier call site.
///
/// Failure accounting is atomic; `opened_at` is only informational and is
/// guarded by a mutex off the hot path.
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    open: AtomicBool,
    opened_at: parking_lot::Mutex<Option<Instant>>,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            open: AtomicBool::new(false),
            opened_at: parking_lot::Mutex::new(None),
            threshold: config.failure_threshold.max(1),
        }
    }

    /// Whether remote calls should currently be short-circuited.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Record a successful remote call. Resets the consecutive-failure count.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    /// Record a failed remote call. Opens the breaker once the consecutive
    /// failure count reaches the threshold.
    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold && !self.open.swap(true, Ordering::Relaxed) {
            *self.opened_at.lock() = Some(Instant::now());
            warn!(
                failures,
                threshold = self.threshold,
                "circuit breaker opened, remote tier calls suspended"
            );
        }
    }

    /// Unconditionally close the breaker and zero the failure count.
    ///
    /// Called by the periodic reset task; the next remote call after this is
    /// a live probe of the remote tier.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        if self.open.swap(false, Ordering::Relaxed) {
            let since = self.opened_at.lock().take();
            info!(
                open_for_ms = since.map(|t| t.elapsed().as_millis() as u64),
                "circuit breaker reset to closed"
            );
        }
    }

    /// Current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            ..BreakerConfig::default()
        })
    }

    #[test]
    fn opens_at_threshold() {
        let b = breaker(3);
        b.record_failure();
        b.record_failure();
        assert!(!b.is_open());
        b.record_failure();
        assert!(b.is_open());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let b = breaker(3);
        b.record_failure();
        b.record_failure();
        b.record_success();
        assert_eq!(b.failure_count(), 0);
        b.record_failure();
        b.record_failure();
        assert!(!b.is_open());
    }

    #[test]
    fn reset_closes_and_zeroes() {
        let b = breaker(1);
        b.record_failure();
        assert!(b.is_open());
        b.reset();
        assert!(!b.is_open());
        assert_eq!(b.failure_count(), 0);
    }
}
