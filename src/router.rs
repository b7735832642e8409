//! Strategy router: composes tier calls per strategy.
//!
//! Every caller-facing operation flows through here. The router decides which
//! tier(s) participate and in what order, guards every remote call with the
//! circuit breaker, hands cross-tier copies to the replication pool, and
//! degrades to local-only behavior when the remote tier is missing or the
//! breaker is open.
//!
//! Failure policy, in one place:
//! - reads never error; a failing tier reads as a miss
//! - synchronous writes surface failures only for `WriteThrough` and the
//!   `*Only` strategies; the synchronous half of `*First` and `WriteBehind`
//!   writes is logged and swallowed
//! - asynchronous work (backfill, write-behind) is contained entirely inside
//!   the replication pool

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{CacheError, CacheResult};
use crate::metrics::MetricsCollector;
use crate::replicator::{AsyncReplicator, ReplicationTask};
use crate::traits::{CacheTier, RemoteTier};

/// Per-call policy governing which tier(s) participate and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Read local then remote; write local synchronously, remote async.
    LocalFirst,
    /// Read remote then local; write remote synchronously, local async.
    RemoteFirst,
    /// Touch only the local tier.
    LocalOnly,
    /// Touch only the remote tier (degrades to local when none is configured).
    RemoteOnly,
    /// Write both tiers synchronously; remote failures surface to the caller.
    WriteThrough,
    /// Write local synchronously, remote asynchronously, best-effort.
    WriteBehind,
}

pub struct StrategyRouter {
    local: Arc<dyn CacheTier>,
    remote: Option<Arc<dyn RemoteTier>>,
    breaker: Arc<CircuitBreaker>,
    replicator: Arc<AsyncReplicator>,
    metrics: Arc<MetricsCollector>,
}

impl StrategyRouter {
    pub(crate) fn new(
        local: Arc<dyn CacheTier>,
        remote: Option<Arc<dyn RemoteTier>>,
        breaker: Arc<CircuitBreaker>,
        replicator: Arc<AsyncReplicator>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            local,
            remote,
            breaker,
            replicator,
            metrics,
        }
    }

    /// Whether a mutation under this strategy lands in the local tier
    /// synchronously. Drives the facade's sync-broadcast decision. With the
    /// breaker open, remote-fronted writes fall back to the local tier, so
    /// they count as local mutations too.
    pub(crate) fn mutates_local(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::LocalOnly
            | Strategy::LocalFirst
            | Strategy::WriteThrough
            | Strategy::WriteBehind => true,
            Strategy::RemoteOnly | Strategy::RemoteFirst => {
                self.remote.is_none() || self.breaker.is_open()
            }
        }
    }

    // ===== Reads =====

    /// Look up a key under a strategy. Never errors: tier failures and an
    /// open breaker both read as a miss.
    pub async fn get(&self, key: &str, strategy: Strategy) -> Option<Value> {
        match strategy {
            // Write-oriented strategies read like LocalFirst.
            Strategy::LocalFirst | Strategy::WriteThrough | Strategy::WriteBehind => {
                self.get_local_first(key).await
            }
            Strategy::RemoteFirst => self.get_remote_first(key).await,
            Strategy::LocalOnly => self.get_local_only(key).await,
            Strategy::RemoteOnly => self.get_remote_only(key).await,
        }
    }

    async fn get_local_first(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.read_local(key).await {
            self.metrics.record_local_hit();
            return Some(value);
        }
        if let Some(value) = self.read_remote(key).await {
            self.metrics.record_remote_hit();
            self.schedule_backfill(key, value.clone()).await;
            return Some(value);
        }
        self.metrics.record_miss();
        None
    }

    async fn get_remote_first(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.read_remote(key).await {
            self.metrics.record_remote_hit();
            self.schedule_backfill(key, value.clone()).await;
            return Some(value);
        }
        if let Some(value) = self.read_local(key).await {
            self.metrics.record_local_hit();
            return Some(value);
        }
        self.metrics.record_miss();
        None
    }

    async fn get_local_only(&self, key: &str) -> Option<Value> {
        match self.read_local(key).await {
            Some(value) => {
                self.metrics.record_local_hit();
                Some(value)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    async fn get_remote_only(&self, key: &str) -> Option<Value> {
        // No fallback: an absent remote tier or an open breaker is a clean miss.
        match self.read_remote(key).await {
            Some(value) => {
                self.metrics.record_remote_hit();
                Some(value)
            }
            None => {
                self.metrics.record_miss();
                None
            }
        }
    }

    async fn read_local(&self, key: &str) -> Option<Value> {
        match self.local.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "local tier read failed, treating as miss");
                None
            }
        }
    }

    /// Breaker-guarded remote read. Absent tier, open breaker and tier
    /// failures all read as `None`.
    async fn read_remote(&self, key: &str) -> Option<Value> {
        let remote = self.remote.as_ref()?;
        if self.breaker.is_open() {
            debug!(key = %key, "circuit open, skipping remote read");
            return None;
        }
        match remote.get(key).await {
            Ok(value) => {
                self.breaker.record_success();
                value
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(key = %key, error = %e, "remote tier read failed, treating as miss");
                None
            }
        }
    }

    /// Copy a remote hit into the local tier off the critical path,
    /// propagating the remaining remote TTL when one is set.
    async fn schedule_backfill(&self, key: &str, value: Value) {
        let ttl = match self.remote.as_ref() {
            Some(remote) if !self.breaker.is_open() => remote.get_expire(key).await,
            _ => None,
        };
        self.replicator.schedule(ReplicationTask::BackfillLocal {
            key: key.to_string(),
            value,
            ttl,
        });
    }

    // ===== Writes =====

    pub async fn put(
        &self,
        key: &str,
        value: Value,
        strategy: Strategy,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        match strategy {
            Strategy::LocalOnly => self.put_local_strict(key, value, ttl).await,
            Strategy::LocalFirst => {
                self.put_local_lenient(key, value.clone(), ttl).await;
                if self.remote.is_some() {
                    self.replicator.schedule(ReplicationTask::WriteRemote {
                        key: key.to_string(),
                        value,
                        ttl,
                    });
                }
                Ok(())
            }
            Strategy::RemoteOnly => self.put_remote_or_fallback(key, value, ttl, true).await,
            Strategy::RemoteFirst => {
                self.put_remote_or_fallback(key, value.clone(), ttl, false).await?;
                self.replicator.schedule(ReplicationTask::BackfillLocal {
                    key: key.to_string(),
                    value,
                    ttl,
                });
                Ok(())
            }
            Strategy::WriteThrough => {
                self.put_local_strict(key, value.clone(), ttl).await?;
                // The local write is not rolled back when the remote half
                // fails; the tiers diverge until TTL or the next write.
                match self.put_remote(key, value, ttl).await {
                    Ok(()) => Ok(()),
                    Err(CacheError::TierUnavailable { reason }) => {
                        debug!(key = %key, reason = %reason, "write-through remote half skipped");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Strategy::WriteBehind => {
                self.put_local_lenient(key, value.clone(), ttl).await;
                if self.remote.is_some() {
                    self.replicator.schedule(ReplicationTask::WriteRemote {
                        key: key.to_string(),
                        value,
                        ttl,
                    });
                }
                Ok(())
            }
        }
    }

    async fn put_local_strict(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        self.local
            .put(key, value, ttl)
            .await
            .map_err(|e| CacheError::write_failure(format!("put '{key}' to local tier"), e))
    }

    async fn put_local_lenient(&self, key: &str, value: Value, ttl: Option<Duration>) {
        if let Err(e) = self.local.put(key, value, ttl).await {
            warn!(key = %key, error = %e, "local tier write failed");
        }
    }

    /// Breaker-guarded remote write. `TierUnavailable` when the tier is
    /// absent or the breaker is open; `WriteFailure` when the tier rejects.
    async fn put_remote(&self, key: &str, value: Value, ttl: Option<Duration>) -> CacheResult<()> {
        let Some(remote) = self.remote.as_ref() else {
            return Err(CacheError::unavailable("remote tier not configured"));
        };
        if self.breaker.is_open() {
            return Err(CacheError::unavailable("circuit breaker open"));
        }
        match remote.put(key, value, ttl).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(CacheError::write_failure(format!("put '{key}' to remote tier"), e))
            }
        }
    }

    /// Remote-fronted write. When the remote tier is unavailable the write
    /// lands in the local tier instead; `strict` decides whether a rejected
    /// write surfaces or is only logged.
    async fn put_remote_or_fallback(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        strict: bool,
    ) -> CacheResult<()> {
        match self.put_remote(key, value.clone(), ttl).await {
            Ok(()) => Ok(()),
            Err(CacheError::TierUnavailable { reason }) => {
                debug!(key = %key, reason = %reason, "remote tier unavailable, writing local tier instead");
                if strict {
                    self.put_local_strict(key, value, ttl).await
                } else {
                    self.put_local_lenient(key, value, ttl).await;
                    Ok(())
                }
            }
            Err(e) if strict => Err(e),
            Err(e) => {
                warn!(key = %key, error = %e, "remote tier write failed");
                Ok(())
            }
        }
    }

    // ===== Evict / clear =====

    pub async fn evict(&self, key: &str, strategy: Strategy) -> CacheResult<()> {
        match strategy {
            Strategy::LocalOnly => self.evict_local(key).await,
            Strategy::RemoteOnly => match self.evict_remote(key).await {
                Err(CacheError::TierUnavailable { reason }) => {
                    debug!(key = %key, reason = %reason, "remote tier unavailable, evicting local tier instead");
                    self.evict_local(key).await
                }
                other => other,
            },
            _ => {
                self.evict_local(key).await?;
                match self.evict_remote(key).await {
                    Ok(()) => Ok(()),
                    Err(CacheError::TierUnavailable { reason }) => {
                        debug!(key = %key, reason = %reason, "remote half of evict skipped");
                        Ok(())
                    }
                    Err(e) if strategy == Strategy::WriteThrough => Err(e),
                    Err(e) => {
                        warn!(key = %key, error = %e, "remote tier evict failed");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn evict_local(&self, key: &str) -> CacheResult<()> {
        self.local
            .evict(key)
            .await
            .map_err(|e| CacheError::write_failure(format!("evict '{key}' from local tier"), e))
    }

    async fn evict_remote(&self, key: &str) -> CacheResult<()> {
        let Some(remote) = self.remote.as_ref() else {
            return Err(CacheError::unavailable("remote tier not configured"));
        };
        if self.breaker.is_open() {
            return Err(CacheError::unavailable("circuit breaker open"));
        }
        match remote.evict(key).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(CacheError::write_failure(format!("evict '{key}' from remote tier"), e))
            }
        }
    }

    /// Clear both tiers. The remote half is skipped when unavailable and its
    /// failures surface, since a silently half-cleared cache is worse than an
    /// error.
    pub async fn clear(&self) -> CacheResult<()> {
        self.local
            .clear()
            .await
            .map_err(|e| CacheError::write_failure("clear local tier", e))?;

        let Some(remote) = self.remote.as_ref() else {
            return Ok(());
        };
        if self.breaker.is_open() {
            warn!("circuit open, remote half of clear skipped");
            return Ok(());
        }
        match remote.clear().await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(CacheError::write_failure("clear remote tier", e))
            }
        }
    }

    // ===== Batch operations =====

    pub async fn multi_get(&self, keys: &[String], strategy: Strategy) -> HashMap<String, Value> {
        match strategy {
            Strategy::LocalOnly => {
                let found = self.multi_read_local(keys).await;
                self.record_batch(keys.len(), found.len(), 0);
                found
            }
            Strategy::RemoteOnly => {
                let found = self.multi_read_remote(keys).await;
                self.record_batch(keys.len(), 0, found.len());
                found
            }
            Strategy::RemoteFirst => {
                let mut found = self.multi_read_remote(keys).await;
                for (key, value) in &found {
                    self.schedule_backfill(key, value.clone()).await;
                }
                let remote_hits = found.len();
                let missing = Self::missing_keys(keys, &found);
                found.extend(self.multi_read_local(&missing).await);
                self.record_batch(keys.len(), found.len() - remote_hits, remote_hits);
                found
            }
            _ => {
                let mut found = self.multi_read_local(keys).await;
                let local_hits = found.len();
                let missing = Self::missing_keys(keys, &found);
                let from_remote = self.multi_read_remote(&missing).await;
                for (key, value) in &from_remote {
                    self.schedule_backfill(key, value.clone()).await;
                }
                let remote_hits = from_remote.len();
                found.extend(from_remote);
                self.record_batch(keys.len(), local_hits, remote_hits);
                found
            }
        }
    }

    fn missing_keys(keys: &[String], found: &HashMap<String, Value>) -> Vec<String> {
        keys.iter()
            .filter(|key| !found.contains_key(*key))
            .cloned()
            .collect()
    }

    fn record_batch(&self, requested: usize, local_hits: usize, remote_hits: usize) {
        for _ in 0..local_hits {
            self.metrics.record_local_hit();
        }
        for _ in 0..remote_hits {
            self.metrics.record_remote_hit();
        }
        for _ in 0..requested.saturating_sub(local_hits + remote_hits) {
            self.metrics.record_miss();
        }
    }

    async fn multi_read_local(&self, keys: &[String]) -> HashMap<String, Value> {
        if keys.is_empty() {
            return HashMap::new();
        }
        match self.local.multi_get(keys).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "local tier batch read failed, treating as misses");
                HashMap::new()
            }
        }
    }

    async fn multi_read_remote(&self, keys: &[String]) -> HashMap<String, Value> {
        if keys.is_empty() {
            return HashMap::new();
        }
        let Some(remote) = self.remote.as_ref() else {
            return HashMap::new();
        };
        if self.breaker.is_open() {
            debug!("circuit open, skipping remote batch read");
            return HashMap::new();
        }
        match remote.multi_get(keys).await {
            Ok(found) => {
                self.breaker.record_success();
                found
            }
            Err(e) => {
                self.breaker.record_failure();
                warn!(error = %e, "remote tier batch read failed, treating as misses");
                HashMap::new()
            }
        }
    }

    pub async fn multi_put(
        &self,
        entries: HashMap<String, Value>,
        strategy: Strategy,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        match strategy {
            Strategy::LocalOnly => self.multi_put_local_strict(entries, ttl).await,
            Strategy::RemoteOnly => match self.multi_put_remote(entries.clone(), ttl).await {
                Err(CacheError::TierUnavailable { reason }) => {
                    debug!(reason = %reason, "remote tier unavailable, batch write lands in local tier");
                    self.multi_put_local_strict(entries, ttl).await
                }
                other => other,
            },
            Strategy::WriteThrough => {
                self.multi_put_local_strict(entries.clone(), ttl).await?;
                match self.multi_put_remote(entries, ttl).await {
                    Err(CacheError::TierUnavailable { reason }) => {
                        debug!(reason = %reason, "remote half of batch write skipped");
                        Ok(())
                    }
                    other => other,
                }
            }
            Strategy::RemoteFirst => {
                match self.multi_put_remote(entries.clone(), ttl).await {
                    Ok(()) => {}
                    Err(CacheError::TierUnavailable { .. }) => {
                        if let Err(e) = self.local.multi_put(entries.clone(), ttl).await {
                            warn!(error = %e, "local tier batch write failed");
                        }
                        return Ok(());
                    }
                    Err(e) => warn!(error = %e, "remote tier batch write failed"),
                }
                for (key, value) in entries {
                    self.replicator
                        .schedule(ReplicationTask::BackfillLocal { key, value, ttl });
                }
                Ok(())
            }
            // LocalFirst and WriteBehind: local now, remote behind.
            Strategy::LocalFirst | Strategy::WriteBehind => {
                if let Err(e) = self.local.multi_put(entries.clone(), ttl).await {
                    warn!(error = %e, "local tier batch write failed");
                }
                if self.remote.is_some() {
                    for (key, value) in entries {
                        self.replicator
                            .schedule(ReplicationTask::WriteRemote { key, value, ttl });
                    }
                }
                Ok(())
            }
        }
    }

    async fn multi_put_local_strict(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.local
            .multi_put(entries, ttl)
            .await
            .map_err(|e| CacheError::write_failure("batch put to local tier", e))
    }

    async fn multi_put_remote(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let Some(remote) = self.remote.as_ref() else {
            return Err(CacheError::unavailable("remote tier not configured"));
        };
        if self.breaker.is_open() {
            return Err(CacheError::unavailable("circuit breaker open"));
        }
        match remote.multi_put(entries, ttl).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(CacheError::write_failure("batch put to remote tier", e))
            }
        }
    }

    pub async fn multi_evict(&self, keys: &[String], strategy: Strategy) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        match strategy {
            Strategy::LocalOnly => self.multi_evict_local(keys).await,
            Strategy::RemoteOnly => match self.multi_evict_remote(keys).await {
                Err(CacheError::TierUnavailable { reason }) => {
                    debug!(reason = %reason, "remote tier unavailable, batch evict lands in local tier");
                    self.multi_evict_local(keys).await
                }
                other => other,
            },
            _ => {
                self.multi_evict_local(keys).await?;
                match self.multi_evict_remote(keys).await {
                    Ok(()) => Ok(()),
                    Err(CacheError::TierUnavailable { reason }) => {
                        debug!(reason = %reason, "remote half of batch evict skipped");
                        Ok(())
                    }
                    Err(e) if strategy == Strategy::WriteThrough => Err(e),
                    Err(e) => {
                        warn!(error = %e, "remote tier batch evict failed");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn multi_evict_local(&self, keys: &[String]) -> CacheResult<()> {
        self.local
            .multi_evict(keys)
            .await
            .map_err(|e| CacheError::write_failure("batch evict from local tier", e))
    }

    async fn multi_evict_remote(&self, keys: &[String]) -> CacheResult<()> {
        let Some(remote) = self.remote.as_ref() else {
            return Err(CacheError::unavailable("remote tier not configured"));
        };
        if self.breaker.is_open() {
            return Err(CacheError::unavailable("circuit breaker open"));
        }
        match remote.multi_evict(keys).await {
            Ok(()) => {
                self.breaker.record_success();
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(CacheError::write_failure("batch evict from remote tier", e))
            }
        }
    }

    pub(crate) fn local_tier(&self) -> &Arc<dyn CacheTier> {
        &self.local
    }

    pub(crate) fn remote_tier(&self) -> Option<&Arc<dyn RemoteTier>> {
        self.remote.as_ref()
    }
}
