//! Common utilities for integration tests
//!
//! All integration tests run against in-process `MemoryTier` backends, so no
//! Redis or network is required. A shared `MemoryTier` standing in for the
//! remote tier lets tests exercise multi-instance behavior: two engines
//! pointed at the same instance see the same "remote" store and the same
//! Pub/Sub channel.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiered_cache::backends::MemoryTier;
use tiered_cache::{
    CacheConfig, CacheTier, MessageHandler, RemoteTier, TierStats, TieredCache, TieredCacheBuilder,
};

/// Create a test key with a unique suffix to avoid conflicts between tests.
pub fn test_key(name: &str) -> String {
    format!("test_{}_{}", name, rand::random::<u32>())
}

/// Engine over in-process tiers, sharing `remote` as its remote tier.
pub async fn engine_with_remote(remote: Arc<MemoryTier>, config: CacheConfig) -> TieredCache {
    TieredCacheBuilder::new()
        .with_local(Arc::new(MemoryTier::new()))
        .with_remote(remote as Arc<dyn RemoteTier>)
        .with_config(config)
        .build()
        .await
        .expect("engine setup failed")
}

/// Engine with no remote tier at all (degraded mode).
pub async fn engine_local_only(config: CacheConfig) -> TieredCache {
    TieredCacheBuilder::new()
        .with_local(Arc::new(MemoryTier::new()))
        .with_config(config)
        .build()
        .await
        .expect("engine setup failed")
}

/// Poll until `condition` holds or the deadline passes.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Async variant of [`wait_for`] for conditions that need to await.
pub async fn wait_for_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

/// Remote tier wrapper whose data operations can be made to fail on demand.
///
/// Pub/Sub keeps working while failing, matching a backing store whose data
/// plane is down but whose transport is not. Call counters let tests assert
/// that the circuit breaker actually short-circuits calls.
pub struct FlakyRemote {
    inner: Arc<MemoryTier>,
    failing: AtomicBool,
    data_calls: AtomicU64,
}

impl FlakyRemote {
    pub fn new(inner: Arc<MemoryTier>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            data_calls: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn data_calls(&self) -> u64 {
        self.data_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.data_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("injected remote failure");
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for FlakyRemote {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.put(key, value, ttl).await
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.evict(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.inner.clear().await
    }

    async fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key).await
    }

    async fn size(&self) -> u64 {
        self.inner.size().await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        self.check()?;
        self.inner.multi_get(keys).await
    }

    async fn multi_put(&self, entries: HashMap<String, Value>, ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.inner.multi_put(entries, ttl).await
    }

    async fn multi_evict(&self, keys: &[String]) -> Result<()> {
        self.check()?;
        self.inner.multi_evict(keys).await
    }

    fn stats(&self) -> TierStats {
        self.inner.stats()
    }

    fn name(&self) -> &'static str {
        "FlakyRemote"
    }
}

#[async_trait]
impl RemoteTier for FlakyRemote {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.inner.subscribe(channel, handler).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.unsubscribe(channel).await
    }

    async fn is_connected(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn get_expire(&self, key: &str) -> Option<Duration> {
        self.inner.get_expire(key).await
    }
}
