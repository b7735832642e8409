//! Redis Tier - Shared Remote Backend
//!
//! Redis-backed remote tier with Pub/Sub for cross-instance sync. Uses
//! `ConnectionManager` for automatic reconnection on the data plane; each
//! Pub/Sub subscription runs its own listener task with reconnect backoff.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::traits::{CacheTier, MessageHandler, RemoteTier, TierStats};

/// Backoff between Pub/Sub reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct RedisTier {
    /// Used to open dedicated Pub/Sub connections.
    client: Client,
    /// Data-plane connection, reconnects automatically.
    conn_manager: ConnectionManager,
    /// Per-channel shutdown signals for listener tasks.
    subscriptions: DashMap<String, broadcast::Sender<()>>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl RedisTier {
    /// Connect using `REDIS_URL` or the default local instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// connection fails.
    pub async fn new() -> Result<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        Self::with_url(&redis_url).await
    }

    /// Connect to a specific Redis instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the initial
    /// connection fails.
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        info!(redis_url = %redis_url, "Initializing Redis tier");

        let client = Client::open(redis_url)
            .with_context(|| format!("Failed to create Redis client with URL: {redis_url}"))?;

        let conn_manager = ConnectionManager::new(client.clone())
            .await
            .context("Failed to establish Redis connection manager")?;

        let mut conn = conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING health check failed")?;

        info!(redis_url = %redis_url, "Redis tier connected");

        Ok(Self {
            client,
            conn_manager,
            subscriptions: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    async fn listener_loop(
        client: &Client,
        channel: &str,
        handler: &Arc<dyn MessageHandler>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .context("Failed to get pubsub connection")?;

        pubsub
            .subscribe(channel)
            .await
            .with_context(|| format!("Failed to subscribe to channel '{channel}'"))?;

        info!(channel = %channel, "[Redis] Subscribed");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(channel = %channel, error = %e, "[Redis] Failed to read message payload");
                                    continue;
                                }
                            };
                            handler.on_message(channel, &payload).await;
                        }
                        None => return Err(anyhow::anyhow!("Pub/Sub message stream ended")),
                    }
                }
                _ = shutdown_rx.recv() => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl CacheTier for RedisTier {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Redis GET failed for key '{key}'"))?;

        match raw {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .with_context(|| format!("Stored value for key '{key}' is not valid JSON"))?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to encode value for key '{key}'"))?;

        let mut conn = self.conn_manager.clone();
        match ttl {
            Some(ttl) => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(&json)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("Redis SET failed for key '{key}'"))?;
            }
            None => {
                let _: () = conn
                    .set(key, &json)
                    .await
                    .with_context(|| format!("Redis SET failed for key '{key}'"))?;
            }
        }
        self.puts.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, ttl = ?ttl, "[Redis] Cached key");
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn
            .del(key)
            .await
            .with_context(|| format!("Redis DEL failed for key '{key}'"))?;
        if removed > 0 {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        // Flushes the whole logical database, not only engine-written keys.
        warn!("[Redis] FLUSHDB issued by clear()");
        let mut conn = self.conn_manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .context("Redis FLUSHDB failed")?;
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> bool {
        let mut conn = self.conn_manager.clone();
        conn.exists(key).await.unwrap_or(false)
    }

    async fn size(&self) -> u64 {
        let mut conn = self.conn_manager.clone();
        redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .unwrap_or(0)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn_manager.clone();
        // MGET with a single key returns a scalar, so force the array form.
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .context("Redis MGET failed")?;

        let mut found = HashMap::new();
        for (key, slot) in keys.iter().zip(raw) {
            match slot {
                Some(json) => {
                    let value = serde_json::from_str(&json).with_context(|| {
                        format!("Stored value for key '{key}' is not valid JSON")
                    })?;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(key.clone(), value);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(found)
    }

    async fn multi_evict(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn_manager.clone();
        let removed: u64 = conn.del(keys).await.context("Redis DEL failed")?;
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(())
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
        "Redis"
    }
}

#[async_trait]
impl RemoteTier for RedisTier {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .publish(channel, payload)
            .await
            .with_context(|| format!("Redis PUBLISH failed on channel '{channel}'"))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        // Replacing an existing subscription drops the old sender, which
        // closes the old listener's shutdown channel and stops it.
        self.subscriptions.insert(channel.to_string(), shutdown_tx);

        let client = self.client.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match Self::listener_loop(&client, &channel, &handler, &mut shutdown_rx).await {
                    Ok(()) => {
                        info!(channel = %channel, "[Redis] Subscriber stopped");
                        break;
                    }
                    Err(e) => {
                        error!(channel = %channel, error = %e, "[Redis] Subscriber error, reconnecting in 5s");
                        tokio::select! {
                            () = tokio::time::sleep(RECONNECT_DELAY) => {}
                            _ = shutdown_rx.recv() => break,
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if let Some((_, shutdown_tx)) = self.subscriptions.remove(channel) {
            let _ = shutdown_tx.send(());
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis PEXPIRE failed for key '{key}'"))?;
        Ok(applied)
    }

    async fn get_expire(&self, key: &str) -> Option<Duration> {
        let mut conn = self.conn_manager.clone();
        // PTTL: -1 = no expiry, -2 = key absent.
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .unwrap_or(-1);
        if millis > 0 {
            Some(Duration::from_millis(millis.unsigned_abs()))
        } else {
            None
        }
    }
}
