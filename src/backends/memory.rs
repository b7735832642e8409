//! Memory Tier - In-Process Backend
//!
//! `DashMap`-based tier with per-key TTL. Implements the full remote surface
//! (Pub/Sub over in-process broadcast channels, TTL introspection) so a single
//! instance can stand in for a shared store when none is configured, and so
//! tests can exercise multi-instance behavior without a network.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

use crate::traits::{CacheTier, MessageHandler, RemoteTier, TierStats};

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredEntry {
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

/// Broadcast capacity per channel. Subscribers lagging past this lose
/// messages, same as Redis Pub/Sub under backpressure.
const CHANNEL_CAPACITY: usize = 256;

pub struct MemoryTier {
    entries: DashMap<String, StoredEntry>,
    channels: DashMap<String, broadcast::Sender<String>>,
    listeners: DashMap<String, Vec<tokio::task::JoinHandle<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            channels: DashMap::new(),
            listeners: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are collected lazily on read.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired());
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value, ttl));
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn evict(&self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    async fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    async fn size(&self) -> u64 {
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired())
            .count() as u64
    }

    async fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
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
        "Memory"
    }
}

#[async_trait]
impl RemoteTier for MemoryTier {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let sender = self.sender_for(channel);
        // A send error only means nobody is listening.
        let delivered = sender.send(payload.to_string()).unwrap_or(0);
        debug!(channel = %channel, delivered = delivered, "[Memory] Published message");
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut receiver = self.sender_for(channel).subscribe();
        let channel_name = channel.to_string();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => handler.on_message(&channel_name, &payload).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(channel = %channel_name, skipped = skipped, "[Memory] Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listeners
            .entry(channel.to_string())
            .or_default()
            .push(task);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        if let Some((_, tasks)) = self.listeners.remove(channel) {
            for task in tasks {
                task.abort();
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_expire(&self, key: &str) -> Option<Duration> {
        let entry = self.entries.get(key)?;
        let expires_at = entry.expires_at?;
        expires_at.checked_duration_since(Instant::now())
    }
}
