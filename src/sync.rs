//! Cross-instance synchronization over the remote tier's Pub/Sub.
//!
//! After each locally-applied mutation the broadcaster publishes a tagged
//! [`SyncEvent`] on a shared channel. Every cooperating instance subscribes to
//! the same channel and applies incoming events directly to its local tier,
//! discarding echoes of its own events so invalidations never loop. Applying
//! an event is idempotent, so at-least-once delivery converges.
//!
//! Delivery and ordering are whatever the transport provides; this layer adds
//! nothing. Publish failures are logged and abandoned, never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

use crate::error::{CacheError, CacheResult};
use crate::traits::{CacheTier, MessageHandler, RemoteTier};

/// Mutation kind carried by a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncEventType {
    Put,
    Evict,
    Clear,
}

/// A mutation broadcast so peer instances can converge their local tiers.
///
/// Wire shape (JSON over the sync channel):
/// `{"type":"PUT","key":...,"value":...,"timestamp":...,"originNodeId":...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub event_type: SyncEventType,
    pub key: Option<String>,
    pub value: Option<Value>,
    /// Milliseconds since the Unix epoch at publish time.
    pub timestamp: i64,
    #[serde(rename = "originNodeId")]
    pub origin_node_id: String,
}

impl SyncEvent {
    pub fn put(key: impl Into<String>, value: Value, origin_node_id: impl Into<String>) -> Self {
        Self {
            event_type: SyncEventType::Put,
            key: Some(key.into()),
            value: Some(value),
            timestamp: now_millis(),
            origin_node_id: origin_node_id.into(),
        }
    }

    pub fn evict(key: impl Into<String>, origin_node_id: impl Into<String>) -> Self {
        Self {
            event_type: SyncEventType::Evict,
            key: Some(key.into()),
            value: None,
            timestamp: now_millis(),
            origin_node_id: origin_node_id.into(),
        }
    }

    pub fn clear(origin_node_id: impl Into<String>) -> Self {
        Self {
            event_type: SyncEventType::Clear,
            key: None,
            value: None,
            timestamp: now_millis(),
            origin_node_id: origin_node_id.into(),
        }
    }

    pub fn to_json(&self) -> CacheResult<String> {
        serde_json::to_string(self).map_err(CacheError::from)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Publishes sync events for locally-applied mutations.
pub struct SyncBroadcaster {
    remote: Arc<dyn RemoteTier>,
    channel: String,
    node_id: String,
    published: AtomicU64,
    publish_errors: AtomicU64,
}

impl SyncBroadcaster {
    pub(crate) fn new(remote: Arc<dyn RemoteTier>, channel: String, node_id: String) -> Self {
        Self {
            remote,
            channel,
            node_id,
            published: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
        }
    }

    pub async fn broadcast_put(&self, key: &str, value: Value) {
        self.publish(SyncEvent::put(key, value, &self.node_id)).await;
    }

    pub async fn broadcast_evict(&self, key: &str) {
        self.publish(SyncEvent::evict(key, &self.node_id)).await;
    }

    pub async fn broadcast_clear(&self) {
        self.publish(SyncEvent::clear(&self.node_id)).await;
    }

    /// Best-effort publish. Encoding failures abandon the event; transport
    /// failures are logged and never bubble up to the mutating caller.
    async fn publish(&self, event: SyncEvent) {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.publish_errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "sync event encoding failed, publish abandoned");
                return;
            }
        };
        match self.remote.publish(&self.channel, &payload).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(channel = %self.channel, event = ?event.event_type, "published sync event");
            }
            Err(e) => {
                self.publish_errors.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %self.channel, error = %e, "failed to publish sync event");
            }
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn publish_errors(&self) -> u64 {
        self.publish_errors.load(Ordering::Relaxed)
    }
}

/// Counters kept by the subscriber side.
#[derive(Debug, Default)]
pub struct SyncSubscriberStats {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub skipped_own: AtomicU64,
    pub errors: AtomicU64,
}

/// Snapshot of [`SyncSubscriberStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStats {
    pub received: u64,
    pub applied: u64,
    pub skipped_own: u64,
    pub errors: u64,
}

impl SyncSubscriberStats {
    fn snapshot(&self) -> SyncStats {
        SyncStats {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            skipped_own: self.skipped_own.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Applies inbound sync events to the local tier.
///
/// Events flow straight into the local tier, bypassing the strategy router:
/// they were already routed on the originating instance and are authoritative
/// here. Applying the same event twice is safe.
pub struct SyncSubscriber {
    channel: String,
    node_id: String,
    applier: Arc<SyncApplier>,
}

impl SyncSubscriber {
    pub(crate) fn new(local: Arc<dyn CacheTier>, channel: String, node_id: String) -> Self {
        let applier = Arc::new(SyncApplier {
            local,
            node_id: node_id.clone(),
            stats: SyncSubscriberStats::default(),
        });
        Self {
            channel,
            node_id,
            applier,
        }
    }

    /// Register with the remote tier's Pub/Sub. Called once at engine
    /// construction when sync is enabled.
    pub(crate) async fn start(&self, remote: &Arc<dyn RemoteTier>) -> CacheResult<()> {
        remote
            .subscribe(&self.channel, Arc::clone(&self.applier) as Arc<dyn MessageHandler>)
            .await
            .map_err(|source| CacheError::Subscribe {
                channel: self.channel.clone(),
                source,
            })?;
        debug!(channel = %self.channel, node_id = %self.node_id, "subscribed to sync channel");
        Ok(())
    }

    /// Periodic reconciliation tick. An extension point for future
    /// consistency checks; performs no corrective action today.
    pub(crate) fn reconcile(&self) {
        debug!(node_id = %self.node_id, "sync reconciliation tick");
    }

    pub fn stats(&self) -> SyncStats {
        self.applier.stats.snapshot()
    }
}

struct SyncApplier {
    local: Arc<dyn CacheTier>,
    node_id: String,
    stats: SyncSubscriberStats,
}

impl SyncApplier {
    async fn apply(&self, event: SyncEvent) {
        match (event.event_type, event.key, event.value) {
            (SyncEventType::Put, Some(key), Some(value)) => {
                if let Err(e) = self.local.put(&key, value, None).await {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "failed to apply sync PUT");
                    return;
                }
                debug!(key = %key, "applied sync PUT");
            }
            (SyncEventType::Evict, Some(key), _) => {
                if let Err(e) = self.local.evict(&key).await {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "failed to apply sync EVICT");
                    return;
                }
                debug!(key = %key, "applied sync EVICT");
            }
            (SyncEventType::Clear, _, _) => {
                if let Err(e) = self.local.clear().await {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "failed to apply sync CLEAR");
                    return;
                }
                debug!("applied sync CLEAR");
            }
            (event_type, _, _) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(event_type = ?event_type, "malformed sync event dropped");
                return;
            }
        }
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl MessageHandler for SyncApplier {
    async fn on_message(&self, channel: &str, payload: &str) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let event = match SyncEvent::from_json(payload) {
            Ok(event) => event,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %channel, error = %e, "undecodable sync event dropped");
                return;
            }
        };
        // Echo of our own mutation; applying it would loop the invalidation.
        if event.origin_node_id == self.node_id {
            self.stats.skipped_own.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.apply(event).await;
    }
}
