//! Background replication pool.
//!
//! A fixed set of worker tasks performs fire-and-forget work off the caller's
//! critical path: backfilling the local tier after a remote hit, and
//! write-behind to the remote tier after a local write. Submission never
//! blocks; when the queue is full the task is dropped and counted. Task
//! failures are logged and counted, never retried and never surfaced.
//!
//! No ordering is guaranteed between tasks for the same key scheduled by
//! concurrent callers; the tier's own last-write-wins semantics decide.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::ReplicatorConfig;
use crate::traits::{CacheTier, RemoteTier};

/// A unit of fire-and-forget replication work.
#[derive(Debug)]
pub(crate) enum ReplicationTask {
    /// Copy a value seen in the remote tier into the local tier.
    BackfillLocal {
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
    /// Write a locally-applied value to the remote tier.
    WriteRemote {
        key: String,
        value: Value,
        ttl: Option<Duration>,
    },
}

#[derive(Debug, Default)]
struct ReplicatorCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded worker pool for asynchronous cross-tier replication.
pub struct AsyncReplicator {
    sender: parking_lot::Mutex<Option<mpsc::Sender<ReplicationTask>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<ReplicatorCounters>,
    shutdown_grace: Duration,
}

impl AsyncReplicator {
    pub(crate) fn new(
        local: Arc<dyn CacheTier>,
        remote: Option<Arc<dyn RemoteTier>>,
        breaker: Arc<CircuitBreaker>,
        config: &ReplicatorConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(ReplicatorCounters::default());

        let worker_count = config.workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            workers.push(tokio::spawn(Self::worker_loop(
                id,
                Arc::clone(&receiver),
                Arc::clone(&local),
                remote.clone(),
                Arc::clone(&breaker),
                Arc::clone(&counters),
            )));
        }
        info!(workers = worker_count, "replication pool started");

        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            workers: parking_lot::Mutex::new(workers),
            counters,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Submit a task without blocking. Drops the task when the queue is full
    /// or the pool has shut down.
    pub(crate) fn schedule(&self, task: ReplicationTask) {
        let guard = self.sender.lock();
        match guard.as_ref() {
            Some(sender) => {
                if let Err(rejected) = sender.try_send(task) {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(task = ?rejected, "replication queue full, task dropped");
                }
            }
            None => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("replication pool shut down, task dropped");
            }
        }
    }

    async fn worker_loop(
        id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ReplicationTask>>>,
        local: Arc<dyn CacheTier>,
        remote: Option<Arc<dyn RemoteTier>>,
        breaker: Arc<CircuitBreaker>,
        counters: Arc<ReplicatorCounters>,
    ) {
        loop {
            let task = { receiver.lock().await.recv().await };
            let Some(task) = task else {
                debug!(worker = id, "replication worker stopping");
                break;
            };
            match task {
                ReplicationTask::BackfillLocal { key, value, ttl } => {
                    match local.put(&key, value, ttl).await {
                        Ok(()) => {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, "backfilled local tier");
                        }
                        Err(e) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(key = %key, error = %e, "async backfill to local tier failed");
                        }
                    }
                }
                ReplicationTask::WriteRemote { key, value, ttl } => {
                    let Some(remote) = remote.as_ref() else {
                        // Remote tier disappeared from the plan; nothing to do.
                        continue;
                    };
                    if breaker.is_open() {
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, "circuit open, async remote write skipped");
                        continue;
                    }
                    match remote.put(&key, value, ttl).await {
                        Ok(()) => {
                            breaker.record_success();
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, "async write to remote tier completed");
                        }
                        Err(e) => {
                            breaker.record_failure();
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(key = %key, error = %e, "async write to remote tier failed");
                        }
                    }
                }
            }
        }
    }

    /// Stop accepting work and wait up to the configured grace period for the
    /// queue to drain. Tasks still pending afterwards are abandoned.
    pub(crate) async fn shutdown(&self) {
        // Dropping the sender lets workers drain the queue and exit.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "replication pool did not drain within grace period, abandoning pending tasks"
            );
        } else {
            info!("replication pool drained and stopped");
        }
    }

    pub(crate) fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }
}
