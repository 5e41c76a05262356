//! # Task Message Sender
//!
//! Sends status events to the master with retry-until-ack semantics.
//!
//! ## Retry Model
//!
//! ```text
//! send_message_with_retry ──→ pending cache ──→ MasterClient::send_event
//!                                  ▲                   │
//!                                  │        ack ───────┴──→ remove (same event only)
//!                                  │
//!                 periodic sweep ──┘  resend everything still cached
//! ```
//!
//! The cache is keyed by `(task_instance_id, category)` with three categories:
//! running notices, result notices and recall notices. A newer event replaces the
//! cached one of the same category, and cached events with a lower status rank
//! for the same task are dropped as stale, so a resend never regresses the
//! status the master has already seen from this worker. Delivery can still be
//! duplicated; the master treats status updates as idempotent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::MasterClient;
use crate::metrics::WorkerMetrics;
use crate::models::{MessageCategory, TaskEventType, TaskExecutionContext, TaskStatusEvent};

type PendingKey = (i32, MessageCategory);

pub struct TaskMessageSender {
    client: Arc<dyn MasterClient>,
    pending: DashMap<PendingKey, TaskStatusEvent>,
    host: String,
    send_timeout: Duration,
    metrics: Arc<WorkerMetrics>,
}

impl std::fmt::Debug for TaskMessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMessageSender")
            .field("client", &self.client.name())
            .field("pending_count", &self.pending.len())
            .field("host", &self.host)
            .finish()
    }
}

impl TaskMessageSender {
    pub fn new(
        client: Arc<dyn MasterClient>,
        host: impl Into<String>,
        send_timeout: Duration,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            client,
            pending: DashMap::new(),
            host: host.into(),
            send_timeout,
            metrics,
        }
    }

    /// Snapshot `context` into an event of `event_type` and deliver it with retry
    ///
    /// Returns whether the first attempt was acknowledged. Either way the caller
    /// can move on: unacknowledged events stay cached for the retry sweep.
    pub async fn send_message_with_retry(
        &self,
        context: &TaskExecutionContext,
        event_type: TaskEventType,
    ) -> bool {
        let event = TaskStatusEvent::from_context(context, event_type, self.host.as_str());
        self.send_event_with_retry(event).await
    }

    pub async fn send_event_with_retry(&self, event: TaskStatusEvent) -> bool {
        self.drop_stale_events(&event);
        self.pending
            .insert((event.task_instance_id, event.category()), event.clone());
        self.try_deliver(&event).await
    }

    /// Resend every cached event once; returns how many were acknowledged
    ///
    /// Events are replayed in status order so a task's notices arrive monotonically.
    pub async fn retry_pending(&self) -> usize {
        let mut snapshot: Vec<TaskStatusEvent> = self
            .pending
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        snapshot.sort_by(|a, b| {
            a.status
                .rank()
                .cmp(&b.status.rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let mut delivered = 0;
        for event in snapshot {
            self.metrics.record_message_resend();
            if self.try_deliver(&event).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Clear a cached event after an out-of-band acknowledgment from the master
    pub fn handle_ack(&self, task_instance_id: i32, event_type: TaskEventType) -> bool {
        let removed = self
            .pending
            .remove_if(&(task_instance_id, event_type.category()), |_, cached| {
                cached.event_type == event_type
            })
            .is_some();
        debug!(
            task_instance_id = task_instance_id,
            event_type = %event_type,
            removed = removed,
            "Acknowledgment received"
        );
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, task_instance_id: i32, event_type: TaskEventType) -> bool {
        self.pending
            .get(&(task_instance_id, event_type.category()))
            .is_some_and(|cached| cached.event_type == event_type)
    }

    pub fn pending_for(&self, task_instance_id: i32) -> Vec<TaskStatusEvent> {
        self.pending
            .iter()
            .filter(|entry| entry.key().0 == task_instance_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Periodic sweep replaying unacknowledged events until shutdown
    pub async fn run_retry_loop(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "Message retry sweep started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pending = self.pending_count();
                    if pending == 0 {
                        continue;
                    }
                    let delivered = self.retry_pending().await;
                    info!(
                        pending = pending,
                        delivered = delivered,
                        remaining = self.pending_count(),
                        "Message retry sweep finished"
                    );
                }
            }
        }
        info!("Message retry sweep stopped");
    }

    async fn try_deliver(&self, event: &TaskStatusEvent) -> bool {
        let key = (event.task_instance_id, event.category());
        match tokio::time::timeout(self.send_timeout, self.client.send_event(event)).await {
            Ok(Ok(())) => {
                // Only drop the cache entry if it still holds this exact event.
                self.pending
                    .remove_if(&key, |_, cached| cached.event_id == event.event_id);
                self.metrics.record_message_sent();
                debug!(
                    task_instance_id = event.task_instance_id,
                    event_type = %event.event_type,
                    status = %event.status,
                    "Status event delivered"
                );
                true
            }
            Ok(Err(error)) => {
                self.metrics.record_message_failure();
                warn!(
                    task_instance_id = event.task_instance_id,
                    event_type = %event.event_type,
                    error = %error,
                    "Status event delivery failed, cached for retry"
                );
                false
            }
            Err(_) => {
                self.metrics.record_message_failure();
                warn!(
                    task_instance_id = event.task_instance_id,
                    event_type = %event.event_type,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Status event delivery timed out, cached for retry"
                );
                false
            }
        }
    }

    fn drop_stale_events(&self, event: &TaskStatusEvent) {
        if event.category() == MessageCategory::Recall {
            return;
        }
        let rank = event.status.rank();
        self.pending.retain(|(task_instance_id, category), cached| {
            !(*task_instance_id == event.task_instance_id
                && *category != MessageCategory::Recall
                && cached.status.rank() < rank)
        });
    }
}
