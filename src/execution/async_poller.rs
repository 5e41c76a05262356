//! # Async Task Poller
//!
//! Completion detection for task types that submit work elsewhere and return.
//!
//! ```text
//! AsyncTaskExecution ──add──→ DelayQueue ──take (due)──→ still held? ──no──→ drop
//!                                 ▲                          │yes
//!                                 │                          ▼
//!                                 └──── RUNNING ──── check on bounded pool
//!                                                            │
//!                                         SUCCESS/FAILED ────┴──→ callback.execute_end
//!                                         error ─────────────────→ callback.execute_throwing
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::holder::TaskExecutorHolder;
use crate::error::WorkerError;
use crate::metrics::WorkerMetrics;
use crate::models::TaskExecutionContext;
use crate::queue::{DelayQueue, QueueItem};
use crate::registry::TaskPlugin;
use crate::state_machine::AsyncTaskExecutionStatus;

/// Receiver of an async task's completion
#[async_trait]
pub trait AsyncTaskCallback: Send + Sync {
    fn task_instance_id(&self) -> i32;

    fn context(&self) -> TaskExecutionContext;

    async fn execute_end(&self, status: AsyncTaskExecutionStatus);

    async fn execute_throwing(&self, error: WorkerError);
}

/// One pending completion check
pub struct AsyncTaskExecutionContext {
    callback: Arc<dyn AsyncTaskCallback>,
    plugin: Arc<dyn TaskPlugin>,
    interval: Duration,
}

impl AsyncTaskExecutionContext {
    pub fn new(
        callback: Arc<dyn AsyncTaskCallback>,
        plugin: Arc<dyn TaskPlugin>,
        interval: Duration,
    ) -> Self {
        Self {
            callback,
            plugin,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl QueueItem for AsyncTaskExecutionContext {
    fn task_instance_id(&self) -> i32 {
        self.callback.task_instance_id()
    }
}

pub struct AsyncTaskPoller {
    queue: DelayQueue<AsyncTaskExecutionContext>,
    holder: Arc<TaskExecutorHolder>,
    check_permits: Arc<Semaphore>,
    metrics: Arc<WorkerMetrics>,
}

impl std::fmt::Debug for AsyncTaskPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTaskPoller")
            .field("pending", &self.queue.size())
            .field("available_checks", &self.check_permits.available_permits())
            .finish()
    }
}

impl AsyncTaskPoller {
    pub fn new(
        holder: Arc<TaskExecutorHolder>,
        check_threads: usize,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            queue: DelayQueue::new(),
            holder,
            check_permits: Arc::new(Semaphore::new(check_threads.max(1))),
            metrics,
        }
    }

    /// Schedule the first check one interval from now
    pub fn add(&self, entry: AsyncTaskExecutionContext) {
        debug!(
            task_instance_id = entry.task_instance_id(),
            interval_ms = entry.interval.as_millis() as u64,
            "Async task parked for polling"
        );
        let interval = entry.interval;
        self.queue.put_after(entry, interval);
    }

    pub fn remove(&self, task_instance_id: i32) -> bool {
        self.queue.remove(task_instance_id).is_some()
    }

    pub fn contains(&self, task_instance_id: i32) -> bool {
        self.queue.contains(task_instance_id)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.size()
    }

    /// Consume due checks until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Async task poller started");
        loop {
            let entry = tokio::select! {
                _ = shutdown.cancelled() => break,
                entry = self.queue.take() => entry,
            };

            let task_instance_id = entry.task_instance_id();
            if !self.holder.contains(task_instance_id) {
                debug!(
                    task_instance_id = task_instance_id,
                    "Task no longer held, dropping async check"
                );
                continue;
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.check_permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let poller = self.clone();
            tokio::spawn(async move {
                let _permit = permit;
                poller.check(entry).await;
            });
        }
        let abandoned = self.queue.drain().len();
        info!(abandoned = abandoned, "Async task poller stopped");
    }

    async fn check(&self, entry: AsyncTaskExecutionContext) {
        self.metrics.record_async_check();
        let context = entry.callback.context();
        match entry.plugin.check_async_status(&context).await {
            Ok(AsyncTaskExecutionStatus::Running) => {
                let interval = entry.interval;
                self.queue.put_after(entry, interval);
            }
            Ok(status) => {
                debug!(
                    task_instance_id = context.task_instance_id,
                    status = %status,
                    "Async task completed"
                );
                entry.callback.execute_end(status).await;
            }
            Err(error) => {
                warn!(
                    task_instance_id = context.task_instance_id,
                    error = %error,
                    "Async status check failed"
                );
                entry.callback.execute_throwing(error).await;
            }
        }
    }
}
