//! # Worker Runtime
//!
//! Wires every component from a [`WorkerConfig`] and exposes the inbound surface
//! the network layer calls: dispatch, kill and ack.
//!
//! ```text
//! dispatch ──→ TaskDispatchQueue ──┐
//!                                  ├──→ TaskDispatcher ──→ TaskExecutorThreadPool ──→ TaskExecutor
//!              DelayQueue ─────────┘
//!
//! background: dispatcher loop, async poller loop, message retry sweep
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::dispatcher::TaskDispatcher;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::execution::{ExecutorServices, TaskExecutorFactory, TaskExecutorThreadPool};
use crate::messaging::MasterClient;
use crate::metrics::WorkerMetricsSnapshot;
use crate::models::{TaskEventType, TaskExecutionContext};
use crate::queue::{DelayQueue, InFlightTasks, Interception, TaskDispatchQueue};
use crate::registry::TaskChannelRegistry;
use crate::services::{AlertSender, LocalStorageOperator, LoggingAlertSender, StorageOperator};
use crate::state_machine::TaskExecutionStatus;

/// Answer to a dispatch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchResponse {
    Accepted,
    /// Local queue full; the master should retry later or elsewhere
    QueueFull,
    /// The task instance is already queued or running here
    Duplicate,
    ShuttingDown,
}

impl DispatchResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Answer to a kill request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillResponse {
    /// Still queued; removed before admission
    RemovedFromQueue,
    /// Admitted but not started; no process was ever spawned
    KilledBeforeExecute,
    /// Running; cancellation was requested
    Cancelled,
    /// Caught between two queues while a status notice was in transit; reported
    /// KILLED instead of moving on
    Intercepted,
    NotFound,
}

pub struct WorkerRuntimeBuilder {
    config: WorkerConfig,
    master_client: Option<Arc<dyn MasterClient>>,
    channels: Option<Arc<TaskChannelRegistry>>,
    storage: Option<Arc<dyn StorageOperator>>,
    alert_sender: Option<Arc<dyn AlertSender>>,
}

impl WorkerRuntimeBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            master_client: None,
            channels: None,
            storage: None,
            alert_sender: None,
        }
    }

    pub fn master_client(mut self, master_client: Arc<dyn MasterClient>) -> Self {
        self.master_client = Some(master_client);
        self
    }

    pub fn channels(mut self, channels: Arc<TaskChannelRegistry>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageOperator>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn alert_sender(mut self, alert_sender: Arc<dyn AlertSender>) -> Self {
        self.alert_sender = Some(alert_sender);
        self
    }

    pub fn build(self) -> WorkerResult<WorkerRuntime> {
        self.config.validate()?;
        let master_client = self.master_client.ok_or_else(|| {
            WorkerError::ConfigurationError("a master client is required".to_string())
        })?;
        let config = Arc::new(self.config);
        let channels = self
            .channels
            .unwrap_or_else(|| Arc::new(TaskChannelRegistry::with_builtin_channels()));
        let storage = self.storage.unwrap_or_else(|| {
            Arc::new(LocalStorageOperator::new(
                config.resource_dir.clone(),
                config.log_archive_dir.clone(),
            ))
        });
        let alert_sender = self
            .alert_sender
            .unwrap_or_else(|| Arc::new(LoggingAlertSender));

        let services = Arc::new(ExecutorServices::new(
            config.clone(),
            channels,
            master_client,
            storage,
            alert_sender,
        ));
        let dispatch_queue = Arc::new(match config.dispatch_queue_bound() {
            Some(bound) => TaskDispatchQueue::bounded(bound),
            None => TaskDispatchQueue::unbounded(),
        });
        let delay_queue = Arc::new(DelayQueue::new());
        let in_flight = Arc::new(InFlightTasks::new());
        let pool = Arc::new(TaskExecutorThreadPool::new(
            &config,
            services.holder.clone(),
            services.metrics.clone(),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            dispatch_queue.clone(),
            delay_queue.clone(),
            in_flight.clone(),
            TaskExecutorFactory::new(services.clone()),
            pool.clone(),
            services.holder.clone(),
            services.message_sender.clone(),
            services.metrics.clone(),
            config.full_policy,
            config.admission_retry_interval(),
        ));

        Ok(WorkerRuntime {
            config,
            services,
            dispatch_queue,
            delay_queue,
            in_flight,
            pool,
            dispatcher,
            shutdown: CancellationToken::new(),
            loops: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }
}

pub struct WorkerRuntime {
    config: Arc<WorkerConfig>,
    services: Arc<ExecutorServices>,
    dispatch_queue: Arc<TaskDispatchQueue<TaskExecutionContext>>,
    delay_queue: Arc<DelayQueue<TaskExecutionContext>>,
    in_flight: Arc<InFlightTasks>,
    pool: Arc<TaskExecutorThreadPool>,
    dispatcher: Arc<TaskDispatcher>,
    shutdown: CancellationToken,
    loops: TaskTracker,
    started: AtomicBool,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("host", &self.config.host)
            .field("dispatch_queue", &self.dispatch_queue.size())
            .field("delay_queue", &self.delay_queue.size())
            .field("holder", &self.services.holder.size())
            .finish()
    }
}

impl WorkerRuntime {
    pub fn builder(config: WorkerConfig) -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new(config)
    }

    /// Start the dispatcher, async poller and message retry loops; idempotent
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.loops
            .spawn(self.dispatcher.clone().run(self.shutdown.child_token()));
        self.loops.spawn(
            self.services
                .async_poller
                .clone()
                .run(self.shutdown.child_token()),
        );
        self.loops.spawn(
            self.services
                .message_sender
                .clone()
                .run_retry_loop(self.config.message_retry_interval(), self.shutdown.child_token()),
        );
        info!(
            host = %self.config.host,
            exec_threads = self.config.exec_threads,
            full_policy = %self.config.full_policy,
            "Worker runtime started"
        );
    }

    /// Accept a dispatched task into the local queue
    ///
    /// The task instance is claimed in flight before the dispatch notice goes out, so
    /// a duplicate dispatch or a kill arriving during the send still finds it.
    pub async fn dispatch(&self, mut context: TaskExecutionContext) -> DispatchResponse {
        let task_instance_id = context.task_instance_id;
        if self.shutdown.is_cancelled() {
            return DispatchResponse::ShuttingDown;
        }
        if !self
            .in_flight
            .claim_unless(task_instance_id, || self.is_known(task_instance_id))
        {
            self.services.metrics.record_duplicate();
            warn!(task_instance_id = task_instance_id, "Task instance already present, ignoring dispatch");
            return DispatchResponse::Duplicate;
        }

        context.current_execution_status = TaskExecutionStatus::Submitted;
        if context.host.is_none() {
            context.host = Some(self.config.host.clone());
        }
        if self.dispatch_queue.is_full() {
            self.in_flight.release(task_instance_id);
            return self.nack(context).await;
        }

        self.services
            .message_sender
            .send_message_with_retry(&context, TaskEventType::Dispatch)
            .await;
        let queued = self
            .in_flight
            .settle(context, |context| self.dispatch_queue.try_offer(context));
        match queued {
            Ok(Ok(())) => {
                self.services.metrics.record_dispatched();
                DispatchResponse::Accepted
            }
            Ok(Err(context)) => self.nack(context).await,
            Err(context) => {
                self.services.metrics.record_dispatched();
                self.dispatcher.report_killed(context).await;
                DispatchResponse::Accepted
            }
        }
    }

    async fn nack(&self, context: TaskExecutionContext) -> DispatchResponse {
        self.services.metrics.record_queue_full();
        warn!(
            task_instance_id = context.task_instance_id,
            queue_size = self.dispatch_queue.size(),
            "Dispatch queue full, recalling task"
        );
        self.services
            .message_sender
            .send_message_with_retry(&context, TaskEventType::Recall)
            .await;
        DispatchResponse::QueueFull
    }

    /// Kill a task wherever it currently is
    pub async fn kill(&self, task_instance_id: i32) -> KillResponse {
        let intercepted = self.in_flight.intercept(task_instance_id, || {
            self.dispatch_queue
                .remove(task_instance_id)
                .or_else(|| self.delay_queue.remove(task_instance_id))
        });
        match intercepted {
            Interception::Flagged => {
                info!(task_instance_id = task_instance_id, "Kill requested during handoff");
                return KillResponse::Intercepted;
            }
            Interception::Removed(context) => {
                self.dispatcher.report_killed(context).await;
                return KillResponse::RemovedFromQueue;
            }
            Interception::Missing => {}
        }

        if self
            .pool
            .kill_task_before_execute_by_instance_id(task_instance_id)
            .await
        {
            return KillResponse::KilledBeforeExecute;
        }

        match self.services.holder.get(task_instance_id) {
            Some(executor) => {
                executor.kill().await;
                KillResponse::Cancelled
            }
            None => KillResponse::NotFound,
        }
    }

    /// Acknowledgment from the master for a previously sent event
    pub fn ack(&self, task_instance_id: i32, event_type: TaskEventType) -> bool {
        self.services
            .message_sender
            .handle_ack(task_instance_id, event_type)
    }

    /// Resend unacknowledged events now instead of waiting for the next sweep
    pub async fn retry_pending_messages(&self) -> usize {
        self.services.message_sender.retry_pending().await
    }

    pub fn pending_message_count(&self) -> usize {
        self.services.message_sender.pending_count()
    }

    pub fn metrics(&self) -> WorkerMetricsSnapshot {
        self.services.metrics.snapshot()
    }

    pub fn holder_size(&self) -> usize {
        self.services.holder.size()
    }

    pub fn is_held(&self, task_instance_id: i32) -> bool {
        self.services.holder.contains(task_instance_id)
    }

    pub fn dispatch_queue_size(&self) -> usize {
        self.dispatch_queue.size()
    }

    pub fn delay_queue_size(&self) -> usize {
        self.delay_queue.size()
    }

    pub fn is_delayed(&self, task_instance_id: i32) -> bool {
        self.delay_queue.contains(task_instance_id)
    }

    /// Between two queues while a status notice is being delivered
    pub fn is_in_flight(&self, task_instance_id: i32) -> bool {
        self.in_flight.contains(task_instance_id)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn channels(&self) -> &Arc<TaskChannelRegistry> {
        &self.services.channels
    }

    fn is_known(&self, task_instance_id: i32) -> bool {
        self.dispatch_queue.contains(task_instance_id)
            || self.delay_queue.contains(task_instance_id)
            || self.services.holder.contains(task_instance_id)
    }

    /// Stop the loops, kill live executors and wait up to `grace` for them to report
    pub async fn shutdown(&self, grace: Duration) {
        info!("Worker runtime shutting down");
        self.shutdown.cancel();
        self.loops.close();
        self.loops.wait().await;

        for task_instance_id in self.services.holder.ids() {
            if !self
                .pool
                .kill_task_before_execute_by_instance_id(task_instance_id)
                .await
            {
                if let Some(executor) = self.services.holder.get(task_instance_id) {
                    executor.kill().await;
                }
            }
        }
        self.pool.shutdown(grace).await;

        let abandoned = self.services.holder.clear().len();
        let queued = self.dispatch_queue.drain().len() + self.delay_queue.drain().len();
        info!(
            abandoned_executors = abandoned,
            queued_tasks = queued,
            unacknowledged_messages = self.services.message_sender.pending_count(),
            "Worker runtime stopped"
        );
    }
}
