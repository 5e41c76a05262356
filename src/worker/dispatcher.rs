//! # Task Dispatcher
//!
//! The drain loop between the queues and the executor pool.
//!
//! ```text
//! dispatch queue ──┐                      ┌── delay > 0 ──→ DELAY_EXECUTION, delay queue
//!                  ├──→ admit(context) ───┤
//! delay queue ─────┘                      ├── pool accepts ──→ running
//!                                         └── pool overloaded ──→ delay queue (retry later)
//! ```
//!
//! Under the `REJECT` policy the loop stops taking from the dispatch queue while
//! the pool is overloaded, so the queue fills and new dispatches are nacked.
//!
//! A context taken from either queue is claimed in the [`InFlightTasks`] set until it
//! has been parked in the delay queue or admitted by the pool, so a kill arriving
//! while the delay notice is in transit is not lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TaskExecutorFullPolicy;
use crate::constants::EXIT_CODE_KILL;
use crate::error::WorkerError;
use crate::execution::{TaskExecutorFactory, TaskExecutorHolder, TaskExecutorThreadPool};
use crate::messaging::TaskMessageSender;
use crate::metrics::WorkerMetrics;
use crate::models::{TaskEventType, TaskExecutionContext};
use crate::queue::{DelayQueue, InFlightTasks, TaskDispatchQueue};
use crate::state_machine::TaskExecutionStatus;

#[derive(Debug, Clone, Copy)]
enum Source {
    Dispatch,
    Delay,
}

pub struct TaskDispatcher {
    dispatch_queue: Arc<TaskDispatchQueue<TaskExecutionContext>>,
    delay_queue: Arc<DelayQueue<TaskExecutionContext>>,
    in_flight: Arc<InFlightTasks>,
    factory: TaskExecutorFactory,
    pool: Arc<TaskExecutorThreadPool>,
    holder: Arc<TaskExecutorHolder>,
    message_sender: Arc<TaskMessageSender>,
    metrics: Arc<WorkerMetrics>,
    full_policy: TaskExecutorFullPolicy,
    admission_retry_interval: Duration,
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("dispatch_queue", &self.dispatch_queue.size())
            .field("delay_queue", &self.delay_queue.size())
            .field("in_flight", &self.in_flight.len())
            .field("full_policy", &self.full_policy)
            .finish()
    }
}

impl TaskDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dispatch_queue: Arc<TaskDispatchQueue<TaskExecutionContext>>,
        delay_queue: Arc<DelayQueue<TaskExecutionContext>>,
        in_flight: Arc<InFlightTasks>,
        factory: TaskExecutorFactory,
        pool: Arc<TaskExecutorThreadPool>,
        holder: Arc<TaskExecutorHolder>,
        message_sender: Arc<TaskMessageSender>,
        metrics: Arc<WorkerMetrics>,
        full_policy: TaskExecutorFullPolicy,
        admission_retry_interval: Duration,
    ) -> Self {
        Self {
            dispatch_queue,
            delay_queue,
            in_flight,
            factory,
            pool,
            holder,
            message_sender,
            metrics,
            full_policy,
            admission_retry_interval,
        }
    }

    /// Drain both queues into the pool until shutdown
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(full_policy = %self.full_policy, "Task dispatcher started");
        loop {
            let accepting =
                self.full_policy == TaskExecutorFullPolicy::Continue || !self.pool.is_overloaded();

            let source = if accepting {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = self.dispatch_queue.ready() => Source::Dispatch,
                    _ = self.delay_queue.ready() => Source::Delay,
                }
            } else {
                debug!("Executor pool overloaded, pausing dispatch queue");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.admission_retry_interval) => continue,
                    _ = self.delay_queue.ready() => Source::Delay,
                }
            };

            let claimed = self.in_flight.claim_from(|| match source {
                Source::Dispatch => self.dispatch_queue.try_take(),
                Source::Delay => self.delay_queue.try_take(),
            });
            // A concurrent kill may have emptied the queue since it became ready.
            if let Some(context) = claimed {
                self.admit(context).await;
            }
        }
        info!("Task dispatcher stopped");
    }

    /// Route one claimed context: hold it for its delay, or hand it to the pool
    async fn admit(&self, mut context: TaskExecutionContext) {
        let task_instance_id = context.task_instance_id;

        if context.current_execution_status == TaskExecutionStatus::Submitted {
            let remaining = context.remaining_delay(Utc::now());
            if !remaining.is_zero() {
                if let Err(error) = context.transition_to(TaskExecutionStatus::DelayExecution) {
                    warn!(task_instance_id = task_instance_id, error = %error, "Delay transition rejected");
                }
                info!(
                    task_instance_id = task_instance_id,
                    remaining_ms = remaining.as_millis() as u64,
                    "Task delayed"
                );
                self.message_sender
                    .send_message_with_retry(&context, TaskEventType::Delay)
                    .await;
                let parked = self
                    .in_flight
                    .settle(context, |context| self.delay_queue.put_after(context, remaining));
                if let Err(context) = parked {
                    self.report_killed(context).await;
                }
                return;
            }
        }

        let executor = self.factory.create(context);
        match self.pool.submit(executor.clone()).await {
            Ok(true) => {
                // Holder registration happened before the claim is dropped.
                if self.in_flight.release(task_instance_id)
                    && !self
                        .pool
                        .kill_task_before_execute_by_instance_id(task_instance_id)
                        .await
                {
                    executor.kill().await;
                }
            }
            Ok(false) => {
                // Keep the task; retry once the pool has room.
                let retry_interval = self.admission_retry_interval;
                let requeued = self.in_flight.settle(executor.context(), |context| {
                    self.delay_queue.put_after(context, retry_interval)
                });
                if let Err(context) = requeued {
                    self.report_killed(context).await;
                }
            }
            Err(error) => {
                let kill_requested = self.in_flight.release(task_instance_id);
                if let WorkerError::DuplicateTaskExecutor { .. } = error {
                    self.metrics.record_duplicate();
                    error!(
                        task_instance_id = task_instance_id,
                        "Duplicate admission aborted, an executor for this task instance is live"
                    );
                } else {
                    error!(task_instance_id = task_instance_id, error = %error, "Task admission failed");
                }
                if kill_requested {
                    if let Some(live) = self.holder.get(task_instance_id) {
                        live.kill().await;
                    }
                }
            }
        }
    }

    /// Finish a task that never reached the pool as KILLED and report it
    pub async fn report_killed(&self, mut context: TaskExecutionContext) {
        let task_instance_id = context.task_instance_id;
        context.exit_code = Some(EXIT_CODE_KILL);
        if let Err(error) = context.transition_to(TaskExecutionStatus::Killed) {
            warn!(task_instance_id = task_instance_id, error = %error, "Kill transition rejected");
        }
        self.message_sender
            .send_message_with_retry(&context, TaskEventType::Finish)
            .await;
        self.metrics.record_finished(TaskExecutionStatus::Killed);
        info!(task_instance_id = task_instance_id, "Killed task before admission");
    }
}
