//! # Task Executor Thread Pool
//!
//! Admission controller and bounded executor pool. Each admitted executor runs on
//! its own tokio task once it holds one of `exec_threads` semaphore permits.
//!
//! Overload is `holder.size() >= exec_threads`. Under the `REJECT` policy an
//! overloaded pool refuses the submission (the caller keeps the task and retries
//! later); under `CONTINUE` it always admits and lets executors wait for a permit.
//!
//! Admission (overload check plus holder registration) happens under one lock so
//! two submissions for the same task instance can never both succeed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::executor::TaskExecutor;
use super::holder::TaskExecutorHolder;
use crate::config::{TaskExecutorFullPolicy, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::WorkerMetrics;

type PendingExecutors = Arc<Mutex<HashMap<i32, Arc<TaskExecutor>>>>;

pub struct TaskExecutorThreadPool {
    exec_threads: usize,
    full_policy: TaskExecutorFullPolicy,
    holder: Arc<TaskExecutorHolder>,
    metrics: Arc<WorkerMetrics>,
    permits: Arc<Semaphore>,
    admission: Mutex<()>,
    /// Admitted executors that have not started running yet
    pending: PendingExecutors,
    tracker: TaskTracker,
}

impl std::fmt::Debug for TaskExecutorThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutorThreadPool")
            .field("exec_threads", &self.exec_threads)
            .field("full_policy", &self.full_policy)
            .field("active", &self.active_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl TaskExecutorThreadPool {
    pub fn new(
        config: &WorkerConfig,
        holder: Arc<TaskExecutorHolder>,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            exec_threads: config.exec_threads,
            full_policy: config.full_policy,
            holder,
            metrics,
            permits: Arc::new(Semaphore::new(config.exec_threads)),
            admission: Mutex::new(()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_overloaded(&self) -> bool {
        self.holder.size() >= self.exec_threads
    }

    /// Admit and start `executor`
    ///
    /// `Ok(false)`: the pool is overloaded under `REJECT`; nothing was registered.
    /// `Err(DuplicateTaskExecutor)`: an executor for this task instance already exists.
    pub async fn submit(&self, executor: Arc<TaskExecutor>) -> WorkerResult<bool> {
        let task_instance_id = executor.task_instance_id();
        if self.tracker.is_closed() {
            return Err(WorkerError::ShuttingDown);
        }
        {
            let _admission = self.admission.lock();
            if self.full_policy == TaskExecutorFullPolicy::Reject && self.is_overloaded() {
                self.metrics.record_pool_rejection();
                warn!(
                    task_instance_id = task_instance_id,
                    in_flight = self.holder.size(),
                    exec_threads = self.exec_threads,
                    "Executor pool overloaded, rejecting task"
                );
                return Ok(false);
            }
            self.holder.put(executor.clone())?;
            self.pending.lock().insert(task_instance_id, executor.clone());
        }

        executor.mark_dispatched().await;

        let permits = self.permits.clone();
        let pending = self.pending.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if pending.lock().remove(&task_instance_id).is_none() {
                debug!(
                    task_instance_id = task_instance_id,
                    "Executor killed before start, skipping"
                );
                return;
            }
            let run = AssertUnwindSafe(executor.clone().run()).catch_unwind().await;
            if run.is_err() {
                error!(task_instance_id = task_instance_id, "Task executor panicked");
                executor
                    .handle_failure(WorkerError::execution("task executor panicked"))
                    .await;
            }
        });
        debug!(task_instance_id = task_instance_id, "Executor admitted");
        Ok(true)
    }

    /// Cancel an admitted executor that has not started; `false` if it already started or finished
    pub async fn kill_task_before_execute_by_instance_id(&self, task_instance_id: i32) -> bool {
        let executor = self.pending.lock().remove(&task_instance_id);
        match executor {
            Some(executor) => {
                info!(task_instance_id = task_instance_id, "Killing task before execution");
                executor.kill_before_execute().await;
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, task_instance_id: i32) -> bool {
        self.pending.lock().contains_key(&task_instance_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Executors currently holding a permit
    pub fn active_count(&self) -> usize {
        self.exec_threads
            .saturating_sub(self.permits.available_permits())
    }

    /// Stop admitting and wait up to `grace` for running executors to finish
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(
                remaining = self.tracker.len(),
                "Executor pool did not drain within the grace period"
            );
        }
        drained
    }
}
