//! # Task Executor
//!
//! Drives one task attempt through its local lifecycle:
//!
//! ```text
//! run ─→ initialize_task ─→ dry run? ──yes──→ finish(SUCCESS)
//!                              │no
//!                              ▼
//!                       before_execute ─→ strategy.execute_task ─→ strategy.after_execute
//!                              │                  │
//!                              └──── error ───────┴──────────────→ strategy.after_throwing
//! ```
//!
//! `finish` is the single exit: it stamps the terminal status, reports the result,
//! leaves the holder and cleans up. It runs at most once per executor no matter how
//! many paths (normal completion, kill, async callback) race to it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use super::async_poller::{AsyncTaskCallback, AsyncTaskPoller};
use super::holder::TaskExecutorHolder;
use super::strategy::ExecuteStrategy;
use crate::cleanup::{create_working_directory, delete_working_directory};
use crate::config::WorkerConfig;
use crate::constants::{EXIT_CODE_FAILURE, EXIT_CODE_KILL, EXIT_CODE_SUCCESS};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::{log_error, log_task_operation, task_span};
use crate::messaging::{MasterClient, TaskMessageSender};
use crate::metrics::WorkerMetrics;
use crate::models::{TaskEventType, TaskExecutionContext};
use crate::process::kill_process_tree;
use crate::registry::{TaskChannelRegistry, TaskPlugin};
use crate::services::{AlertSender, StorageOperator};
use crate::state_machine::{AsyncTaskExecutionStatus, TaskExecutionStatus};

/// Everything an executor talks to, shared by all executors of one worker
pub struct ExecutorServices {
    pub config: Arc<WorkerConfig>,
    pub channels: Arc<TaskChannelRegistry>,
    pub message_sender: Arc<TaskMessageSender>,
    pub storage: Arc<dyn StorageOperator>,
    pub alert_sender: Arc<dyn AlertSender>,
    pub holder: Arc<TaskExecutorHolder>,
    pub async_poller: Arc<AsyncTaskPoller>,
    pub metrics: Arc<WorkerMetrics>,
}

impl std::fmt::Debug for ExecutorServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorServices")
            .field("channels", &self.channels)
            .field("holder", &self.holder)
            .finish()
    }
}

impl ExecutorServices {
    pub fn new(
        config: Arc<WorkerConfig>,
        channels: Arc<TaskChannelRegistry>,
        master_client: Arc<dyn MasterClient>,
        storage: Arc<dyn StorageOperator>,
        alert_sender: Arc<dyn AlertSender>,
    ) -> Self {
        let metrics = Arc::new(WorkerMetrics::new());
        let holder = Arc::new(TaskExecutorHolder::new());
        let message_sender = Arc::new(TaskMessageSender::new(
            master_client,
            config.host.clone(),
            config.message_send_timeout(),
            metrics.clone(),
        ));
        let async_poller = Arc::new(AsyncTaskPoller::new(
            holder.clone(),
            config.async_poll_threads,
            metrics.clone(),
        ));
        Self {
            config,
            channels,
            message_sender,
            storage,
            alert_sender,
            holder,
            async_poller,
            metrics,
        }
    }
}

pub struct TaskExecutor {
    task_instance_id: i32,
    context: Mutex<TaskExecutionContext>,
    strategy: Arc<dyn ExecuteStrategy>,
    services: Arc<ExecutorServices>,
    plugin: Mutex<Option<Arc<dyn TaskPlugin>>>,
    cancel_token: CancellationToken,
    /// Pid of a spawned process not yet reaped, 0 once it has been waited on
    live_process_id: AtomicU32,
    finished: AtomicBool,
    killed: AtomicBool,
    parked_async: AtomicBool,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("task_instance_id", &self.task_instance_id)
            .field("status", &self.status())
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl TaskExecutor {
    pub fn new(
        context: TaskExecutionContext,
        strategy: Arc<dyn ExecuteStrategy>,
        services: Arc<ExecutorServices>,
    ) -> Self {
        Self {
            task_instance_id: context.task_instance_id,
            context: Mutex::new(context),
            strategy,
            services,
            plugin: Mutex::new(None),
            cancel_token: CancellationToken::new(),
            live_process_id: AtomicU32::new(0),
            finished: AtomicBool::new(false),
            killed: AtomicBool::new(false),
            parked_async: AtomicBool::new(false),
        }
    }

    pub fn task_instance_id(&self) -> i32 {
        self.task_instance_id
    }

    /// Snapshot of the current context
    pub fn context(&self) -> TaskExecutionContext {
        self.context.lock().clone()
    }

    pub fn status(&self) -> TaskExecutionStatus {
        self.context.lock().current_execution_status
    }

    pub fn services(&self) -> &Arc<ExecutorServices> {
        &self.services
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Apply `update` to the context and return the resulting snapshot
    pub fn update_context<F>(&self, update: F) -> WorkerResult<TaskExecutionContext>
    where
        F: FnOnce(&mut TaskExecutionContext) -> WorkerResult<()>,
    {
        let mut context = self.context.lock();
        update(&mut context)?;
        Ok(context.clone())
    }

    pub fn set_exit_code(&self, exit_code: i32) {
        self.context.lock().exit_code = Some(exit_code);
    }

    pub fn record_process_id(&self, process_id: u32) {
        self.context.lock().process_id = process_id;
        self.live_process_id.store(process_id, Ordering::SeqCst);
    }

    /// The spawned process has been waited on; a later cancel must not signal its pid
    ///
    /// The context keeps the pid for the finish report.
    pub fn process_reaped(&self) {
        self.live_process_id.store(0, Ordering::SeqCst);
    }

    pub fn live_process_id(&self) -> u32 {
        self.live_process_id.load(Ordering::SeqCst)
    }

    pub fn record_application_ids(&self, application_ids: Vec<String>) {
        self.context.lock().app_ids = application_ids;
    }

    /// Report the current context as RUNNING to the master
    pub async fn report_running(&self) {
        let snapshot = self.context();
        self.services
            .message_sender
            .send_message_with_retry(&snapshot, TaskEventType::Running)
            .await;
    }

    /// Accepted by the pool: move to DISPATCHED and tell the master
    pub async fn mark_dispatched(&self) {
        let snapshot =
            self.update_context(|context| context.transition_to(TaskExecutionStatus::Dispatched));
        match snapshot {
            Ok(snapshot) => {
                self.services
                    .message_sender
                    .send_message_with_retry(&snapshot, TaskEventType::Dispatch)
                    .await;
            }
            Err(error) => warn!(
                task_instance_id = self.task_instance_id,
                error = %error,
                "Skipping dispatch notice"
            ),
        }
    }

    /// Completion is now owned by the async poller
    pub fn park_async(&self) {
        self.parked_async.store(true, Ordering::SeqCst);
    }

    /// Entry point, executed on its own tokio task
    pub async fn run(self: Arc<Self>) {
        let span = task_span(&self.context());
        self.run_attempt().instrument(span).await
    }

    async fn run_attempt(self: Arc<Self>) {
        if self.is_finished() {
            return;
        }
        if self.cancel_token.is_cancelled() {
            self.kill_before_execute().await;
            return;
        }
        if let Err(error) = self.initialize_task() {
            self.strategy.after_throwing(&self, error).await;
            return;
        }

        if self.context.lock().dry_run {
            info!(task_instance_id = self.task_instance_id, "Dry run, skipping execution");
            self.services.metrics.record_dry_run();
            self.finish(TaskExecutionStatus::Success, EXIT_CODE_SUCCESS, false)
                .await;
            return;
        }

        let executed = async {
            let plugin = self.before_execute().await?;
            if self.cancel_token.is_cancelled() {
                return Err(WorkerError::execution("task cancelled before execution"));
            }
            self.strategy.execute_task(&self, plugin).await
        }
        .await;

        let outcome = match executed {
            Ok(()) => self.strategy.after_execute(&self).await,
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            self.strategy.after_throwing(&self, error).await;
        }
    }

    fn initialize_task(&self) -> WorkerResult<()> {
        let config = &self.services.config;
        let mut context = self.context.lock();
        context.start_time = Some(Utc::now());
        if context.host.is_none() {
            context.host = Some(config.host.clone());
        }
        if context.task_timeout_secs.is_none() {
            context.task_timeout_secs = config.default_task_timeout_secs;
        }
        if context.execute_path.is_none() {
            context.execute_path = Some(
                config
                    .exec_base_dir
                    .join(context.workflow_instance_id.to_string())
                    .join(context.task_instance_id.to_string()),
            );
        }
        if context.log_path.is_none() {
            let log_file = format!(
                "{}_{}.log",
                context.workflow_instance_id, context.task_instance_id
            );
            context.log_path = Some(config.exec_base_dir.join("logs").join(log_file));
        }
        log_task_operation(
            "initialize",
            context.task_instance_id,
            Some(&context.task_name),
            &context.current_execution_status.to_string(),
            None,
        );
        Ok(())
    }

    async fn before_execute(&self) -> WorkerResult<Arc<dyn TaskPlugin>> {
        let snapshot = self.update_context(|context| {
            context.transition_to(TaskExecutionStatus::RunningExecution)
        })?;
        self.services
            .message_sender
            .send_message_with_retry(&snapshot, TaskEventType::Running)
            .await;

        validate_tenant(&snapshot.tenant_code)?;
        let execute_path = snapshot
            .execute_path
            .as_ref()
            .ok_or_else(|| WorkerError::ResourceError("task has no working directory".to_string()))?;
        create_working_directory(execute_path).await?;
        self.services
            .storage
            .download_resources_if_needed(&snapshot)
            .await?;

        let channel = self.services.channels.get(&snapshot.task_type)?;
        let plugin = channel
            .create_task(&snapshot)?
            .ok_or_else(|| WorkerError::NullTaskPlugin {
                task_type: snapshot.task_type.clone(),
            })?;
        *self.plugin.lock() = Some(plugin.clone());
        plugin.init(&snapshot).await?;
        Ok(plugin)
    }

    /// Normal completion: derive the terminal status from the recorded exit code
    pub async fn complete(&self) {
        let exit_code = self.context.lock().exit_code.unwrap_or(EXIT_CODE_FAILURE);
        let status = self.final_status(exit_code);
        let exit_code = if status == TaskExecutionStatus::Killed {
            EXIT_CODE_KILL
        } else {
            exit_code
        };
        self.finish(status, exit_code, true).await;
    }

    /// Last-resort handler: best-effort cancel, then FAILURE (or KILLED after a kill)
    pub async fn handle_failure(&self, error: WorkerError) {
        if self.is_killed() {
            info!(task_instance_id = self.task_instance_id, "Task killed");
        } else {
            log_error(
                "TaskExecutor",
                "execute",
                &error.to_string(),
                Some(&format!("task_instance_id={}", self.task_instance_id)),
            );
        }
        self.cancel_task().await;
        let (status, exit_code) = if self.is_killed() {
            (TaskExecutionStatus::Killed, EXIT_CODE_KILL)
        } else {
            (TaskExecutionStatus::Failure, EXIT_CODE_FAILURE)
        };
        self.finish(status, exit_code, false).await;
    }

    fn final_status(&self, exit_code: i32) -> TaskExecutionStatus {
        if self.is_killed() || exit_code == EXIT_CODE_KILL {
            TaskExecutionStatus::Killed
        } else if exit_code == EXIT_CODE_SUCCESS {
            TaskExecutionStatus::Success
        } else {
            TaskExecutionStatus::Failure
        }
    }

    /// Stop the plugin and any spawned process; failures are logged, never raised
    pub async fn cancel_task(&self) {
        self.cancel_token.cancel();

        let plugin = self.plugin.lock().clone();
        if let Some(plugin) = plugin {
            if let Err(error) = plugin.cancel().await {
                warn!(
                    task_instance_id = self.task_instance_id,
                    error = %error,
                    "Plugin cancel failed"
                );
            }
        }

        let process_id = self.live_process_id();
        if let Err(error) = kill_process_tree(process_id).await {
            warn!(
                task_instance_id = self.task_instance_id,
                process_id = process_id,
                error = %error,
                "Kill process tree failed"
            );
        }
    }

    /// External kill of a running attempt
    pub async fn kill(&self) {
        if self.is_finished() {
            return;
        }
        info!(task_instance_id = self.task_instance_id, "Killing task");
        self.killed.store(true, Ordering::SeqCst);
        self.cancel_task().await;

        if self.parked_async.load(Ordering::SeqCst) {
            self.services.async_poller.remove(self.task_instance_id);
            self.finish(TaskExecutionStatus::Killed, EXIT_CODE_KILL, true)
                .await;
        }
    }

    /// Killed before it ever ran: report KILLED without touching the plugin
    pub async fn kill_before_execute(&self) {
        self.killed.store(true, Ordering::SeqCst);
        self.cancel_token.cancel();
        self.finish(TaskExecutionStatus::Killed, EXIT_CODE_KILL, false)
            .await;
    }

    /// Record the terminal status, report it and release everything; runs once
    pub async fn finish(&self, status: TaskExecutionStatus, exit_code: i32, clean_workdir: bool) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let plugin = self.plugin.lock().clone();
        let var_pool = plugin.as_ref().and_then(|plugin| plugin.var_pool());

        let snapshot = {
            let mut context = self.context.lock();
            context.exit_code = Some(exit_code);
            if var_pool.is_some() {
                context.var_pool = var_pool;
            }
            if let Err(error) = context.transition_to(status) {
                warn!(error = %error, "Terminal transition rejected");
            }
            context.clone()
        };
        let services = &self.services;

        if status == TaskExecutionStatus::Success {
            if let Err(error) = services.storage.upload_output_files(&snapshot).await {
                warn!(task_instance_id = self.task_instance_id, error = %error, "Output upload failed");
            }
        }
        if plugin.as_ref().is_some_and(|plugin| plugin.need_alert()) {
            if let Err(error) = services.alert_sender.send_alert(&snapshot).await {
                warn!(task_instance_id = self.task_instance_id, error = %error, "Alert send failed");
            }
        }

        services
            .message_sender
            .send_message_with_retry(&snapshot, TaskEventType::Finish)
            .await;
        services.holder.remove(self.task_instance_id);
        services.metrics.record_finished(status);

        if clean_workdir && !services.config.develop_mode {
            if let Some(execute_path) = snapshot.execute_path.as_ref() {
                if let Err(error) = delete_working_directory(execute_path).await {
                    services.metrics.record_cleanup_failure();
                    warn!(task_instance_id = self.task_instance_id, error = %error, "Working directory cleanup failed");
                }
            }
        }
        if let Err(error) = services.storage.ship_log(&snapshot).await {
            warn!(task_instance_id = self.task_instance_id, error = %error, "Log shipment failed");
        }

        log_task_operation(
            "finish",
            self.task_instance_id,
            Some(&snapshot.task_name),
            &status.to_string(),
            Some(&format!("exit_code={exit_code}")),
        );
    }
}

#[async_trait]
impl AsyncTaskCallback for TaskExecutor {
    fn task_instance_id(&self) -> i32 {
        self.task_instance_id
    }

    fn context(&self) -> TaskExecutionContext {
        TaskExecutor::context(self)
    }

    async fn execute_end(&self, status: AsyncTaskExecutionStatus) {
        let exit_code = match status {
            AsyncTaskExecutionStatus::Success => EXIT_CODE_SUCCESS,
            _ => EXIT_CODE_FAILURE,
        };
        self.set_exit_code(exit_code);
        self.complete().await;
    }

    async fn execute_throwing(&self, error: WorkerError) {
        self.handle_failure(error).await;
    }
}

fn validate_tenant(tenant_code: &str) -> WorkerResult<()> {
    let valid = tenant_code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(WorkerError::validation(format!(
            "invalid tenant code {tenant_code:?}"
        )))
    }
}
