//! # Execution Strategies
//!
//! The executor's lifecycle is fixed; what differs between task types is how the
//! plugin's work is awaited. A strategy supplies those hooks:
//!
//! - [`DefaultTaskExecution`]: wait inline, on the executor's own task, for the
//!   plugin or its spawned process to finish.
//! - [`AsyncTaskExecution`]: submit, then hand completion to the async poller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use super::async_poller::AsyncTaskExecutionContext;
use super::executor::TaskExecutor;
use crate::constants::{EXIT_CODE_FAILURE, EXIT_CODE_KILL, EXIT_CODE_SUCCESS};
use crate::error::{WorkerError, WorkerResult};
use crate::process::{kill_and_reap, wait_with_timeout, ProcessExit};
use crate::registry::{TaskHandleOutcome, TaskPlugin};

#[async_trait]
pub trait ExecuteStrategy: Send + Sync {
    async fn execute_task(
        &self,
        executor: &Arc<TaskExecutor>,
        plugin: Arc<dyn TaskPlugin>,
    ) -> WorkerResult<()>;

    async fn after_execute(&self, executor: &Arc<TaskExecutor>) -> WorkerResult<()>;

    async fn after_throwing(&self, executor: &Arc<TaskExecutor>, error: WorkerError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTaskExecution;

#[async_trait]
impl ExecuteStrategy for DefaultTaskExecution {
    async fn execute_task(
        &self,
        executor: &Arc<TaskExecutor>,
        plugin: Arc<dyn TaskPlugin>,
    ) -> WorkerResult<()> {
        let context = executor.context();
        if context.has_application_ids() {
            // Retry of an attempt whose external job was already submitted.
            info!(
                task_instance_id = context.task_instance_id,
                app_ids = ?context.app_ids,
                "Application already submitted, skipping resubmission"
            );
            executor.set_exit_code(EXIT_CODE_SUCCESS);
            executor.report_running().await;
            return Ok(());
        }

        match plugin.handle(&context).await? {
            TaskHandleOutcome::Finished { exit_code } => executor.set_exit_code(exit_code),
            TaskHandleOutcome::Submitted {
                application_ids,
                exit_code,
            } => {
                executor.record_application_ids(application_ids);
                executor.report_running().await;
                executor.set_exit_code(exit_code);
            }
            TaskHandleOutcome::Spawned { mut child } => {
                let process_id = child.id().unwrap_or(0);
                executor.record_process_id(process_id);
                executor.report_running().await;

                let budget = executor.context().remaining_timeout(Utc::now());
                let exit =
                    wait_with_timeout(&mut child, budget, executor.cancellation_token()).await?;
                let exit_code = match exit {
                    ProcessExit::Exited(exit_code) => exit_code,
                    ProcessExit::TimedOut => {
                        warn!(
                            task_instance_id = context.task_instance_id,
                            process_id = process_id,
                            "Task timed out, killing process tree"
                        );
                        kill_and_reap(&mut child, process_id).await;
                        EXIT_CODE_FAILURE
                    }
                    ProcessExit::Cancelled => {
                        kill_and_reap(&mut child, process_id).await;
                        EXIT_CODE_KILL
                    }
                };
                executor.process_reaped();
                plugin.process_reaped();
                executor.set_exit_code(exit_code);
            }
        }
        Ok(())
    }

    async fn after_execute(&self, executor: &Arc<TaskExecutor>) -> WorkerResult<()> {
        executor.complete().await;
        Ok(())
    }

    async fn after_throwing(&self, executor: &Arc<TaskExecutor>, error: WorkerError) {
        executor.handle_failure(error).await;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncTaskExecution;

#[async_trait]
impl ExecuteStrategy for AsyncTaskExecution {
    async fn execute_task(
        &self,
        executor: &Arc<TaskExecutor>,
        plugin: Arc<dyn TaskPlugin>,
    ) -> WorkerResult<()> {
        let context = executor.context();
        match plugin.handle(&context).await? {
            TaskHandleOutcome::Spawned { mut child } => {
                let process_id = child.id().unwrap_or(0);
                kill_and_reap(&mut child, process_id).await;
                plugin.process_reaped();
                return Err(WorkerError::execution(
                    "async task types must not hand back a local process",
                ));
            }
            TaskHandleOutcome::Finished { exit_code } if exit_code != EXIT_CODE_SUCCESS => {
                return Err(WorkerError::execution(format!(
                    "async task submission failed with exit code {exit_code}"
                )));
            }
            TaskHandleOutcome::Finished { .. } => {}
            TaskHandleOutcome::Submitted {
                application_ids, ..
            } => executor.record_application_ids(application_ids),
        }
        if executor.cancellation_token().is_cancelled() {
            return Err(WorkerError::execution("task cancelled during submission"));
        }
        executor.report_running().await;

        let services = executor.services();
        let interval = plugin
            .async_check_interval()
            .unwrap_or_else(|| services.config.async_default_check_interval());
        executor.park_async();
        services
            .async_poller
            .add(AsyncTaskExecutionContext::new(executor.clone(), plugin, interval));
        Ok(())
    }

    // Completion is reported by the poller's callback.
    async fn after_execute(&self, _executor: &Arc<TaskExecutor>) -> WorkerResult<()> {
        Ok(())
    }

    async fn after_throwing(&self, executor: &Arc<TaskExecutor>, error: WorkerError) {
        executor
            .services()
            .async_poller
            .remove(executor.task_instance_id());
        executor.handle_failure(error).await;
    }
}
