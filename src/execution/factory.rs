use std::sync::Arc;

use tracing::debug;

use super::executor::{ExecutorServices, TaskExecutor};
use super::strategy::{AsyncTaskExecution, DefaultTaskExecution, ExecuteStrategy};
use crate::models::TaskExecutionContext;
use crate::registry::ExecutionMode;

/// Builds executors with the strategy matching the task type's execution mode
#[derive(Debug, Clone)]
pub struct TaskExecutorFactory {
    services: Arc<ExecutorServices>,
}

impl TaskExecutorFactory {
    pub fn new(services: Arc<ExecutorServices>) -> Self {
        Self { services }
    }

    /// Unknown task types get the default strategy; plugin resolution fails later
    /// inside the executor so the failure is reported like any other.
    pub fn create(&self, context: TaskExecutionContext) -> Arc<TaskExecutor> {
        let mode = self
            .services
            .channels
            .get(&context.task_type)
            .map(|channel| channel.execution_mode())
            .unwrap_or_default();
        debug!(
            task_instance_id = context.task_instance_id,
            mode = ?mode,
            "Creating task executor"
        );
        let strategy: Arc<dyn ExecuteStrategy> = match mode {
            ExecutionMode::Sync => Arc::new(DefaultTaskExecution),
            ExecutionMode::Async => Arc::new(AsyncTaskExecution),
        };
        Arc::new(TaskExecutor::new(context, strategy, self.services.clone()))
    }
}
