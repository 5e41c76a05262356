use async_trait::async_trait;
use tracing::warn;

use crate::error::WorkerResult;
use crate::models::TaskExecutionContext;

/// Outbound alert delivery for finished attempts whose plugin asked for one
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send_alert(&self, context: &TaskExecutionContext) -> WorkerResult<()>;
}

/// Emits alerts as `warn!` records
#[derive(Debug, Default, Clone)]
pub struct LoggingAlertSender;

#[async_trait]
impl AlertSender for LoggingAlertSender {
    async fn send_alert(&self, context: &TaskExecutionContext) -> WorkerResult<()> {
        warn!(
            task_instance_id = context.task_instance_id,
            workflow_instance_id = context.workflow_instance_id,
            task_name = %context.task_name,
            status = %context.current_execution_status,
            exit_code = ?context.exit_code,
            "Task alert"
        );
        Ok(())
    }
}
