use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TaskExecutionContext;
use crate::state_machine::TaskExecutionStatus;

/// Kind of status event sent to the master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEventType {
    /// Task accepted or admitted by this worker
    Dispatch,
    /// Task parked until its delay elapses
    Delay,
    /// Plugin started (possibly with a pid or application ids)
    Running,
    /// Terminal result
    Finish,
    /// Worker could not accept the task; the master should re-dispatch it
    Recall,
}

impl TaskEventType {
    /// Retry-cache category this event is stored under
    pub fn category(&self) -> MessageCategory {
        match self {
            Self::Dispatch | Self::Running => MessageCategory::Running,
            Self::Delay | Self::Finish => MessageCategory::Result,
            Self::Recall => MessageCategory::Recall,
        }
    }
}

impl fmt::Display for TaskEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dispatch => write!(f, "DISPATCH"),
            Self::Delay => write!(f, "DELAY"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finish => write!(f, "FINISH"),
            Self::Recall => write!(f, "RECALL"),
        }
    }
}

/// Retry-cache categories, resent in declaration order during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Running,
    Result,
    Recall,
}

/// Idempotent status event keyed by task instance id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub event_id: Uuid,
    pub event_type: TaskEventType,
    pub task_instance_id: i32,
    pub workflow_instance_id: i32,
    pub status: TaskExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub process_id: u32,
    pub app_ids: Vec<String>,
    pub var_pool: Option<String>,
    pub exit_code: Option<i32>,
    pub execute_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub host: String,
    pub created_at: DateTime<Utc>,
}

impl TaskStatusEvent {
    pub fn from_context(
        context: &TaskExecutionContext,
        event_type: TaskEventType,
        host: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            task_instance_id: context.task_instance_id,
            workflow_instance_id: context.workflow_instance_id,
            status: context.current_execution_status,
            start_time: context.start_time,
            end_time: context.end_time,
            process_id: context.process_id,
            app_ids: context.app_ids.clone(),
            var_pool: context.var_pool.clone(),
            exit_code: context.exit_code,
            execute_path: context.execute_path.clone(),
            log_path: context.log_path.clone(),
            host: context.host.clone().unwrap_or_else(|| host.into()),
            created_at: Utc::now(),
        }
    }

    pub fn category(&self) -> MessageCategory {
        self.event_type.category()
    }
}
