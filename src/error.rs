//! Error types for the worker runtime.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::TaskExecutionStatus;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Task plugin not found for task type {task_type}")]
    TaskPluginNotFound { task_type: String },
    #[error("Task channel for task type {task_type} created no plugin instance")]
    NullTaskPlugin { task_type: String },
    #[error("Task executor already exists for task instance {task_instance_id}")]
    DuplicateTaskExecutor { task_instance_id: i32 },
    #[error("Invalid status transition for task instance {task_instance_id}: {from} -> {to}")]
    StateTransitionError {
        task_instance_id: i32,
        from: TaskExecutionStatus,
        to: TaskExecutionStatus,
    },
    #[error("Task execution error: {0}")]
    ExecutionError(String),
    #[error("Timeout error for operation {operation}: {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    #[error("Resource staging error: {0}")]
    ResourceError(String),
    #[error("Process error: {0}")]
    ProcessError(String),
    #[error("Cleanup error for {path}: {reason}")]
    CleanupError { path: PathBuf, reason: String },
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Worker is shutting down")]
    ShuttingDown,
}

impl WorkerError {
    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionError(message.into())
    }

    /// Create a process error
    pub fn process(message: impl Into<String>) -> Self {
        Self::ProcessError(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// Plugin resolution failures are fatal to the attempt and never retried locally
    pub fn is_plugin_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::TaskPluginNotFound { .. } | Self::NullTaskPlugin { .. }
        )
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(error: std::io::Error) -> Self {
        WorkerError::IoError(error.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(error: serde_json::Error) -> Self {
        WorkerError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<MessagingError> for WorkerError {
    fn from(error: MessagingError) -> Self {
        WorkerError::MessagingError(error.to_string())
    }
}

impl From<ConfigurationError> for WorkerError {
    fn from(error: ConfigurationError) -> Self {
        WorkerError::ConfigurationError(error.to_string())
    }
}

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_resolution_errors_are_classified() {
        let missing = WorkerError::TaskPluginNotFound {
            task_type: "SQL".to_string(),
        };
        let null = WorkerError::NullTaskPlugin {
            task_type: "SQL".to_string(),
        };
        assert!(missing.is_plugin_resolution_error());
        assert!(null.is_plugin_resolution_error());
        assert!(!WorkerError::execution("boom").is_plugin_resolution_error());
    }

    #[test]
    fn test_messaging_error_conversion() {
        let error: WorkerError = MessagingError::connection("master unreachable").into();
        assert!(matches!(error, WorkerError::MessagingError(_)));
        assert!(error.to_string().contains("master unreachable"));
    }
}
