//! # Messaging Error Types
//!
//! Structured errors for status-event delivery to the master.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Master connection error: {message}")]
    Connection { message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Master rejected event for task instance {task_instance_id}: {reason}")]
    Rejected { task_instance_id: i32, reason: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a rejection error
    pub fn rejected(task_instance_id: i32, reason: impl Into<String>) -> Self {
        Self::Rejected {
            task_instance_id,
            reason: reason.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Transient failures are worth another attempt from the retry sweep
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        Self::message_serialization(error.to_string())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
