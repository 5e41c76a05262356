pub mod task_event;
pub mod task_execution_context;

// Re-export core models for easy access
pub use task_event::{MessageCategory, TaskEventType, TaskStatusEvent};
pub use task_execution_context::TaskExecutionContext;
