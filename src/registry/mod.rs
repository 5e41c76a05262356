//! # Task Channel Registry
//!
//! Pluggable task types. The executor never knows what a task does; it resolves a
//! [`TaskChannel`] by type tag and drives the [`TaskPlugin`] that channel creates.
//!
//! ```text
//! Registry
//! ├── TaskChannelRegistry   (type tag → channel)
//! ├── TaskChannel/TaskPlugin (capability traits)
//! └── ShellTaskChannel      (built-in SHELL type)
//! ```

pub mod shell;
pub mod task_channel;
pub mod task_channel_registry;

pub use shell::{ShellTask, ShellTaskChannel};
pub use task_channel::{ExecutionMode, TaskChannel, TaskHandleOutcome, TaskPlugin};
pub use task_channel_registry::TaskChannelRegistry;
