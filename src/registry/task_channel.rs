//! # Task Channel Abstraction
//!
//! A task channel is the factory for one task type. For every attempt it creates a
//! [`TaskPlugin`] instance that does the type-specific work: run a shell script,
//! submit a cluster job, call a remote service.
//!
//! ```text
//! "SHELL" ──→ TaskChannelRegistry ──→ Arc<dyn TaskChannel> ──create_task──→ Arc<dyn TaskPlugin>
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;

use crate::error::{WorkerError, WorkerResult};
use crate::models::TaskExecutionContext;
use crate::state_machine::AsyncTaskExecutionStatus;

/// What a plugin's `handle` produced
#[derive(Debug)]
pub enum TaskHandleOutcome {
    /// Work finished inline with this exit code
    Finished { exit_code: i32 },
    /// A local OS process the executor waits on
    Spawned { child: Child },
    /// Work was submitted to an external system under these application ids
    Submitted {
        application_ids: Vec<String>,
        exit_code: i32,
    },
}

/// How the executor completes a task of this type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// `handle` blocks (or hands back a process to wait on) until the work is done
    #[default]
    Sync,
    /// `handle` returns immediately and completion is polled
    Async,
}

/// One task attempt of a given type
#[async_trait]
pub trait TaskPlugin: Send + Sync {
    async fn init(&self, _context: &TaskExecutionContext) -> WorkerResult<()> {
        Ok(())
    }

    async fn handle(&self, context: &TaskExecutionContext) -> WorkerResult<TaskHandleOutcome>;

    /// Ask the plugin to stop its work; advisory, callers never rely on it succeeding
    async fn cancel(&self) -> WorkerResult<()>;

    /// The process handed back by `handle` has been waited on; forget its pid
    fn process_reaped(&self) {}

    /// Serialized output variables, read after `handle`
    fn var_pool(&self) -> Option<String> {
        None
    }

    /// Whether an alert should be raised once the attempt finishes
    fn need_alert(&self) -> bool {
        false
    }

    /// Completion check for async task types
    async fn check_async_status(
        &self,
        context: &TaskExecutionContext,
    ) -> WorkerResult<AsyncTaskExecutionStatus> {
        Err(WorkerError::validation(format!(
            "task type {} does not support async status checks",
            context.task_type
        )))
    }

    /// Poll interval for async completion checks, `None` for the configured default
    fn async_check_interval(&self) -> Option<Duration> {
        None
    }
}

/// Factory for plugins of one task type
pub trait TaskChannel: Send + Sync {
    fn task_type(&self) -> &str;

    /// Create the plugin for one attempt; `Ok(None)` means the channel produced nothing
    fn create_task(
        &self,
        context: &TaskExecutionContext,
    ) -> WorkerResult<Option<Arc<dyn TaskPlugin>>>;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sync
    }
}
