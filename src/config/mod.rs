//! # Worker Configuration
//!
//! Configuration for the worker-side execution runtime. Values are layered by
//! [`ConfigManager`]: built-in defaults, then an optional TOML file, then
//! `TASKWEAVE_WORKER_*` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskweave_worker::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let threads = manager.config().exec_threads;
//! let retry_every = manager.config().message_retry_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants;

/// Behavior of the admission controller when the pool is saturated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutorFullPolicy {
    /// Always accept and queue locally, trusting upstream admission control
    Continue,
    /// Reject once in-flight executors reach the configured thread count
    #[default]
    Reject,
}

impl fmt::Display for TaskExecutorFullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "CONTINUE"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// Root worker configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pool size and overload threshold
    pub exec_threads: usize,
    pub full_policy: TaskExecutorFullPolicy,
    /// Dispatch queue bound; 0 means "same as exec_threads"
    pub dispatch_queue_capacity: usize,
    pub message_retry_interval_secs: u64,
    pub message_send_timeout_ms: u64,
    /// Delay before a pool-rejected task is offered to the pool again
    pub admission_retry_interval_ms: u64,
    /// Width of the async status-check pool
    pub async_poll_threads: usize,
    pub async_default_check_interval_secs: u64,
    /// Preserve working directories after terminal state
    pub develop_mode: bool,
    pub exec_base_dir: PathBuf,
    pub resource_dir: Option<PathBuf>,
    pub log_archive_dir: Option<PathBuf>,
    /// Worker identity stamped on every event
    pub host: String,
    pub default_task_timeout_secs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            exec_threads: constants::DEFAULT_EXEC_THREADS,
            full_policy: TaskExecutorFullPolicy::Reject,
            dispatch_queue_capacity: 0,
            message_retry_interval_secs: constants::DEFAULT_MESSAGE_RETRY_INTERVAL.as_secs(),
            message_send_timeout_ms: constants::DEFAULT_MESSAGE_SEND_TIMEOUT.as_millis() as u64,
            admission_retry_interval_ms: constants::DEFAULT_ADMISSION_RETRY_INTERVAL.as_millis()
                as u64,
            async_poll_threads: constants::DEFAULT_ASYNC_POLL_THREADS,
            async_default_check_interval_secs: constants::DEFAULT_ASYNC_CHECK_INTERVAL.as_secs(),
            develop_mode: false,
            exec_base_dir: PathBuf::from(constants::DEFAULT_EXEC_BASE_DIR),
            resource_dir: None,
            log_archive_dir: None,
            host: constants::DEFAULT_WORKER_HOST.to_string(),
            default_task_timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Dispatch queue bound, `None` under the `CONTINUE` policy
    pub fn dispatch_queue_bound(&self) -> Option<usize> {
        match self.full_policy {
            TaskExecutorFullPolicy::Continue => None,
            TaskExecutorFullPolicy::Reject if self.dispatch_queue_capacity == 0 => {
                Some(self.exec_threads)
            }
            TaskExecutorFullPolicy::Reject => Some(self.dispatch_queue_capacity),
        }
    }

    pub fn message_retry_interval(&self) -> Duration {
        Duration::from_secs(self.message_retry_interval_secs)
    }

    pub fn message_send_timeout(&self) -> Duration {
        Duration::from_millis(self.message_send_timeout_ms)
    }

    pub fn admission_retry_interval(&self) -> Duration {
        Duration::from_millis(self.admission_retry_interval_ms)
    }

    pub fn async_default_check_interval(&self) -> Duration {
        Duration::from_secs(self.async_default_check_interval_secs)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        if self.exec_threads == 0 {
            return Err(ConfigurationError::invalid_value(
                "exec_threads",
                "0",
                "at least one execution thread is required",
            ));
        }
        if self.async_poll_threads == 0 {
            return Err(ConfigurationError::invalid_value(
                "async_poll_threads",
                "0",
                "at least one async status-check thread is required",
            ));
        }
        if self.message_retry_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "message_retry_interval_secs",
                "0",
                "retry interval must be positive",
            ));
        }
        if self.message_send_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "message_send_timeout_ms",
                "0",
                "send timeout must be positive",
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigurationError::validation_error(
                "host must identify this worker",
            ));
        }
        Ok(())
    }
}
