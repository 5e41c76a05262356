//! Shared constants for the worker runtime.

use std::time::Duration;

/// Exit code reported for a task whose process exited cleanly
pub const EXIT_CODE_SUCCESS: i32 = 0;

/// Exit code reported for a failed task or a timed-out process
pub const EXIT_CODE_FAILURE: i32 = -1;

/// Exit code reported for a killed task (128 + SIGKILL)
pub const EXIT_CODE_KILL: i32 = 137;

pub const DEFAULT_EXEC_THREADS: usize = 100;
pub const DEFAULT_ASYNC_POLL_THREADS: usize = 10;
pub const DEFAULT_MESSAGE_RETRY_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_MESSAGE_SEND_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ADMISSION_RETRY_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_ASYNC_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_EXEC_BASE_DIR: &str = "/tmp/taskweave/exec";
pub const DEFAULT_WORKER_HOST: &str = "127.0.0.1:1234";

/// Environment variable pointing at a TOML configuration file
pub const CONFIG_PATH_ENV: &str = "TASKWEAVE_CONFIG_PATH";

/// Prefix for environment variable overrides (e.g. `TASKWEAVE_WORKER_EXEC_THREADS`)
pub const CONFIG_ENV_PREFIX: &str = "TASKWEAVE_WORKER";

/// Built-in task type tags
pub mod task_types {
    pub const SHELL: &str = "SHELL";
}

/// Environment variables exported to spawned task processes
pub mod task_env {
    pub const TASK_INSTANCE_ID: &str = "TASKWEAVE_TASK_INSTANCE_ID";
    pub const WORKFLOW_INSTANCE_ID: &str = "TASKWEAVE_WORKFLOW_INSTANCE_ID";
    pub const EXECUTE_PATH: &str = "TASKWEAVE_EXECUTE_PATH";
}
