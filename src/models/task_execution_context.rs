use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::WorkerResult;
use crate::state_machine::{validate_transition, TaskExecutionStatus};

/// TaskExecutionContext carries everything needed to run one task instance attempt
///
/// Produced by the master, deserialized on the worker and mutated in place while the
/// executor drives it. The worker never persists it; durability belongs to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionContext {
    pub task_instance_id: i32,
    pub workflow_instance_id: i32,
    #[serde(default)]
    pub task_name: String,
    pub task_type: String,
    pub first_submit_time: DateTime<Utc>,
    /// Configured delay before execution, in minutes
    #[serde(default)]
    pub delay_minutes: u32,
    #[serde(default)]
    pub current_execution_status: TaskExecutionStatus,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Working directory owned by this attempt
    #[serde(default)]
    pub execute_path: Option<PathBuf>,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Files to stage into the working directory before execution
    #[serde(default)]
    pub resources: Vec<String>,
    /// Plugin-specific parameters
    #[serde(default)]
    pub task_params: JsonValue,
    #[serde(default)]
    pub tenant_code: String,
    #[serde(default)]
    pub retry_times: u32,
    #[serde(default)]
    pub max_retry_times: u32,
    /// Execution budget in seconds, measured from `start_time`
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Pid of the spawned OS process, 0 when none
    #[serde(default)]
    pub process_id: u32,
    /// External job handles (e.g. cluster application ids)
    #[serde(default)]
    pub app_ids: Vec<String>,
    /// Serialized key/value outputs
    #[serde(default)]
    pub var_pool: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl TaskExecutionContext {
    /// Create a context for a fresh attempt submitted now
    pub fn new(task_instance_id: i32, workflow_instance_id: i32, task_type: impl Into<String>) -> Self {
        Self {
            task_instance_id,
            workflow_instance_id,
            task_name: format!("task-{task_instance_id}"),
            task_type: task_type.into(),
            first_submit_time: Utc::now(),
            delay_minutes: 0,
            current_execution_status: TaskExecutionStatus::Submitted,
            start_time: None,
            end_time: None,
            execute_path: None,
            log_path: None,
            resources: Vec::new(),
            task_params: JsonValue::Null,
            tenant_code: String::new(),
            retry_times: 0,
            max_retry_times: 0,
            task_timeout_secs: None,
            process_id: 0,
            app_ids: Vec::new(),
            var_pool: None,
            host: None,
            dry_run: false,
            exit_code: None,
        }
    }

    pub fn with_params(mut self, task_params: JsonValue) -> Self {
        self.task_params = task_params;
        self
    }

    pub fn with_delay_minutes(mut self, delay_minutes: u32) -> Self {
        self.delay_minutes = delay_minutes;
        self
    }

    pub fn with_first_submit_time(mut self, first_submit_time: DateTime<Utc>) -> Self {
        self.first_submit_time = first_submit_time;
        self
    }

    pub fn with_timeout_secs(mut self, task_timeout_secs: u64) -> Self {
        self.task_timeout_secs = Some(task_timeout_secs);
        self
    }

    pub fn with_execute_path(mut self, execute_path: impl Into<PathBuf>) -> Self {
        self.execute_path = Some(execute_path.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Remaining delay: `delay_minutes * 60s - (now - first_submit_time)`, clamped at zero
    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Duration {
        let delay_ms = i64::from(self.delay_minutes) * 60_000;
        let elapsed_ms = (now - self.first_submit_time).num_milliseconds();
        let remaining_ms = delay_ms - elapsed_ms;
        if remaining_ms > 0 {
            Duration::from_millis(remaining_ms as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Remaining execution budget, `None` when the task has no timeout
    pub fn remaining_timeout(&self, now: DateTime<Utc>) -> Option<Duration> {
        let timeout_secs = self.task_timeout_secs?;
        let started = self.start_time.unwrap_or(now);
        let elapsed_ms = (now - started).num_milliseconds().max(0) as u64;
        Some(Duration::from_millis(
            (timeout_secs * 1000).saturating_sub(elapsed_ms),
        ))
    }

    /// Move to `next`, stamping `end_time` exactly when the new status is terminal
    pub fn transition_to(&mut self, next: TaskExecutionStatus) -> WorkerResult<()> {
        validate_transition(self.task_instance_id, self.current_execution_status, next)?;
        self.current_execution_status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current_execution_status.is_terminal()
    }

    pub fn has_application_ids(&self) -> bool {
        !self.app_ids.is_empty()
    }
}
