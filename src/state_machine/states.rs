use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status of one task instance, shared vocabulary with the master
///
/// Statuses are ordered: `Submitted < DelayExecution < Dispatched < RunningExecution < terminal`.
/// Reported statuses never regress along this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecutionStatus {
    /// Accepted into the dispatch queue
    #[default]
    Submitted,
    /// Parked until the configured delay elapses
    DelayExecution,
    /// Admitted into the bounded execution pool
    Dispatched,
    /// Plugin handle invoked, process (if any) spawned
    RunningExecution,
    /// Completed normally
    Success,
    /// Completed abnormally
    Failure,
    /// Cancelled before or during execution
    Killed,
}

impl TaskExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Killed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::RunningExecution)
    }

    /// Position in the monotonic reporting order; all terminal states share the top rank
    pub fn rank(&self) -> u8 {
        match self {
            Self::Submitted => 0,
            Self::DelayExecution => 1,
            Self::Dispatched => 2,
            Self::RunningExecution => 3,
            Self::Success | Self::Failure | Self::Killed => 4,
        }
    }

    /// A transition is valid when it leaves a non-terminal state and does not go backwards
    pub fn can_transition_to(&self, next: TaskExecutionStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl fmt::Display for TaskExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::DelayExecution => write!(f, "DELAY_EXECUTION"),
            Self::Dispatched => write!(f, "DISPATCHED"),
            Self::RunningExecution => write!(f, "RUNNING_EXECUTION"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Killed => write!(f, "KILLED"),
        }
    }
}

impl std::str::FromStr for TaskExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(Self::Submitted),
            "DELAY_EXECUTION" => Ok(Self::DelayExecution),
            "DISPATCHED" => Ok(Self::Dispatched),
            "RUNNING_EXECUTION" => Ok(Self::RunningExecution),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "KILLED" => Ok(Self::Killed),
            _ => Err(format!("Invalid task execution status: {s}")),
        }
    }
}

/// Status reported by an async task's completion check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsyncTaskExecutionStatus {
    Running,
    Success,
    Failed,
}

impl AsyncTaskExecutionStatus {
    /// Canonical terminal status, `None` while still running
    pub fn terminal_status(&self) -> Option<TaskExecutionStatus> {
        match self {
            Self::Running => None,
            Self::Success => Some(TaskExecutionStatus::Success),
            Self::Failed => Some(TaskExecutionStatus::Failure),
        }
    }
}

impl fmt::Display for AsyncTaskExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}
