// Task execution state machine
//
// Status vocabulary shared with the master plus the transition guard that keeps
// reported statuses monotonic for a task instance.

pub mod states;

pub use states::{AsyncTaskExecutionStatus, TaskExecutionStatus};

use crate::error::{WorkerError, WorkerResult};

/// Guard a status transition for one task instance
pub fn validate_transition(
    task_instance_id: i32,
    from: TaskExecutionStatus,
    to: TaskExecutionStatus,
) -> WorkerResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(WorkerError::StateTransitionError {
            task_instance_id,
            from,
            to,
        })
    }
}
