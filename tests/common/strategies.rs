use proptest::prelude::*;

use taskweave_worker::state_machine::TaskExecutionStatus;

pub const ALL_STATUSES: [TaskExecutionStatus; 7] = [
    TaskExecutionStatus::Submitted,
    TaskExecutionStatus::DelayExecution,
    TaskExecutionStatus::Dispatched,
    TaskExecutionStatus::RunningExecution,
    TaskExecutionStatus::Success,
    TaskExecutionStatus::Failure,
    TaskExecutionStatus::Killed,
];

/// Strategy for any execution status
pub fn status_strategy() -> impl Strategy<Value = TaskExecutionStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

/// Strategy for an arbitrary (often invalid) sequence of requested transitions
pub fn transition_attempts_strategy() -> impl Strategy<Value = Vec<TaskExecutionStatus>> {
    prop::collection::vec(status_strategy(), 1..20)
}

/// Strategy for (delay minutes, elapsed milliseconds since first submission)
pub fn delay_strategy() -> impl Strategy<Value = (u32, i64)> {
    (0u32..120, -60_000i64..10_000_000)
}

/// Strategy for delay-queue offsets in milliseconds, all already in the past
pub fn expired_offsets_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..5_000, 1..30)
}
