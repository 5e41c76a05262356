//! Delayed execution: tasks wait out `delay_minutes` measured from first submission.

mod common;

use std::time::{Duration, Instant};

use chrono::Utc;

use common::*;
use taskweave_worker::models::{TaskEventType, TaskExecutionContext};
use taskweave_worker::state_machine::TaskExecutionStatus;
use taskweave_worker::KillResponse;

/// A one-minute delay that has `remaining` left to run
fn nearly_due(task_instance_id: i32, task_type: &str, remaining: Duration) -> TaskExecutionContext {
    let elapsed = Duration::from_secs(60) - remaining;
    TaskExecutionContext::new(task_instance_id, 300, task_type)
        .with_delay_minutes(1)
        .with_first_submit_time(Utc::now() - chrono::Duration::from_std(elapsed).unwrap())
}

#[tokio::test]
async fn test_delayed_task_waits_then_runs() {
    let worker = TestWorker::new(1).started();
    worker.channels.register(ScriptedChannel::new(
        "QUICK",
        Behavior::Exit {
            exit_code: 0,
            delay: Duration::ZERO,
        },
    ));

    let dispatched_at = Instant::now();
    worker
        .runtime
        .dispatch(nearly_due(1, "QUICK", Duration::from_millis(300)))
        .await;

    let delayed = worker
        .master
        .wait_for(WAIT, |event| {
            event.task_instance_id == 1 && event.event_type == TaskEventType::Delay
        })
        .await
        .expect("delay event");
    assert_eq!(delayed.status, TaskExecutionStatus::DelayExecution);
    assert!(wait_until(WAIT, || worker.runtime.is_delayed(1)).await || worker.runtime.is_held(1));

    let running = worker
        .master
        .wait_for(WAIT, |event| {
            event.task_instance_id == 1 && event.status == TaskExecutionStatus::RunningExecution
        })
        .await
        .expect("task eventually runs");
    assert!(dispatched_at.elapsed() >= Duration::from_millis(250));
    assert!(running.start_time.is_some());

    let result = worker.wait_for_terminal(1).await;
    assert_eq!(result.status, TaskExecutionStatus::Success);

    let statuses = worker.master.statuses_for(1);
    assert_monotonic(&statuses);
    assert_eq!(
        distinct_statuses(&statuses),
        vec![
            TaskExecutionStatus::Submitted,
            TaskExecutionStatus::DelayExecution,
            TaskExecutionStatus::Dispatched,
            TaskExecutionStatus::RunningExecution,
            TaskExecutionStatus::Success,
        ]
    );
}

#[tokio::test]
async fn test_elapsed_delay_runs_immediately() {
    let worker = TestWorker::new(1).started();
    worker.channels.register(ScriptedChannel::new(
        "QUICK",
        Behavior::Exit {
            exit_code: 0,
            delay: Duration::ZERO,
        },
    ));

    let context = TaskExecutionContext::new(2, 300, "QUICK")
        .with_delay_minutes(1)
        .with_first_submit_time(Utc::now() - chrono::Duration::minutes(5));
    worker.runtime.dispatch(context).await;

    let result = worker.wait_for_terminal(2).await;
    assert_eq!(result.status, TaskExecutionStatus::Success);
    assert!(!worker
        .master
        .event_types_for(2)
        .contains(&TaskEventType::Delay));
}

#[tokio::test]
async fn test_kill_delayed_task() {
    let worker = TestWorker::new(1).started();
    let channel = ScriptedChannel::new("BLOCK", Behavior::BlockUntilCancelled);
    worker.channels.register(channel.clone());

    worker
        .runtime
        .dispatch(nearly_due(3, "BLOCK", Duration::from_secs(30)))
        .await;
    assert!(wait_until(WAIT, || worker.runtime.is_delayed(3)).await);

    assert_eq!(worker.runtime.kill(3).await, KillResponse::RemovedFromQueue);
    assert_eq!(worker.runtime.delay_queue_size(), 0);

    let result = worker.wait_for_terminal(3).await;
    assert_eq!(result.status, TaskExecutionStatus::Killed);
    assert_eq!(channel.counters.created.load(std::sync::atomic::Ordering::SeqCst), 0);
}
