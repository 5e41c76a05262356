//! Status delivery converges on the final state despite master outages.

mod common;

use std::time::Duration;

use common::*;
use taskweave_worker::models::{TaskEventType, TaskExecutionContext};
use taskweave_worker::state_machine::TaskExecutionStatus;

fn quiet_sweep_worker(exec_threads: usize) -> TestWorker {
    // Sweeps are driven by hand so attempt counts stay deterministic
    let worker = TestWorker::with_config(|config| {
        config.exec_threads = exec_threads;
        config.message_retry_interval_secs = 3_600;
    });
    worker.channels.register(ScriptedChannel::new(
        "QUICK",
        Behavior::Exit {
            exit_code: 0,
            delay: Duration::from_millis(5),
        },
    ));
    worker.started()
}

#[tokio::test]
async fn test_offline_master_receives_only_final_status() {
    let worker = quiet_sweep_worker(1);
    worker.master.set_offline(true);

    worker
        .runtime
        .dispatch(TaskExecutionContext::new(1, 400, "QUICK"))
        .await;
    worker.wait_for_idle().await;
    assert!(worker.master.events().is_empty());

    // Earlier notices were superseded by the terminal result
    assert_eq!(worker.runtime.pending_message_count(), 1);

    worker.master.set_offline(false);
    worker.master.fail_next(2);
    assert_eq!(worker.runtime.retry_pending_messages().await, 0);
    assert_eq!(worker.runtime.retry_pending_messages().await, 0);
    assert_eq!(worker.runtime.pending_message_count(), 1);
    assert_eq!(worker.runtime.retry_pending_messages().await, 1);
    assert_eq!(worker.runtime.pending_message_count(), 0);

    assert_eq!(
        worker.master.statuses_for(1),
        vec![TaskExecutionStatus::Success]
    );
    assert_eq!(worker.runtime.retry_pending_messages().await, 0);
    assert_eq!(worker.master.events_for(1).len(), 1);
}

#[tokio::test]
async fn test_transient_failures_never_regress_status() {
    let worker = quiet_sweep_worker(2);

    for id in 10..15 {
        // Alternate failures across the lifecycle of several tasks
        worker.master.fail_next(1);
        worker
            .runtime
            .dispatch(TaskExecutionContext::new(id, 400, "QUICK"))
            .await;
    }
    worker.wait_for_idle().await;

    for _ in 0..3 {
        worker.runtime.retry_pending_messages().await;
    }
    assert_eq!(worker.runtime.pending_message_count(), 0);

    for id in 10..15 {
        let statuses = worker.master.statuses_for(id);
        assert_monotonic(&statuses);
        assert_eq!(statuses.last(), Some(&TaskExecutionStatus::Success));
    }
    let metrics = worker.runtime.metrics();
    assert!(metrics.message_failures >= 5);
    assert_eq!(metrics.succeeded, 5);
}

#[tokio::test]
async fn test_recall_retried_until_delivered() {
    let worker = TestWorker::new(1);
    worker.master.set_offline(true);

    worker
        .runtime
        .dispatch(TaskExecutionContext::new(20, 400, "QUICK"))
        .await;
    assert_eq!(worker.runtime.dispatch_queue_size(), 1);
    worker
        .runtime
        .dispatch(TaskExecutionContext::new(21, 400, "QUICK"))
        .await;

    let pending_before = worker.runtime.pending_message_count();
    assert_eq!(pending_before, 2);

    worker.master.set_offline(false);
    assert_eq!(worker.runtime.retry_pending_messages().await, 2);
    assert_eq!(
        worker.master.event_types_for(21),
        vec![TaskEventType::Recall]
    );
}

#[tokio::test]
async fn test_ack_clears_cached_event() {
    let worker = TestWorker::new(1);
    worker.master.set_offline(true);

    worker
        .runtime
        .dispatch(TaskExecutionContext::new(30, 400, "QUICK"))
        .await;
    assert_eq!(worker.runtime.pending_message_count(), 1);

    assert!(!worker.runtime.ack(30, TaskEventType::Finish));
    assert!(worker.runtime.ack(30, TaskEventType::Dispatch));
    assert_eq!(worker.runtime.pending_message_count(), 0);
}
