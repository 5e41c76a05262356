//! Backpressure, single-flight admission and kill routing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::assert_ok;

use common::*;
use taskweave_worker::config::TaskExecutorFullPolicy;
use taskweave_worker::error::WorkerError;
use taskweave_worker::execution::{ExecutorServices, TaskExecutorFactory, TaskExecutorThreadPool};
use taskweave_worker::messaging::InMemoryMasterClient;
use taskweave_worker::models::{TaskEventType, TaskExecutionContext};
use taskweave_worker::registry::TaskChannelRegistry;
use taskweave_worker::services::{LocalStorageOperator, LoggingAlertSender};
use taskweave_worker::state_machine::TaskExecutionStatus;
use taskweave_worker::{DispatchResponse, KillResponse};

fn blocking(task_instance_id: i32) -> TaskExecutionContext {
    TaskExecutionContext::new(task_instance_id, 200, "BLOCK")
}

struct PoolFixture {
    services: Arc<ExecutorServices>,
    factory: TaskExecutorFactory,
    pool: Arc<TaskExecutorThreadPool>,
    channel: Arc<ScriptedChannel>,
    _workdir: tempfile::TempDir,
}

fn pool_fixture(exec_threads: usize, full_policy: TaskExecutorFullPolicy) -> PoolFixture {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = test_config(workdir.path(), exec_threads);
    config.full_policy = full_policy;
    let config = Arc::new(config);
    let channels = Arc::new(TaskChannelRegistry::new());
    let channel = ScriptedChannel::new("BLOCK", Behavior::BlockUntilCancelled);
    channels.register(channel.clone());

    let services = Arc::new(ExecutorServices::new(
        config.clone(),
        channels,
        Arc::new(InMemoryMasterClient::new()),
        Arc::new(LocalStorageOperator::new(None, None)),
        Arc::new(LoggingAlertSender),
    ));
    let pool = Arc::new(TaskExecutorThreadPool::new(
        &config,
        services.holder.clone(),
        services.metrics.clone(),
    ));
    PoolFixture {
        factory: TaskExecutorFactory::new(services.clone()),
        services,
        pool,
        channel,
        _workdir: workdir,
    }
}

#[tokio::test]
async fn test_queue_full_nacks_with_recall() {
    // Not started: nothing drains the dispatch queue
    let worker = TestWorker::new(3);

    for id in 1..=3 {
        assert_eq!(worker.runtime.dispatch(blocking(id)).await, DispatchResponse::Accepted);
    }
    assert_eq!(worker.runtime.dispatch(blocking(4)).await, DispatchResponse::QueueFull);
    assert_eq!(worker.runtime.dispatch_queue_size(), 3);

    let rejected = worker.master.events_for(4);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].event_type, TaskEventType::Recall);

    let metrics = worker.runtime.metrics();
    assert_eq!(metrics.dispatched, 3);
    assert_eq!(metrics.queue_full_rejections, 1);
}

#[tokio::test]
async fn test_overloaded_pool_pauses_dispatch_queue() {
    let worker = TestWorker::new(1).started();
    let channel = ScriptedChannel::new("BLOCK", Behavior::BlockUntilCancelled);
    worker.channels.register(channel.clone());

    assert!(worker.runtime.dispatch(blocking(1)).await.is_accepted());
    assert!(wait_until(WAIT, || channel.counters.handled() == 1).await);

    // The pool is full, so the second task waits in the dispatch queue
    assert!(worker.runtime.dispatch(blocking(2)).await.is_accepted());
    assert_eq!(worker.runtime.dispatch(blocking(3)).await, DispatchResponse::QueueFull);
    assert_eq!(worker.runtime.dispatch_queue_size(), 1);
    assert!(!worker.runtime.is_held(2));

    assert_eq!(worker.runtime.kill(1).await, KillResponse::Cancelled);
    let second = worker
        .master
        .wait_for(WAIT, |event| {
            event.task_instance_id == 2 && event.status == TaskExecutionStatus::RunningExecution
        })
        .await;
    assert!(second.is_some(), "queued task never ran after the pool freed up");

    worker.runtime.kill(2).await;
    worker.wait_for_terminal(2).await;
}

#[tokio::test]
async fn test_continue_policy_never_rejects() {
    let worker = TestWorker::with_config(|config| {
        config.exec_threads = 1;
        config.full_policy = TaskExecutorFullPolicy::Continue;
    });
    for id in 1..=5 {
        assert!(worker.runtime.dispatch(blocking(id)).await.is_accepted());
    }
    assert_eq!(worker.runtime.dispatch_queue_size(), 5);
    assert_eq!(worker.runtime.metrics().queue_full_rejections, 0);
}

#[tokio::test]
async fn test_pool_rejects_over_capacity() {
    let fixture = pool_fixture(1, TaskExecutorFullPolicy::Reject);

    let first = fixture.factory.create(blocking(1));
    assert!(assert_ok!(fixture.pool.submit(first).await));
    assert!(fixture.pool.is_overloaded());

    let second = fixture.factory.create(blocking(2));
    assert!(!assert_ok!(fixture.pool.submit(second).await));
    assert!(!fixture.services.holder.contains(2));
    assert_eq!(fixture.services.metrics.snapshot().pool_rejections, 1);

    assert!(wait_until(WAIT, || fixture.channel.counters.handled() == 1).await);
    fixture.services.holder.get(1).unwrap().kill().await;
    assert!(wait_until(WAIT, || fixture.services.holder.size() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admission_is_single_flight() {
    let fixture = pool_fixture(4, TaskExecutorFullPolicy::Reject);

    let submissions = (0..8).map(|_| {
        let pool = fixture.pool.clone();
        let executor = fixture.factory.create(blocking(7));
        tokio::spawn(async move { pool.submit(executor).await })
    });
    let results: Vec<_> = join_all(submissions)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let admitted = results.iter().filter(|result| matches!(result, Ok(true))).count();
    let duplicates = results
        .iter()
        .filter(|result| matches!(result, Err(WorkerError::DuplicateTaskExecutor { task_instance_id: 7 })))
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(fixture.services.holder.size(), 1);

    assert!(wait_until(WAIT, || fixture.channel.counters.handled() == 1).await);
    fixture.services.holder.get(7).unwrap().kill().await;
    assert!(wait_until(WAIT, || fixture.services.holder.size() == 0).await);
    assert_eq!(fixture.channel.counters.handled(), 1);
}

#[tokio::test]
async fn test_duplicate_dispatch_ignored() {
    let worker = TestWorker::new(2);
    assert!(worker.runtime.dispatch(blocking(1)).await.is_accepted());
    assert_eq!(worker.runtime.dispatch(blocking(1)).await, DispatchResponse::Duplicate);
    assert_eq!(worker.runtime.dispatch_queue_size(), 1);
    assert_eq!(worker.runtime.metrics().duplicates, 1);
}

#[tokio::test]
async fn test_kill_queued_task_reports_killed() {
    let worker = TestWorker::new(2);
    worker.runtime.dispatch(blocking(1)).await;

    assert_eq!(worker.runtime.kill(1).await, KillResponse::RemovedFromQueue);
    assert_eq!(worker.runtime.dispatch_queue_size(), 0);

    let result = worker.wait_for_terminal(1).await;
    assert_eq!(result.status, TaskExecutionStatus::Killed);
    assert_eq!(result.exit_code, Some(137));
    assert_eq!(worker.runtime.kill(1).await, KillResponse::NotFound);
}

#[tokio::test]
async fn test_kill_before_execute_never_runs_plugin() {
    let fixture = pool_fixture(1, TaskExecutorFullPolicy::Continue);
    let pool = &fixture.pool;

    // Occupy the only permit so the second executor stays pending
    let blocker = fixture.factory.create(blocking(1));
    assert!(assert_ok!(pool.submit(blocker).await));
    assert!(wait_until(WAIT, || fixture.channel.counters.handled() == 1).await);

    let waiting = fixture.factory.create(blocking(2));
    assert!(assert_ok!(pool.submit(waiting.clone()).await));
    assert!(pool.is_pending(2));
    assert_eq!(pool.active_count(), 1);

    assert!(pool.kill_task_before_execute_by_instance_id(2).await);
    assert!(waiting.is_finished());
    assert!(waiting.is_killed());
    assert_eq!(waiting.status(), TaskExecutionStatus::Killed);
    assert!(!fixture.services.holder.contains(2));
    assert!(!pool.kill_task_before_execute_by_instance_id(2).await);

    fixture.services.holder.get(1).unwrap().kill().await;
    assert!(wait_until(WAIT, || fixture.services.holder.size() == 0).await);
    assert_eq!(fixture.channel.counters.handled(), 1);
    assert_eq!(fixture.channel.counters.created.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_kill_during_delay_notice_is_not_lost() {
    let worker =
        TestWorker::with_slow_master(1, Duration::from_millis(300), vec![TaskEventType::Delay])
            .started();
    let channel = ScriptedChannel::new("BLOCK", Behavior::BlockUntilCancelled);
    worker.channels.register(channel.clone());

    assert!(worker
        .runtime
        .dispatch(blocking(1).with_delay_minutes(1))
        .await
        .is_accepted());
    // Taken from the dispatch queue, delay notice still in transit
    assert!(wait_until(WAIT, || worker.runtime.is_in_flight(1)).await);
    assert_eq!(worker.runtime.kill(1).await, KillResponse::Intercepted);

    let result = worker.wait_for_terminal(1).await;
    assert_eq!(result.status, TaskExecutionStatus::Killed);
    assert_eq!(result.exit_code, Some(137));
    assert!(wait_until(WAIT, || !worker.runtime.is_in_flight(1)).await);
    assert!(!worker.runtime.is_delayed(1));
    assert_eq!(worker.runtime.delay_queue_size(), 0);
    assert_eq!(channel.counters.created.load(std::sync::atomic::Ordering::SeqCst), 0);

    let statuses = worker.master.statuses_for(1);
    assert_monotonic(&statuses);
    assert_eq!(statuses.last(), Some(&TaskExecutionStatus::Killed));
}

#[tokio::test]
async fn test_kill_during_dispatch_notice_is_not_lost() {
    // Not started, so only the dispatch call itself holds the task
    let worker =
        TestWorker::with_slow_master(2, Duration::from_millis(300), vec![TaskEventType::Dispatch]);

    let (dispatched, killed) = tokio::join!(worker.runtime.dispatch(blocking(1)), async {
        assert!(wait_until(WAIT, || worker.runtime.is_in_flight(1)).await);
        worker.runtime.kill(1).await
    });
    assert_eq!(dispatched, DispatchResponse::Accepted);
    assert_eq!(killed, KillResponse::Intercepted);
    assert_eq!(worker.runtime.dispatch_queue_size(), 0);
    assert!(!worker.runtime.is_in_flight(1));

    let result = worker.wait_for_terminal(1).await;
    assert_eq!(result.status, TaskExecutionStatus::Killed);
    assert_eq!(result.exit_code, Some(137));
    assert_eq!(
        worker.master.statuses_for(1),
        vec![TaskExecutionStatus::Submitted, TaskExecutionStatus::Killed]
    );
    assert_eq!(worker.runtime.kill(1).await, KillResponse::NotFound);
}

#[tokio::test]
async fn test_duplicate_dispatch_during_notice_ignored() {
    let worker =
        TestWorker::with_slow_master(2, Duration::from_millis(300), vec![TaskEventType::Dispatch]);

    let (first, second) = tokio::join!(worker.runtime.dispatch(blocking(1)), async {
        assert!(wait_until(WAIT, || worker.runtime.is_in_flight(1)).await);
        worker.runtime.dispatch(blocking(1)).await
    });
    assert_eq!(first, DispatchResponse::Accepted);
    assert_eq!(second, DispatchResponse::Duplicate);
    assert_eq!(worker.runtime.dispatch_queue_size(), 1);
    assert_eq!(worker.runtime.metrics().duplicates, 1);
    assert_eq!(worker.master.events_for(1).len(), 1);
}
