//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

pub mod plugins;
pub mod strategies;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use taskweave_worker::config::{TaskExecutorFullPolicy, WorkerConfig};
use taskweave_worker::messaging::{InMemoryMasterClient, MasterClient, MessagingResult};
use taskweave_worker::models::{TaskEventType, TaskStatusEvent};
use taskweave_worker::registry::TaskChannelRegistry;
use taskweave_worker::services::AlertSender;
use taskweave_worker::state_machine::TaskExecutionStatus;
use taskweave_worker::worker::WorkerRuntime;

pub use plugins::*;

pub const WAIT: Duration = Duration::from_secs(10);

/// Configuration rooted in `exec_base_dir` with short retry intervals
pub fn test_config(exec_base_dir: &Path, exec_threads: usize) -> WorkerConfig {
    WorkerConfig {
        exec_threads,
        full_policy: TaskExecutorFullPolicy::Reject,
        admission_retry_interval_ms: 20,
        message_send_timeout_ms: 1_000,
        exec_base_dir: exec_base_dir.to_path_buf(),
        host: "test-worker:1234".to_string(),
        ..WorkerConfig::default()
    }
}

pub struct TestWorker {
    pub runtime: WorkerRuntime,
    pub master: Arc<InMemoryMasterClient>,
    pub channels: Arc<TaskChannelRegistry>,
    pub workdir: tempfile::TempDir,
}

impl TestWorker {
    pub fn new(exec_threads: usize) -> Self {
        Self::with_config(|config| config.exec_threads = exec_threads)
    }

    pub fn with_config(adjust: impl FnOnce(&mut WorkerConfig)) -> Self {
        Self::assemble(adjust, |master| master as Arc<dyn MasterClient>, None)
    }

    /// Deliveries of `slow_events` take `latency` before the master records them
    pub fn with_slow_master(
        exec_threads: usize,
        latency: Duration,
        slow_events: Vec<TaskEventType>,
    ) -> Self {
        Self::assemble(
            |config| config.exec_threads = exec_threads,
            |master| {
                Arc::new(SlowMasterClient {
                    inner: master,
                    latency,
                    slow_events,
                }) as Arc<dyn MasterClient>
            },
            None,
        )
    }

    pub fn with_alert_sender(alert_sender: Arc<dyn AlertSender>) -> Self {
        Self::assemble(|_| {}, |master| master as Arc<dyn MasterClient>, Some(alert_sender))
    }

    fn assemble(
        adjust: impl FnOnce(&mut WorkerConfig),
        transport: impl FnOnce(Arc<InMemoryMasterClient>) -> Arc<dyn MasterClient>,
        alert_sender: Option<Arc<dyn AlertSender>>,
    ) -> Self {
        let workdir = tempfile::tempdir().unwrap();
        let mut config = test_config(workdir.path(), 4);
        adjust(&mut config);

        let master = Arc::new(InMemoryMasterClient::new());
        let channels = Arc::new(TaskChannelRegistry::with_builtin_channels());
        let mut builder = WorkerRuntime::builder(config)
            .master_client(transport(master.clone()))
            .channels(channels.clone());
        if let Some(alert_sender) = alert_sender {
            builder = builder.alert_sender(alert_sender);
        }
        let runtime = builder.build().unwrap();
        Self {
            runtime,
            master,
            channels,
            workdir,
        }
    }

    pub fn started(self) -> Self {
        self.runtime.start();
        self
    }

    pub async fn wait_for_terminal(&self, task_instance_id: i32) -> TaskStatusEvent {
        self.master
            .wait_for_terminal(task_instance_id, WAIT)
            .await
            .unwrap_or_else(|| panic!("task {task_instance_id} never reached a terminal status"))
    }

    /// Terminal events are sent before the holder entry is released
    pub async fn wait_for_idle(&self) {
        assert!(
            wait_until(WAIT, || self.runtime.holder_size() == 0).await,
            "holder never drained"
        );
    }
}

/// Master transport that stalls on selected event types before recording them
pub struct SlowMasterClient {
    inner: Arc<InMemoryMasterClient>,
    latency: Duration,
    slow_events: Vec<TaskEventType>,
}

#[async_trait]
impl MasterClient for SlowMasterClient {
    async fn send_event(&self, event: &TaskStatusEvent) -> MessagingResult<()> {
        if self.slow_events.contains(&event.event_type) {
            tokio::time::sleep(self.latency).await;
        }
        self.inner.send_event(event).await
    }

    fn name(&self) -> &str {
        "slow-in-memory"
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collapse consecutive repeats, e.g. two RUNNING notices
pub fn distinct_statuses(statuses: &[TaskExecutionStatus]) -> Vec<TaskExecutionStatus> {
    let mut distinct = statuses.to_vec();
    distinct.dedup();
    distinct
}

pub fn assert_monotonic(statuses: &[TaskExecutionStatus]) {
    for pair in statuses.windows(2) {
        assert!(
            pair[0].rank() <= pair[1].rank(),
            "status regressed: {:?} -> {:?} in {:?}",
            pair[0],
            pair[1],
            statuses
        );
    }
}
