//! Scriptable task channels for driving executors through specific paths.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use taskweave_worker::error::{WorkerError, WorkerResult};
use taskweave_worker::models::TaskExecutionContext;
use taskweave_worker::registry::{ExecutionMode, TaskChannel, TaskHandleOutcome, TaskPlugin};
use taskweave_worker::services::AlertSender;
use taskweave_worker::state_machine::AsyncTaskExecutionStatus;

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Finish inline with this exit code after `delay`
    Exit { exit_code: i32, delay: Duration },
    /// Run until cancelled, then report the kill exit code
    BlockUntilCancelled,
    /// `handle` fails
    Fail(String),
    /// Submit externally; report RUNNING for `running_checks` polls, then `outcome`
    Async {
        running_checks: usize,
        outcome: AsyncTaskExecutionStatus,
    },
    /// Submit externally but complete inline with `exit_code`
    SubmittedSync { exit_code: i32 },
    /// Submit externally, then every status check fails
    AsyncCheckError(String),
    /// Channel creates no plugin instance
    NoPlugin,
}

#[derive(Debug, Default)]
pub struct PluginCounters {
    pub created: AtomicUsize,
    pub handled: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub checks: AtomicUsize,
}

impl PluginCounters {
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

pub struct ScriptedChannel {
    task_type: String,
    behavior: Behavior,
    need_alert: bool,
    pub counters: Arc<PluginCounters>,
}

impl ScriptedChannel {
    pub fn new(task_type: &str, behavior: Behavior) -> Arc<Self> {
        Self::build(task_type, behavior, false)
    }

    /// Plugins of this channel ask for an alert when they finish
    pub fn alerting(task_type: &str, behavior: Behavior) -> Arc<Self> {
        Self::build(task_type, behavior, true)
    }

    fn build(task_type: &str, behavior: Behavior, need_alert: bool) -> Arc<Self> {
        Arc::new(Self {
            task_type: task_type.to_string(),
            behavior,
            need_alert,
            counters: Arc::new(PluginCounters::default()),
        })
    }
}

pub fn application_id(task_instance_id: i32) -> String {
    format!("application_{task_instance_id}")
}

impl TaskChannel for ScriptedChannel {
    fn task_type(&self) -> &str {
        &self.task_type
    }

    fn create_task(
        &self,
        _context: &TaskExecutionContext,
    ) -> WorkerResult<Option<Arc<dyn TaskPlugin>>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, Behavior::NoPlugin) {
            return Ok(None);
        }
        Ok(Some(Arc::new(ScriptedPlugin {
            behavior: self.behavior.clone(),
            need_alert: self.need_alert,
            counters: self.counters.clone(),
            cancel: CancellationToken::new(),
        })))
    }

    fn execution_mode(&self) -> ExecutionMode {
        match self.behavior {
            Behavior::Async { .. } | Behavior::AsyncCheckError(_) => ExecutionMode::Async,
            _ => ExecutionMode::Sync,
        }
    }
}

struct ScriptedPlugin {
    behavior: Behavior,
    need_alert: bool,
    counters: Arc<PluginCounters>,
    cancel: CancellationToken,
}

#[async_trait]
impl TaskPlugin for ScriptedPlugin {
    async fn handle(&self, context: &TaskExecutionContext) -> WorkerResult<TaskHandleOutcome> {
        self.counters.handled.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Exit { exit_code, delay } => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => Ok(TaskHandleOutcome::Finished { exit_code: *exit_code }),
                    _ = self.cancel.cancelled() => Ok(TaskHandleOutcome::Finished { exit_code: 137 }),
                }
            }
            Behavior::BlockUntilCancelled => {
                self.cancel.cancelled().await;
                Ok(TaskHandleOutcome::Finished { exit_code: 137 })
            }
            Behavior::Fail(message) => Err(WorkerError::execution(message.clone())),
            Behavior::Async { .. } | Behavior::AsyncCheckError(_) => Ok(TaskHandleOutcome::Submitted {
                application_ids: vec![application_id(context.task_instance_id)],
                exit_code: 0,
            }),
            Behavior::SubmittedSync { exit_code } => Ok(TaskHandleOutcome::Submitted {
                application_ids: vec![
                    application_id(context.task_instance_id),
                    format!("{}_retry", application_id(context.task_instance_id)),
                ],
                exit_code: *exit_code,
            }),
            Behavior::NoPlugin => unreachable!("no plugin is created for this behavior"),
        }
    }

    async fn cancel(&self) -> WorkerResult<()> {
        self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(())
    }

    fn need_alert(&self) -> bool {
        self.need_alert
    }

    fn var_pool(&self) -> Option<String> {
        Some(r#"[{"prop":"result","value":"ok"}]"#.to_string())
    }

    async fn check_async_status(
        &self,
        _context: &TaskExecutionContext,
    ) -> WorkerResult<AsyncTaskExecutionStatus> {
        let checks = self.counters.checks.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Async {
                running_checks,
                outcome,
            } => {
                if self.cancel.is_cancelled() {
                    Ok(AsyncTaskExecutionStatus::Failed)
                } else if checks < *running_checks {
                    Ok(AsyncTaskExecutionStatus::Running)
                } else {
                    Ok(*outcome)
                }
            }
            Behavior::AsyncCheckError(message) => Err(WorkerError::execution(message.clone())),
            _ => Err(WorkerError::validation("not an async task")),
        }
    }

    fn async_check_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(20))
    }
}

/// Counts alert deliveries; optionally fails every one of them
#[derive(Debug, Default)]
pub struct RecordingAlertSender {
    pub fail: bool,
    pub alerts: Mutex<Vec<TaskExecutionContext>>,
}

impl RecordingAlertSender {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            alerts: Mutex::new(Vec::new()),
        })
    }

    pub fn alerted_ids(&self) -> Vec<i32> {
        self.alerts
            .lock()
            .iter()
            .map(|context| context.task_instance_id)
            .collect()
    }
}

#[async_trait]
impl AlertSender for RecordingAlertSender {
    async fn send_alert(&self, context: &TaskExecutionContext) -> WorkerResult<()> {
        self.alerts.lock().push(context.clone());
        if self.fail {
            return Err(WorkerError::execution("alert endpoint unavailable"));
        }
        Ok(())
    }
}
