//! # Shell Task Channel
//!
//! Runs `task_params.raw_script` with `sh -c` inside the task working directory.
//! The script is the leader of its own process group, and its stdout/stderr are
//! appended to the task log file.

use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::process::Command;
use tracing::{debug, info};

use super::task_channel::{TaskChannel, TaskHandleOutcome, TaskPlugin};
use crate::constants::{task_env, task_types};
use crate::error::{WorkerError, WorkerResult};
use crate::models::TaskExecutionContext;
use crate::process::kill_process_tree;

#[derive(Debug, Default)]
pub struct ShellTaskChannel;

impl ShellTaskChannel {
    pub fn new() -> Self {
        Self
    }
}

impl TaskChannel for ShellTaskChannel {
    fn task_type(&self) -> &str {
        task_types::SHELL
    }

    fn create_task(
        &self,
        context: &TaskExecutionContext,
    ) -> WorkerResult<Option<Arc<dyn TaskPlugin>>> {
        let script = context
            .task_params
            .get("raw_script")
            .and_then(|value| value.as_str())
            .ok_or_else(|| {
                WorkerError::validation(format!(
                    "shell task {} has no raw_script parameter",
                    context.task_instance_id
                ))
            })?;
        Ok(Some(Arc::new(ShellTask::new(script))))
    }
}

#[derive(Debug)]
pub struct ShellTask {
    script: String,
    pid: AtomicU32,
}

impl ShellTask {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            pid: AtomicU32::new(0),
        }
    }

    pub fn process_id(&self) -> u32 {
        self.pid.load(Ordering::SeqCst)
    }

    async fn output(context: &TaskExecutionContext) -> WorkerResult<(Stdio, Stdio)> {
        let Some(log_path) = context.log_path.as_ref() else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await?
            .into_std()
            .await;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

#[async_trait]
impl TaskPlugin for ShellTask {
    async fn handle(&self, context: &TaskExecutionContext) -> WorkerResult<TaskHandleOutcome> {
        let execute_path = context.execute_path.as_ref().ok_or_else(|| {
            WorkerError::validation(format!(
                "shell task {} has no working directory",
                context.task_instance_id
            ))
        })?;
        let (stdout, stderr) = Self::output(context).await?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.script)
            .current_dir(execute_path)
            .env(task_env::TASK_INSTANCE_ID, context.task_instance_id.to_string())
            .env(
                task_env::WORKFLOW_INSTANCE_ID,
                context.workflow_instance_id.to_string(),
            )
            .env(task_env::EXECUTE_PATH, execute_path)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|e| WorkerError::process(format!("failed to spawn shell task: {e}")))?;

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        info!(
            task_instance_id = context.task_instance_id,
            pid = pid,
            "Shell task started"
        );
        Ok(TaskHandleOutcome::Spawned { child })
    }

    async fn cancel(&self) -> WorkerResult<()> {
        let pid = self.process_id();
        debug!(pid = pid, "Cancelling shell task");
        kill_process_tree(pid).await
    }

    fn process_reaped(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{wait_with_timeout, ProcessExit};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_missing_script_is_rejected() {
        let context = TaskExecutionContext::new(1, 1, "SHELL");
        assert!(ShellTaskChannel::new().create_task(&context).is_err());
    }

    #[tokio::test]
    async fn test_script_runs_in_workdir_and_logs_output() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("logs").join("task.log");
        let mut context = TaskExecutionContext::new(7, 3, "SHELL")
            .with_params(json!({ "raw_script": "echo hello > out.txt; echo logged; exit 2" }))
            .with_execute_path(dir.path());
        context.log_path = Some(log_path.clone());

        let plugin = ShellTaskChannel::new()
            .create_task(&context)
            .unwrap()
            .unwrap();
        let TaskHandleOutcome::Spawned { mut child } = plugin.handle(&context).await.unwrap()
        else {
            panic!("shell task should spawn a process");
        };

        let exit = wait_with_timeout(&mut child, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exit, ProcessExit::Exited(2));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "hello\n"
        );
        assert!(std::fs::read_to_string(log_path).unwrap().contains("logged"));
    }

    #[tokio::test]
    async fn test_cancel_kills_running_script() {
        let dir = tempfile::tempdir().unwrap();
        let context = TaskExecutionContext::new(8, 3, "SHELL")
            .with_params(json!({ "raw_script": "sleep 30" }))
            .with_execute_path(dir.path());

        let plugin = ShellTask::new("sleep 30");
        let TaskHandleOutcome::Spawned { mut child } = plugin.handle(&context).await.unwrap()
        else {
            panic!("shell task should spawn a process");
        };
        plugin.cancel().await.unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(crate::process::exit_code_of(status), 137);
    }

    #[tokio::test]
    async fn test_reaped_process_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let context = TaskExecutionContext::new(9, 3, "SHELL").with_execute_path(dir.path());

        let plugin = ShellTask::new("exit 0");
        let TaskHandleOutcome::Spawned { mut child } = plugin.handle(&context).await.unwrap()
        else {
            panic!("shell task should spawn a process");
        };
        assert!(plugin.process_id() > 0);
        child.wait().await.unwrap();

        plugin.process_reaped();
        assert_eq!(plugin.process_id(), 0);
        // Nothing left to signal
        plugin.cancel().await.unwrap();
    }
}
