//! Worker Binary
//!
//! Runs a worker runtime against an in-memory master. Commands arrive on stdin,
//! one JSON object per line:
//!
//! ```text
//! {"dispatch": {"task_instance_id": 1, "workflow_instance_id": 1, "task_type": "SHELL",
//!               "first_submit_time": "2024-01-01T00:00:00Z", "task_params": {"raw_script": "echo hi"}}}
//! {"kill": 1}
//! "metrics"
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use taskweave_worker::config::ConfigManager;
use taskweave_worker::logging::init_structured_logging;
use taskweave_worker::messaging::InMemoryMasterClient;
use taskweave_worker::models::TaskExecutionContext;
use taskweave_worker::worker::WorkerRuntime;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WorkerCommand {
    Dispatch(Box<TaskExecutionContext>),
    Kill(i32),
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();

    let config_manager = ConfigManager::load().context("failed to load worker configuration")?;
    info!(config = %config_manager.debug_config(), "Configuration loaded");

    let master = Arc::new(InMemoryMasterClient::new());
    let runtime = WorkerRuntime::builder(config_manager.config().clone())
        .master_client(master.clone())
        .build()
        .context("failed to build worker runtime")?;
    runtime.start();
    info!("Worker ready, reading commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerCommand>(&line) {
                    Ok(WorkerCommand::Dispatch(context)) => {
                        let response = runtime.dispatch(*context).await;
                        println!("{}", serde_json::to_string(&response)?);
                    }
                    Ok(WorkerCommand::Kill(task_instance_id)) => {
                        let response = runtime.kill(task_instance_id).await;
                        println!("{}", serde_json::to_string(&response)?);
                    }
                    Ok(WorkerCommand::Metrics) => {
                        println!("{}", serde_json::to_string(&runtime.metrics())?);
                    }
                    Err(error) => warn!(error = %error, "Ignoring malformed command"),
                }
            }
        }
    }

    runtime.shutdown(Duration::from_secs(30)).await;
    info!(delivered_events = master.events().len(), "Worker stopped");
    Ok(())
}
