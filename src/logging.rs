//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, when the log
//! directory is writable, a JSON file. Per-task attribution uses a `task` span
//! instead of ambient state, so concurrent executors never mix their fields.

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;

use chrono::Utc;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::models::TaskExecutionContext;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// `RUST_LOG` overrides the environment's default level. Safe to call repeatedly.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(filter());

        let pid = process::id();
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_dir = PathBuf::from("log");
        let log_filename = format!("{environment}.worker.{pid}.{timestamp}.log");

        let file_layer = match fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
                let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
                // The writer must outlive every log call.
                std::mem::forget(guard);
                Some(
                    fmt::layer()
                        .with_writer(file_writer)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(false)
                        .json()
                        .with_filter(filter()),
                )
            }
            Err(_) => None,
        };
        let file_enabled = file_layer.is_some();

        // Another subscriber may already be installed by the embedding process.
        if tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = pid,
            environment = %environment,
            log_file = %log_dir.join(&log_filename).display(),
            file_enabled = file_enabled,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("TASKWEAVE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Span carrying the attribution fields of one task attempt
pub fn task_span(context: &TaskExecutionContext) -> Span {
    tracing::info_span!(
        "task",
        task_instance_id = context.task_instance_id,
        workflow_instance_id = context.workflow_instance_id,
        task_type = %context.task_type,
        log_path = context
            .log_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
    )
}

/// Log structured data for task operations
pub fn log_task_operation(
    operation: &str,
    task_instance_id: i32,
    task_name: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_instance_id = task_instance_id,
        task_name = task_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
