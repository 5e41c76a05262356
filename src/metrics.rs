//! # Worker Metrics
//!
//! Two views of the same counters:
//!
//! - OpenTelemetry instruments created lazily from the global meter provider,
//!   so an embedding process that installs an exporter gets them for free.
//! - Process-local atomics behind [`WorkerMetrics::snapshot`] for health
//!   reporting and tests, which work whether or not an exporter is installed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};

use crate::state_machine::TaskExecutionStatus;

static WORKER_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    WORKER_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("taskweave-worker"))
}

/// Total number of tasks accepted into the dispatch queue
pub fn tasks_dispatched_total() -> Counter<u64> {
    meter()
        .u64_counter("taskweave.tasks.dispatched.total")
        .with_description("Total number of tasks accepted into the dispatch queue")
        .build()
}

/// Total number of tasks refused by admission control
///
/// Labels:
/// - reason: queue_full, pool_full, duplicate
pub fn tasks_rejected_total() -> Counter<u64> {
    meter()
        .u64_counter("taskweave.tasks.rejected.total")
        .with_description("Total number of tasks refused by admission control")
        .build()
}

/// Total number of tasks reaching a terminal status
///
/// Labels:
/// - status: SUCCESS, FAILURE, KILLED
pub fn tasks_finished_total() -> Counter<u64> {
    meter()
        .u64_counter("taskweave.tasks.finished.total")
        .with_description("Total number of tasks reaching a terminal status")
        .build()
}

/// Total number of status event delivery attempts
///
/// Labels:
/// - result: sent, failed, resend
pub fn status_events_total() -> Counter<u64> {
    meter()
        .u64_counter("taskweave.status_events.total")
        .with_description("Total number of status event delivery attempts")
        .build()
}

#[derive(Debug, Default)]
pub struct WorkerMetrics {
    dispatched: AtomicU64,
    queue_full_rejections: AtomicU64,
    pool_rejections: AtomicU64,
    duplicates: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    killed: AtomicU64,
    dry_runs: AtomicU64,
    async_checks: AtomicU64,
    messages_sent: AtomicU64,
    message_failures: AtomicU64,
    message_resends: AtomicU64,
    cleanup_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetricsSnapshot {
    pub dispatched: u64,
    pub queue_full_rejections: u64,
    pub pool_rejections: u64,
    pub duplicates: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub killed: u64,
    pub dry_runs: u64,
    pub async_checks: u64,
    pub messages_sent: u64,
    pub message_failures: u64,
    pub message_resends: u64,
    pub cleanup_failures: u64,
}

impl WorkerMetricsSnapshot {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.killed
    }
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        tasks_dispatched_total().add(1, &[]);
    }

    /// Dispatch nacked because the local queue was full
    pub fn record_queue_full(&self) {
        self.queue_full_rejections.fetch_add(1, Ordering::Relaxed);
        tasks_rejected_total().add(1, &[KeyValue::new("reason", "queue_full")]);
    }

    /// Pool refused admission because in-flight executors reached the limit
    pub fn record_pool_rejection(&self) {
        self.pool_rejections.fetch_add(1, Ordering::Relaxed);
        tasks_rejected_total().add(1, &[KeyValue::new("reason", "pool_full")]);
    }

    pub fn record_dry_run(&self) {
        self.dry_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_async_check(&self) {
        self.async_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        tasks_rejected_total().add(1, &[KeyValue::new("reason", "duplicate")]);
    }

    pub fn record_finished(&self, status: TaskExecutionStatus) {
        let counter = match status {
            TaskExecutionStatus::Success => &self.succeeded,
            TaskExecutionStatus::Killed => &self.killed,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tasks_finished_total().add(1, &[KeyValue::new("status", status.to_string())]);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        status_events_total().add(1, &[KeyValue::new("result", "sent")]);
    }

    pub fn record_message_failure(&self) {
        self.message_failures.fetch_add(1, Ordering::Relaxed);
        status_events_total().add(1, &[KeyValue::new("result", "failed")]);
    }

    pub fn record_message_resend(&self) {
        self.message_resends.fetch_add(1, Ordering::Relaxed);
        status_events_total().add(1, &[KeyValue::new("result", "resend")]);
    }

    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        WorkerMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            queue_full_rejections: self.queue_full_rejections.load(Ordering::Relaxed),
            pool_rejections: self.pool_rejections.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            dry_runs: self.dry_runs.load(Ordering::Relaxed),
            async_checks: self.async_checks.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            message_failures: self.message_failures.load(Ordering::Relaxed),
            message_resends: self.message_resends.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}
