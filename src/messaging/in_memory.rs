//! # In-Memory Master Client
//!
//! A [`MasterClient`] that records every delivered event in memory. Supports
//! failure injection so retry behavior can be exercised without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::client::MasterClient;
use super::errors::{MessagingError, MessagingResult};
use crate::models::{TaskEventType, TaskStatusEvent};
use crate::state_machine::TaskExecutionStatus;

#[derive(Debug, Default)]
pub struct InMemoryMasterClient {
    delivered: Mutex<Vec<TaskStatusEvent>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    offline: AtomicBool,
    delivered_notify: Notify,
}

impl InMemoryMasterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` send attempts with a connection error
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every send attempt until switched back online
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total send attempts, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<TaskStatusEvent> {
        self.delivered.lock().clone()
    }

    pub fn events_for(&self, task_instance_id: i32) -> Vec<TaskStatusEvent> {
        self.delivered
            .lock()
            .iter()
            .filter(|event| event.task_instance_id == task_instance_id)
            .cloned()
            .collect()
    }

    /// Statuses delivered for one task, in delivery order
    pub fn statuses_for(&self, task_instance_id: i32) -> Vec<TaskExecutionStatus> {
        self.events_for(task_instance_id)
            .into_iter()
            .map(|event| event.status)
            .collect()
    }

    pub fn event_types_for(&self, task_instance_id: i32) -> Vec<TaskEventType> {
        self.events_for(task_instance_id)
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }

    /// Wait until an event matching `predicate` has been delivered
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<TaskStatusEvent>
    where
        F: Fn(&TaskStatusEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.delivered_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.delivered.lock().iter().find(|e| predicate(e)).cloned() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Wait for a terminal result of one task
    pub async fn wait_for_terminal(
        &self,
        task_instance_id: i32,
        timeout: Duration,
    ) -> Option<TaskStatusEvent> {
        self.wait_for(timeout, |event| {
            event.task_instance_id == task_instance_id && event.status.is_terminal()
        })
        .await
    }

    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

#[async_trait]
impl MasterClient for InMemoryMasterClient {
    async fn send_event(&self, event: &TaskStatusEvent) -> MessagingResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.offline.load(Ordering::SeqCst) {
            return Err(MessagingError::connection("master offline"));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(MessagingError::connection("injected send failure"));
        }

        debug!(
            task_instance_id = event.task_instance_id,
            event_type = %event.event_type,
            status = %event.status,
            "In-memory master received event"
        );
        self.delivered.lock().push(event.clone());
        self.delivered_notify.notify_waiters();
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
