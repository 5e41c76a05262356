use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::QueueItem;

/// FIFO queue of accepted-but-not-admitted tasks
///
/// `capacity == None` accepts everything (the `CONTINUE` policy); otherwise `offer`
/// returns the item back once the queue holds `capacity` entries.
#[derive(Debug)]
pub struct TaskDispatchQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: Option<usize>,
    notify: Notify,
}

impl<T: QueueItem> TaskDispatchQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
            notify: Notify::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: None,
            notify: Notify::new(),
        }
    }

    /// Enqueue `item`, handing it back when the queue is full
    pub fn try_offer(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.items.lock();
            if let Some(capacity) = self.capacity {
                if items.len() >= capacity {
                    debug!(
                        task_instance_id = item.task_instance_id(),
                        capacity = capacity,
                        "Dispatch queue full, rejecting offer"
                    );
                    return Err(item);
                }
            }
            items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Enqueue `item`; `false` means the queue was full and the item was dropped
    pub fn offer(&self, item: T) -> bool {
        self.try_offer(item).is_ok()
    }

    /// Wait until an entry is available and dequeue it
    ///
    /// Cancel-safe: an entry is only removed on the final, non-awaiting step.
    pub async fn take(&self) -> T {
        loop {
            self.ready().await;
            if let Some(item) = self.try_take() {
                return item;
            }
        }
    }

    /// Wait until the queue is non-empty without dequeuing
    ///
    /// Lets the caller dequeue with `try_take` under its own lock. Another consumer
    /// may win the race, so that `try_take` can still come back empty.
    pub async fn ready(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.items.lock().is_empty() {
                return;
            }
            notified.await;
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Remove a queued task by instance id (linear scan)
    pub fn remove(&self, task_instance_id: i32) -> Option<T> {
        let mut items = self.items.lock();
        let position = items
            .iter()
            .position(|item| item.task_instance_id() == task_instance_id)?;
        items.remove(position)
    }

    pub fn contains(&self, task_instance_id: i32) -> bool {
        self.items
            .lock()
            .iter()
            .any(|item| item.task_instance_id() == task_instance_id)
    }

    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.items.lock().len() >= capacity)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Drain every queued entry, used at shutdown
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }
}
