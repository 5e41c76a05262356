use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::QueueItem;

struct DelayedEntry<T> {
    deadline: Instant,
    seq: u64,
    item: T,
}

// BinaryHeap is a max-heap: invert so the earliest deadline (then lowest seq) is on top.
impl<T> Ord for DelayedEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for DelayedEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for DelayedEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for DelayedEntry<T> {}

/// Time-ordered queue: `take()` blocks until the head's deadline has passed
///
/// Entries with equal deadlines come out in insertion order.
pub struct DelayQueue<T> {
    heap: Mutex<BinaryHeap<DelayedEntry<T>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl<T> std::fmt::Debug for DelayQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue")
            .field("size", &self.heap.lock().len())
            .finish()
    }
}

impl<T: QueueItem> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> DelayQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Insert `item`, eligible once `deadline` has passed
    pub fn put(&self, item: T, deadline: Instant) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(DelayedEntry {
            deadline,
            seq,
            item,
        });
        // Wake the consumer so it can re-evaluate the head deadline.
        self.notify.notify_one();
    }

    pub fn put_after(&self, item: T, delay: Duration) {
        self.put(item, Instant::now() + delay);
    }

    /// Wait for the earliest entry whose deadline has passed and dequeue it
    pub async fn take(&self) -> T {
        loop {
            self.ready().await;
            if let Some(item) = self.try_take() {
                return item;
            }
        }
    }

    /// Wait until the head's deadline has passed without dequeuing
    pub async fn ready(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let head_deadline = self.heap.lock().peek().map(|entry| entry.deadline);
            match head_deadline {
                Some(deadline) if deadline <= Instant::now() => return,
                Some(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        _ = notified.as_mut() => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Dequeue the head only if its deadline has already passed
    pub fn try_take(&self) -> Option<T> {
        let mut heap = self.heap.lock();
        let ready = heap
            .peek()
            .is_some_and(|entry| entry.deadline <= Instant::now());
        if ready {
            heap.pop().map(|entry| entry.item)
        } else {
            None
        }
    }

    /// Remove a task by instance id regardless of its deadline (linear scan)
    pub fn remove(&self, task_instance_id: i32) -> Option<T> {
        let mut heap = self.heap.lock();
        let mut entries = std::mem::take(&mut *heap).into_vec();
        let position = entries
            .iter()
            .position(|entry| entry.item.task_instance_id() == task_instance_id);
        let removed = position.map(|index| entries.swap_remove(index).item);
        *heap = BinaryHeap::from(entries);
        removed
    }

    pub fn contains(&self, task_instance_id: i32) -> bool {
        self.heap
            .lock()
            .iter()
            .any(|entry| entry.item.task_instance_id() == task_instance_id)
    }

    pub fn size(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Drain every entry regardless of deadline, used at shutdown
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.heap.lock())
            .into_vec()
            .into_iter()
            .map(|entry| entry.item)
            .collect()
    }
}
