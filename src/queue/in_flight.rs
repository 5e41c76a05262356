use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;

use super::QueueItem;

/// Outcome of a kill lookup against the queues and the in-flight set
#[derive(Debug)]
pub enum Interception<T> {
    /// The task is mid-handoff; its owner finishes it as KILLED on release
    Flagged,
    /// The task was still queued and has been taken out
    Removed(T),
    Missing,
}

/// Task instances whose context is held by a handoff between two queues
///
/// A handoff claims the id before its first await and settles it once the
/// context has reached its next home. A kill that lands in between only flags
/// the claim; the owner sees the flag when it settles and finishes the task as
/// KILLED instead of moving it on.
///
/// Queue moves that a concurrent kill must observe atomically run inside this
/// set's lock. The lock is always taken before any queue lock.
#[derive(Debug, Default)]
pub struct InFlightTasks {
    // task instance id -> kill requested
    claims: Mutex<HashMap<i32, bool>>,
}

impl InFlightTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `task_instance_id` unless it is already claimed or `known` reports it elsewhere
    pub fn claim_unless(&self, task_instance_id: i32, known: impl FnOnce() -> bool) -> bool {
        let mut claims = self.claims.lock();
        if claims.contains_key(&task_instance_id) || known() {
            return false;
        }
        claims.insert(task_instance_id, false);
        true
    }

    /// Dequeue with `take` and claim the result in one step
    pub fn claim_from<T: QueueItem>(&self, take: impl FnOnce() -> Option<T>) -> Option<T> {
        let mut claims = self.claims.lock();
        let item = take()?;
        if let Entry::Vacant(entry) = claims.entry(item.task_instance_id()) {
            entry.insert(false);
        }
        Some(item)
    }

    /// Drop a claim; `true` if a kill was requested while it was held
    pub fn release(&self, task_instance_id: i32) -> bool {
        self.claims
            .lock()
            .remove(&task_instance_id)
            .unwrap_or(false)
    }

    /// Drop the claim on `item` and hand it to `place`, unless a kill was requested
    ///
    /// `Err(item)` means the task was killed in flight and was not placed.
    pub fn settle<T: QueueItem, R>(&self, item: T, place: impl FnOnce(T) -> R) -> Result<R, T> {
        let mut claims = self.claims.lock();
        if claims.remove(&item.task_instance_id()).unwrap_or(false) {
            return Err(item);
        }
        Ok(place(item))
    }

    /// Flag a claimed task for kill, otherwise try to pull it out with `remove`
    pub fn intercept<T>(
        &self,
        task_instance_id: i32,
        remove: impl FnOnce() -> Option<T>,
    ) -> Interception<T> {
        let mut claims = self.claims.lock();
        if let Some(kill_requested) = claims.get_mut(&task_instance_id) {
            *kill_requested = true;
            return Interception::Flagged;
        }
        match remove() {
            Some(item) => Interception::Removed(item),
            None => Interception::Missing,
        }
    }

    pub fn contains(&self, task_instance_id: i32) -> bool {
        self.claims.lock().contains_key(&task_instance_id)
    }

    pub fn len(&self) -> usize {
        self.claims.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.lock().is_empty()
    }
}
