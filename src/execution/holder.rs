//! Registry of live executors on this worker.
//!
//! At most one executor per task instance id exists at any time. Inserting a
//! second one is an error; the first executor is left untouched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use super::executor::TaskExecutor;
use crate::error::{WorkerError, WorkerResult};

#[derive(Default)]
pub struct TaskExecutorHolder {
    executors: Mutex<HashMap<i32, Arc<TaskExecutor>>>,
}

impl std::fmt::Debug for TaskExecutorHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutorHolder")
            .field("size", &self.size())
            .finish()
    }
}

impl TaskExecutorHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, executor: Arc<TaskExecutor>) -> WorkerResult<()> {
        let task_instance_id = executor.task_instance_id();
        let mut executors = self.executors.lock();
        if executors.contains_key(&task_instance_id) {
            error!(
                task_instance_id = task_instance_id,
                "Refusing to register a second executor for the same task instance"
            );
            return Err(WorkerError::DuplicateTaskExecutor { task_instance_id });
        }
        executors.insert(task_instance_id, executor);
        debug!(task_instance_id = task_instance_id, "Executor registered");
        Ok(())
    }

    pub fn get(&self, task_instance_id: i32) -> Option<Arc<TaskExecutor>> {
        self.executors.lock().get(&task_instance_id).cloned()
    }

    pub fn remove(&self, task_instance_id: i32) -> Option<Arc<TaskExecutor>> {
        let removed = self.executors.lock().remove(&task_instance_id);
        if removed.is_some() {
            debug!(task_instance_id = task_instance_id, "Executor removed");
        }
        removed
    }

    pub fn contains(&self, task_instance_id: i32) -> bool {
        self.executors.lock().contains_key(&task_instance_id)
    }

    pub fn size(&self) -> usize {
        self.executors.lock().len()
    }

    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.executors.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every executor, returning them
    pub fn clear(&self) -> Vec<Arc<TaskExecutor>> {
        self.executors.lock().drain().map(|(_, executor)| executor).collect()
    }
}
