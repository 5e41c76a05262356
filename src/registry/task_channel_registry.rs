//! # Task Channel Registry
//!
//! Thread-safe map from task type tag to [`TaskChannel`]. Lookups are
//! case-insensitive: `shell` and `SHELL` resolve to the same channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::shell::ShellTaskChannel;
use super::task_channel::TaskChannel;
use crate::error::{WorkerError, WorkerResult};

#[derive(Default)]
pub struct TaskChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn TaskChannel>>>,
}

impl std::fmt::Debug for TaskChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskChannelRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

impl TaskChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the channels shipped in this crate
    pub fn with_builtin_channels() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ShellTaskChannel::new()));
        registry
    }

    /// Register a channel, replacing any channel of the same type
    pub fn register(&self, channel: Arc<dyn TaskChannel>) {
        let key = channel.task_type().to_uppercase();
        let replaced = self.channels.write().insert(key.clone(), channel).is_some();
        info!(task_type = %key, replaced = replaced, "Registered task channel");
    }

    pub fn get(&self, task_type: &str) -> WorkerResult<Arc<dyn TaskChannel>> {
        self.channels
            .read()
            .get(&task_type.to_uppercase())
            .cloned()
            .ok_or_else(|| WorkerError::TaskPluginNotFound {
                task_type: task_type.to_string(),
            })
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.channels.read().contains_key(&task_type.to_uppercase())
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.channels.read().keys().cloned().collect();
        types.sort();
        types
    }
}
