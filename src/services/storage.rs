//! # Resource Staging
//!
//! Moves files between a storage backend and task working directories: input
//! resources before execution, outputs after success, and the task log once the
//! attempt reaches a terminal state.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};
use crate::models::TaskExecutionContext;

#[async_trait]
pub trait StorageOperator: Send + Sync {
    /// Stage `context.resources` into the working directory, skipping files already present
    async fn download_resources_if_needed(&self, context: &TaskExecutionContext)
        -> WorkerResult<()>;

    async fn upload_output_files(&self, context: &TaskExecutionContext) -> WorkerResult<()>;

    /// Archive the task log
    async fn ship_log(&self, context: &TaskExecutionContext) -> WorkerResult<()>;
}

/// Storage backed by local directories
#[derive(Debug, Clone, Default)]
pub struct LocalStorageOperator {
    resource_dir: Option<PathBuf>,
    log_archive_dir: Option<PathBuf>,
}

impl LocalStorageOperator {
    pub fn new(resource_dir: Option<PathBuf>, log_archive_dir: Option<PathBuf>) -> Self {
        Self {
            resource_dir,
            log_archive_dir,
        }
    }

    fn resolve_resource(root: &Path, resource: &str) -> WorkerResult<PathBuf> {
        let relative = Path::new(resource);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if resource.is_empty() || escapes {
            return Err(WorkerError::ResourceError(format!(
                "resource path {resource} must stay inside the resource directory"
            )));
        }
        Ok(root.join(relative))
    }
}

#[async_trait]
impl StorageOperator for LocalStorageOperator {
    async fn download_resources_if_needed(
        &self,
        context: &TaskExecutionContext,
    ) -> WorkerResult<()> {
        if context.resources.is_empty() {
            return Ok(());
        }
        let root = self.resource_dir.as_ref().ok_or_else(|| {
            WorkerError::ResourceError("task declares resources but no resource_dir is configured".to_string())
        })?;
        let execute_path = context.execute_path.as_ref().ok_or_else(|| {
            WorkerError::ResourceError("task has no working directory".to_string())
        })?;

        for resource in &context.resources {
            let source = Self::resolve_resource(root, resource)?;
            let target = execute_path.join(resource);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                debug!(resource = %resource, "Resource already staged");
                continue;
            }
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&source, &target).await.map_err(|e| {
                WorkerError::ResourceError(format!("stage {}: {e}", source.display()))
            })?;
            debug!(resource = %resource, target = %target.display(), "Staged resource");
        }
        info!(
            task_instance_id = context.task_instance_id,
            count = context.resources.len(),
            "Resources staged"
        );
        Ok(())
    }

    async fn upload_output_files(&self, _context: &TaskExecutionContext) -> WorkerResult<()> {
        Ok(())
    }

    async fn ship_log(&self, context: &TaskExecutionContext) -> WorkerResult<()> {
        let (Some(archive), Some(log_path)) = (&self.log_archive_dir, &context.log_path) else {
            return Ok(());
        };
        if !tokio::fs::try_exists(log_path).await.unwrap_or(false) {
            return Ok(());
        }
        let file_name = log_path
            .file_name()
            .ok_or_else(|| WorkerError::ResourceError(format!("bad log path {}", log_path.display())))?;
        tokio::fs::create_dir_all(archive).await?;
        tokio::fs::copy(log_path, archive.join(file_name)).await?;
        debug!(log_path = %log_path.display(), "Shipped task log");
        Ok(())
    }
}
