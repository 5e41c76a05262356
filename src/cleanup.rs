//! Working-directory cleanup.
//!
//! Deleting an already-deleted directory succeeds, so cleanup can run more than
//! once for the same attempt.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};

/// Recursively delete a task working directory
pub async fn delete_working_directory(path: &Path) -> WorkerResult<()> {
    if path.as_os_str().is_empty() || path.parent().is_none() {
        return Err(WorkerError::CleanupError {
            path: path.to_path_buf(),
            reason: "refusing to delete a filesystem root".to_string(),
        });
    }

    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Deleted task working directory");
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Working directory already absent");
            Ok(())
        }
        Err(error) => Err(WorkerError::CleanupError {
            path: path.to_path_buf(),
            reason: error.to_string(),
        }),
    }
}

/// Create a task working directory and its parents
pub async fn create_working_directory(path: &Path) -> WorkerResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| WorkerError::ResourceError(format!("create {}: {e}", path.display())))
}
