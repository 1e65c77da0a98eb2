//! Filesystem operations used by the organizer
//!
//! Behind a trait so tests can inject failures or gate moves.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FileOpError {
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileOpError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        FileOpError::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait FileOperations: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool, FileOpError>;

    /// Move `source` to `destination`, creating missing parent directories
    async fn move_file(&self, source: &Path, destination: &Path) -> Result<(), FileOpError>;
}

/// `tokio::fs` backed implementation
#[derive(Debug, Default, Clone)]
pub struct LocalFileOperations;

#[async_trait]
impl FileOperations for LocalFileOperations {
    async fn exists(&self, path: &Path) -> Result<bool, FileOpError> {
        fs::try_exists(path)
            .await
            .map_err(|e| FileOpError::io("stat", path, e))
    }

    async fn move_file(&self, source: &Path, destination: &Path) -> Result<(), FileOpError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FileOpError::io("create directory", parent, e))?;
        }

        // Try rename first (fast, same filesystem)
        if let Err(rename_err) = fs::rename(source, destination).await {
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );

            // Fallback to copy + delete (different filesystem)
            copy_into_place(source, destination).await?;
            fs::remove_file(source)
                .await
                .map_err(|e| FileOpError::io("remove", source, e))?;
        }

        Ok(())
    }
}

/// Copy through a hidden sibling and rename it over `destination`, so a
/// failed copy never leaves a truncated file at the final path.
async fn copy_into_place(source: &Path, destination: &Path) -> Result<(), FileOpError> {
    let staging = staging_path(destination);

    let result = async {
        fs::copy(source, &staging)
            .await
            .map_err(|e| FileOpError::io("copy", source, e))?;
        fs::rename(&staging, destination)
            .await
            .map_err(|e| FileOpError::io("rename", &staging, e))
    }
    .await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "Failed to remove partial copy");
            }
        }
    }
    result
}

fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.partial"))
}
