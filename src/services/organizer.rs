//! Media file organization service
//!
//! Takes the file listing of a finished offline task and moves every
//! eligible file into its library's target tree:
//! - system libraries keep the download-relative layout
//! - label libraries get `{label}/{code}/{code}[-CD{n}].{ext}`
//!
//! Every file that passes the format and size filters produces exactly one
//! ledger row. Re-running a task is safe: files already in place come back
//! as `skipped-exists`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, Library, OrganizeMode};
use crate::db::{
    Database, NewOrganizeRecord, OfflineTaskRecord, OrganizeOutcome, OrganizeRecord, TaskState,
};
use crate::services::download_client::{DownloadClient, RemoteError, RemoteFile};
use crate::services::filename_parser::{self, ParserRules};
use crate::services::filesystem::FileOperations;
use crate::services::path_planner;

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("offline task '{0}' not found")]
    TaskNotFound(String),

    #[error("offline task '{task_id}' is {state}, not completed")]
    NotCompleted { task_id: String, state: TaskState },

    #[error("library '{0}' is not configured")]
    UnknownLibrary(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// What happened to one file before it reaches the ledger
struct FileResult {
    destination: Option<PathBuf>,
    outcome: OrganizeOutcome,
    error: Option<String>,
}

impl FileResult {
    fn failed(destination: Option<PathBuf>, error: impl ToString) -> Self {
        Self {
            destination,
            outcome: OrganizeOutcome::Failed,
            error: Some(error.to_string()),
        }
    }
}

pub struct OrganizerService {
    db: Database,
    files: Arc<dyn FileOperations>,
    client: Arc<dyn DownloadClient>,
    rules: ParserRules,
    config: Arc<Config>,
}

impl OrganizerService {
    pub fn new(
        db: Database,
        files: Arc<dyn FileOperations>,
        client: Arc<dyn DownloadClient>,
        rules: ParserRules,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            files,
            client,
            rules,
            config,
        }
    }

    /// Organize a completed task by id: the manual re-run entry point
    pub async fn run(&self, task_id: &str) -> Result<Vec<OrganizeRecord>, OrganizeError> {
        let task = self
            .db
            .offline_tasks()
            .get(task_id)
            .await?
            .ok_or_else(|| OrganizeError::TaskNotFound(task_id.to_string()))?;

        if task.state != TaskState::Completed {
            return Err(OrganizeError::NotCompleted {
                task_id: task.id,
                state: task.state,
            });
        }

        let library = self
            .config
            .find_library(&task.library_name)
            .ok_or_else(|| OrganizeError::UnknownLibrary(task.library_name.clone()))?;

        self.organize_task(&task, library).await
    }

    /// Fetch the remote file listing and organize it
    pub async fn organize_task(
        &self,
        task: &OfflineTaskRecord,
        library: &Library,
    ) -> Result<Vec<OrganizeRecord>, OrganizeError> {
        let listing = self.client.list_files(&task.id).await?;
        Ok(self.organize(task, &listing, library).await?)
    }

    /// Organize every eligible file of `listing`, in order.
    ///
    /// Per-file failures land in the ledger; only ledger writes can fail the batch.
    pub async fn organize(
        &self,
        task: &OfflineTaskRecord,
        listing: &[RemoteFile],
        library: &Library,
    ) -> Result<Vec<OrganizeRecord>> {
        let threshold = library.threshold_bytes(self.config.media.min_transfer_size);
        let mut records = Vec::new();

        for file in listing {
            if !self.is_video(&file.name) {
                debug!(task_id = %task.id, file = %file.name, "Skipping non-video file");
                continue;
            }
            if file.size < threshold {
                debug!(
                    task_id = %task.id,
                    file = %file.name,
                    size = file.size,
                    threshold = threshold,
                    "Skipping file below size threshold"
                );
                continue;
            }

            let source = if file.path.is_absolute() {
                file.path.clone()
            } else {
                library.download_path.join(&file.path)
            };
            let result = self.organize_file(file, &source, library).await;

            match result.outcome {
                OrganizeOutcome::Failed => warn!(
                    task_id = %task.id,
                    file = %file.name,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Failed to organize file"
                ),
                outcome => debug!(
                    task_id = %task.id,
                    file = %file.name,
                    outcome = %outcome,
                    "Organized file"
                ),
            }

            let record = self
                .db
                .organize_records()
                .insert(NewOrganizeRecord {
                    task_id: task.id.clone(),
                    library_name: library.name.clone(),
                    file_name: file.name.clone(),
                    file_size: i64::try_from(file.size).unwrap_or(i64::MAX),
                    source_path: source.to_string_lossy().into_owned(),
                    destination_path: result
                        .destination
                        .map(|d| d.to_string_lossy().into_owned()),
                    outcome: result.outcome,
                    error: result.error,
                })
                .await?;
            records.push(record);
        }

        info!(
            task_id = %task.id,
            library = %library.name,
            mode = library.mode.as_str(),
            listed = listing.len(),
            recorded = records.len(),
            moved = records.iter().filter(|r| r.outcome == OrganizeOutcome::Moved).count(),
            failed = records.iter().filter(|r| r.outcome == OrganizeOutcome::Failed).count(),
            "Organized offline task"
        );

        Ok(records)
    }

    async fn organize_file(&self, file: &RemoteFile, source: &Path, library: &Library) -> FileResult {
        let identifier = match &library.mode {
            OrganizeMode::System => None,
            OrganizeMode::Label { .. } => match filename_parser::parse(&file.name, &self.rules) {
                Ok(id) => Some(id),
                Err(e) => return FileResult::failed(None, e),
            },
        };

        let relative = source
            .strip_prefix(&library.download_path)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| PathBuf::from(&file.name));

        let destination = match path_planner::plan(&relative, identifier.as_ref(), library) {
            Ok(d) => d,
            Err(e) => return FileResult::failed(None, e),
        };

        match self.files.exists(&destination).await {
            Ok(true) => {
                return FileResult {
                    destination: Some(destination),
                    outcome: OrganizeOutcome::SkippedExists,
                    error: None,
                };
            }
            Ok(false) => {}
            Err(e) => return FileResult::failed(Some(destination), e),
        }

        match self.files.move_file(source, &destination).await {
            Ok(()) => FileResult {
                destination: Some(destination),
                outcome: OrganizeOutcome::Moved,
                error: None,
            },
            Err(e) => FileResult::failed(Some(destination), e),
        }
    }

    fn is_video(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .is_some_and(|e| self.config.media.video_formats.iter().any(|f| *f == e))
    }
}
