//! Offline task submission and removal

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::{CreateOfflineTask, CreateOutcome, Database, OfflineTaskRecord, TaskState, Transition};
use crate::services::download_client::{DownloadClient, RemoteError};
use crate::services::magnet;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("library '{0}' is not configured")]
    UnknownLibrary(String),

    #[error("could not determine a task id for the magnet link")]
    MissingTaskId,

    #[error("offline task '{0}' is already active")]
    AlreadyActive(String),

    #[error("offline task '{0}' not found")]
    NotFound(String),

    #[error("offline task '{task_id}' already finished as {state}")]
    AlreadyFinished { task_id: String, state: TaskState },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

pub struct TaskService {
    db: Database,
    client: Arc<dyn DownloadClient>,
    config: Arc<Config>,
}

impl TaskService {
    pub fn new(db: Database, client: Arc<dyn DownloadClient>, config: Arc<Config>) -> Self {
        Self { db, client, config }
    }

    /// Submit a magnet into a library's download path and start tracking it
    pub async fn submit(&self, magnet_link: &str, library_name: &str) -> Result<OfflineTaskRecord, TaskError> {
        let library = self
            .config
            .find_library(library_name)
            .ok_or_else(|| TaskError::UnknownLibrary(library_name.to_string()))?;

        let local_hash = magnet::parse_info_hash(magnet_link);
        if let Some(hash) = &local_hash {
            if let Some(existing) = self.db.offline_tasks().get(hash).await? {
                if !existing.state.is_terminal() {
                    return Err(TaskError::AlreadyActive(existing.id));
                }
            }
        }

        let remote_id = self.client.submit(magnet_link, &library.download_path).await?;
        let id = remote_id
            .or(local_hash)
            .ok_or(TaskError::MissingTaskId)?;
        let name = magnet::display_name(magnet_link).unwrap_or_else(|| id.clone());

        let outcome = self
            .db
            .offline_tasks()
            .create(CreateOfflineTask {
                id: id.clone(),
                name,
                library_name: library.name.clone(),
                magnet: magnet_link.to_string(),
            })
            .await?;

        match outcome {
            CreateOutcome::Created(record) => {
                info!(task_id = %record.id, library = %record.library_name, "Offline task submitted");
                Ok(record)
            }
            CreateOutcome::Rearmed(record) => {
                info!(task_id = %record.id, library = %record.library_name, "Offline task re-submitted");
                Ok(record)
            }
            CreateOutcome::AlreadyActive(record) => Err(TaskError::AlreadyActive(record.id)),
        }
    }

    /// Remove the remote job and mark an active task as removed
    pub async fn remove(&self, task_id: &str) -> Result<OfflineTaskRecord, TaskError> {
        let repo = self.db.offline_tasks();
        let task = repo
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if task.state.is_terminal() {
            return Err(TaskError::AlreadyFinished {
                task_id: task.id,
                state: task.state,
            });
        }

        match self.client.remove_task(task_id).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match repo
            .transition(task_id, &TaskState::ACTIVE, TaskState::Removed, None)
            .await?
        {
            Transition::Applied => info!(task_id = %task_id, "Offline task removed"),
            Transition::Conflict { current } => {
                // The monitor finished it while the remote call was in flight
                warn!(task_id = %task_id, state = ?current, "Offline task changed state during removal");
                if let Some(state) = current {
                    return Err(TaskError::AlreadyFinished {
                        task_id: task_id.to_string(),
                        state,
                    });
                }
            }
        }

        repo.get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn get(&self, task_id: &str) -> Result<OfflineTaskRecord, TaskError> {
        self.db
            .offline_tasks()
            .get(task_id)
            .await?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<OfflineTaskRecord>, TaskError> {
        Ok(self.db.offline_tasks().list(limit.clamp(1, 500), offset.max(0)).await?)
    }
}
