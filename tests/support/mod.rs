//! Shared fakes and fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::{Barrier, Notify};

use offline_librarian::config::{Config, Library, MediaConfig, OrganizeMode};
use offline_librarian::db::{CreateOfflineTask, Database, OfflineTaskRecord, TaskState};
use offline_librarian::services::download_client::{
    DownloadClient, RemoteError, RemoteFile, RemoteStatus, RemoteTask,
};
use offline_librarian::services::filesystem::{FileOpError, FileOperations, LocalFileOperations};

pub const MB: u64 = 1024 * 1024;

/// In-memory offline-download service
#[derive(Default)]
pub struct FakeClient {
    pub tasks: Mutex<Vec<RemoteTask>>,
    pub files: Mutex<HashMap<String, Vec<RemoteFile>>>,
    pub unavailable: AtomicBool,
    pub list_tasks_calls: AtomicUsize,
    pub list_files_calls: AtomicUsize,
    /// Number of upcoming file listings that fail as unavailable
    pub list_files_failures: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
    pub submitted: Mutex<Vec<(String, PathBuf)>>,
    /// Id the service reports for submissions
    pub submit_id: Mutex<Option<String>>,
    /// Every `list_tasks` call waits here when set
    pub list_tasks_barrier: Option<Arc<Barrier>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_barrier(barrier: Arc<Barrier>) -> Self {
        Self {
            list_tasks_barrier: Some(barrier),
            ..Self::default()
        }
    }

    pub fn set_remote(&self, id: &str, status: RemoteStatus, error: Option<&str>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| t.id != id);
        tasks.push(RemoteTask {
            id: id.to_string(),
            name: id.to_string(),
            status,
            percent_done: if status == RemoteStatus::Completed { 100.0 } else { 50.0 },
            error: error.map(|e| e.to_string()),
        });
    }

    pub fn set_files(&self, id: &str, files: Vec<RemoteFile>) {
        self.files.lock().insert(id.to_string(), files);
    }
}

#[async_trait]
impl DownloadClient for FakeClient {
    async fn submit(&self, magnet: &str, download_path: &Path) -> Result<Option<String>, RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("offline".to_string()));
        }
        self.submitted
            .lock()
            .push((magnet.to_string(), download_path.to_path_buf()));
        Ok(self.submit_id.lock().clone())
    }

    async fn list_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.list_tasks_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.list_tasks_barrier {
            barrier.wait().await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("offline".to_string()));
        }
        Ok(self.tasks.lock().clone())
    }

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>, RemoteError> {
        self.list_files_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .list_files_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::Unavailable("listing timed out".to_string()));
        }
        Ok(self.files.lock().get(task_id).cloned().unwrap_or_default())
    }

    async fn remove_task(&self, task_id: &str) -> Result<(), RemoteError> {
        self.removed.lock().push(task_id.to_string());
        Ok(())
    }
}

/// Local file operations that can fail or pause on chosen files
#[derive(Default)]
pub struct ScriptedFiles {
    inner: LocalFileOperations,
    /// Moves of sources whose file name is listed here fail
    pub fail_names: Mutex<Vec<String>>,
    /// File name whose move waits for `release`
    pub gate_name: Mutex<Option<String>>,
    pub entered: Notify,
    pub release: Notify,
    pub moves: AtomicUsize,
}

impl ScriptedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, name: &str) {
        self.fail_names.lock().push(name.to_string());
    }

    pub fn gate_on(&self, name: &str) {
        *self.gate_name.lock() = Some(name.to_string());
    }
}

#[async_trait]
impl FileOperations for ScriptedFiles {
    async fn exists(&self, path: &Path) -> Result<bool, FileOpError> {
        self.inner.exists(path).await
    }

    async fn move_file(&self, source: &Path, destination: &Path) -> Result<(), FileOpError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let gated = {
            let mut gate = self.gate_name.lock();
            if gate.as_deref() == Some(name.as_str()) {
                *gate = None;
                true
            } else {
                false
            }
        };
        if gated {
            self.entered.notify_one();
            self.release.notified().await;
        }

        if self.fail_names.lock().contains(&name) {
            return Err(FileOpError::Io {
                operation: "move",
                path: source.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "scripted failure"),
            });
        }

        self.moves.fetch_add(1, Ordering::SeqCst);
        self.inner.move_file(source, destination).await
    }
}

/// Temporary library tree with a system and a label library
pub struct Fixture {
    pub dir: TempDir,
    pub config: Arc<Config>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_min_size(0)
    }

    pub fn with_min_size(min_transfer_size: i64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let config = Config {
            remote: serde_yaml::from_str("base_url: http://localhost\npoll_interval_min: 1\npoll_interval_max: 1")
                .expect("remote config"),
            media: MediaConfig {
                min_transfer_size,
                video_formats: vec!["mp4".to_string(), "mkv".to_string()],
                libraries: vec![
                    Library {
                        name: "movies".to_string(),
                        download_path: root.join("dl/movies"),
                        target_path: root.join("media/movies"),
                        mode: OrganizeMode::System,
                        min_transfer_size: 0,
                    },
                    Library {
                        name: "studio".to_string(),
                        download_path: root.join("dl/studio"),
                        target_path: root.join("media/studio"),
                        mode: OrganizeMode::Label {
                            label: "STUDIO".to_string(),
                        },
                        min_transfer_size: 0,
                    },
                ],
                label: Default::default(),
            },
            server: Default::default(),
            database: Default::default(),
        };

        Self {
            dir,
            config: Arc::new(config),
        }
    }

    pub fn library(&self, name: &str) -> &Library {
        self.config.find_library(name).expect("library")
    }

    /// Write a file of `size` bytes into a library's download tree
    pub fn download(&self, library: &str, relative: &str, size: u64) -> RemoteFile {
        let path = self.library(library).download_path.join(relative);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let file = std::fs::File::create(&path).expect("create");
        file.set_len(size).expect("set_len");
        RemoteFile {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            size,
        }
    }

    pub fn target(&self, library: &str, relative: &str) -> PathBuf {
        self.library(library).target_path.join(relative)
    }
}

pub async fn create_task(db: &Database, id: &str, library: &str) -> OfflineTaskRecord {
    db.offline_tasks()
        .create(CreateOfflineTask {
            id: id.to_string(),
            name: id.to_string(),
            library_name: library.to_string(),
            magnet: format!("magnet:?xt=urn:btih:{}", id),
        })
        .await
        .expect("create task");
    db.offline_tasks().get(id).await.expect("get").expect("task")
}

pub async fn state_of(db: &Database, id: &str) -> TaskState {
    db.offline_tasks()
        .get(id)
        .await
        .expect("get")
        .expect("task")
        .state
}
