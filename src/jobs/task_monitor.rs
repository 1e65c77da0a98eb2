//! Offline task monitor
//!
//! Long-lived background loop that polls the offline-download service and
//! drives tasks through their lifecycle:
//! 1. Loads pending/downloading tasks from the database
//! 2. Fetches the remote task listing once per cycle
//! 3. Moves tasks to `downloading`, `completed` or `failed` with a
//!    compare-and-set on the stored state
//! 4. Organizes the files of a task exactly once, right after winning the
//!    transition to `completed`
//!
//! Cycles are spaced by a randomized interval so the remote service never
//! sees a fixed polling rhythm. Stopping lets the task currently being
//! organized finish its batch; no further task or cycle starts afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Database, OfflineTaskRecord, TaskState, Transition};
use crate::services::download_client::{DownloadClient, RemoteStatus, RemoteTask};
use crate::services::manager::{Service, ServiceHealth};
use crate::services::organizer::OrganizerService;

/// Source of the pause between two cycles
pub trait IntervalSource: Send + Sync {
    fn next_interval(&self) -> Duration;
}

/// Uniformly random interval in `[min, max]`
#[derive(Debug, Clone)]
pub struct RandomInterval {
    min: Duration,
    max: Duration,
}

impl RandomInterval {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_secs(min: u64, max: u64) -> Self {
        Self::new(Duration::from_secs(min), Duration::from_secs(max))
    }
}

impl IntervalSource for RandomInterval {
    fn next_interval(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}

/// Always the same interval
#[derive(Debug, Clone)]
pub struct FixedInterval(pub Duration);

impl IntervalSource for FixedInterval {
    fn next_interval(&self) -> Duration {
        self.0
    }
}

/// Counters for one monitor cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    /// Active tasks loaded from the database
    pub active: usize,
    /// Tasks examined before the cycle ended
    pub checked: usize,
    pub organized: usize,
    pub failed: usize,
    /// Transitions lost to another writer
    pub conflicts: usize,
    pub remote_unavailable: bool,
    /// A stop request cut the cycle short
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_summary: Option<CycleSummary>,
}

struct MonitorInner {
    db: Database,
    client: Arc<dyn DownloadClient>,
    organizer: Arc<OrganizerService>,
    config: Arc<Config>,
    interval: Arc<dyn IntervalSource>,
    status: RwLock<MonitorStatus>,
}

struct MonitorRuntime {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background task monitor; start and stop are idempotent
pub struct TaskMonitor {
    inner: Arc<MonitorInner>,
    runtime: Mutex<Option<MonitorRuntime>>,
}

impl TaskMonitor {
    pub fn new(
        db: Database,
        client: Arc<dyn DownloadClient>,
        organizer: Arc<OrganizerService>,
        config: Arc<Config>,
        interval: Arc<dyn IntervalSource>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                db,
                client,
                organizer,
                config,
                interval,
                status: RwLock::new(MonitorStatus::default()),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// Spawn the polling loop unless it is already running
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if let Some(existing) = runtime.as_ref() {
            if !existing.handle.is_finished() {
                debug!(job = "task_monitor", "Task monitor already running");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            run_loop(inner, token).await;
        });

        *runtime = Some(MonitorRuntime { cancel, handle });
        self.inner.status.write().running = true;
        info!(job = "task_monitor", "Task monitor started");
        Ok(())
    }

    /// Signal the loop and wait until the in-flight task batch has drained
    pub async fn stop(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(MonitorRuntime { cancel, handle }) = runtime.take() else {
            return Ok(());
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(job = "task_monitor", error = %e, "Task monitor loop ended abnormally");
        }

        self.inner.status.write().running = false;
        info!(job = "task_monitor", "Task monitor stopped");
        Ok(())
    }

    pub fn status(&self) -> MonitorStatus {
        self.inner.status.read().clone()
    }

    /// Run a single cycle outside the loop
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let cancel = match self.runtime.lock().await.as_ref() {
            Some(runtime) => runtime.cancel.clone(),
            None => CancellationToken::new(),
        };
        self.inner.run_cycle(&cancel).await
    }
}

async fn run_loop(inner: Arc<MonitorInner>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let wait = inner.interval.next_interval();
        debug!(job = "task_monitor", wait_ms = wait.as_millis() as u64, "Sleeping until next cycle");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = inner.run_cycle(&cancel).await {
            error!(job = "task_monitor", error = %e, "Task monitor cycle failed");
        }
    }
    debug!(job = "task_monitor", "Task monitor loop exited");
}

impl MonitorInner {
    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary> {
        let mut summary = CycleSummary::default();
        let result = self.cycle(cancel, &mut summary).await;

        {
            let mut status = self.status.write();
            status.cycles += 1;
            status.last_cycle_at = Some(Utc::now());
            status.last_summary = Some(summary.clone());
        }

        result.map(|()| summary)
    }

    async fn cycle(&self, cancel: &CancellationToken, summary: &mut CycleSummary) -> Result<()> {
        let active = self.db.offline_tasks().list_active().await?;
        summary.active = active.len();
        if active.is_empty() {
            debug!(job = "task_monitor", "No active offline tasks");
            return Ok(());
        }

        let remote = match self.client.list_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(
                    job = "task_monitor",
                    error = %e,
                    active = active.len(),
                    "Remote task listing unavailable, skipping cycle"
                );
                summary.remote_unavailable = true;
                return Ok(());
            }
        };
        let remote: HashMap<&str, &RemoteTask> =
            remote.iter().map(|t| (t.id.as_str(), t)).collect();

        info!(
            job = "task_monitor",
            active = active.len(),
            remote = remote.len(),
            "Checking offline tasks"
        );

        for task in &active {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                info!(job = "task_monitor", "Stop requested, ending cycle early");
                break;
            }
            summary.checked += 1;

            let Some(remote_task) = remote.get(task.id.as_str()) else {
                debug!(job = "task_monitor", task_id = %task.id, "Task not in remote listing");
                continue;
            };

            if let Err(e) = self.process_task(task, remote_task, summary).await {
                error!(
                    job = "task_monitor",
                    task_id = %task.id,
                    error = %e,
                    "Failed to process offline task"
                );
            }
        }

        Ok(())
    }

    async fn process_task(
        &self,
        task: &OfflineTaskRecord,
        remote: &RemoteTask,
        summary: &mut CycleSummary,
    ) -> Result<()> {
        let repo = self.db.offline_tasks();

        match remote.status {
            RemoteStatus::Pending => Ok(()),
            RemoteStatus::Downloading => {
                if task.state == TaskState::Pending {
                    let outcome = repo
                        .transition(&task.id, &[TaskState::Pending], TaskState::Downloading, None)
                        .await?;
                    if outcome.is_applied() {
                        debug!(
                            job = "task_monitor",
                            task_id = %task.id,
                            percent_done = remote.percent_done,
                            "Offline task downloading"
                        );
                    }
                }
                Ok(())
            }
            RemoteStatus::Failed => {
                let reason = remote
                    .error
                    .clone()
                    .unwrap_or_else(|| "remote download failed".to_string());
                match repo
                    .transition(&task.id, &TaskState::ACTIVE, TaskState::Failed, Some(&reason))
                    .await?
                {
                    Transition::Applied => {
                        summary.failed += 1;
                        warn!(job = "task_monitor", task_id = %task.id, reason = %reason, "Offline task failed");
                    }
                    Transition::Conflict { .. } => summary.conflicts += 1,
                }
                Ok(())
            }
            RemoteStatus::Completed => self.handle_completed(task, summary).await,
        }
    }

    async fn handle_completed(&self, task: &OfflineTaskRecord, summary: &mut CycleSummary) -> Result<()> {
        let repo = self.db.offline_tasks();

        let Some(library) = self.config.find_library(&task.library_name) else {
            let reason = format!("library '{}' is not configured", task.library_name);
            if repo
                .transition(&task.id, &TaskState::ACTIVE, TaskState::Failed, Some(&reason))
                .await?
                .is_applied()
            {
                summary.failed += 1;
            }
            error!(job = "task_monitor", task_id = %task.id, reason = %reason, "Cannot organize offline task");
            return Ok(());
        };

        // A task is claimed only once its listing is in hand
        let listing = match self.client.list_files(&task.id).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(
                    job = "task_monitor",
                    task_id = %task.id,
                    error = %e,
                    transient = e.is_transient(),
                    "File listing unavailable, retrying next cycle"
                );
                if e.is_transient() {
                    summary.remote_unavailable = true;
                } else {
                    repo.record_error(&task.id, &e.to_string()).await?;
                }
                return Ok(());
            }
        };

        // Only the writer that wins this transition organizes the task
        if let Transition::Conflict { current } = repo
            .transition(&task.id, &TaskState::ACTIVE, TaskState::Completed, None)
            .await?
        {
            summary.conflicts += 1;
            info!(
                job = "task_monitor",
                task_id = %task.id,
                state = ?current,
                "Offline task already handled elsewhere"
            );
            return Ok(());
        }

        info!(
            job = "task_monitor",
            task_id = %task.id,
            library = %library.name,
            files = listing.len(),
            "Offline task completed, organizing"
        );

        match self.organizer.organize(task, &listing, library).await {
            Ok(_) => {
                summary.organized += 1;
                if self.config.remote.cleanup_remote_task {
                    if let Err(e) = self.client.remove_task(&task.id).await {
                        warn!(job = "task_monitor", task_id = %task.id, error = %e, "Failed to remove finished remote task");
                    }
                }
            }
            Err(e) => {
                error!(job = "task_monitor", task_id = %task.id, error = %e, "Failed to organize offline task");
                repo.record_error(&task.id, &e.to_string()).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Service for TaskMonitor {
    fn name(&self) -> &str {
        "task_monitor"
    }

    async fn start(&self) -> Result<()> {
        TaskMonitor::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        TaskMonitor::stop(self).await
    }

    async fn health(&self) -> Result<ServiceHealth> {
        let status = self.status();
        if !status.running {
            return Ok(ServiceHealth::degraded("task monitor is stopped"));
        }
        if status
            .last_summary
            .as_ref()
            .is_some_and(|s| s.remote_unavailable)
        {
            return Ok(ServiceHealth::degraded("remote service unavailable"));
        }
        Ok(ServiceHealth::healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_interval_stays_in_bounds() {
        let source = RandomInterval::from_secs(5, 10);
        for _ in 0..100 {
            let wait = source.next_interval();
            assert!(wait >= Duration::from_secs(5));
            assert!(wait <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_degenerate_interval() {
        let source = RandomInterval::from_secs(7, 7);
        assert_eq!(source.next_interval(), Duration::from_secs(7));
    }
}
