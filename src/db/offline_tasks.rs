//! Offline task database operations
//!
//! State changes go through [OfflineTaskRepository::transition], a
//! compare-and-set on the current state. When two writers race, exactly one
//! of them sees [Transition::Applied].

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{decode_err, now_iso8601, str_to_datetime, str_to_datetime_opt};

/// Lifecycle of an offline task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Downloading,
    Completed,
    Failed,
    Removed,
}

impl TaskState {
    pub const ACTIVE: [TaskState; 2] = [TaskState::Pending, TaskState::Downloading];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Downloading => "downloading",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Removed => "removed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Removed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "downloading" => Ok(TaskState::Downloading),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "removed" => Ok(TaskState::Removed),
            other => Err(anyhow!("Unknown task state '{}'", other)),
        }
    }
}

/// An offline task record in the database
#[derive(Debug, Clone, Serialize)]
pub struct OfflineTaskRecord {
    pub id: String,
    pub name: String,
    pub library_name: String,
    pub magnet: String,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for OfflineTaskRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let state: String = row.try_get("state")?;
        let submitted_at: String = row.try_get("submitted_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            library_name: row.try_get("library_name")?,
            magnet: row.try_get("magnet")?,
            state: TaskState::from_str(&state).map_err(decode_err)?,
            submitted_at: str_to_datetime(&submitted_at).map_err(decode_err)?,
            completed_at: str_to_datetime_opt(completed_at.as_deref()).map_err(decode_err)?,
            last_error: row.try_get("last_error")?,
            updated_at: str_to_datetime(&updated_at).map_err(decode_err)?,
        })
    }
}

/// Input for creating a new offline task record
#[derive(Debug, Clone)]
pub struct CreateOfflineTask {
    pub id: String,
    pub name: String,
    pub library_name: String,
    pub magnet: String,
}

/// What [OfflineTaskRepository::create] did
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(OfflineTaskRecord),
    /// A terminal task with the same id was reset to pending
    Rearmed(OfflineTaskRecord),
    /// A task with the same id is still pending or downloading
    AlreadyActive(OfflineTaskRecord),
}

/// Result of a conditional state update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The row was not in an expected state; `current` is what it holds now
    Conflict { current: Option<TaskState> },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

pub struct OfflineTaskRepository {
    pool: SqlitePool,
}

impl OfflineTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a pending task, re-arming a terminal row with the same id
    pub async fn create(&self, input: CreateOfflineTask) -> Result<CreateOutcome> {
        let now = now_iso8601();

        let inserted = sqlx::query(
            r#"
            INSERT INTO offline_tasks (id, name, library_name, magnet, state, submitted_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&input.id)
        .bind(&input.name)
        .bind(&input.library_name)
        .bind(&input.magnet)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(CreateOutcome::Created(self.require(&input.id).await?));
        }

        let rearmed = sqlx::query(
            r#"
            UPDATE offline_tasks SET
                name = ?2,
                library_name = ?3,
                magnet = ?4,
                state = 'pending',
                submitted_at = ?5,
                completed_at = NULL,
                last_error = NULL,
                updated_at = ?5
            WHERE id = ?1 AND state IN ('completed', 'failed', 'removed')
            "#,
        )
        .bind(&input.id)
        .bind(&input.name)
        .bind(&input.library_name)
        .bind(&input.magnet)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let record = self.require(&input.id).await?;
        if rearmed.rows_affected() == 1 {
            Ok(CreateOutcome::Rearmed(record))
        } else {
            Ok(CreateOutcome::AlreadyActive(record))
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<OfflineTaskRecord>> {
        let record = sqlx::query_as::<_, OfflineTaskRecord>(
            "SELECT * FROM offline_tasks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn require(&self, id: &str) -> Result<OfflineTaskRecord> {
        self.get(id)
            .await?
            .ok_or_else(|| anyhow!("Offline task '{}' disappeared after write", id))
    }

    /// Pending and downloading tasks, oldest submission first
    pub async fn list_active(&self) -> Result<Vec<OfflineTaskRecord>> {
        let records = sqlx::query_as::<_, OfflineTaskRecord>(
            r#"
            SELECT * FROM offline_tasks
            WHERE state IN ('pending', 'downloading')
            ORDER BY submitted_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// All tasks, most recent submission first
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<OfflineTaskRecord>> {
        let records = sqlx::query_as::<_, OfflineTaskRecord>(
            "SELECT * FROM offline_tasks ORDER BY submitted_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count_active(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM offline_tasks WHERE state IN ('pending', 'downloading')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Conditionally move a task from one of `from` to `to`.
    ///
    /// Entering `completed` stamps `completed_at`; `error` replaces `last_error`
    /// when given.
    pub async fn transition(
        &self,
        id: &str,
        from: &[TaskState],
        to: TaskState,
        error: Option<&str>,
    ) -> Result<Transition> {
        if from.is_empty() {
            return Err(anyhow!("transition of '{}' needs at least one source state", id));
        }

        let now = now_iso8601();
        let completed_at = (to == TaskState::Completed).then(|| now.clone());
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE offline_tasks SET
                state = ?,
                updated_at = ?,
                completed_at = COALESCE(?, completed_at),
                last_error = COALESCE(?, last_error)
            WHERE id = ? AND state IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(&now)
            .bind(completed_at)
            .bind(error)
            .bind(id);
        for state in from {
            query = query.bind(state.as_str());
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(Transition::Applied);
        }

        let current = self.get(id).await?.map(|t| t.state);
        Ok(Transition::Conflict { current })
    }

    /// Store a diagnostic without changing state
    pub async fn record_error(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE offline_tasks SET last_error = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(error)
            .bind(now_iso8601())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use assert_matches::assert_matches;

    fn input(id: &str) -> CreateOfflineTask {
        CreateOfflineTask {
            id: id.to_string(),
            name: format!("task {}", id),
            library_name: "lib".to_string(),
            magnet: format!("magnet:?xt=urn:btih:{}", id),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();

        let outcome = repo.create(input("a")).await.unwrap();
        assert_matches!(outcome, CreateOutcome::Created(record) => {
            assert_eq!(record.state, TaskState::Pending);
            assert!(record.completed_at.is_none());
        });
        assert!(repo.get("a").await.unwrap().is_some());
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_active_duplicate() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();
        repo.create(input("a")).await.unwrap();

        assert_matches!(
            repo.create(input("a")).await.unwrap(),
            CreateOutcome::AlreadyActive(_)
        );
    }

    #[tokio::test]
    async fn test_create_rearms_terminal_task() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();
        repo.create(input("a")).await.unwrap();
        repo.transition("a", &TaskState::ACTIVE, TaskState::Failed, Some("boom"))
            .await
            .unwrap();

        assert_matches!(repo.create(input("a")).await.unwrap(), CreateOutcome::Rearmed(record) => {
            assert_eq!(record.state, TaskState::Pending);
            assert!(record.last_error.is_none());
        });
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();
        repo.create(input("a")).await.unwrap();

        let first = repo
            .transition("a", &TaskState::ACTIVE, TaskState::Completed, None)
            .await
            .unwrap();
        let second = repo
            .transition("a", &TaskState::ACTIVE, TaskState::Completed, None)
            .await
            .unwrap();

        assert_eq!(first, Transition::Applied);
        assert_eq!(
            second,
            Transition::Conflict {
                current: Some(TaskState::Completed)
            }
        );
        let record = repo.get("a").await.unwrap().unwrap();
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_unknown_task_conflicts() {
        let db = Database::connect_in_memory().await.unwrap();
        let result = db
            .offline_tasks()
            .transition("ghost", &TaskState::ACTIVE, TaskState::Failed, None)
            .await
            .unwrap();
        assert_eq!(result, Transition::Conflict { current: None });
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();
        repo.create(input("a")).await.unwrap();
        repo.create(input("b")).await.unwrap();
        repo.create(input("c")).await.unwrap();
        repo.transition("b", &[TaskState::Pending], TaskState::Downloading, None)
            .await
            .unwrap();
        repo.transition("c", &TaskState::ACTIVE, TaskState::Removed, None)
            .await
            .unwrap();

        let active: Vec<String> = repo
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(active, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(repo.count_active().await.unwrap(), 2);
        assert_eq!(repo.list(10, 0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_record_error_keeps_state() {
        let db = Database::connect_in_memory().await.unwrap();
        let repo = db.offline_tasks();
        repo.create(input("a")).await.unwrap();
        repo.record_error("a", "listing failed").await.unwrap();

        let record = repo.get("a").await.unwrap().unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.last_error.as_deref(), Some("listing failed"));
    }

    #[test]
    fn test_state_strings() {
        for state in [
            TaskState::Pending,
            TaskState::Downloading,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::Removed,
        ] {
            assert_eq!(TaskState::from_str(state.as_str()).unwrap(), state);
        }
        assert!(TaskState::Removed.is_terminal());
        assert!(!TaskState::Downloading.is_terminal());
    }
}
