//! Database connection and operations

pub mod offline_tasks;
pub mod organize_records;
pub mod sqlite_helpers;

use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

pub use offline_tasks::{
    CreateOfflineTask, CreateOutcome, OfflineTaskRecord, OfflineTaskRepository, TaskState,
    Transition,
};
pub use organize_records::{
    NewOrganizeRecord, OrganizeOutcome, OrganizeRecord, OrganizeRecordRepository,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS offline_tasks (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        library_name TEXT NOT NULL,
        magnet TEXT NOT NULL,
        state TEXT NOT NULL,
        submitted_at TEXT NOT NULL,
        completed_at TEXT,
        last_error TEXT,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_offline_tasks_state ON offline_tasks (state)",
    r#"
    CREATE TABLE IF NOT EXISTS organize_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL,
        library_name TEXT NOT NULL,
        file_name TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        source_path TEXT NOT NULL,
        destination_path TEXT,
        outcome TEXT NOT NULL,
        error TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_organize_records_task ON organize_records (task_id)",
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database and bootstrap the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL '{}'", url))?
            .create_if_missing(true);

        let pool = if url.contains(":memory:") {
            // Every in-memory connection is its own database, so keep exactly one alive
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            if let Some(parent) = sqlite_file_parent(url) {
                std::fs::create_dir_all(&parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
        }
        .context("Failed to connect to database")?;

        let db = Self { pool };
        db.bootstrap().await?;
        info!(url = %url, "Database ready");
        Ok(db)
    }

    /// Private in-memory database, mostly for tests
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn bootstrap(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to bootstrap schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get an offline task repository
    pub fn offline_tasks(&self) -> OfflineTaskRepository {
        OfflineTaskRepository::new(self.pool.clone())
    }

    /// Get an organize record repository
    pub fn organize_records(&self) -> OrganizeRecordRepository {
        OrganizeRecordRepository::new(self.pool.clone())
    }
}

fn sqlite_file_parent(url: &str) -> Option<std::path::PathBuf> {
    let path = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    std::path::Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory_bootstraps_schema() {
        let db = Database::connect_in_memory().await.unwrap();
        let tasks = db.offline_tasks().list(10, 0).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_connect_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/db.sqlite");
        let url = format!("sqlite://{}", path.display());
        Database::connect(&url).await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_sqlite_file_parent() {
        assert_eq!(
            sqlite_file_parent("sqlite://data/app.db"),
            Some(std::path::PathBuf::from("data"))
        );
        assert_eq!(sqlite_file_parent("sqlite://app.db"), None);
    }
}
