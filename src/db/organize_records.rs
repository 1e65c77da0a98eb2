//! Organize ledger database operations
//!
//! Append-only: one row per file the organizer looked at.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::sqlite_helpers::{decode_err, now_iso8601, str_to_datetime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrganizeOutcome {
    #[serde(rename = "moved")]
    Moved,
    #[serde(rename = "skipped-exists")]
    SkippedExists,
    #[serde(rename = "failed")]
    Failed,
}

impl OrganizeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizeOutcome::Moved => "moved",
            OrganizeOutcome::SkippedExists => "skipped-exists",
            OrganizeOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for OrganizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizeOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "moved" => Ok(OrganizeOutcome::Moved),
            "skipped-exists" => Ok(OrganizeOutcome::SkippedExists),
            "failed" => Ok(OrganizeOutcome::Failed),
            other => Err(anyhow!("Unknown organize outcome '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeRecord {
    pub id: i64,
    pub task_id: String,
    pub library_name: String,
    pub file_name: String,
    pub file_size: i64,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub outcome: OrganizeOutcome,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for OrganizeRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let outcome: String = row.try_get("outcome")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            library_name: row.try_get("library_name")?,
            file_name: row.try_get("file_name")?,
            file_size: row.try_get("file_size")?,
            source_path: row.try_get("source_path")?,
            destination_path: row.try_get("destination_path")?,
            outcome: OrganizeOutcome::from_str(&outcome).map_err(decode_err)?,
            error: row.try_get("error")?,
            created_at: str_to_datetime(&created_at).map_err(decode_err)?,
        })
    }
}

/// Input for appending a ledger row
#[derive(Debug, Clone)]
pub struct NewOrganizeRecord {
    pub task_id: String,
    pub library_name: String,
    pub file_name: String,
    pub file_size: i64,
    pub source_path: String,
    pub destination_path: Option<String>,
    pub outcome: OrganizeOutcome,
    pub error: Option<String>,
}

pub struct OrganizeRecordRepository {
    pool: SqlitePool,
}

impl OrganizeRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, input: NewOrganizeRecord) -> Result<OrganizeRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO organize_records
                (task_id, library_name, file_name, file_size, source_path,
                 destination_path, outcome, error, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&input.task_id)
        .bind(&input.library_name)
        .bind(&input.file_name)
        .bind(input.file_size)
        .bind(&input.source_path)
        .bind(&input.destination_path)
        .bind(input.outcome.as_str())
        .bind(&input.error)
        .bind(now_iso8601())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        sqlx::query_as::<_, OrganizeRecord>("SELECT * FROM organize_records WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("Organize record {} disappeared after insert", id))
    }

    /// Ledger rows for one task in insertion order
    pub async fn list_for_task(&self, task_id: &str) -> Result<Vec<OrganizeRecord>> {
        let records = sqlx::query_as::<_, OrganizeRecord>(
            "SELECT * FROM organize_records WHERE task_id = ?1 ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// One page of the ledger, newest first, with the total matching count
    pub async fn list(
        &self,
        page: i64,
        page_size: i64,
        outcome: Option<OrganizeOutcome>,
    ) -> Result<(i64, Vec<OrganizeRecord>)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let outcome = outcome.map(|o| o.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM organize_records WHERE ?1 IS NULL OR outcome = ?1",
        )
        .bind(outcome)
        .fetch_one(&self.pool)
        .await?;

        let records = sqlx::query_as::<_, OrganizeRecord>(
            r#"
            SELECT * FROM organize_records
            WHERE ?1 IS NULL OR outcome = ?1
            ORDER BY id DESC
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(outcome)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok((total, records))
    }
}
