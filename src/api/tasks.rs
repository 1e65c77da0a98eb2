//! Offline task REST endpoints

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::api::{ApiResult, fail, ok};
use crate::db::{OfflineTaskRecord, OrganizeRecord};
use crate::services::{OrganizeError, RemoteError, TaskError};

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub magnet: String,
    pub library: String,
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

fn remote_status(e: &RemoteError) -> StatusCode {
    match e {
        RemoteError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RemoteError::NotFound(_) => StatusCode::NOT_FOUND,
        RemoteError::Rejected(_) => StatusCode::BAD_GATEWAY,
    }
}

fn task_error<T>(e: TaskError) -> ApiResult<T> {
    let status = match &e {
        TaskError::UnknownLibrary(_) => StatusCode::BAD_REQUEST,
        TaskError::MissingTaskId => StatusCode::UNPROCESSABLE_ENTITY,
        TaskError::AlreadyActive(_) | TaskError::AlreadyFinished { .. } => StatusCode::CONFLICT,
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::Remote(remote) => remote_status(remote),
        TaskError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e)
}

/// Submit a magnet link into a library
async fn submit_task(
    State(state): State<AppState>,
    Json(body): Json<SubmitTaskRequest>,
) -> ApiResult<OfflineTaskRecord> {
    if body.magnet.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "'magnet' must not be empty");
    }

    match state.tasks.submit(body.magnet.trim(), &body.library).await {
        Ok(task) => ok(StatusCode::CREATED, task),
        Err(e) => task_error(e),
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Vec<OfflineTaskRecord>> {
    match state.tasks.list(query.limit, query.offset).await {
        Ok(tasks) => ok(StatusCode::OK, tasks),
        Err(e) => task_error(e),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<OfflineTaskRecord> {
    match state.tasks.get(&id).await {
        Ok(task) => ok(StatusCode::OK, task),
        Err(e) => task_error(e),
    }
}

async fn remove_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<OfflineTaskRecord> {
    match state.tasks.remove(&id).await {
        Ok(task) => ok(StatusCode::OK, task),
        Err(e) => task_error(e),
    }
}

/// Re-run organization for a completed task
async fn organize_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<OrganizeRecord>> {
    match state.organizer.run(&id).await {
        Ok(records) => ok(StatusCode::OK, records),
        Err(e) => {
            let status = match &e {
                OrganizeError::TaskNotFound(_) => StatusCode::NOT_FOUND,
                OrganizeError::NotCompleted { .. } => StatusCode::CONFLICT,
                OrganizeError::UnknownLibrary(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrganizeError::Remote(remote) => remote_status(remote),
                OrganizeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            fail(status, e)
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(submit_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task).delete(remove_task))
        .route("/tasks/{id}/organize", post(organize_task))
}
