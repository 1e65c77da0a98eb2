//! REST API route definitions
//!
//! Every JSON endpoint answers with an [ApiResponse] envelope.

pub mod health;
pub mod organize;
pub mod system;
pub mod tasks;

use axum::{Json, Router, http::StatusCode};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

pub fn ok<T>(status: StatusCode, data: T) -> ApiResult<T> {
    (
        status,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }),
    )
}

pub fn fail<T>(status: StatusCode, error: impl ToString) -> ApiResult<T> {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }),
    )
}

/// All `/api/*` routes
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(tasks::router())
        .merge(organize::router())
        .merge(system::router())
}
