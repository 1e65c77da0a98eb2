//! Configuration and monitor control endpoints

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;

use crate::AppState;
use crate::api::{ApiResult, fail, ok};
use crate::config::Config;
use crate::jobs::MonitorStatus;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub monitor: MonitorStatus,
    pub active_tasks: i64,
}

/// Effective configuration with credentials redacted
async fn get_config(State(state): State<AppState>) -> ApiResult<Config> {
    ok(StatusCode::OK, state.config.redacted())
}

async fn get_status(State(state): State<AppState>) -> ApiResult<SystemStatus> {
    match state.db.offline_tasks().count_active().await {
        Ok(active_tasks) => ok(
            StatusCode::OK,
            SystemStatus {
                monitor: state.monitor.status(),
                active_tasks,
            },
        ),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn start_monitor(State(state): State<AppState>) -> ApiResult<MonitorStatus> {
    match state.monitor.start().await {
        Ok(()) => ok(StatusCode::OK, state.monitor.status()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn stop_monitor(State(state): State<AppState>) -> ApiResult<MonitorStatus> {
    match state.monitor.stop().await {
        Ok(()) => ok(StatusCode::OK, state.monitor.status()),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(get_config))
        .route("/status", get(get_status))
        .route("/monitor/start", post(start_monitor))
        .route("/monitor/stop", post(stop_monitor))
}
