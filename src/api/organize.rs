//! Organize ledger endpoints

use std::str::FromStr;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api::{ApiResult, fail, ok};
use crate::db::{OrganizeOutcome, OrganizeRecord};

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// `moved`, `skipped-exists` or `failed`
    pub outcome: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct RecordsPage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub records: Vec<OrganizeRecord>,
}

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<RecordsQuery>,
) -> ApiResult<RecordsPage> {
    let outcome = match query.outcome.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match OrganizeOutcome::from_str(raw) {
            Ok(outcome) => Some(outcome),
            Err(e) => return fail(StatusCode::BAD_REQUEST, e),
        },
        None => None,
    };

    match state
        .db
        .organize_records()
        .list(query.page, query.page_size, outcome)
        .await
    {
        Ok((total, records)) => ok(
            StatusCode::OK,
            RecordsPage {
                total,
                page: query.page.max(1),
                page_size: query.page_size.clamp(1, 500),
                records,
            },
        ),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/organize/records", get(list_records))
}
