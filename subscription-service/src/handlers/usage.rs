//! Feature usage endpoints.

use crate::services::{UsageDecision, UsageSnapshot};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use service_core::error::AppError;

/// Consumes one unit when allowed. A denial is still a 200 with
/// `allowed: false`; callers that want an error use the library helper.
pub async fn check_usage(
    State(state): State<AppState>,
    Path((user_id, feature)): Path<(String, String)>,
) -> Result<Json<UsageDecision>, AppError> {
    let decision = state
        .engine
        .check_usage(&user_id, &feature, Utc::now())
        .await?;
    Ok(Json(decision))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path((user_id, feature)): Path<(String, String)>,
) -> Result<Json<UsageSnapshot>, AppError> {
    let snapshot = state
        .engine
        .usage_snapshot(&user_id, &feature, Utc::now())
        .await?;
    Ok(Json(snapshot))
}
