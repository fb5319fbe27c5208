//! Subscription lifecycle endpoints.

use crate::dtos::{ConfirmPaymentRequest, HistoryResponse, QuoteRequest, SubscriptionEnvelope};
use crate::models::Subscription;
use crate::services::{ConfirmOutcome, ProrationQuote};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

/// Signup. Returns 201 the first time and the existing row afterwards.
pub async fn ensure_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let (subscription, created) = state
        .engine
        .ensure_subscription(&user_id, Utc::now())
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state.engine.get_subscription(&user_id, Utc::now()).await?;
    Ok(Json(subscription))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let events = state.engine.history(&user_id).await?;
    Ok(Json(HistoryResponse { user_id, events }))
}

pub async fn quote(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<ProrationQuote>, AppError> {
    payload.validate()?;
    let (plan_id, cycle) = payload.target()?;
    let quote = state
        .engine
        .quote(&user_id, plan_id, cycle, Utc::now())
        .await?;
    Ok(Json(quote))
}

/// Replays of an already-applied session answer 200 with `replayed: true`.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmOutcome>, AppError> {
    payload.validate()?;
    let (plan_id, cycle) = payload.target()?;

    tracing::info!(
        user_id = %user_id,
        session_id = %payload.session_id,
        plan_id = %plan_id,
        billing_cycle = %cycle,
        "Confirming payment"
    );

    let outcome = state
        .engine
        .confirm_payment(&user_id, &payload.session_id, plan_id, cycle, Utc::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SubscriptionEnvelope>, AppError> {
    let subscription = state.engine.cancel(&user_id, Utc::now()).await?;
    Ok(Json(SubscriptionEnvelope { subscription }))
}
