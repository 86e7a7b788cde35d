// SPDX-License-Identifier: MIT

//! Authenticated API routes: dashboard reads, ledger operations and the
//! sync-history trigger.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::services::ContinueBackfillPayload;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

const MAX_PAGE_SIZE: u32 = 100;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/activities/sync-history/{user_id}", post(sync_history))
        .route("/users/me/balance", get(my_balance))
        .route("/users/me/transactions", get(my_transactions))
        .route("/users/me/activities", get(my_activities))
        .route("/tokens/spend", post(spend_tokens))
        .route("/tokens/stake", post(stake_tokens))
        .route("/tokens/unstake", post(unstake_tokens))
}

// ─── Sync History ────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
struct SyncHistoryRequest {
    /// Lookback window in days.
    #[validate(range(min = 1, max = 365))]
    days: i64,
}

#[derive(Serialize)]
struct SyncHistoryResponse {
    status: &'static str,
}

/// Trigger a historical backfill for the authenticated user.
///
/// Returns 202 as soon as the cursor is reset and the first page task is
/// queued; ingestion happens asynchronously.
async fn sync_history(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(payload): Json<SyncHistoryRequest>,
) -> Result<(StatusCode, Json<SyncHistoryResponse>)> {
    if auth.user_id != user_id {
        return Err(AppError::Unauthorized);
    }

    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Fail fast when the user has no usable connection.
    state
        .db
        .get_connection(&user_id, &state.config.provider)
        .await?
        .filter(|c| c.active)
        .ok_or(AppError::ConnectionExpired)?;

    state.sync.start_backfill(&user_id, payload.days).await?;
    state
        .tasks
        .queue_continue_backfill(
            &state.config.api_url,
            ContinueBackfillPayload {
                user_id: user_id.clone(),
            },
        )
        .await?;

    tracing::info!(user_id = %user_id, days = payload.days, "Historical sync started");

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncHistoryResponse {
            status: "sync_started",
        }),
    ))
}

// ─── Dashboard Reads ─────────────────────────────────────────────────

#[derive(Serialize)]
struct BalanceResponse {
    user_id: String,
    balance: f64,
    staked_balance: f64,
    total_earned: f64,
    total_spent: f64,
}

async fn my_balance(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<BalanceResponse>> {
    let user = state.ledger.balance(&auth.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: user.id,
        balance: user.balance,
        staked_balance: user.staked_balance,
        total_earned: user.total_earned,
        total_spent: user.total_spent,
    }))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    20
}

async fn my_transactions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<crate::models::Transaction>>> {
    let limit = page.limit.min(MAX_PAGE_SIZE);
    let txs = state
        .db
        .list_transactions(&auth.user_id, limit, page.offset)
        .await?;
    Ok(Json(txs))
}

async fn my_activities(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<crate::models::Activity>>> {
    let limit = page.limit.min(MAX_PAGE_SIZE);
    let activities = state
        .db
        .list_activities_for_user(&auth.user_id, limit, page.offset)
        .await?;
    Ok(Json(activities))
}

// ─── Ledger Operations ───────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
struct TokenOpRequest {
    #[validate(range(min = 0.0001))]
    amount: f64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct TokenOpResponse {
    transaction: crate::models::Transaction,
    balance: f64,
    staked_balance: f64,
}

async fn spend_tokens(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<TokenOpRequest>,
) -> Result<Json<TokenOpResponse>> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let description = payload.description.as_deref().unwrap_or("spend");
    let tx = state
        .ledger
        .spend(&auth.user_id, payload.amount, description)
        .await?;
    op_response(&state, &auth.user_id, tx).await
}

async fn stake_tokens(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<TokenOpRequest>,
) -> Result<Json<TokenOpResponse>> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let description = payload.description.as_deref().unwrap_or("stake");
    let tx = state
        .ledger
        .stake(&auth.user_id, payload.amount, description)
        .await?;
    op_response(&state, &auth.user_id, tx).await
}

async fn unstake_tokens(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(payload): Json<TokenOpRequest>,
) -> Result<Json<TokenOpResponse>> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let description = payload.description.as_deref().unwrap_or("unstake");
    let tx = state
        .ledger
        .unstake(&auth.user_id, payload.amount, description)
        .await?;
    op_response(&state, &auth.user_id, tx).await
}

async fn op_response(
    state: &Arc<AppState>,
    user_id: &str,
    tx: crate::models::Transaction,
) -> Result<Json<TokenOpResponse>> {
    let user = state.ledger.balance(user_id).await?;
    Ok(Json(TokenOpResponse {
        transaction: tx,
        balance: user.balance,
        staked_balance: user.staked_balance,
    }))
}
