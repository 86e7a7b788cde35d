// SPDX-License-Identifier: MIT

//! Task handler routes for Cloud Tasks callbacks.
//!
//! These endpoints are called by Cloud Tasks, not directly by users. A
//! non-2xx response makes the queue redeliver with backoff, which is how
//! rate-limited provider calls get retried.

use crate::error::AppError;
use crate::services::{ContinueBackfillPayload, ProcessActivityPayload};
use crate::AppState;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use std::sync::Arc;

/// Task handler routes (called by Cloud Tasks).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/process-activity", post(process_activity))
        .route("/tasks/continue-backfill", post(continue_backfill))
}

/// Cloud Run strips this header from external requests, so its presence
/// with the expected queue name guarantees internal origin.
fn from_our_queue(headers: &HeaderMap) -> bool {
    headers
        .get("x-cloudtasks-queuename")
        .and_then(|h| h.to_str().ok())
        .map(|name| name == crate::config::ACTIVITY_QUEUE_NAME)
        .unwrap_or(false)
}

/// Reconstruct our public base URL for chaining follow-up tasks.
fn service_url(headers: &HeaderMap, fallback: &str) -> String {
    let host = match headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
    {
        Some(h) => h,
        None => return fallback.to_string(),
    };

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    format!("{}://{}", scheme, host)
}

/// Process a single activity (called by Cloud Tasks).
async fn process_activity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ProcessActivityPayload>,
) -> StatusCode {
    if !from_our_queue(&headers) {
        tracing::warn!(
            activity_id = payload.activity_id,
            owner_id = payload.owner_id,
            "Blocked process-activity call without queue header"
        );
        return StatusCode::FORBIDDEN;
    }

    tracing::info!(
        activity_id = payload.activity_id,
        owner_id = payload.owner_id,
        source = %payload.source,
        "Processing activity from Cloud Task"
    );

    let conn = match state
        .db
        .find_connection_by_athlete(&state.config.provider, payload.owner_id)
        .await
    {
        Ok(Some(c)) => c,
        Ok(None) => {
            // User disconnected between delivery and processing; nothing
            // to do and retrying will not help.
            tracing::info!(owner_id = payload.owner_id, "No active connection, dropping task");
            return StatusCode::OK;
        }
        Err(e) => {
            tracing::error!(error = %e, "Connection lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match state
        .sync
        .process_webhook_activity(&conn, payload.activity_id)
        .await
    {
        Ok(outcome) => {
            tracing::info!(
                activity_id = payload.activity_id,
                outcome = ?outcome,
                "Activity task complete"
            );
            StatusCode::OK
        }
        // The user must re-authenticate before this activity can be
        // fetched, so redelivery is pointless.
        Err(e) if e.is_provider_token_error() => {
            tracing::warn!(owner_id = payload.owner_id, error = %e, "Connection unusable, dropping task");
            StatusCode::OK
        }
        Err(e) => {
            tracing::error!(
                activity_id = payload.activity_id,
                error = %e,
                "Failed to process activity"
            );
            // Non-2xx triggers the queue's retry with backoff.
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Process the next backfill page and chain the one after it.
async fn continue_backfill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ContinueBackfillPayload>,
) -> StatusCode {
    if !from_our_queue(&headers) {
        tracing::warn!(
            user_id = %payload.user_id,
            "Blocked continue-backfill call without queue header"
        );
        return StatusCode::FORBIDDEN;
    }

    tracing::info!(user_id = %payload.user_id, "Continuing backfill from Cloud Task");

    let page = match state.sync.backfill_page(&payload.user_id).await {
        Ok(p) => p,
        Err(AppError::NotFound(_)) | Err(AppError::ConnectionExpired) => {
            // Cursor gone or user disconnected; stop the chain.
            tracing::info!(user_id = %payload.user_id, "Backfill chain ended without cursor");
            return StatusCode::OK;
        }
        Err(AppError::ProviderRateLimited) => {
            tracing::warn!(user_id = %payload.user_id, "Backfill page rate limited, deferring to queue retry");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
        Err(e) => {
            tracing::error!(user_id = %payload.user_id, error = %e, "Backfill page failed");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    if page.has_more {
        let url = service_url(&headers, &state.config.api_url);
        if let Err(e) = state
            .tasks
            .queue_continue_backfill(&url, ContinueBackfillPayload {
                user_id: payload.user_id.clone(),
            })
            .await
        {
            tracing::error!(error = %e, "Failed to queue next backfill page");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    } else {
        tracing::info!(user_id = %payload.user_id, "Backfill complete");
    }

    StatusCode::OK
}
