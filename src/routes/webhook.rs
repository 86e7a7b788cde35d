// SPDX-License-Identifier: MIT

//! Webhook routes for provider events.
//!
//! The provider expects a fast 200 on every delivery, so the POST handler
//! only verifies, records and enqueues; the actual activity fetch runs as
//! a Cloud Tasks callback.

use crate::services::signature;
use crate::services::ProcessActivityPayload;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/{provider}", get(verify).post(handle_event))
}

/// Subscription verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: String,
    #[serde(rename = "hub.challenge")]
    challenge: String,
    #[serde(rename = "hub.verify_token")]
    verify_token: String,
}

/// Verification response.
#[derive(Serialize, Default)]
struct VerifyResponse {
    #[serde(rename = "hub.challenge")]
    challenge: String,
}

/// Verify webhook subscription (GET handshake).
async fn verify(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    if provider != state.config.provider {
        return (StatusCode::NOT_FOUND, Json(VerifyResponse::default()));
    }

    if signature::verify_subscription(
        &params.mode,
        &params.verify_token,
        &state.config.webhook_verify_token,
    ) {
        tracing::info!(provider = %provider, "Webhook subscription verified");
        (
            StatusCode::OK,
            Json(VerifyResponse {
                challenge: params.challenge,
            }),
        )
    } else {
        tracing::warn!(
            provider = %provider,
            mode = %params.mode,
            "Webhook verification failed: invalid token"
        );
        (StatusCode::FORBIDDEN, Json(VerifyResponse::default()))
    }
}

/// Provider webhook event payload.
#[derive(Deserialize, Debug)]
struct WebhookEvent {
    object_type: String, // "activity" or "athlete"
    object_id: u64,
    aspect_type: String, // "create", "update", "delete"
    owner_id: u64,
    #[serde(default)]
    event_time: i64,
    /// For athlete events, contains {"authorized": "false"} on deauthorization
    #[serde(default)]
    updates: Option<std::collections::HashMap<String, serde_json::Value>>,
}

/// Strava sends: object_type="athlete", aspect_type="update",
/// updates={"authorized": "false"}.
fn is_deauthorization(event: &WebhookEvent) -> bool {
    event
        .updates
        .as_ref()
        .and_then(|u| u.get("authorized"))
        .is_some_and(|v| v.as_bool() == Some(false) || v.as_str() == Some("false"))
}

/// Handle incoming webhook events (POST).
///
/// The signature covers the exact raw body, so the handler takes `Bytes`
/// and parses JSON only after verification succeeds.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if provider != state.config.provider {
        tracing::warn!(provider = %provider, "Webhook for unknown provider");
        return StatusCode::NOT_FOUND;
    }

    let provided = headers
        .get("x-hub-signature")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if !signature::verify_signature(&body, provided, state.config.webhook_secret.as_bytes()) {
        tracing::warn!(provider = %provider, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse webhook event");
            return StatusCode::OK; // Still ACK to avoid provider retries
        }
    };

    tracing::info!(
        object_type = %event.object_type,
        object_id = event.object_id,
        aspect_type = %event.aspect_type,
        owner_id = event.owner_id,
        "Webhook event received"
    );

    // Idempotency: redeliveries of a completed event short-circuit
    // before any task enqueue.
    let record = crate::models::WebhookEventRecord {
        provider: provider.clone(),
        object_type: event.object_type.clone(),
        object_id: event.object_id,
        aspect_type: event.aspect_type.clone(),
        owner_id: event.owner_id,
        event_time: event.event_time,
        received_at: Utc::now().to_rfc3339(),
        processed: false,
    };
    match state.db.record_webhook_event(&record).await {
        Ok(true) => {}
        Ok(false) => {
            // Redelivery. Short-circuit only once the first delivery
            // finished its work; an event whose downstream handling
            // failed stays unprocessed and gets another chance here.
            match state.db.get_webhook_event(&record.dedup_key()).await {
                Ok(Some(prior)) if prior.processed => {
                    tracing::info!(
                        object_id = event.object_id,
                        "Duplicate webhook delivery, already processed"
                    );
                    return StatusCode::OK;
                }
                Ok(_) => {
                    tracing::info!(
                        object_id = event.object_id,
                        "Redelivery of unprocessed event, handling again"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read webhook event record");
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to record webhook event");
            // Fall through: the activity dedup key still blocks a
            // double reward downstream.
        }
    }

    let handled = match (event.object_type.as_str(), event.aspect_type.as_str()) {
        ("activity", "create") => {
            let payload = ProcessActivityPayload {
                activity_id: event.object_id,
                owner_id: event.owner_id,
                source: "webhook".to_string(),
            };

            match state
                .tasks
                .queue_activity(&state.config.api_url, payload)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to queue activity");
                    false
                }
            }
        }
        ("athlete", "update") if is_deauthorization(&event) => {
            match state
                .db
                .find_connection_by_athlete(&provider, event.owner_id)
                .await
            {
                Ok(Some(conn)) => {
                    match state
                        .db
                        .deactivate_connection(&conn.user_id, &conn.provider)
                        .await
                    {
                        Ok(()) => {
                            tracing::info!(
                                user_id = %conn.user_id,
                                owner_id = event.owner_id,
                                "Connection deactivated after deauthorization"
                            );
                            true
                        }
                        Err(e) => {
                            tracing::error!(error = %e, user_id = %conn.user_id, "Failed to deactivate connection");
                            false
                        }
                    }
                }
                Ok(None) => {
                    tracing::debug!(owner_id = event.owner_id, "Deauthorization for unknown athlete");
                    true
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to look up connection for deauthorization");
                    false
                }
            }
        }
        _ => {
            tracing::debug!(
                object_type = %event.object_type,
                aspect_type = %event.aspect_type,
                "Ignoring unhandled event type"
            );
            true
        }
    };

    // An unprocessed record lets the provider's redelivery of this event
    // run the handling again instead of short-circuiting.
    if handled {
        if let Err(e) = state.db.mark_webhook_processed(&record.dedup_key()).await {
            tracing::warn!(error = %e, "Failed to mark webhook processed");
        }
    }

    // Always ACK quickly; slow responses count as delivery failures.
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Db;
    use crate::services::{
        LedgerService, ProviderClient, ProviderService, SyncService, TasksService,
    };
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app(db: Db, tasks: TasksService) -> axum::Router {
        let config = Config::test_default();
        let client = ProviderClient::new(&config).unwrap();
        let provider = ProviderService::new(client, db.clone());
        let ledger = LedgerService::new(db.clone());
        let sync = SyncService::new(db.clone(), provider.clone(), ledger.clone(), config.clone());
        crate::routes::create_router(Arc::new(crate::AppState {
            config,
            db,
            provider,
            ledger,
            sync,
            tasks,
        }))
    }

    fn signed_event_request(body: Vec<u8>) -> Request<Body> {
        let config = Config::test_default();
        let sig = format!(
            "sha256={}",
            signature::sign_payload(&body, config.webhook_secret.as_bytes())
        );
        Request::builder()
            .method("POST")
            .uri("/webhooks/strava")
            .header("content-type", "application/json")
            .header("x-hub-signature", sig)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn failed_enqueue_leaves_event_reprocessable() {
        let db = Db::memory();

        let body = serde_json::to_vec(&serde_json::json!({
            "aspect_type": "create",
            "event_time": 1724300000,
            "object_id": 555,
            "object_type": "activity",
            "owner_id": 99
        }))
        .unwrap();
        let key = "strava:activity:555:create:1724300000";

        let failing = TasksService::noop();
        failing.set_mock_fail(true);
        let app = test_app(db.clone(), failing);
        let response = app.oneshot(signed_event_request(body.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The enqueue failed, so the record must stay reprocessable.
        let record = db.get_webhook_event(key).await.unwrap().unwrap();
        assert!(!record.processed);

        // The provider redelivers; this time the enqueue works and the
        // event completes.
        let app = test_app(db.clone(), TasksService::noop());
        let response = app.oneshot(signed_event_request(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let record = db.get_webhook_event(key).await.unwrap().unwrap();
        assert!(record.processed);
    }
}
