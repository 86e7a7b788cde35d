// SPDX-License-Identifier: MIT

//! Integration tests for webhook handling.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::{create_offline_test_app, seed_connection, seed_user, sign_body};

#[tokio::test]
async fn webhook_verification_echoes_challenge() {
    let (app, _db) = create_offline_test_app();

    let challenge = "test_challenge_123";
    let verify_token = "test_verify_token"; // Matches Config::test_default()

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!(
                    "/webhooks/strava?hub.mode=subscribe&hub.challenge={}&hub.verify_token={}",
                    challenge, verify_token
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["hub.challenge"], challenge);
}

#[tokio::test]
async fn webhook_verification_rejects_wrong_token() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/webhooks/strava?hub.mode=subscribe&hub.challenge=c&hub.verify_token=wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn webhook_verification_rejects_wrong_mode() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(
                    "/webhooks/strava?hub.mode=unsubscribe&hub.challenge=c\
                     &hub.verify_token=test_verify_token",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

fn activity_create_event(object_id: u64, owner_id: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "aspect_type": "create",
        "event_time": 1724300000,
        "object_id": object_id,
        "object_type": "activity",
        "owner_id": owner_id
    }))
    .unwrap()
}

#[tokio::test]
async fn webhook_event_with_valid_signature_acked() {
    let (app, _db) = create_offline_test_app();

    let body = activity_create_event(12345678901, 123456);
    let signature = sign_body(&body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_event_with_bad_signature_rejected() {
    let (app, _db) = create_offline_test_app();

    let body = activity_create_event(12345678901, 123456);
    let mut signature = sign_body(&body);
    // Flip the last hex digit.
    let flipped = if signature.ends_with('0') { '1' } else { '0' };
    signature.pop();
    signature.push(flipped);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_event_without_signature_rejected() {
    let (app, _db) = create_offline_test_app();

    let body = activity_create_event(12345678901, 123456);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_unknown_provider_is_404() {
    let (app, _db) = create_offline_test_app();

    let body = activity_create_event(1, 1);
    let signature = sign_body(&body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/garmin")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn redelivered_event_acked_and_recorded_once() {
    let (app, db) = create_offline_test_app();

    let body = activity_create_event(999, 123456);
    let signature = sign_body(&body);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/strava")
                    .header("content-type", "application/json")
                    .header("x-hub-signature", signature.clone())
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // The second delivery short-circuited on the existing record.
    let record = fitledger::models::WebhookEventRecord {
        provider: "strava".to_string(),
        object_type: "activity".to_string(),
        object_id: 999,
        aspect_type: "create".to_string(),
        owner_id: 123456,
        event_time: 1724300000,
        received_at: String::new(),
        processed: false,
    };
    assert!(!db.record_webhook_event(&record).await.unwrap());
}

#[tokio::test]
async fn unprocessed_redelivery_is_handled_again() {
    let (app, db) = create_offline_test_app();

    // A prior delivery that was recorded but never finished its work
    // (the process crashed or the enqueue failed).
    let record = fitledger::models::WebhookEventRecord {
        provider: "strava".to_string(),
        object_type: "activity".to_string(),
        object_id: 4242,
        aspect_type: "create".to_string(),
        owner_id: 123456,
        event_time: 1724300000,
        received_at: String::new(),
        processed: false,
    };
    assert!(db.record_webhook_event(&record).await.unwrap());

    let body = activity_create_event(4242, 123456);
    let signature = sign_body(&body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    // The redelivery ran to completion instead of short-circuiting.
    let stored = db
        .get_webhook_event(&record.dedup_key())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.processed);
}

#[tokio::test]
async fn deauthorization_event_deactivates_connection() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "strava-777", 0.0).await;
    seed_connection(&db, "strava-777", 777).await;

    let body = serde_json::to_vec(&json!({
        "aspect_type": "update",
        "event_time": 1724300001,
        "object_id": 777,
        "object_type": "athlete",
        "owner_id": 777,
        "updates": {"authorized": "false"}
    }))
    .unwrap();
    let signature = sign_body(&body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let conn = db.get_connection("strava-777", "strava").await.unwrap().unwrap();
    assert!(!conn.active);
}

#[tokio::test]
async fn unparseable_event_still_acked() {
    let (app, _db) = create_offline_test_app();

    let body = br#"{"not": "a webhook event"}"#.to_vec();
    let signature = sign_body(&body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/strava")
                .header("content-type", "application/json")
                .header("x-hub-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    // ACK so the provider does not retry a payload we will never parse.
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_responds() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
