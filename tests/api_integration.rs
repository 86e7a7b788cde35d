// SPDX-License-Identifier: MIT

//! Integration tests for the authenticated API: ledger operations,
//! dashboard reads and the sync-history trigger.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::json;
use tower::ServiceExt;

use common::{auth_header, create_offline_test_app, seed_connection, seed_user};

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, auth: &str, payload: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

fn get_authed(uri: &str, auth: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn protected_routes_require_jwt() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/users/me/balance")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn garbage_jwt_rejected() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .oneshot(get_authed("/users/me/balance", "Bearer not.a.jwt"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn balance_reflects_seeded_user() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 42.5).await;

    let response = app
        .oneshot(get_authed("/users/me/balance", &auth_header("u1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["balance"], 42.5);
    assert_eq!(json["staked_balance"], 0.0);
    assert_eq!(json["total_earned"], 42.5);
    assert_eq!(json["total_spent"], 0.0);
}

#[tokio::test]
async fn spend_debits_and_returns_transaction() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 100.0).await;

    let response = app
        .oneshot(post_json(
            "/tokens/spend",
            &auth_header("u1"),
            &json!({"amount": 25.0, "description": "marketplace order"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["balance"], 75.0);
    assert_eq!(json["transaction"]["kind"], "spend");
    assert_eq!(json["transaction"]["amount"], 25.0);

    let user = db.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user.total_spent, 25.0);
    assert!(user.invariant_holds());
}

#[tokio::test]
async fn overspend_is_rejected_without_mutation() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 10.0).await;

    let response = app
        .oneshot(post_json(
            "/tokens/spend",
            &auth_header("u1"),
            &json!({"amount": 50.0}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "insufficient_balance");

    let user = db.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user.balance, 10.0);
    assert_eq!(user.total_spent, 0.0);
    assert!(db.list_transactions("u1", 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn stake_then_unstake_round_trip() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 100.0).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/tokens/stake",
            &auth_header("u1"),
            &json!({"amount": 60.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["balance"], 40.0);
    assert_eq!(json["staked_balance"], 60.0);

    let response = app
        .oneshot(post_json(
            "/tokens/unstake",
            &auth_header("u1"),
            &json!({"amount": 60.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["balance"], 100.0);
    assert_eq!(json["staked_balance"], 0.0);

    let user = db.get_user("u1").await.unwrap().unwrap();
    assert!(user.invariant_holds());
    assert_eq!(db.list_transactions("u1", 10, 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn transactions_listing_pages_newest_first() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 100.0).await;

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/tokens/spend",
                &auth_header("u1"),
                &json!({"amount": 1.0, "description": format!("purchase {}", i)}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(get_authed(
            "/users/me/transactions?limit=2&offset=0",
            &auth_header("u1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sync_history_starts_backfill() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "strava-42", 0.0).await;
    seed_connection(&db, "strava-42", 42).await;

    let response = app
        .oneshot(post_json(
            "/activities/sync-history/strava-42",
            &auth_header("strava-42"),
            &json!({"days": 30}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "sync_started");

    let state = db.get_sync_state("strava-42").await.unwrap().unwrap();
    assert_eq!(state.next_page, 1);
    assert!(!state.cancel_requested);
}

#[tokio::test]
async fn sync_history_rejects_other_users() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "strava-42", 0.0).await;
    seed_connection(&db, "strava-42", 42).await;

    let response = app
        .oneshot(post_json(
            "/activities/sync-history/strava-42",
            &auth_header("someone-else"),
            &json!({"days": 30}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(db.get_sync_state("strava-42").await.unwrap().is_none());
}

#[tokio::test]
async fn sync_history_validates_days_bounds() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "strava-42", 0.0).await;
    seed_connection(&db, "strava-42", 42).await;

    for days in [0, 366] {
        let response = app
            .clone()
            .oneshot(post_json(
                "/activities/sync-history/strava-42",
                &auth_header("strava-42"),
                &json!({"days": days}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn sync_history_requires_active_connection() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u-no-conn", 0.0).await;

    let response = app
        .oneshot(post_json(
            "/activities/sync-history/u-no-conn",
            &auth_header("u-no-conn"),
            &json!({"days": 30}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn task_callbacks_forbidden_without_queue_header() {
    let (app, _db) = create_offline_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks/process-activity")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"activity_id": 1, "owner_id": 2, "source": "webhook"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks/continue-backfill")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"user_id": "u1"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn process_activity_without_connection_is_acked() {
    let (app, _db) = create_offline_test_app();

    // Valid queue header, but nobody connected for this athlete: the task
    // is dropped rather than retried forever.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tasks/process-activity")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-cloudtasks-queuename", "fitledger-activity-queue")
                .body(Body::from(
                    json!({"activity_id": 1, "owner_id": 2, "source": "webhook"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_spends_never_overdraw() {
    let (app, db) = create_offline_test_app();
    seed_user(&db, "u1", 50.0).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = app.clone();
        let auth = auth_header("u1");
        handles.push(tokio::spawn(async move {
            app.oneshot(post_json(
                "/tokens/spend",
                &auth,
                &json!({"amount": 10.0}),
            ))
            .await
            .unwrap()
            .status()
        }));
    }

    let mut ok = 0;
    for h in handles {
        if h.await.unwrap() == StatusCode::OK {
            ok += 1;
        }
    }

    // Exactly five spends fit in the balance.
    assert_eq!(ok, 5);
    let user = db.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user.balance, 0.0);
    assert_eq!(user.total_spent, 50.0);
    assert!(user.invariant_holds());
}
