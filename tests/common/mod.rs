// SPDX-License-Identifier: MIT

//! Shared helpers for integration tests: an offline app wired to the
//! in-memory backend with a no-op task queue.

use chrono::Utc;
use fitledger::config::Config;
use fitledger::db::Db;
use fitledger::models::{ProviderConnection, User};
use fitledger::routes::create_router;
use fitledger::services::{
    LedgerService, ProviderClient, ProviderService, SyncService, TasksService,
};
use fitledger::AppState;
use std::sync::Arc;

/// Create a test app with no GCP dependencies. Returns the router and the
/// backing store so tests can seed and inspect state directly.
pub fn create_offline_test_app() -> (axum::Router, Db) {
    let config = Config::test_default();
    let db = Db::memory();

    let client = ProviderClient::new(&config).unwrap();
    let provider = ProviderService::new(client, db.clone());
    let ledger = LedgerService::new(db.clone());
    let sync = SyncService::new(db.clone(), provider.clone(), ledger.clone(), config.clone());

    let state = Arc::new(AppState {
        config,
        db: db.clone(),
        provider,
        ledger,
        sync,
        tasks: TasksService::noop(),
    });

    (create_router(state), db)
}

/// Seed a user with an already-earned balance.
pub async fn seed_user(db: &Db, user_id: &str, balance: f64) -> User {
    let now = Utc::now().to_rfc3339();
    let mut user = User::new(user_id, "Test User", &now);
    user.balance = balance;
    user.total_earned = balance;
    db.upsert_user(&user).await.unwrap();
    user
}

/// Seed an active provider connection with a long-lived token.
pub async fn seed_connection(db: &Db, user_id: &str, athlete_id: u64) -> ProviderConnection {
    let conn = ProviderConnection {
        user_id: user_id.to_string(),
        provider: "strava".to_string(),
        external_athlete_id: athlete_id,
        access_token: "test_access_token".to_string(),
        refresh_token: "test_refresh_token".to_string(),
        expires_at: Utc::now().timestamp() + 3600,
        scope: "activity:read_all".to_string(),
        active: true,
        connected_at: Utc::now().to_rfc3339(),
    };
    db.upsert_connection(&conn).await.unwrap();
    conn
}

/// Bearer token for the test JWT signing key.
pub fn auth_header(user_id: &str) -> String {
    let config = Config::test_default();
    let token = fitledger::middleware::create_jwt(user_id, &config.jwt_signing_key).unwrap();
    format!("Bearer {}", token)
}

/// Webhook signature header value for a body, using the test secret.
pub fn sign_body(body: &[u8]) -> String {
    let config = Config::test_default();
    format!(
        "sha256={}",
        fitledger::services::signature::sign_payload(body, config.webhook_secret.as_bytes())
    )
}
