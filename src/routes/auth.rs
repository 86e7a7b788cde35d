// SPDX-License-Identifier: MIT

//! Provider OAuth authentication routes.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Redirect,
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, Result};
use crate::middleware::auth::create_jwt;
use crate::models::{ProviderConnection, User};
use crate::services::ContinueBackfillPayload;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Default lookback when a new connection triggers backfill.
const INITIAL_BACKFILL_DAYS: i64 = 30;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/{provider}", get(auth_start))
        .route("/auth/{provider}/callback", get(auth_callback))
}

/// Query parameters for starting OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Frontend URL to redirect back to after OAuth completes.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start OAuth flow: redirect to the provider's authorize URL with a
/// signed state parameter carrying the frontend redirect target.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<AuthStartParams>,
    headers: HeaderMap,
) -> Result<Redirect> {
    if provider != state.config.provider {
        return Err(AppError::NotFound(format!("Provider {}", provider)));
    }

    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    // State format: "frontend_url|timestamp_hex|signature_hex", base64url.
    let state_payload = format!("{}|{:x}", frontend_url, timestamp);

    let mut mac = HmacSha256::new_from_slice(&state.config.oauth_state_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(state_payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed_state = format!("{}|{}", state_payload, hex::encode(signature));
    let oauth_state = URL_SAFE_NO_PAD.encode(signed_state.as_bytes());

    let callback_url = format!("{}/auth/{}/callback", request_base_url(&headers), provider);

    let auth_url = format!(
        "https://www.strava.com/oauth/authorize?\
         client_id={}&\
         redirect_uri={}&\
         response_type=code&\
         scope=activity:read_all&\
         state={}",
        state.config.provider_client_id,
        urlencoding::encode(&callback_url),
        oauth_state
    );

    tracing::info!(
        provider = %provider,
        frontend_url = %frontend_url,
        "Starting OAuth flow"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    code: String,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback: exchange code, persist user and connection, trigger
/// backfill and hand the frontend a session JWT.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    if provider != state.config.provider {
        return Err(AppError::NotFound(format!("Provider {}", provider)));
    }

    let frontend_url = verify_and_decode_state(&params.state, &state.config.oauth_state_key)
        .unwrap_or_else(|| {
            tracing::warn!("Invalid or tampered state parameter, using default frontend URL");
            state.config.frontend_url.clone()
        });

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from provider");
        let redirect = format!("{}?error={}", frontend_url, error);
        return Ok(Redirect::temporary(&redirect));
    }

    tracing::info!("Exchanging authorization code for tokens");
    let exchange = state.provider.exchange_code(&params.code).await?;

    let user_id = format!("{}-{}", provider, exchange.athlete.id);
    let now = Utc::now().to_rfc3339();

    // Bootstrap the user on first connect; keep existing balances on
    // re-auth.
    if state.db.get_user(&user_id).await?.is_none() {
        let display_name = format!(
            "{} {}",
            exchange.athlete.firstname, exchange.athlete.lastname
        )
        .trim()
        .to_string();
        state
            .db
            .upsert_user(&User::new(&user_id, display_name, &now))
            .await?;
    }

    let conn = ProviderConnection {
        user_id: user_id.clone(),
        provider: provider.clone(),
        external_athlete_id: exchange.athlete.id,
        access_token: exchange.access_token,
        refresh_token: exchange.refresh_token,
        expires_at: exchange.expires_at,
        scope: "activity:read_all".to_string(),
        active: true,
        connected_at: now,
    };
    state.db.upsert_connection(&conn).await?;

    tracing::info!(
        user_id = %user_id,
        athlete_id = exchange.athlete.id,
        "OAuth successful, user and connection stored"
    );

    // Kick off backfill as a task chain; the login response does not wait
    // for any provider listing call.
    if let Err(e) = trigger_backfill(&state, &user_id, request_base_url(&headers)).await {
        tracing::warn!(error = %e, "Failed to trigger backfill, continuing anyway");
    }

    let jwt = create_jwt(&user_id, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    let redirect_url = format!("{}/callback?token={}", frontend_url, jwt);
    Ok(Redirect::temporary(&redirect_url))
}

/// Reset the backfill cursor and queue the first page.
async fn trigger_backfill(
    state: &Arc<AppState>,
    user_id: &str,
    service_url: String,
) -> Result<()> {
    state
        .sync
        .start_backfill(user_id, INITIAL_BACKFILL_DAYS)
        .await?;

    state
        .tasks
        .queue_continue_backfill(
            &service_url,
            ContinueBackfillPayload {
                user_id: user_id.to_string(),
            },
        )
        .await
}

/// Base URL of this deployment as seen by the caller.
fn request_base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost:8080");

    let scheme = if host.contains("localhost") || host.contains("127.0.0.1") {
        "http"
    } else {
        "https"
    };
    format!("{}://{}", scheme, host)
}

/// Verify the HMAC signature and decode the frontend URL from the OAuth
/// state parameter.
fn verify_and_decode_state(state: &str, secret: &[u8]) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "frontend_url|timestamp_hex|signature_hex"
    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return None;
    }

    let frontend_url = parts[0];
    let timestamp_hex = parts[1];
    let signature_hex = parts[2];

    let payload = format!("{}|{}", frontend_url, timestamp_hex);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected_signature = hex::encode(mac.finalize().into_bytes());

    if signature_hex != expected_signature {
        tracing::error!("OAuth state signature mismatch");
        return None;
    }

    Some(frontend_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_state(frontend_url: &str, secret: &[u8]) -> String {
        let payload = format!("{}|{:x}", frontend_url, 1234567890u128);
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());
        URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature).as_bytes())
    }

    #[test]
    fn state_round_trips() {
        let secret = b"secret_key";
        let encoded = encode_state("https://example.com", secret);
        assert_eq!(
            verify_and_decode_state(&encoded, secret),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn tampered_signature_rejected() {
        let secret = b"secret_key";
        let payload = format!("{}|{:x}", "https://example.com", 1234567890u128);
        let encoded =
            URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, "bad_signature").as_bytes());
        assert_eq!(verify_and_decode_state(&encoded, secret), None);
    }

    #[test]
    fn wrong_secret_rejected() {
        let encoded = encode_state("https://example.com", b"secret_key");
        assert_eq!(verify_and_decode_state(&encoded, b"other_key"), None);
    }

    #[test]
    fn malformed_state_rejected() {
        let encoded = URL_SAFE_NO_PAD.encode("invalid|format");
        assert_eq!(verify_and_decode_state(&encoded, b"secret_key"), None);
        assert_eq!(verify_and_decode_state("not-base64!!!", b"secret_key"), None);
    }
}
