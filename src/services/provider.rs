// SPDX-License-Identifier: MIT

//! Fitness provider API client and token lifecycle management.
//!
//! Handles:
//! - Activity fetching (single and paginated listing for backfill)
//! - OAuth code exchange and token refresh
//! - Rate limit detection (for Cloud Tasks retry)

use crate::config::Config;
use crate::db::Db;
use crate::error::AppError;
use crate::models::ProviderConnection;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Low-level HTTP client for the provider API.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl ProviderClient {
    /// Create a new provider client with OAuth credentials.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            http,
            base_url: "https://www.strava.com/api/v3".to_string(),
            oauth_url: "https://www.strava.com/oauth/token".to_string(),
            client_id: config.provider_client_id.clone(),
            client_secret: config.provider_client_secret.clone(),
        })
    }

    /// Get a detailed activity by ID.
    pub async fn get_activity(
        &self,
        access_token: &str,
        activity_id: u64,
    ) -> Result<ProviderActivity, AppError> {
        let url = format!("{}/activities/{}", self.base_url, activity_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(e.to_string()))?;

        check_response_json(response).await
    }

    /// List activities for backfill (paginated, newest first).
    pub async fn list_activities(
        &self,
        access_token: &str,
        after: i64, // Unix timestamp
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ProviderActivity>, AppError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("after", after.to_string()),
                ("page", page.to_string()),
                ("per_page", per_page.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(e.to_string()))?;

        check_response_json(response).await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchangeResponse, AppError> {
        let response = self
            .http
            .post(&self.oauth_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Provider token exchange failed");
            return Err(AppError::ProviderApi(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Failed to parse token response: {}", e)))
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.oauth_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // invalid_grant means our refresh token was already rotated.
            return Err(AppError::ProviderApi(format!(
                "Token refresh failed with status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ProviderApi(format!("Failed to parse refresh response: {}", e)))
    }
}

/// Map a non-success response to the error taxonomy, or parse its JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            tracing::warn!("Provider rate limit hit (429)");
            return Err(AppError::ProviderRateLimited);
        }

        if status.as_u16() == 401 {
            return Err(AppError::ProviderApi(
                AppError::PROVIDER_TOKEN_ERROR.to_string(),
            ));
        }

        return Err(AppError::ProviderApi(format!("HTTP {}: {}", status, body)));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::ProviderApi(format!("JSON parse error: {}", e)))
}

/// Token refresh response from the provider.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Token exchange response from the provider OAuth endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub athlete: ProviderAthlete,
}

/// Athlete profile embedded in the token exchange response.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderAthlete {
    pub id: u64,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
}

/// Activity payload from the provider API.
///
/// The same shape covers both the detail endpoint and the list endpoint;
/// fields absent from summaries default to zero.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderActivity {
    pub id: u64,
    pub name: String,
    pub sport_type: String,
    pub start_date: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub moving_time: u64,
    #[serde(default)]
    pub elapsed_time: u64,
    #[serde(default)]
    pub total_elevation_gain: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// ProviderService - high-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

/// Cached access token with expiry.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: i64,
}

/// High-level provider service that manages the token lifecycle.
///
/// Access tokens are cached in memory per connection; refreshes are
/// serialized by a per-connection mutex so concurrent webhook and backfill
/// work never burns the same refresh token twice in one instance.
#[derive(Clone)]
pub struct ProviderService {
    client: ProviderClient,
    db: Db,
    token_cache: Arc<DashMap<String, CachedToken>>,
    refresh_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ProviderService {
    pub fn new(client: ProviderClient, db: Db) -> Self {
        Self {
            client,
            db,
            token_cache: Arc::new(DashMap::new()),
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    /// Get a valid (non-expired) access token for the given connection.
    ///
    /// Checks the in-memory cache first, then acquires the per-connection
    /// lock and re-checks before refreshing, so only one task per
    /// connection ever talks to the OAuth endpoint. Refreshed tokens are
    /// persisted before being returned.
    pub async fn valid_access_token(
        &self,
        conn: &ProviderConnection,
    ) -> Result<String, AppError> {
        let key = ProviderConnection::doc_id(&conn.user_id, &conn.provider);
        let now = Utc::now().timestamp();

        if let Some(cached) = self.token_cache.get(&key) {
            if now + TOKEN_REFRESH_MARGIN_SECS < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited on the lock.
        if let Some(cached) = self.token_cache.get(&key) {
            if now + TOKEN_REFRESH_MARGIN_SECS < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        // Re-read the stored connection: a Cloud Tasks worker on another
        // instance may have rotated the tokens already.
        let stored = self
            .db
            .get_connection(&conn.user_id, &conn.provider)
            .await?
            .filter(|c| c.active)
            .ok_or(AppError::ConnectionExpired)?;

        if now + TOKEN_REFRESH_MARGIN_SECS < stored.expires_at {
            self.token_cache.insert(
                key,
                CachedToken {
                    access_token: stored.access_token.clone(),
                    expires_at: stored.expires_at,
                },
            );
            return Ok(stored.access_token);
        }

        tracing::info!(user_id = %conn.user_id, provider = %conn.provider, "Access token expired, refreshing");

        let refreshed = match self.client.refresh_token(&stored.refresh_token).await {
            Ok(t) => t,
            Err(AppError::ProviderApi(ref msg)) if msg.contains("invalid_grant") => {
                // Cross-instance race: another instance may have won the
                // refresh and stored new tokens. Retry from storage once;
                // if the stored tokens are still the ones that failed, the
                // grant is truly dead.
                let latest = self
                    .db
                    .get_connection(&conn.user_id, &conn.provider)
                    .await?
                    .filter(|c| c.active)
                    .ok_or(AppError::ConnectionExpired)?;

                if latest.refresh_token != stored.refresh_token
                    && now + TOKEN_REFRESH_MARGIN_SECS < latest.expires_at
                {
                    tracing::info!(
                        user_id = %conn.user_id,
                        "Refresh race detected, using tokens stored by the winner"
                    );
                    self.token_cache.insert(
                        key,
                        CachedToken {
                            access_token: latest.access_token.clone(),
                            expires_at: latest.expires_at,
                        },
                    );
                    return Ok(latest.access_token);
                }

                tracing::warn!(
                    user_id = %conn.user_id,
                    provider = %conn.provider,
                    "Refresh token rejected, deactivating connection"
                );
                self.db
                    .deactivate_connection(&conn.user_id, &conn.provider)
                    .await?;
                self.token_cache.remove(&key);
                return Err(AppError::ConnectionExpired);
            }
            Err(e) => return Err(e),
        };

        let mut updated = stored.clone();
        updated.access_token = refreshed.access_token.clone();
        updated.refresh_token = refreshed.refresh_token;
        updated.expires_at = refreshed.expires_at;
        self.db.upsert_connection(&updated).await?;

        self.token_cache.insert(
            key,
            CachedToken {
                access_token: refreshed.access_token.clone(),
                expires_at: refreshed.expires_at,
            },
        );

        tracing::info!(user_id = %conn.user_id, "Token refreshed and persisted");
        Ok(refreshed.access_token)
    }

    /// Exchange an OAuth authorization code (callback handling).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchangeResponse, AppError> {
        self.client.exchange_code(code).await
    }

    /// Fetch one activity using the connection's credentials.
    pub async fn fetch_activity(
        &self,
        conn: &ProviderConnection,
        activity_id: u64,
    ) -> Result<ProviderActivity, AppError> {
        let token = self.valid_access_token(conn).await?;
        self.client.get_activity(&token, activity_id).await
    }

    /// List one backfill page of activities.
    pub async fn list_activities(
        &self,
        conn: &ProviderConnection,
        after: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ProviderActivity>, AppError> {
        let token = self.valid_access_token(conn).await?;
        self.client
            .list_activities(&token, after, page, per_page)
            .await
    }
}
