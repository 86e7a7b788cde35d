// SPDX-License-Identifier: MIT

//! Application configuration loaded from environment variables.
//!
//! Retry counts, backoff and page sizes are configuration rather than
//! hard-coded constants; the provider does not document its exact retry
//! behavior, so the defaults here are deliberately conservative.

use std::env;

/// Cloud Tasks queue used for activity processing and backfill pages.
pub const ACTIVITY_QUEUE_NAME: &str = "fitledger-activity-queue";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Provider OAuth client ID (public)
    pub provider_client_id: String,
    /// Provider slug this deployment integrates with
    pub provider: String,
    /// Frontend URL for OAuth redirects
    pub frontend_url: String,
    /// Public base URL of this API (used for Cloud Tasks callbacks)
    pub api_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region for Cloud Tasks
    pub gcp_region: String,
    /// Server port
    pub port: u16,

    // --- Secrets ---
    /// Provider OAuth client secret
    pub provider_client_secret: String,
    /// Shared secret for webhook HMAC signatures
    pub webhook_secret: String,
    /// Webhook subscription verify token
    pub webhook_verify_token: String,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Key for signing the OAuth state parameter
    pub oauth_state_key: Vec<u8>,

    // --- Tuning ---
    /// Page size for backfill listing (provider maximum is 200)
    pub sync_page_size: u32,
    /// Retries for a transient ledger write failure (single retry policy)
    pub ledger_retry_backoff_ms: u64,
    /// Backoff before retrying a rate-limited webhook fetch
    pub fetch_retry_backoff_ms: u64,
    /// Timeout for provider API calls (seconds)
    pub provider_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            provider_client_id: env::var("PROVIDER_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("PROVIDER_CLIENT_ID"))?,
            provider: env::var("PROVIDER").unwrap_or_else(|_| "strava".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),

            provider_client_secret: env::var("PROVIDER_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("PROVIDER_CLIENT_SECRET"))?,
            webhook_secret: env::var("WEBHOOK_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_SECRET"))?,
            webhook_verify_token: env::var("WEBHOOK_VERIFY_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_VERIFY_TOKEN"))?,
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),

            sync_page_size: parse_env("SYNC_PAGE_SIZE", 200),
            ledger_retry_backoff_ms: parse_env("LEDGER_RETRY_BACKOFF_MS", 1000),
            fetch_retry_backoff_ms: parse_env("FETCH_RETRY_BACKOFF_MS", 1000),
            provider_timeout_secs: parse_env("PROVIDER_TIMEOUT_SECS", 10),
        })
    }

    /// Default config for offline tests only.
    pub fn test_default() -> Self {
        Self {
            provider_client_id: "test_client_id".to_string(),
            provider: "strava".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            provider_client_secret: "test_secret".to_string(),
            webhook_secret: "test_webhook_secret".to_string(),
            webhook_verify_token: "test_verify_token".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_oauth_state_key".to_vec(),
            sync_page_size: 200,
            ledger_retry_backoff_ms: 0,
            fetch_retry_backoff_ms: 0,
            provider_timeout_secs: 10,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
