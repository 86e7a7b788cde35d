// SPDX-License-Identifier: MIT

//! User account and provider connection models.

use serde::{Deserialize, Serialize};

/// User account with materialized token balances.
///
/// Balances are mutated only by the ledger service, which maintains
/// `balance + staked_balance == total_earned - total_spent` after every
/// completed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Internal user ID (also used as document ID)
    pub id: String,
    /// Email address (may be None if not shared by the provider)
    pub email: Option<String>,
    /// Display name from the provider profile
    pub display_name: String,
    /// Opaque wallet address; custody is out of scope here
    pub wallet_address: Option<String>,
    /// Spendable token balance
    pub balance: f64,
    /// Tokens staked (moved out of the spendable balance)
    pub staked_balance: f64,
    /// Lifetime tokens earned
    pub total_earned: f64,
    /// Lifetime tokens spent
    pub total_spent: f64,
    /// When the user first connected (ISO 8601)
    pub created_at: String,
    /// Last balance-affecting update (ISO 8601)
    pub updated_at: String,
}

impl User {
    /// Bootstrap a new user with zeroed balances.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, now: &str) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: display_name.into(),
            wallet_address: None,
            balance: 0.0,
            staked_balance: 0.0,
            total_earned: 0.0,
            total_spent: 0.0,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    /// Check the ledger balance invariant (within float tolerance).
    pub fn invariant_holds(&self) -> bool {
        (self.balance + self.staked_balance - (self.total_earned - self.total_spent)).abs() < 1e-6
    }
}

/// OAuth connection to an activity provider, one active per (user, provider).
///
/// Created on OAuth callback, mutated by the token refresh manager,
/// deactivated (never deleted) on refresh failure or deauthorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnection {
    /// Owning user ID
    pub user_id: String,
    /// Provider slug, e.g. "strava"
    pub provider: String,
    /// The provider's athlete ID for this user
    pub external_athlete_id: u64,
    /// Current access token
    pub access_token: String,
    /// Current refresh token (rotated on every refresh grant)
    pub refresh_token: String,
    /// Access token expiry (epoch seconds)
    pub expires_at: i64,
    /// Granted OAuth scopes
    pub scope: String,
    /// False once the refresh grant fails or the user deauthorizes
    pub active: bool,
    /// When the connection was created (ISO 8601)
    pub connected_at: String,
}

impl ProviderConnection {
    /// Document ID: one connection per (user, provider).
    pub fn doc_id(user_id: &str, provider: &str) -> String {
        format!("{}:{}", user_id, provider)
    }
}
