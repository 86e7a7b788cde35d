// SPDX-License-Identifier: MIT

//! Append-only ledger transaction model.

use serde::{Deserialize, Serialize};

/// What a transaction does to the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Activity reward: balance += amount, total_earned += amount
    Earn,
    /// Spend: balance -= amount, total_spent += amount
    Spend,
    /// Stake: balance -= amount, staked_balance += amount
    Stake,
    /// Unstake: staked_balance -= amount, balance += amount
    Unstake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One ledger entry. Append-only: rows are never edited, and the sum of
/// completed entries per user must equal that user's balances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID (UUID v4)
    pub id: String,
    /// Owning user ID
    pub user_id: String,
    pub kind: TransactionKind,
    /// Always positive; the kind determines the direction
    pub amount: f64,
    /// Set for `Earn` transactions created from an activity
    pub activity_id: Option<String>,
    /// Human-readable purpose ("5.2 km Run", "marketplace order", ...)
    pub description: String,
    pub status: TransactionStatus,
    /// When the transaction was created (ISO 8601)
    pub created_at: String,
}

impl Transaction {
    pub fn new(
        user_id: impl Into<String>,
        kind: TransactionKind,
        amount: f64,
        description: impl Into<String>,
        now: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            amount,
            activity_id: None,
            description: description.into(),
            status: TransactionStatus::Completed,
            created_at: now.to_string(),
        }
    }

    /// Earn transaction for a rewarded activity.
    pub fn earn_for_activity(
        user_id: impl Into<String>,
        activity_id: impl Into<String>,
        amount: f64,
        description: impl Into<String>,
        now: &str,
    ) -> Self {
        let mut tx = Self::new(user_id, TransactionKind::Earn, amount, description, now);
        tx.activity_id = Some(activity_id.into());
        tx
    }
}
