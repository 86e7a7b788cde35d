// SPDX-License-Identifier: MIT

//! Token ledger service.
//!
//! All balance mutations go through here. A per-user async mutex
//! serializes ledger writes within the instance; validation happens under
//! the lock and before any write, so an insufficient balance fails closed
//! with nothing persisted.

use crate::db::Db;
use crate::error::AppError;
use crate::models::{Activity, Transaction, TransactionKind, User};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct LedgerService {
    db: Db,
    user_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LedgerService {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            user_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Credit an activity reward: activity row, earn transaction and
    /// balance update land atomically. Returns `Ok(false)` when the
    /// activity was already ingested (duplicate, nothing written).
    pub async fn credit_for_activity(
        &self,
        activity: &Activity,
        tx: &Transaction,
    ) -> Result<bool, AppError> {
        let lock = self.lock_for(&activity.user_id);
        let _guard = lock.lock().await;

        self.db.insert_activity_with_reward(activity, tx).await
    }

    /// Spend tokens from the spendable balance.
    pub async fn spend(
        &self,
        user_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<Transaction, AppError> {
        self.mutate(user_id, amount, description, TransactionKind::Spend)
            .await
    }

    /// Move tokens from the spendable balance into the staked balance.
    pub async fn stake(
        &self,
        user_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<Transaction, AppError> {
        self.mutate(user_id, amount, description, TransactionKind::Stake)
            .await
    }

    /// Move tokens from the staked balance back to the spendable balance.
    pub async fn unstake(
        &self,
        user_id: &str,
        amount: f64,
        description: &str,
    ) -> Result<Transaction, AppError> {
        self.mutate(user_id, amount, description, TransactionKind::Unstake)
            .await
    }

    async fn mutate(
        &self,
        user_id: &str,
        amount: f64,
        description: &str,
        kind: TransactionKind,
    ) -> Result<Transaction, AppError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(AppError::BadRequest(
                "Amount must be a positive number".to_string(),
            ));
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let mut user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        // Validate before writing anything. Credits have no funding
        // requirement; everything else draws on a balance.
        let available = match kind {
            TransactionKind::Earn => None,
            TransactionKind::Unstake => Some(user.staked_balance),
            _ => Some(user.balance),
        };
        if let Some(available) = available {
            if available < amount {
                return Err(AppError::InsufficientBalance {
                    available,
                    requested: amount,
                });
            }
        }

        match kind {
            TransactionKind::Earn => {
                user.balance += amount;
                user.total_earned += amount;
            }
            TransactionKind::Spend => {
                user.balance -= amount;
                user.total_spent += amount;
            }
            TransactionKind::Stake => {
                user.balance -= amount;
                user.staked_balance += amount;
            }
            TransactionKind::Unstake => {
                user.staked_balance -= amount;
                user.balance += amount;
            }
        }

        let now = Utc::now().to_rfc3339();
        user.updated_at = now.clone();

        if !user.invariant_holds() {
            tracing::error!(
                user_id,
                balance = user.balance,
                staked = user.staked_balance,
                earned = user.total_earned,
                spent = user.total_spent,
                "Balance invariant violated, refusing to persist"
            );
            return Err(AppError::Database(
                "Balance invariant violation".to_string(),
            ));
        }

        let tx = Transaction::new(user_id, kind, amount, description, &now);
        self.db.apply_transaction(&user, &tx).await?;

        tracing::info!(
            user_id,
            kind = ?kind,
            amount,
            balance = user.balance,
            "Ledger transaction applied"
        );

        Ok(tx)
    }

    pub async fn balance(&self, user_id: &str) -> Result<User, AppError> {
        self.db
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))
    }
}
