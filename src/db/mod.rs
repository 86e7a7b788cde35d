// SPDX-License-Identifier: MIT

//! Storage layer.
//!
//! `Db` fronts two backends: Firestore in production and an in-memory
//! store for tests and local development. The backend owns the
//! authoritative duplicate guard for activities (document keyed by the
//! dedup key, checked in the same atomic unit as the ledger write), so
//! races between webhook and backfill ingestion cannot double-reward.

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use crate::error::AppError;
use crate::models::{
    Activity, ProviderConnection, SyncState, Transaction, User, WebhookEventRecord,
};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CONNECTIONS: &str = "connections";
    pub const ACTIVITIES: &str = "activities";
    pub const TRANSACTIONS: &str = "transactions";
    pub const WEBHOOK_EVENTS: &str = "webhook_events";
    pub const SYNC_STATES: &str = "sync_states";
}

#[derive(Clone)]
enum Backend {
    Firestore(FirestoreStore),
    Memory(MemoryStore),
}

/// Database handle shared by all services.
#[derive(Clone)]
pub struct Db {
    backend: Backend,
}

impl Db {
    /// Connect to Firestore (or the emulator when
    /// `FIRESTORE_EMULATOR_HOST` is set).
    pub async fn connect(project_id: &str) -> Result<Self, AppError> {
        Ok(Self {
            backend: Backend::Firestore(FirestoreStore::new(project_id).await?),
        })
    }

    /// In-memory backend for tests and local development.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::default()),
        }
    }

    /// Make the next `count` reward writes fail (memory backend, test
    /// builds only). No-op on Firestore.
    #[cfg(test)]
    pub fn fail_reward_writes(&self, count: u32) {
        if let Backend::Memory(s) = &self.backend {
            s.fail_reward_writes(count);
        }
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.get_user(user_id).await,
            Backend::Memory(s) => Ok(s.get_user(user_id)),
        }
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.upsert_user(user).await,
            Backend::Memory(s) => {
                s.upsert_user(user);
                Ok(())
            }
        }
    }

    // ─── Connection Operations ───────────────────────────────────

    pub async fn get_connection(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderConnection>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.get_connection(user_id, provider).await,
            Backend::Memory(s) => Ok(s.get_connection(user_id, provider)),
        }
    }

    /// Look up a connection by the provider's athlete ID (webhook owner_id).
    pub async fn find_connection_by_athlete(
        &self,
        provider: &str,
        external_athlete_id: u64,
    ) -> Result<Option<ProviderConnection>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => {
                s.find_connection_by_athlete(provider, external_athlete_id)
                    .await
            }
            Backend::Memory(s) => Ok(s.find_connection_by_athlete(provider, external_athlete_id)),
        }
    }

    pub async fn upsert_connection(&self, conn: &ProviderConnection) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.upsert_connection(conn).await,
            Backend::Memory(s) => {
                s.upsert_connection(conn);
                Ok(())
            }
        }
    }

    /// Deactivate a connection (refresh failure or deauthorization).
    /// Connections are never deleted.
    pub async fn deactivate_connection(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<(), AppError> {
        if let Some(mut conn) = self.get_connection(user_id, provider).await? {
            conn.active = false;
            self.upsert_connection(&conn).await?;
        }
        Ok(())
    }

    // ─── Activity Operations ─────────────────────────────────────

    pub async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.get_activity(activity_id).await,
            Backend::Memory(s) => Ok(s.get_activity(activity_id)),
        }
    }

    /// Fast-path dedup probe. Advisory only: the authoritative guard is the
    /// keyed insert in `insert_activity_with_reward`.
    pub async fn activity_exists(&self, provider: &str, external_id: u64) -> Result<bool, AppError> {
        Ok(self
            .get_activity(&Activity::dedup_key(provider, external_id))
            .await?
            .is_some())
    }

    pub async fn list_activities_for_user(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Activity>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.list_activities_for_user(user_id, limit, offset).await,
            Backend::Memory(s) => Ok(s.list_activities_for_user(user_id, limit, offset)),
        }
    }

    /// Atomically ingest a rewarded activity: insert the activity row, append
    /// the earn transaction, and apply the balance update to the user, all
    /// or nothing. Returns `Ok(false)` without writing anything when the
    /// dedup key already exists (idempotent no-op).
    pub async fn insert_activity_with_reward(
        &self,
        activity: &Activity,
        tx: &Transaction,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.insert_activity_with_reward(activity, tx).await,
            Backend::Memory(s) => s.insert_activity_with_reward(activity, tx),
        }
    }

    /// Write an activity row without a ledger entry (`verified = false`).
    /// Used when the ledger write keeps failing so the activity is neither
    /// lost nor double-counted; reconciliation re-opens it explicitly.
    pub async fn insert_unverified_activity(&self, activity: &Activity) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.insert_unverified_activity(activity).await,
            Backend::Memory(s) => Ok(s.insert_unverified_activity(activity)),
        }
    }

    // ─── Ledger Operations ───────────────────────────────────────

    /// Atomically persist an updated user document together with the
    /// transaction that produced it. The caller (ledger service) holds the
    /// per-user lock and has already validated the mutation.
    pub async fn apply_transaction(&self, user: &User, tx: &Transaction) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.apply_transaction(user, tx).await,
            Backend::Memory(s) => {
                s.apply_transaction(user, tx);
                Ok(())
            }
        }
    }

    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Transaction>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.list_transactions(user_id, limit, offset).await,
            Backend::Memory(s) => Ok(s.list_transactions(user_id, limit, offset)),
        }
    }

    // ─── Webhook Event Audit ─────────────────────────────────────

    /// Record a webhook delivery. Returns `Ok(false)` when the same event
    /// was already recorded (redelivery), letting the route short-circuit
    /// before any provider API call.
    pub async fn record_webhook_event(
        &self,
        event: &WebhookEventRecord,
    ) -> Result<bool, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.record_webhook_event(event).await,
            Backend::Memory(s) => Ok(s.record_webhook_event(event)),
        }
    }

    pub async fn get_webhook_event(
        &self,
        dedup_key: &str,
    ) -> Result<Option<WebhookEventRecord>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.get_webhook_event(dedup_key).await,
            Backend::Memory(s) => Ok(s.get_webhook_event(dedup_key)),
        }
    }

    pub async fn mark_webhook_processed(&self, dedup_key: &str) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.mark_webhook_processed(dedup_key).await,
            Backend::Memory(s) => {
                s.mark_webhook_processed(dedup_key);
                Ok(())
            }
        }
    }

    // ─── Backfill Cursor ─────────────────────────────────────────

    pub async fn get_sync_state(&self, user_id: &str) -> Result<Option<SyncState>, AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.get_sync_state(user_id).await,
            Backend::Memory(s) => Ok(s.get_sync_state(user_id)),
        }
    }

    pub async fn set_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        match &self.backend {
            Backend::Firestore(s) => s.set_sync_state(state).await,
            Backend::Memory(s) => {
                s.set_sync_state(state);
                Ok(())
            }
        }
    }
}
