// SPDX-License-Identifier: MIT

//! In-memory storage backend.
//!
//! Used by tests and local development. The dedup guard relies on the
//! atomicity of `DashMap::entry`, so concurrent ingestion of the same
//! activity still results in exactly one row.

use crate::models::{
    Activity, ProviderConnection, SyncState, Transaction, User, WebhookEventRecord,
};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<String, User>>,
    connections: Arc<DashMap<String, ProviderConnection>>,
    activities: Arc<DashMap<String, Activity>>,
    transactions: Arc<DashMap<String, Transaction>>,
    webhook_events: Arc<DashMap<String, WebhookEventRecord>>,
    sync_states: Arc<DashMap<String, SyncState>>,
    /// Mock: number of upcoming reward writes that fail (test builds only).
    #[cfg(test)]
    reward_write_failures: Arc<std::sync::atomic::AtomicU32>,
}

impl MemoryStore {
    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.users.get(user_id).map(|u| u.clone())
    }

    pub fn upsert_user(&self, user: &User) {
        self.users.insert(user.id.clone(), user.clone());
    }

    pub fn get_connection(&self, user_id: &str, provider: &str) -> Option<ProviderConnection> {
        self.connections
            .get(&ProviderConnection::doc_id(user_id, provider))
            .map(|c| c.clone())
    }

    pub fn find_connection_by_athlete(
        &self,
        provider: &str,
        external_athlete_id: u64,
    ) -> Option<ProviderConnection> {
        self.connections
            .iter()
            .find(|c| {
                c.provider == provider && c.external_athlete_id == external_athlete_id && c.active
            })
            .map(|c| c.clone())
    }

    pub fn upsert_connection(&self, conn: &ProviderConnection) {
        self.connections.insert(
            ProviderConnection::doc_id(&conn.user_id, &conn.provider),
            conn.clone(),
        );
    }

    pub fn get_activity(&self, activity_id: &str) -> Option<Activity> {
        self.activities.get(activity_id).map(|a| a.clone())
    }

    pub fn list_activities_for_user(&self, user_id: &str, limit: u32, offset: u32) -> Vec<Activity> {
        let mut items: Vec<Activity> = self
            .activities
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.clone())
            .collect();
        items.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    /// Make the next `count` reward writes fail (test builds only).
    #[cfg(test)]
    pub fn fail_reward_writes(&self, count: u32) {
        self.reward_write_failures
            .store(count, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.reward_write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn insert_activity_with_reward(
        &self,
        activity: &Activity,
        tx: &Transaction,
    ) -> Result<bool, crate::error::AppError> {
        #[cfg(test)]
        if self.take_injected_failure() {
            return Err(crate::error::AppError::Database(
                "simulated write failure".to_string(),
            ));
        }

        // The entry holds the shard lock, so only one caller can insert a
        // given dedup key; the loser sees Occupied and no-ops.
        match self.activities.entry(activity.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                // Nothing is written unless the owning user exists,
                // matching the transactional backend.
                let mut user = self.users.get_mut(&tx.user_id).ok_or_else(|| {
                    crate::error::AppError::NotFound(format!("User {}", tx.user_id))
                })?;
                user.balance += tx.amount;
                user.total_earned += tx.amount;
                user.updated_at = tx.created_at.clone();
                drop(user);
                slot.insert(activity.clone());
            }
        }

        self.transactions.insert(tx.id.clone(), tx.clone());

        Ok(true)
    }

    pub fn insert_unverified_activity(&self, activity: &Activity) -> bool {
        match self.activities.entry(activity.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(activity.clone());
                true
            }
        }
    }

    pub fn apply_transaction(&self, user: &User, tx: &Transaction) {
        self.users.insert(user.id.clone(), user.clone());
        self.transactions.insert(tx.id.clone(), tx.clone());
    }

    pub fn list_transactions(&self, user_id: &str, limit: u32, offset: u32) -> Vec<Transaction> {
        let mut items: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    pub fn get_webhook_event(&self, dedup_key: &str) -> Option<WebhookEventRecord> {
        self.webhook_events.get(dedup_key).map(|e| e.clone())
    }

    pub fn record_webhook_event(&self, event: &WebhookEventRecord) -> bool {
        match self.webhook_events.entry(event.dedup_key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(event.clone());
                true
            }
        }
    }

    pub fn mark_webhook_processed(&self, dedup_key: &str) {
        if let Some(mut event) = self.webhook_events.get_mut(dedup_key) {
            event.processed = true;
        }
    }

    pub fn get_sync_state(&self, user_id: &str) -> Option<SyncState> {
        self.sync_states.get(user_id).map(|s| s.clone())
    }

    pub fn set_sync_state(&self, state: &SyncState) {
        self.sync_states.insert(state.user_id.clone(), state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::ActivityType;

    fn sample_activity(user_id: &str) -> Activity {
        Activity {
            id: Activity::dedup_key("strava", 1),
            user_id: user_id.to_string(),
            provider: "strava".to_string(),
            external_id: 1,
            activity_type: ActivityType::Run,
            name: "Morning Run".to_string(),
            distance_m: 5000.0,
            moving_time_s: 1800,
            elapsed_time_s: 1900,
            total_elevation_gain_m: 10.0,
            start_date: "2026-08-20T07:00:00Z".to_string(),
            tokens_earned: 25.0,
            verified: true,
            source: "webhook".to_string(),
            processed_at: "2026-08-20T08:00:00Z".to_string(),
        }
    }

    #[test]
    fn reward_insert_requires_user_row() {
        let store = MemoryStore::default();
        let activity = sample_activity("ghost");
        let tx = Transaction::earn_for_activity(
            "ghost",
            &activity.id,
            25.0,
            "5.0 km Run",
            "2026-08-20T08:00:00Z",
        );

        let err = store.insert_activity_with_reward(&activity, &tx).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Nothing was written.
        assert!(store.get_activity(&activity.id).is_none());
        assert!(store.list_transactions("ghost", 10, 0).is_empty());
    }
}
