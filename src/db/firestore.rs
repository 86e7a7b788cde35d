// SPDX-License-Identifier: MIT

//! Firestore storage backend with typed operations.
//!
//! Multi-document writes (activity, ledger transaction, user) are staged
//! on a Firestore transaction and commit atomically. Reads use plain
//! selects; racing writers within an instance are serialized by the
//! ledger service's per-user lock.

use crate::db::collections;
use crate::error::AppError;
use crate::models::{
    Activity, ProviderConnection, SyncState, Transaction, User, WebhookEventRecord,
};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreStore {
    client: firestore::FirestoreDb,
}

impl FirestoreStore {
    /// Create a new Firestore client.
    ///
    /// For local development with the emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::new_emulator(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Unauthenticated client for the Firestore emulator.
    async fn new_emulator(project_id: &str) -> Result<Self, AppError> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore emulator: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore (emulator)");

        Ok(Self { client })
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Connection Operations ───────────────────────────────────

    pub async fn get_connection(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<ProviderConnection>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::CONNECTIONS)
            .obj()
            .one(&ProviderConnection::doc_id(user_id, provider))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_connection_by_athlete(
        &self,
        provider: &str,
        external_athlete_id: u64,
    ) -> Result<Option<ProviderConnection>, AppError> {
        let provider = provider.to_string();
        let matches: Vec<ProviderConnection> = self
            .client
            .fluent()
            .select()
            .from(collections::CONNECTIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("provider").eq(provider.clone()),
                    q.field("external_athlete_id").eq(external_athlete_id),
                    q.field("active").eq(true),
                ])
            })
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(matches.into_iter().next())
    }

    pub async fn upsert_connection(&self, conn: &ProviderConnection) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::CONNECTIONS)
            .document_id(&ProviderConnection::doc_id(&conn.user_id, &conn.provider))
            .object(conn)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Activity Operations ─────────────────────────────────────

    pub async fn get_activity(&self, activity_id: &str) -> Result<Option<Activity>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(activity_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn list_activities_for_user(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Activity>, AppError> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::ACTIVITIES)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .order_by([(
                "start_date",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .limit(limit)
            .offset(offset)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Ingest a rewarded activity; the three writes commit as one
    /// Firestore transaction.
    ///
    /// The activity document ID is the dedup key. The duplicate read runs
    /// before the staged writes, outside the transaction's consistency
    /// selector; the ledger service's per-user lock serializes racing
    /// writers within an instance.
    pub async fn insert_activity_with_reward(
        &self,
        activity: &Activity,
        tx: &Transaction,
    ) -> Result<bool, AppError> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Dedup check before any write is staged.
        let existing: Option<Activity> = self
            .client
            .fluent()
            .select()
            .by_id_in(collections::ACTIVITIES)
            .obj()
            .one(&activity.id)
            .await
            .map_err(|e| AppError::Database(format!("Dedup read failed: {}", e)))?;

        if existing.is_some() {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        // Read the user and apply the balance update in memory.
        let mut user: User = self
            .client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(&tx.user_id)
            .await
            .map_err(|e| AppError::Database(format!("User read failed: {}", e)))?
            .ok_or_else(|| AppError::NotFound(format!("User {}", tx.user_id)))?;

        user.balance += tx.amount;
        user.total_earned += tx.amount;
        user.updated_at = tx.created_at.clone();

        self.client
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(&activity.id)
            .object(activity)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Activity write failed: {}", e)))?;

        self.client
            .fluent()
            .update()
            .in_col(collections::TRANSACTIONS)
            .document_id(&tx.id)
            .object(tx)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Transaction write failed: {}", e)))?;

        self.client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(&user)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("User write failed: {}", e)))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(true)
    }

    pub async fn insert_unverified_activity(&self, activity: &Activity) -> Result<bool, AppError> {
        if self.get_activity(&activity.id).await?.is_some() {
            return Ok(false);
        }

        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::ACTIVITIES)
            .document_id(&activity.id)
            .object(activity)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(true)
    }

    // ─── Ledger Operations ───────────────────────────────────────

    pub async fn apply_transaction(&self, user: &User, tx: &Transaction) -> Result<(), AppError> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        self.client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.id)
            .object(user)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("User write failed: {}", e)))?;

        self.client
            .fluent()
            .update()
            .in_col(collections::TRANSACTIONS)
            .document_id(&tx.id)
            .object(tx)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Transaction write failed: {}", e)))?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(())
    }

    pub async fn list_transactions(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Transaction>, AppError> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::TRANSACTIONS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .order_by([(
                "created_at",
                firestore::FirestoreQueryDirection::Descending,
            )])
            .limit(limit)
            .offset(offset)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Webhook Event Audit ─────────────────────────────────────

    pub async fn get_webhook_event(
        &self,
        dedup_key: &str,
    ) -> Result<Option<WebhookEventRecord>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::WEBHOOK_EVENTS)
            .obj()
            .one(dedup_key)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn record_webhook_event(
        &self,
        event: &WebhookEventRecord,
    ) -> Result<bool, AppError> {
        let key = event.dedup_key();

        if self.get_webhook_event(&key).await?.is_some() {
            return Ok(false);
        }

        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::WEBHOOK_EVENTS)
            .document_id(&key)
            .object(event)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(true)
    }

    pub async fn mark_webhook_processed(&self, dedup_key: &str) -> Result<(), AppError> {
        if let Some(mut event) = self.get_webhook_event(dedup_key).await? {
            event.processed = true;
            let _: () = self
                .client
                .fluent()
                .update()
                .in_col(collections::WEBHOOK_EVENTS)
                .document_id(dedup_key)
                .object(&event)
                .execute()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }
        Ok(())
    }

    // ─── Backfill Cursor ─────────────────────────────────────────

    pub async fn get_sync_state(&self, user_id: &str) -> Result<Option<SyncState>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::SYNC_STATES)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn set_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::SYNC_STATES)
            .document_id(&state.user_id)
            .object(state)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
