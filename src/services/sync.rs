// SPDX-License-Identifier: MIT

//! Activity sync pipeline: webhook and backfill ingestion.
//!
//! Both paths converge on `ingest`, which runs an activity through
//! dedup → reward → ledger. The pipeline is safe to replay: the dedup
//! key makes repeated ingestion a no-op and the reward calculator is
//! deterministic, so at-least-once delivery from the provider or the
//! task queue cannot double-reward.

use crate::config::Config;
use crate::db::Db;
use crate::error::AppError;
use crate::models::{Activity, ActivityType, ProviderConnection, SyncState, Transaction};
use crate::services::ledger::LedgerService;
use crate::services::provider::{ProviderActivity, ProviderService};
use crate::services::rewards;
use chrono::Utc;
use std::time::Duration;

/// Terminal state of one activity run through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested { tokens: f64 },
    Skipped(&'static str),
}

/// Result of processing one backfill page.
#[derive(Debug, Clone)]
pub struct BackfillPage {
    pub ingested: u32,
    pub skipped: u32,
    /// A full page came back, so another page is expected.
    pub has_more: bool,
}

#[derive(Clone)]
pub struct SyncService {
    db: Db,
    provider: ProviderService,
    ledger: LedgerService,
    config: Config,
}

impl SyncService {
    pub fn new(db: Db, provider: ProviderService, ledger: LedgerService, config: Config) -> Self {
        Self {
            db,
            provider,
            ledger,
            config,
        }
    }

    /// Run one provider activity through dedup → reward → ledger.
    ///
    /// Requires no provider API access, so redelivered events and
    /// overlapping backfill pages settle here without burning quota.
    pub async fn ingest(
        &self,
        user_id: &str,
        provider: &str,
        raw: &ProviderActivity,
        source: &str,
    ) -> Result<IngestOutcome, AppError> {
        let activity_type = ActivityType::from_sport_type(&raw.sport_type);
        if activity_type == ActivityType::Other {
            tracing::debug!(
                external_id = raw.id,
                sport_type = %raw.sport_type,
                "Skipping unmapped activity type"
            );
            return Ok(IngestOutcome::Skipped("unsupported_type"));
        }

        // Advisory fast path; the keyed insert below is the real guard.
        if self.db.activity_exists(provider, raw.id).await? {
            return Ok(IngestOutcome::Skipped("duplicate"));
        }

        let tokens = rewards::calculate_reward(activity_type, raw.distance, raw.moving_time, 1.0);
        let now = Utc::now().to_rfc3339();

        let activity = Activity {
            id: Activity::dedup_key(provider, raw.id),
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            external_id: raw.id,
            activity_type,
            name: raw.name.clone(),
            distance_m: raw.distance,
            moving_time_s: raw.moving_time,
            elapsed_time_s: raw.elapsed_time,
            total_elevation_gain_m: raw.total_elevation_gain,
            start_date: raw.start_date.clone(),
            tokens_earned: tokens,
            verified: true,
            source: source.to_string(),
            processed_at: now.clone(),
        };

        let description = format!(
            "{:.1} km {}",
            raw.distance / 1000.0,
            activity_type.as_str()
        );
        let tx = Transaction::earn_for_activity(user_id, &activity.id, tokens, description, &now);

        match self.credit_with_retry(&activity, &tx).await {
            Ok(true) => {
                tracing::info!(
                    user_id,
                    activity_id = %activity.id,
                    tokens,
                    source,
                    "Activity ingested"
                );
                Ok(IngestOutcome::Ingested { tokens })
            }
            Ok(false) => Ok(IngestOutcome::Skipped("duplicate")),
            Err(e) => {
                // Persist the activity without a ledger entry so it is
                // neither lost nor double-counted; reconciliation re-opens
                // it explicitly.
                tracing::error!(
                    user_id,
                    activity_id = %activity.id,
                    error = %e,
                    "Ledger write failed, storing activity unverified"
                );
                let mut unverified = activity;
                unverified.verified = false;
                self.db.insert_unverified_activity(&unverified).await?;
                Err(e)
            }
        }
    }

    /// One retry with backoff for transient ledger failures.
    async fn credit_with_retry(
        &self,
        activity: &Activity,
        tx: &Transaction,
    ) -> Result<bool, AppError> {
        match self.ledger.credit_for_activity(activity, tx).await {
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    activity_id = %activity.id,
                    error = %e,
                    "Ledger write failed, retrying once"
                );
                tokio::time::sleep(Duration::from_millis(self.config.ledger_retry_backoff_ms))
                    .await;
                self.ledger.credit_for_activity(activity, tx).await
            }
            other => other,
        }
    }

    /// Webhook path: fetch the full activity and ingest it.
    ///
    /// A rate-limited fetch is retried once after backoff; a second 429
    /// propagates so the task queue retries the whole callback.
    pub async fn process_webhook_activity(
        &self,
        conn: &ProviderConnection,
        activity_id: u64,
    ) -> Result<IngestOutcome, AppError> {
        if self.db.activity_exists(&conn.provider, activity_id).await? {
            return Ok(IngestOutcome::Skipped("duplicate"));
        }

        let raw = match self.provider.fetch_activity(conn, activity_id).await {
            Err(AppError::ProviderRateLimited) => {
                tokio::time::sleep(Duration::from_millis(self.config.fetch_retry_backoff_ms))
                    .await;
                self.provider.fetch_activity(conn, activity_id).await?
            }
            other => other?,
        };

        self.ingest(&conn.user_id, &conn.provider, &raw, "webhook")
            .await
    }

    /// Backfill path: process one page of historical activities.
    ///
    /// Per-item ledger failures are logged and counted, never abort the
    /// page. The persisted cursor advances only after the page completes,
    /// so a crashed page is re-run in full (ingest is idempotent).
    pub async fn backfill_page(&self, user_id: &str) -> Result<BackfillPage, AppError> {
        let mut state = self
            .db
            .get_sync_state(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Sync state for {}", user_id)))?;

        if state.cancel_requested {
            tracing::info!(user_id, "Backfill cancelled, stopping");
            return Ok(BackfillPage {
                ingested: 0,
                skipped: 0,
                has_more: false,
            });
        }

        let conn = self
            .db
            .get_connection(user_id, &self.config.provider)
            .await?
            .filter(|c| c.active)
            .ok_or(AppError::ConnectionExpired)?;

        let per_page = self.config.sync_page_size;
        let page = self
            .provider
            .list_activities(&conn, state.after_timestamp, state.next_page, per_page)
            .await?;

        let fetched = page.len() as u32;
        let mut ingested = 0u32;
        let mut skipped = 0u32;

        for raw in &page {
            match self.ingest(user_id, &conn.provider, raw, "backfill").await {
                Ok(IngestOutcome::Ingested { .. }) => ingested += 1,
                Ok(IngestOutcome::Skipped(_)) => skipped += 1,
                Err(e) => {
                    // Already stored unverified (or failed before any
                    // write); move on to the next item.
                    tracing::warn!(
                        user_id,
                        external_id = raw.id,
                        error = %e,
                        "Backfill item failed, continuing"
                    );
                    skipped += 1;
                }
            }
        }

        let has_more = fetched == per_page && per_page > 0;

        state.next_page += 1;
        state.pending_activities = 0;
        state.updated_at = Utc::now().to_rfc3339();
        self.db.set_sync_state(&state).await?;

        tracing::info!(
            user_id,
            page = state.next_page - 1,
            fetched,
            ingested,
            skipped,
            has_more,
            "Backfill page processed"
        );

        Ok(BackfillPage {
            ingested,
            skipped,
            has_more,
        })
    }

    /// Initialize (or reset) the backfill cursor for a lookback window.
    pub async fn start_backfill(&self, user_id: &str, days: i64) -> Result<SyncState, AppError> {
        let after = (Utc::now() - chrono::Duration::days(days)).timestamp();
        let state = SyncState::start(user_id, after, &Utc::now().to_rfc3339());
        self.db.set_sync_state(&state).await?;
        Ok(state)
    }

    /// Request cooperative cancellation of a running backfill.
    pub async fn cancel_backfill(&self, user_id: &str) -> Result<(), AppError> {
        if let Some(mut state) = self.db.get_sync_state(user_id).await? {
            state.cancel_requested = true;
            state.updated_at = Utc::now().to_rfc3339();
            self.db.set_sync_state(&state).await?;
        }
        Ok(())
    }
}
