// SPDX-License-Identifier: MIT

//! Backfill progress state.

use serde::{Deserialize, Serialize};

/// Persisted backfill cursor for a user.
///
/// Backfill runs as chained background tasks, one page each; persisting the
/// cursor between pages means a process restart mid-backfill resumes where
/// it left off instead of silently losing progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    /// Owning user ID (also the document ID)
    pub user_id: String,
    /// Lower bound of the lookback window (epoch seconds)
    pub after_timestamp: i64,
    /// Next page to fetch (1-based)
    pub next_page: u32,
    /// Activities queued but not yet processed
    pub pending_activities: u32,
    /// Cooperative cancellation flag, checked between pages
    /// (user-initiated disconnect)
    pub cancel_requested: bool,
    /// Last cursor update (ISO 8601)
    pub updated_at: String,
}

impl SyncState {
    pub fn start(user_id: impl Into<String>, after_timestamp: i64, now: &str) -> Self {
        Self {
            user_id: user_id.into(),
            after_timestamp,
            next_page: 1,
            pending_activities: 0,
            cancel_requested: false,
            updated_at: now.to_string(),
        }
    }
}
