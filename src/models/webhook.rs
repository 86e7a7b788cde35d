// SPDX-License-Identifier: MIT

//! Webhook event audit/idempotency records.

use serde::{Deserialize, Serialize};

/// Audit record for a received webhook delivery.
///
/// The provider delivers at-least-once; these records short-circuit
/// redelivered events before any provider API call is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventRecord {
    /// Provider slug
    pub provider: String,
    /// "activity" or "athlete"
    pub object_type: String,
    /// Provider object ID
    pub object_id: u64,
    /// "create", "update" or "delete"
    pub aspect_type: String,
    /// Provider athlete ID that owns the object
    pub owner_id: u64,
    /// Provider event timestamp (epoch seconds)
    pub event_time: i64,
    /// When we received the delivery (ISO 8601)
    pub received_at: String,
    /// True once the downstream pipeline has handled the event
    pub processed: bool,
}

impl WebhookEventRecord {
    /// Idempotency key for a delivery. Redeliveries of the same event carry
    /// the same tuple, so the first record blocks the rest.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.provider, self.object_type, self.object_id, self.aspect_type, self.event_time
        )
    }
}
