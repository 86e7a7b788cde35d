// SPDX-License-Identifier: MIT

//! Ingested activity model.

use serde::{Deserialize, Serialize};

/// Activity types recognized by the reward calculator.
///
/// Serde names match the provider's `sport_type` strings; anything else
/// deserializes as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Run,
    Ride,
    Walk,
    Swim,
    Hike,
    VirtualRun,
    VirtualRide,
    Workout,
    WeightTraining,
    Yoga,
    #[serde(other)]
    Other,
}

impl ActivityType {
    /// Parse a provider `sport_type` string. Unknown strings map to
    /// `Other`, which the sync pipeline skips without rewarding.
    pub fn from_sport_type(s: &str) -> Self {
        match s {
            "Run" => Self::Run,
            "Ride" => Self::Ride,
            "Walk" => Self::Walk,
            "Swim" => Self::Swim,
            "Hike" => Self::Hike,
            "VirtualRun" => Self::VirtualRun,
            "VirtualRide" => Self::VirtualRide,
            "Workout" => Self::Workout,
            "WeightTraining" => Self::WeightTraining,
            "Yoga" => Self::Yoga,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "Run",
            Self::Ride => "Ride",
            Self::Walk => "Walk",
            Self::Swim => "Swim",
            Self::Hike => "Hike",
            Self::VirtualRun => "VirtualRun",
            Self::VirtualRide => "VirtualRide",
            Self::Workout => "Workout",
            Self::WeightTraining => "WeightTraining",
            Self::Yoga => "Yoga",
            Self::Other => "Other",
        }
    }
}

/// Stored activity record.
///
/// Immutable once created; `(provider, external_id)` is the dedup key and
/// doubles as the document ID, which makes the storage layer the
/// authoritative duplicate guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Internal ID: `"{provider}:{external_id}"`
    pub id: String,
    /// Owning user ID
    pub user_id: String,
    /// Provider slug, e.g. "strava"
    pub provider: String,
    /// The provider's activity ID
    pub external_id: u64,
    /// Activity type
    pub activity_type: ActivityType,
    /// Activity name/title from the provider
    pub name: String,
    /// Distance in meters
    pub distance_m: f64,
    /// Moving time in seconds
    pub moving_time_s: u64,
    /// Elapsed time in seconds
    pub elapsed_time_s: u64,
    /// Total elevation gain in meters
    pub total_elevation_gain_m: f64,
    /// Start date/time (ISO 8601)
    pub start_date: String,
    /// Tokens computed for this activity
    pub tokens_earned: f64,
    /// True once the earn transaction is ledgered; false means the reward
    /// was computed but the ledger write failed and needs reconciliation
    pub verified: bool,
    /// Source: "webhook" or "backfill"
    pub source: String,
    /// When this activity was processed (ISO 8601)
    pub processed_at: String,
}

impl Activity {
    /// Dedup key / document ID for a provider activity.
    pub fn dedup_key(provider: &str, external_id: u64) -> String {
        format!("{}:{}", provider, external_id)
    }
}
