// SPDX-License-Identifier: MIT

//! Reward calculator: activity attributes → token amount.
//!
//! Pure and deterministic: never reads the clock or any external state,
//! so replaying the same activity (webhook redelivery, overlapping
//! backfill) always computes the same reward.

use crate::models::ActivityType;

/// Minimum reward for any ingested activity.
pub const MIN_TOKENS: f64 = 1.0;
/// Cap on the reward for a single activity.
pub const MAX_TOKENS: f64 = 1000.0;
/// Extra share granted to fast runs.
const PERFORMANCE_BONUS_RATE: f64 = 0.2;
/// Pace threshold for the run bonus (minutes per km, exclusive).
const BONUS_PACE_MIN_PER_KM: f64 = 6.0;

/// Tokens per kilometer for each activity type.
pub fn base_multiplier(activity_type: ActivityType) -> f64 {
    match activity_type {
        ActivityType::Run => 5.0,
        ActivityType::Ride => 2.0,
        ActivityType::Walk => 3.0,
        ActivityType::Swim => 8.0,
        ActivityType::Hike => 4.0,
        ActivityType::VirtualRun => 4.0,
        ActivityType::VirtualRide => 1.5,
        ActivityType::Workout => 3.0,
        ActivityType::WeightTraining => 2.0,
        ActivityType::Yoga => 2.0,
        ActivityType::Other => 1.0,
    }
}

/// Compute the token reward for an activity.
///
/// `bonus_multiplier` scales the whole reward (events, streaks); 1.0 for
/// the normal case. The result is clamped to `[MIN_TOKENS, MAX_TOKENS]`
/// and rounded to 4 decimal places.
pub fn calculate_reward(
    activity_type: ActivityType,
    distance_m: f64,
    moving_time_s: u64,
    bonus_multiplier: f64,
) -> f64 {
    let distance_km = distance_m / 1000.0;
    let base_tokens = distance_km * base_multiplier(activity_type);

    let performance_bonus = if activity_type == ActivityType::Run && distance_km > 0.0 {
        let pace_min_per_km = (moving_time_s as f64 / 60.0) / distance_km;
        if pace_min_per_km < BONUS_PACE_MIN_PER_KM {
            base_tokens * PERFORMANCE_BONUS_RATE
        } else {
            0.0
        }
    } else {
        0.0
    };

    let tokens = (base_tokens + performance_bonus) * bonus_multiplier;
    round4(tokens.clamp(MIN_TOKENS, MAX_TOKENS))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_at_threshold_pace_gets_no_bonus() {
        // pace = 6.0 min/km exactly, not < 6.0
        assert_eq!(calculate_reward(ActivityType::Run, 5000.0, 1800, 1.0), 25.0);
    }

    #[test]
    fn fast_run_gets_performance_bonus() {
        // pace = 5.0 min/km: 25 * 1.2
        assert_eq!(calculate_reward(ActivityType::Run, 5000.0, 1500, 1.0), 30.0);
    }

    #[test]
    fn ride_reward() {
        assert_eq!(
            calculate_reward(ActivityType::Ride, 20000.0, 3600, 1.0),
            40.0
        );
    }

    #[test]
    fn swim_reward() {
        assert_eq!(calculate_reward(ActivityType::Swim, 1000.0, 1800, 1.0), 8.0);
    }

    #[test]
    fn zero_distance_hits_minimum_floor() {
        assert_eq!(
            calculate_reward(ActivityType::WeightTraining, 0.0, 3600, 1.0),
            1.0
        );
    }

    #[test]
    fn bonus_multiplier_scales_reward() {
        assert_eq!(calculate_reward(ActivityType::Run, 5000.0, 1800, 1.5), 37.5);
    }

    #[test]
    fn unknown_type_uses_base_rate() {
        assert_eq!(
            calculate_reward(ActivityType::Other, 10000.0, 3600, 1.0),
            10.0
        );
    }

    #[test]
    fn huge_distance_clamped_to_maximum() {
        assert_eq!(
            calculate_reward(ActivityType::Swim, 1_000_000.0, 36000, 1.0),
            MAX_TOKENS
        );
    }

    #[test]
    fn non_run_types_never_get_pace_bonus() {
        // Same pace that triggers the run bonus; rides do not qualify.
        assert_eq!(calculate_reward(ActivityType::Ride, 5000.0, 1500, 1.0), 10.0);
    }

    #[test]
    fn deterministic_for_fixed_inputs() {
        let first = calculate_reward(ActivityType::Hike, 12345.6, 4321, 1.25);
        for _ in 0..100 {
            assert_eq!(
                calculate_reward(ActivityType::Hike, 12345.6, 4321, 1.25),
                first
            );
        }
    }

    #[test]
    fn result_rounded_to_four_decimals() {
        let tokens = calculate_reward(ActivityType::Ride, 1234.5, 600, 1.0);
        assert_eq!(tokens, round4(tokens));
        // 1.2345 km * 2.0 = 2.469
        assert_eq!(tokens, 2.469);
    }
}
