//! # Ride Policy
//!
//! Role-agnostic, time-based configuration the state machine consults.
//! Loaded once at startup; the domain never mutates it.

use serde::{Deserialize, Serialize};

use crate::waiting::WaitingPolicy;

/// Default rider free-cancellation window after a driver accepts (3 minutes).
pub const DEFAULT_RIDER_CANCEL_GRACE_SECS: u64 = 3 * 60;

/// Default window in which a matching ride expects an accept (10 seconds).
pub const DEFAULT_MATCHING_WINDOW_SECS: u64 = 10;

/// Default driver approach distance that earns cancellation compensation (1 km).
pub const DEFAULT_COMPENSATION_MIN_DISTANCE_M: u32 = 1_000;

/// Default time en route that earns cancellation compensation (60 seconds).
pub const DEFAULT_COMPENSATION_MIN_EN_ROUTE_SECS: u64 = 60;

/// Default no-movement threshold before a stall safety check (4 minutes).
pub const DEFAULT_IDLE_ALERT_SECS: u64 = 4 * 60;

/// Time-based policy applied to every ride.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RidePolicy {
    /// Grace / paid / bonus waiting windows.
    pub waiting: WaitingPolicy,
    /// Seconds after `accepted_at` during which a rider cancels for free.
    pub rider_cancel_grace_secs: u64,
    /// Driver approach distance, in meters, after which a late rider
    /// cancellation compensates the driver.
    pub compensation_min_distance_m: u32,
    /// Seconds en route after which a late rider cancellation compensates
    /// the driver, whatever the distance.
    pub compensation_min_en_route_secs: u64,
    /// Advisory: how long a `matching` ride waits for an accept before
    /// clients treat the search as stale. Nothing is cancelled on expiry.
    pub matching_window_secs: u64,
    /// Seconds without driver movement during `in_progress` before a
    /// stall-detected safety check is raised.
    pub idle_alert_secs: u64,
}

impl Default for RidePolicy {
    fn default() -> Self {
        Self {
            waiting: WaitingPolicy::default(),
            rider_cancel_grace_secs: DEFAULT_RIDER_CANCEL_GRACE_SECS,
            compensation_min_distance_m: DEFAULT_COMPENSATION_MIN_DISTANCE_M,
            compensation_min_en_route_secs: DEFAULT_COMPENSATION_MIN_EN_ROUTE_SECS,
            matching_window_secs: DEFAULT_MATCHING_WINDOW_SECS,
            idle_alert_secs: DEFAULT_IDLE_ALERT_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let policy: RidePolicy = serde_json::from_str(r#"{ "idle_alert_secs": 60 }"#).unwrap();
        assert_eq!(policy.idle_alert_secs, 60);
        assert_eq!(policy.rider_cancel_grace_secs, DEFAULT_RIDER_CANCEL_GRACE_SECS);
        assert_eq!(policy.waiting, WaitingPolicy::default());
        assert_eq!(policy.matching_window_secs, DEFAULT_MATCHING_WINDOW_SECS);
        assert_eq!(policy.compensation_min_distance_m, 1_000);
    }
}
