//! # Waiting-Compensation Engine
//!
//! After the driver arrives, waiting time is split into successive windows:
//!
//! ```text
//! 0 ──── grace ────▶ g ──── paid ────▶ g+p ──── bonus ────▶ g+p+b ──── expired ───▶
//! ```
//!
//! The phase is a pure function of `(arrived_at, waiting_started_at, now,
//! policy)`. It is recomputed on every read (client poll or server tick) and
//! never written back to the ride, so two observers with the same `now`
//! always agree and a skewed clock can never corrupt stored state.
//!
//! `expired` is advisory. It tells the driver to *consider* cancelling; it
//! never cancels anything by itself.

use ride_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::ride::{Ride, RideStatus};

/// Configured waiting windows, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitingPolicy {
    /// Free waiting time.
    pub grace_period_secs: u64,
    /// Compensated waiting time after the grace period.
    pub paid_wait_secs: u64,
    /// Extended waiting time after the paid window.
    pub bonus_wait_secs: u64,
}

impl Default for WaitingPolicy {
    fn default() -> Self {
        Self {
            grace_period_secs: 2 * 60,
            paid_wait_secs: 5 * 60,
            bonus_wait_secs: 4 * 60,
        }
    }
}

impl WaitingPolicy {
    pub fn new(grace_period_secs: u64, paid_wait_secs: u64, bonus_wait_secs: u64) -> Self {
        Self {
            grace_period_secs,
            paid_wait_secs,
            bonus_wait_secs,
        }
    }

    /// Length of the whole waiting window (grace + paid + bonus).
    pub fn total_window_secs(&self) -> u64 {
        self.grace_period_secs
            .saturating_add(self.paid_wait_secs)
            .saturating_add(self.bonus_wait_secs)
    }

    /// Classify an elapsed duration and return the phase with its upper boundary.
    fn classify(&self, elapsed: u64) -> (WaitingPhase, u64) {
        let grace_end = self.grace_period_secs;
        let paid_end = grace_end.saturating_add(self.paid_wait_secs);
        let bonus_end = paid_end.saturating_add(self.bonus_wait_secs);
        if elapsed < grace_end {
            (WaitingPhase::Grace, grace_end)
        } else if elapsed < paid_end {
            (WaitingPhase::Paid, paid_end)
        } else if elapsed < bonus_end {
            (WaitingPhase::Bonus, bonus_end)
        } else {
            (WaitingPhase::Expired, elapsed)
        }
    }
}

/// The current waiting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingPhase {
    /// Free waiting.
    Grace,
    /// Compensated waiting.
    Paid,
    /// Extended waiting.
    Bonus,
    /// All windows used up. Advisory only.
    Expired,
}

impl WaitingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grace => "grace",
            Self::Paid => "paid",
            Self::Bonus => "bonus",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for WaitingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds spent in each window so far, each capped at its window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WaitBreakdown {
    pub grace_secs: u64,
    pub paid_secs: u64,
    pub bonus_secs: u64,
}

/// Derived waiting state at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingSnapshot {
    /// Current phase.
    pub phase: WaitingPhase,
    /// Anchor the clock runs from (`waiting_started_at`, else `arrived_at`).
    pub started_at: Timestamp,
    /// Seconds since `started_at`, clamped at zero.
    pub elapsed_secs: u64,
    /// Seconds until the current phase ends; zero once expired.
    pub remaining_in_phase_secs: u64,
    /// Length of the whole waiting window.
    pub total_window_secs: u64,
    /// Time spent per window.
    pub breakdown: WaitBreakdown,
    /// Advisory flag for the driver: the wait has expired.
    pub consider_cancelling: bool,
}

/// Compute the waiting snapshot.
///
/// `elapsed = now − (waiting_started_at ?? arrived_at)`, clamped at zero when
/// `now` precedes the anchor.
pub fn compute(
    arrived_at: Timestamp,
    waiting_started_at: Option<Timestamp>,
    now: Timestamp,
    policy: &WaitingPolicy,
) -> WaitingSnapshot {
    let started_at = waiting_started_at.unwrap_or(arrived_at);
    let elapsed = u64::try_from(now.seconds_since(started_at)).unwrap_or(0);
    let (phase, boundary) = policy.classify(elapsed);

    let grace_secs = elapsed.min(policy.grace_period_secs);
    let after_grace = elapsed.saturating_sub(policy.grace_period_secs);
    let paid_secs = after_grace.min(policy.paid_wait_secs);
    let after_paid = after_grace.saturating_sub(policy.paid_wait_secs);
    let bonus_secs = after_paid.min(policy.bonus_wait_secs);

    WaitingSnapshot {
        phase,
        started_at,
        elapsed_secs: elapsed,
        remaining_in_phase_secs: boundary.saturating_sub(elapsed),
        total_window_secs: policy.total_window_secs(),
        breakdown: WaitBreakdown {
            grace_secs,
            paid_secs,
            bonus_secs,
        },
        consider_cancelling: phase == WaitingPhase::Expired,
    }
}

/// Waiting snapshot for a ride, if it is currently at the pickup.
///
/// Only `arrived` and `waiting` rides have a waiting clock.
pub fn for_ride(ride: &Ride, now: Timestamp, policy: &WaitingPolicy) -> Option<WaitingSnapshot> {
    if !matches!(ride.status(), RideStatus::Arrived | RideStatus::Waiting) {
        return None;
    }
    let checkpoints = ride.checkpoints();
    let arrived_at = checkpoints.arrived_at?;
    Some(compute(arrived_at, checkpoints.waiting_started_at, now, policy))
}
