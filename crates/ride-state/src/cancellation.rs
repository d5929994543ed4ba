//! # Cancellation Policy
//!
//! Who may cancel in which status, whether a reason is mandatory, and
//! whether a rider cancellation is free.
//!
//! | Role   | Allowed from |
//! |--------|--------------|
//! | rider  | requested, matching, accepted, driver_en_route, arrived, waiting |
//! | driver | accepted, driver_en_route, arrived, waiting, in_progress |
//! | system | any non-terminal status |
//!
//! A reason is mandatory once the trip is `in_progress`. Drivers pick from
//! [`CancelReason::DRIVER_REASONS`].
//!
//! ## Rider fees
//!
//! | When                                   | Fee |
//! |----------------------------------------|-----|
//! | before a driver accepts                | no  |
//! | up to and including the grace window   | no  |
//! | later, `accepted`                      | only if the driver has moved enough |
//! | later, `driver_en_route` through `waiting` | yes |
//!
//! "Moved enough" is [`DriverMovement::earns_compensation`]: an approach of
//! at least `compensation_min_distance_m`, or at least
//! `compensation_min_en_route_secs` en route.

use ride_core::{Role, Timestamp};
use serde::{Deserialize, Serialize};

use crate::policy::RidePolicy;
use crate::ride::{Checkpoints, RideStatus};

/// Maximum length of the free-text cancellation note.
pub const MAX_NOTE_LEN: usize = 500;

/// Fixed cancellation reason set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    RiderNoShow,
    RiderChangedDestination,
    RiderRequestedCancellation,
    VehicleIssue,
    PersonalEmergency,
    UnsafeLocation,
    SafetyConcern,
    ChangedPlans,
    DriverDelayed,
    Other,
}

impl CancelReason {
    /// Reasons a driver may give.
    pub const DRIVER_REASONS: [CancelReason; 7] = [
        Self::RiderNoShow,
        Self::RiderChangedDestination,
        Self::RiderRequestedCancellation,
        Self::VehicleIssue,
        Self::PersonalEmergency,
        Self::UnsafeLocation,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RiderNoShow => "rider_no_show",
            Self::RiderChangedDestination => "rider_changed_destination",
            Self::RiderRequestedCancellation => "rider_requested_cancellation",
            Self::VehicleIssue => "vehicle_issue",
            Self::PersonalEmergency => "personal_emergency",
            Self::UnsafeLocation => "unsafe_location",
            Self::SafetyConcern => "safety_concern",
            Self::ChangedPlans => "changed_plans",
            Self::DriverDelayed => "driver_delayed",
            Self::Other => "other",
        }
    }

    /// Whether `role` may give this reason. Riders and the system may give any.
    pub fn allowed_for(&self, role: Role) -> bool {
        role != Role::Driver || Self::DRIVER_REASONS.contains(self)
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which party cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Rider,
    Driver,
    System,
}

impl From<Role> for CancelledBy {
    fn from(role: Role) -> Self {
        match role {
            Role::Rider => Self::Rider,
            Role::Driver => Self::Driver,
            Role::System => Self::System,
        }
    }
}

/// Cancellation command payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<CancelReason>,
    #[serde(default)]
    pub note: Option<String>,
}

impl CancelRequest {
    pub fn with_reason(reason: CancelReason) -> Self {
        Self {
            reason: Some(reason),
            note: None,
        }
    }
}

/// Recorded on the ride iff its status is `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub by: CancelledBy,
    pub reason: Option<CancelReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: Timestamp,
    /// The rider cancelled after the free window. Charging is the fare
    /// collaborator's job; this is only the flag.
    pub fee_applicable: bool,
    pub within_grace_period: bool,
    /// The driver's approach met the compensation threshold. Only set on
    /// rider cancellations.
    #[serde(default)]
    pub compensation_eligible: bool,
}

/// How far and how long the driver travelled towards the pickup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverMovement {
    /// Distance covered between coordinate pings since acceptance.
    pub distance_m: f64,
    /// Seconds since `en_route_at`, stopped at arrival.
    pub en_route_secs: u64,
}

impl DriverMovement {
    /// Movement derived from the checkpoints at `now`.
    pub fn at(checkpoints: &Checkpoints, distance_m: f64, now: Timestamp) -> Self {
        let en_route_secs = checkpoints
            .en_route_at
            .map(|start| {
                let end = checkpoints.arrived_at.map_or(now, |arrived| arrived.min(now));
                u64::try_from(end.seconds_since(start)).unwrap_or(0)
            })
            .unwrap_or(0);
        Self {
            distance_m,
            en_route_secs,
        }
    }

    pub fn earns_compensation(&self, policy: &RidePolicy) -> bool {
        self.distance_m >= f64::from(policy.compensation_min_distance_m)
            || self.en_route_secs >= policy.compensation_min_en_route_secs
    }
}

/// Result of assessing a rider cancellation at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationAssessment {
    pub fee_applicable: bool,
    pub within_grace_period: bool,
    /// Seconds of the free window left; `None` before acceptance.
    pub grace_remaining_secs: Option<u64>,
    pub compensation_eligible: bool,
}

impl CancellationAssessment {
    fn free() -> Self {
        Self {
            fee_applicable: false,
            within_grace_period: true,
            grace_remaining_secs: None,
            compensation_eligible: false,
        }
    }
}

/// Whether `role` may cancel a ride currently in `status`.
pub fn role_may_cancel(role: Role, status: RideStatus) -> bool {
    use RideStatus::*;
    match role {
        Role::Rider => matches!(
            status,
            Requested | Matching | Accepted | DriverEnRoute | Arrived | Waiting
        ),
        Role::Driver => matches!(
            status,
            Accepted | DriverEnRoute | Arrived | Waiting | InProgress
        ),
        Role::System => !status.is_terminal(),
    }
}

/// A reason is mandatory when cancelling an `in_progress` trip.
pub fn requires_reason(status: RideStatus) -> bool {
    status == RideStatus::InProgress
}

/// Decide whether a rider cancellation right now would carry a fee.
///
/// The grace window is inclusive: cancelling exactly
/// `rider_cancel_grace_secs` after acceptance is still free.
pub fn assess_rider_cancellation(
    status: RideStatus,
    checkpoints: &Checkpoints,
    movement: DriverMovement,
    now: Timestamp,
    policy: &RidePolicy,
) -> CancellationAssessment {
    let Some(accepted_at) = checkpoints.accepted_at else {
        return CancellationAssessment::free();
    };
    let grace_secs = policy.rider_cancel_grace_secs;
    let since_accept = u64::try_from(now.seconds_since(accepted_at)).unwrap_or(0);
    let within = since_accept <= grace_secs;
    let compensation_eligible = movement.earns_compensation(policy);
    let fee_applicable = !within
        && match status {
            RideStatus::Accepted => compensation_eligible,
            RideStatus::DriverEnRoute | RideStatus::Arrived | RideStatus::Waiting => true,
            _ => false,
        };
    CancellationAssessment {
        fee_applicable,
        within_grace_period: within,
        grace_remaining_secs: Some(grace_secs.saturating_sub(since_accept)),
        compensation_eligible,
    }
}
