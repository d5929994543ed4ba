//! # Ride View Projector
//!
//! Two read-only views computed from one `Ride` value. Both carry the same
//! status and checkpoints; they differ only in which details each audience
//! sees. Views are built synchronously, so there is no window in which the
//! rider and driver disagree about the ride.

use ride_core::{Caller, Location, RideId, Role, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::cancellation::{self, Cancellation, CancellationAssessment};
use crate::error::RideError;
use crate::fare::Fare;
use crate::policy::RidePolicy;
use crate::ride::{Checkpoints, EarlyEnd, Ride, RideStatus};
use crate::safety::{SafetyResponse, SafetyState, SafetyTrigger};
use crate::waiting::{WaitingPhase, WaitingSnapshot};

/// Driver identity shown to the rider once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverSummary {
    pub driver_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub vehicle: String,
    pub license_plate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

/// Rider identity shown to drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderSummary {
    pub rider_id: UserId,
    pub display_name: String,
    /// Only shown to the assigned driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

/// The rider's countdown. No compensation breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiderWaitingView {
    pub phase: WaitingPhase,
    pub elapsed_secs: u64,
    pub remaining_in_phase_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyView {
    pub state: SafetyState,
    pub last_check_at: Option<Timestamp>,
    pub response: Option<SafetyResponse>,
    pub trigger: Option<SafetyTrigger>,
    /// The caller should be prompted to answer.
    pub awaiting_response: bool,
}

/// What the rider sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderView {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub checkpoints: Checkpoints,
    pub pickup: Location,
    pub dropoff: Location,
    pub passenger_count: u8,
    /// While matching: when the search for a driver goes stale.
    pub matching_expires_at: Option<Timestamp>,
    pub driver: Option<DriverSummary>,
    pub waiting: Option<RiderWaitingView>,
    pub safety: SafetyView,
    pub cancellation: Option<Cancellation>,
    pub fare: Fare,
    pub early_end: bool,
    pub can_cancel: bool,
    /// Fee outlook for cancelling now; present while the rider may cancel.
    pub cancel_assessment: Option<CancellationAssessment>,
}

/// What a driver sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverView {
    pub ride_id: RideId,
    pub status: RideStatus,
    pub checkpoints: Checkpoints,
    pub pickup: Location,
    pub dropoff: Location,
    pub passenger_count: u8,
    pub matching_expires_at: Option<Timestamp>,
    pub rider: RiderSummary,
    /// Full waiting detail, including the breakdown and the cancel advisory.
    pub waiting: Option<WaitingSnapshot>,
    pub safety: SafetyView,
    pub cancellation: Option<Cancellation>,
    pub early_end: Option<EarlyEnd>,
    pub last_movement_at: Option<Timestamp>,
    pub fare: Fare,
    /// The viewing driver holds this ride.
    pub assigned_to_caller: bool,
    pub can_cancel: bool,
    pub cancel_requires_reason: bool,
}

/// A role-specific projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "audience", rename_all = "snake_case")]
pub enum RideView {
    Rider(RiderView),
    Driver(DriverView),
}

impl RideView {
    pub fn ride_id(&self) -> RideId {
        match self {
            Self::Rider(v) => v.ride_id,
            Self::Driver(v) => v.ride_id,
        }
    }

    pub fn status(&self) -> RideStatus {
        match self {
            Self::Rider(v) => v.status,
            Self::Driver(v) => v.status,
        }
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        match self {
            Self::Rider(v) => &v.checkpoints,
            Self::Driver(v) => &v.checkpoints,
        }
    }
}

fn safety_view(ride: &Ride) -> SafetyView {
    let s = ride.safety();
    SafetyView {
        state: s.state,
        last_check_at: s.last_check_at,
        response: s.response,
        trigger: s.trigger,
        awaiting_response: s.is_pending() && !ride.is_terminal(),
    }
}

/// Rider projection.
pub fn rider_view(ride: &Ride, caller: &Caller, now: Timestamp, policy: &RidePolicy) -> RiderView {
    let can_cancel = ride.can_cancel(caller);
    RiderView {
        ride_id: ride.id(),
        status: ride.status(),
        checkpoints: ride.checkpoints().clone(),
        pickup: ride.pickup().clone(),
        dropoff: ride.effective_dropoff().clone(),
        passenger_count: ride.passenger_count(),
        matching_expires_at: ride.matching_expires_at(policy),
        driver: ride.driver_id().zip(ride.driver()).map(|(id, d)| DriverSummary {
            driver_id: id,
            display_name: d.display_name.clone(),
            phone: d.phone.clone(),
            vehicle: d.vehicle.clone(),
            license_plate: d.license_plate.clone(),
            rating: d.rating,
        }),
        waiting: ride.waiting(now, &policy.waiting).map(|w| RiderWaitingView {
            phase: w.phase,
            elapsed_secs: w.elapsed_secs,
            remaining_in_phase_secs: w.remaining_in_phase_secs,
        }),
        safety: safety_view(ride),
        cancellation: ride.cancellation().cloned(),
        fare: ride.fare().clone(),
        early_end: ride.early_end().is_some(),
        can_cancel,
        cancel_assessment: can_cancel
            .then(|| ride.rider_cancel_assessment(now, policy)),
    }
}

/// Driver projection. `caller` may be the assigned driver, a driver browsing
/// an open ride, or the system.
pub fn driver_view(ride: &Ride, caller: &Caller, now: Timestamp, policy: &RidePolicy) -> DriverView {
    let assigned = ride.is_assigned_driver(caller);
    let sees_contact = assigned || caller.role == Role::System;
    let rider = ride.rider();
    DriverView {
        ride_id: ride.id(),
        status: ride.status(),
        checkpoints: ride.checkpoints().clone(),
        pickup: ride.pickup().clone(),
        dropoff: ride.effective_dropoff().clone(),
        passenger_count: ride.passenger_count(),
        matching_expires_at: ride.matching_expires_at(policy),
        rider: RiderSummary {
            rider_id: ride.rider_id(),
            display_name: rider.display_name.clone(),
            phone: if sees_contact { rider.phone.clone() } else { None },
            rating: rider.rating,
        },
        waiting: ride.waiting(now, &policy.waiting),
        safety: safety_view(ride),
        cancellation: ride.cancellation().cloned(),
        early_end: ride.early_end().cloned(),
        last_movement_at: ride.last_movement_at(),
        fare: ride.fare().clone(),
        assigned_to_caller: assigned,
        can_cancel: ride.can_cancel(caller),
        cancel_requires_reason: cancellation::requires_reason(ride.status()),
    }
}

/// Project `ride` for `caller`.
///
/// Riders see their own rides. Drivers see rides assigned to them and any
/// open ride. The system sees everything through the driver projection.
pub fn project(
    ride: &Ride,
    caller: &Caller,
    now: Timestamp,
    policy: &RidePolicy,
) -> Result<RideView, RideError> {
    match caller.role {
        Role::Rider if ride.is_rider(caller) => {
            Ok(RideView::Rider(rider_view(ride, caller, now, policy)))
        }
        Role::Driver if ride.is_assigned_driver(caller) || ride.is_open() => {
            Ok(RideView::Driver(driver_view(ride, caller, now, policy)))
        }
        Role::System => Ok(RideView::Driver(driver_view(ride, caller, now, policy))),
        _ => Err(RideError::Unauthorized(format!(
            "{caller} may not view {}",
            ride.id()
        ))),
    }
}
