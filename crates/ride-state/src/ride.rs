//! # Ride State Machine
//!
//! The aggregate root. A [`Ride`] holds the canonical status, the checkpoint
//! timestamps, and the side-channel safety state. It changes only through
//! [`Ride::apply`] and the safety/movement methods, each of which validates
//! fully before touching any field.
//!
//! ## Transition table
//!
//! | From | To | Command | Who |
//! |------|----|---------|-----|
//! | requested | matching | `BeginMatching` | system |
//! | requested, matching | accepted | `Accept` | any driver, first wins |
//! | accepted | driver_en_route | `StartPickup` | assigned driver |
//! | driver_en_route | arrived | `MarkArrived` | assigned driver |
//! | arrived | waiting | `StartWaiting` | assigned driver |
//! | arrived, waiting | in_progress | `StartTrip` | assigned driver |
//! | in_progress | completed | `CompleteTrip`, `RequestEarlyEnd` | assigned driver |
//! | non-terminal | cancelled | `Cancel` | see [`crate::cancellation`] |

use ride_core::{Caller, Location, RideId, Role, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::cancellation::{self, CancelRequest, Cancellation, CancellationAssessment, CancelledBy, DriverMovement};
use crate::error::RideError;
use crate::fare::{Fare, FareEstimate, FareOverride, FareResult};
use crate::policy::RidePolicy;
use crate::safety::{self, SafetyCheck, SafetyResponse, SafetyTransition, SafetyTrigger};
use crate::waiting::{self, WaitingPolicy, WaitingSnapshot};

// ─── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Matching,
    Accepted,
    DriverEnRoute,
    Arrived,
    Waiting,
    InProgress,
    /// Terminal.
    Completed,
    /// Terminal.
    Cancelled,
}

impl RideStatus {
    /// All statuses in canonical order.
    pub const ALL: [RideStatus; 9] = [
        Self::Requested,
        Self::Matching,
        Self::Accepted,
        Self::DriverEnRoute,
        Self::Arrived,
        Self::Waiting,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Matching => "matching",
            Self::Accepted => "accepted",
            Self::DriverEnRoute => "driver_en_route",
            Self::Arrived => "arrived",
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Whether no further transition is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether a driver is committed to the ride (accepted through in progress).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::DriverEnRoute | Self::Arrived | Self::Waiting | Self::InProgress
        )
    }

    /// Statuses directly reachable from this one.
    pub fn valid_transitions(&self) -> &'static [RideStatus] {
        use RideStatus::*;
        match self {
            Requested => &[Matching, Accepted, Cancelled],
            Matching => &[Accepted, Cancelled],
            Accepted => &[DriverEnRoute, Cancelled],
            DriverEnRoute => &[Arrived, Cancelled],
            Arrived => &[Waiting, InProgress, Cancelled],
            Waiting => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: RideStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Checkpoints ─────────────────────────────────────────────────────

/// Entry timestamps, one per status. Each is set at most once, and the
/// set values never decrease along the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoints {
    pub requested_at: Timestamp,
    pub matching_at: Option<Timestamp>,
    pub accepted_at: Option<Timestamp>,
    pub en_route_at: Option<Timestamp>,
    pub arrived_at: Option<Timestamp>,
    pub waiting_started_at: Option<Timestamp>,
    pub in_progress_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub cancelled_at: Option<Timestamp>,
}

impl Checkpoints {
    pub fn new(requested_at: Timestamp) -> Self {
        Self {
            requested_at,
            matching_at: None,
            accepted_at: None,
            en_route_at: None,
            arrived_at: None,
            waiting_started_at: None,
            in_progress_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Checkpoint recorded on entry to `status`.
    pub fn for_status(&self, status: RideStatus) -> Option<Timestamp> {
        match status {
            RideStatus::Requested => Some(self.requested_at),
            RideStatus::Matching => self.matching_at,
            RideStatus::Accepted => self.accepted_at,
            RideStatus::DriverEnRoute => self.en_route_at,
            RideStatus::Arrived => self.arrived_at,
            RideStatus::Waiting => self.waiting_started_at,
            RideStatus::InProgress => self.in_progress_at,
            RideStatus::Completed => self.completed_at,
            RideStatus::Cancelled => self.cancelled_at,
        }
    }

    /// Most recent checkpoint set.
    pub fn latest(&self) -> Timestamp {
        RideStatus::ALL
            .into_iter()
            .filter_map(|s| self.for_status(s))
            .max()
            .unwrap_or(self.requested_at)
    }

    fn slot_mut(&mut self, status: RideStatus) -> Option<&mut Option<Timestamp>> {
        match status {
            RideStatus::Requested => None,
            RideStatus::Matching => Some(&mut self.matching_at),
            RideStatus::Accepted => Some(&mut self.accepted_at),
            RideStatus::DriverEnRoute => Some(&mut self.en_route_at),
            RideStatus::Arrived => Some(&mut self.arrived_at),
            RideStatus::Waiting => Some(&mut self.waiting_started_at),
            RideStatus::InProgress => Some(&mut self.in_progress_at),
            RideStatus::Completed => Some(&mut self.completed_at),
            RideStatus::Cancelled => Some(&mut self.cancelled_at),
        }
    }

    /// Stamp entry into `status`. A clock that runs behind the last
    /// checkpoint is clamped forward so the sequence stays monotonic.
    fn stamp(&mut self, status: RideStatus, now: Timestamp) -> Timestamp {
        let at = now.max(self.latest());
        if let Some(slot) = self.slot_mut(status) {
            if slot.is_none() {
                *slot = Some(at);
            }
        }
        at
    }
}

// ─── Request Data ────────────────────────────────────────────────────

/// What the driver sees about the rider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiderProfile {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

/// What the rider sees about the driver, supplied on accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverProfile {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub vehicle: String,
    pub license_plate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
}

/// A rider's request for a new ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub pickup: Location,
    pub dropoff: Location,
    pub passenger_count: u8,
    pub rider: RiderProfile,
    #[serde(default)]
    pub fare_estimate: Option<FareEstimate>,
}

impl RideRequest {
    pub fn validate(&self) -> Result<(), RideError> {
        if self.passenger_count == 0 {
            return Err(RideError::InvalidRequest(
                "passenger_count must be at least 1".into(),
            ));
        }
        self.pickup.validate()?;
        self.dropoff.validate()?;
        if self.rider.display_name.trim().is_empty() {
            return Err(RideError::InvalidRequest("rider display_name is empty".into()));
        }
        Ok(())
    }
}

// ─── Commands ────────────────────────────────────────────────────────

/// A status-changing command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RideCommand {
    BeginMatching,
    Accept { driver: DriverProfile },
    StartPickup,
    MarkArrived,
    StartWaiting,
    StartTrip,
    CompleteTrip,
    RequestEarlyEnd {
        #[serde(default)]
        position: Option<Location>,
    },
    Cancel(CancelRequest),
}

impl RideCommand {
    /// Action name used in errors, logs and the transition log.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginMatching => "begin_matching",
            Self::Accept { .. } => "accept",
            Self::StartPickup => "start_pickup",
            Self::MarkArrived => "mark_arrived",
            Self::StartWaiting => "start_waiting",
            Self::StartTrip => "start_trip",
            Self::CompleteTrip => "complete_trip",
            Self::RequestEarlyEnd { .. } => "request_early_end",
            Self::Cancel(_) => "cancel",
        }
    }

    /// Status the command moves the ride to.
    pub fn target(&self) -> RideStatus {
        match self {
            Self::BeginMatching => RideStatus::Matching,
            Self::Accept { .. } => RideStatus::Accepted,
            Self::StartPickup => RideStatus::DriverEnRoute,
            Self::MarkArrived => RideStatus::Arrived,
            Self::StartWaiting => RideStatus::Waiting,
            Self::StartTrip => RideStatus::InProgress,
            Self::CompleteTrip | Self::RequestEarlyEnd { .. } => RideStatus::Completed,
            Self::Cancel(_) => RideStatus::Cancelled,
        }
    }
}

/// Annotation on a ride completed before its destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyEnd {
    pub requested_at: Timestamp,
    pub position: Option<Location>,
}

/// Result of an applied command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideTransition {
    pub ride_id: RideId,
    pub from: RideStatus,
    pub to: RideStatus,
    pub at: Timestamp,
    pub actor: Caller,
    pub action: String,
    pub early_end: bool,
}

/// One entry of the ride's transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideTransitionRecord {
    pub from_state: RideStatus,
    pub to_state: RideStatus,
    pub timestamp: Timestamp,
    pub actor_role: Role,
    pub action: String,
}

// ─── Ride ────────────────────────────────────────────────────────────

/// A single ride from request to terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    id: RideId,
    status: RideStatus,
    rider_id: UserId,
    rider: RiderProfile,
    driver_id: Option<UserId>,
    driver: Option<DriverProfile>,
    pickup: Location,
    dropoff: Location,
    passenger_count: u8,
    checkpoints: Checkpoints,
    cancellation: Option<Cancellation>,
    early_end: Option<EarlyEnd>,
    fare: Fare,
    safety: SafetyCheck,
    last_movement_at: Option<Timestamp>,
    last_position: Option<Location>,
    /// Meters between coordinate pings while the driver heads to the pickup.
    #[serde(default)]
    approach_distance_m: f64,
    transitions: Vec<RideTransitionRecord>,
}

impl Ride {
    /// Create a `requested` ride.
    pub fn request(
        id: RideId,
        rider_id: UserId,
        request: RideRequest,
        now: Timestamp,
    ) -> Result<Self, RideError> {
        request.validate()?;
        Ok(Self {
            id,
            status: RideStatus::Requested,
            rider_id,
            rider: request.rider,
            driver_id: None,
            driver: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            passenger_count: request.passenger_count,
            checkpoints: Checkpoints::new(now),
            cancellation: None,
            early_end: None,
            fare: Fare {
                estimate: request.fare_estimate,
                final_fare: None,
            },
            safety: SafetyCheck::default(),
            last_movement_at: None,
            last_position: None,
            approach_distance_m: 0.0,
            transitions: Vec::new(),
        })
    }

    pub fn id(&self) -> RideId {
        self.id
    }

    pub fn status(&self) -> RideStatus {
        self.status
    }

    pub fn rider_id(&self) -> UserId {
        self.rider_id
    }

    pub fn rider(&self) -> &RiderProfile {
        &self.rider
    }

    pub fn driver_id(&self) -> Option<UserId> {
        self.driver_id
    }

    pub fn driver(&self) -> Option<&DriverProfile> {
        self.driver.as_ref()
    }

    pub fn pickup(&self) -> &Location {
        &self.pickup
    }

    /// The dropoff as requested.
    pub fn dropoff(&self) -> &Location {
        &self.dropoff
    }

    /// Where the trip actually ended: the early-end position if one was
    /// reported, otherwise the requested dropoff.
    pub fn effective_dropoff(&self) -> &Location {
        self.early_end
            .as_ref()
            .and_then(|e| e.position.as_ref())
            .unwrap_or(&self.dropoff)
    }

    pub fn passenger_count(&self) -> u8 {
        self.passenger_count
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    pub fn early_end(&self) -> Option<&EarlyEnd> {
        self.early_end.as_ref()
    }

    pub fn fare(&self) -> &Fare {
        &self.fare
    }

    pub fn safety(&self) -> &SafetyCheck {
        &self.safety
    }

    pub fn last_movement_at(&self) -> Option<Timestamp> {
        self.last_movement_at
    }

    pub fn last_position(&self) -> Option<&Location> {
        self.last_position.as_ref()
    }

    /// The driver's approach towards the pickup, measured at `now`.
    pub fn driver_movement(&self, now: Timestamp) -> DriverMovement {
        DriverMovement::at(&self.checkpoints, self.approach_distance_m, now)
    }

    /// When an unanswered `matching` ride goes stale. Advisory only.
    pub fn matching_expires_at(&self, policy: &RidePolicy) -> Option<Timestamp> {
        if self.status != RideStatus::Matching {
            return None;
        }
        let window = i64::try_from(policy.matching_window_secs).unwrap_or(i64::MAX);
        self.checkpoints.matching_at.map(|at| at.plus_secs(window))
    }

    pub fn transition_log(&self) -> &[RideTransitionRecord] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Awaiting a driver.
    pub fn is_open(&self) -> bool {
        matches!(self.status, RideStatus::Requested | RideStatus::Matching) && self.driver_id.is_none()
    }

    pub fn is_rider(&self, caller: &Caller) -> bool {
        caller.role == Role::Rider && caller.user_id == self.rider_id
    }

    pub fn is_assigned_driver(&self, caller: &Caller) -> bool {
        caller.role == Role::Driver && self.driver_id == Some(caller.user_id)
    }

    /// Rider, assigned driver, or system.
    pub fn is_party(&self, caller: &Caller) -> bool {
        caller.role == Role::System || self.is_rider(caller) || self.is_assigned_driver(caller)
    }

    /// What the fare collaborator should price.
    pub fn fare_override(&self) -> FareOverride {
        match &self.early_end {
            Some(e) => FareOverride::EarlyEnd {
                position: e.position.clone(),
            },
            None => FareOverride::None,
        }
    }

    /// Derived waiting state, if the ride is at the pickup.
    pub fn waiting(&self, now: Timestamp, policy: &WaitingPolicy) -> Option<WaitingSnapshot> {
        waiting::for_ride(self, now, policy)
    }

    /// Whether a rider cancellation right now would be free.
    pub fn rider_cancel_assessment(&self, now: Timestamp, policy: &RidePolicy) -> CancellationAssessment {
        cancellation::assess_rider_cancellation(
            self.status,
            &self.checkpoints,
            self.driver_movement(now),
            now,
            policy,
        )
    }

    /// Whether `caller` could cancel in the current status.
    pub fn can_cancel(&self, caller: &Caller) -> bool {
        let party = match caller.role {
            Role::Rider => self.is_rider(caller),
            Role::Driver => self.is_assigned_driver(caller),
            Role::System => true,
        };
        party && cancellation::role_may_cancel(caller.role, self.status)
    }

    /// Validate and apply a status-changing command.
    ///
    /// On error the ride is unchanged.
    pub fn apply(
        &mut self,
        caller: &Caller,
        command: RideCommand,
        now: Timestamp,
        policy: &RidePolicy,
    ) -> Result<RideTransition, RideError> {
        let from = self.status;
        let action = command.name();
        if from.is_terminal() {
            return Err(RideError::invalid(from, action, "ride is already terminal"));
        }

        match &command {
            RideCommand::BeginMatching => {
                if caller.role != Role::System {
                    return Err(RideError::Unauthorized(format!(
                        "{} may not begin matching",
                        caller.role
                    )));
                }
                self.require_status(action, &[RideStatus::Requested])?;
            }
            RideCommand::Accept { .. } => self.guard_accept(caller)?,
            RideCommand::StartPickup => {
                self.require_assigned_driver(caller, action)?;
                self.require_status(action, &[RideStatus::Accepted])?;
            }
            RideCommand::MarkArrived => {
                self.require_assigned_driver(caller, action)?;
                self.require_status(action, &[RideStatus::DriverEnRoute])?;
            }
            RideCommand::StartWaiting => {
                self.require_assigned_driver(caller, action)?;
                self.require_status(action, &[RideStatus::Arrived])?;
            }
            RideCommand::StartTrip => {
                self.require_assigned_driver(caller, action)?;
                self.require_status(action, &[RideStatus::Arrived, RideStatus::Waiting])?;
            }
            RideCommand::CompleteTrip | RideCommand::RequestEarlyEnd { .. } => {
                self.require_assigned_driver(caller, action)?;
                self.require_status(action, &[RideStatus::InProgress])?;
            }
            RideCommand::Cancel(req) => self.guard_cancel(caller, req)?,
        }

        let to = command.target();
        let at = self.checkpoints.stamp(to, now);
        match command {
            RideCommand::Accept { driver } => {
                self.driver_id = Some(caller.user_id);
                self.driver = Some(driver);
            }
            RideCommand::StartTrip => {
                self.last_movement_at.get_or_insert(at);
            }
            RideCommand::RequestEarlyEnd { position } => {
                self.early_end = Some(EarlyEnd {
                    requested_at: at,
                    position,
                });
            }
            RideCommand::Cancel(req) => {
                let a = if caller.role == Role::Rider {
                    self.rider_cancel_assessment(at, policy)
                } else {
                    CancellationAssessment {
                        fee_applicable: false,
                        within_grace_period: false,
                        grace_remaining_secs: None,
                        compensation_eligible: false,
                    }
                };
                self.cancellation = Some(Cancellation {
                    by: CancelledBy::from(caller.role),
                    reason: req.reason,
                    note: req.note.filter(|n| !n.trim().is_empty()),
                    at,
                    fee_applicable: a.fee_applicable,
                    within_grace_period: a.within_grace_period,
                    compensation_eligible: a.compensation_eligible,
                });
            }
            _ => {}
        }
        self.status = to;
        self.transitions.push(RideTransitionRecord {
            from_state: from,
            to_state: to,
            timestamp: at,
            actor_role: caller.role,
            action: action.to_string(),
        });

        Ok(RideTransition {
            ride_id: self.id,
            from,
            to,
            at,
            actor: *caller,
            action: action.to_string(),
            early_end: self.early_end.is_some() && to == RideStatus::Completed,
        })
    }

    /// Raise a safety check.
    pub fn trigger_safety_check(
        &mut self,
        caller: &Caller,
        trigger: SafetyTrigger,
        now: Timestamp,
    ) -> Result<SafetyTransition, RideError> {
        self.guard_safety(caller, "safety_check")?;
        Ok(self.safety.trigger(caller.role, trigger, now))
    }

    /// Answer the pending safety check.
    pub fn respond_safety(
        &mut self,
        caller: &Caller,
        response: SafetyResponse,
        now: Timestamp,
    ) -> Result<SafetyTransition, RideError> {
        self.guard_safety(caller, "respond_safety")?;
        self.safety.respond(caller.role, response, now).map_err(|e| {
            RideError::invalid(
                self.status,
                "respond_safety",
                format!("no safety check is pending (safety is {})", e.0),
            )
        })
    }

    /// Record a driver position ping.
    pub fn record_movement(
        &mut self,
        caller: &Caller,
        position: Option<Location>,
        now: Timestamp,
    ) -> Result<(), RideError> {
        if !self.status.is_active() {
            return Err(RideError::invalid(
                self.status,
                "report_position",
                "position is only tracked while a driver is committed",
            ));
        }
        self.require_assigned_driver(caller, "report_position")?;
        if let Some(p) = &position {
            p.validate()?;
        }
        self.last_movement_at = Some(now);
        if let Some(position) = position {
            let approaching = matches!(self.status, RideStatus::Accepted | RideStatus::DriverEnRoute);
            let leg = self
                .last_position
                .as_ref()
                .and_then(|prev| prev.coordinates)
                .zip(position.coordinates);
            if let (true, Some((from, to))) = (approaching, leg) {
                self.approach_distance_m += from.distance_m(&to);
            }
            self.last_position = Some(position);
        }
        Ok(())
    }

    /// Whether the driver has been idle long enough mid-trip to raise a
    /// stall check.
    pub fn stall_detected(&self, now: Timestamp, idle_alert_secs: u64) -> bool {
        let baseline = match (self.last_movement_at, self.checkpoints.in_progress_at) {
            (Some(m), Some(p)) => Some(m.max(p)),
            (m, p) => m.or(p),
        };
        safety::stall_detected(self.status, baseline, &self.safety, now, idle_alert_secs)
    }

    /// Store the final fare. Accepted once, and only on a completed ride.
    pub fn record_fare(&mut self, result: FareResult) -> bool {
        if self.status != RideStatus::Completed || self.fare.is_finalized() {
            return false;
        }
        self.fare.final_fare = Some(result);
        true
    }

    // ─── Guards ──────────────────────────────────────────────────────

    fn require_status(&self, action: &str, allowed: &[RideStatus]) -> Result<(), RideError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        Err(RideError::invalid(
            self.status,
            action,
            format!("requires status {}", names.join(" or ")),
        ))
    }

    fn require_assigned_driver(&self, caller: &Caller, action: &str) -> Result<(), RideError> {
        if caller.role != Role::Driver {
            return Err(RideError::Unauthorized(format!(
                "{action} is a driver action, caller is {}",
                caller.role
            )));
        }
        if self.driver_id != Some(caller.user_id) {
            return Err(RideError::Unauthorized(format!(
                "{} is not the assigned driver of {}",
                caller.user_id, self.id
            )));
        }
        Ok(())
    }

    fn guard_accept(&self, caller: &Caller) -> Result<(), RideError> {
        if caller.role != Role::Driver {
            return Err(RideError::Unauthorized(format!(
                "only drivers may accept rides, caller is {}",
                caller.role
            )));
        }
        if self.driver_id.is_some() {
            return Err(RideError::AlreadyAccepted { ride_id: self.id });
        }
        self.require_status("accept", &[RideStatus::Requested, RideStatus::Matching])
    }

    fn guard_cancel(&self, caller: &Caller, req: &CancelRequest) -> Result<(), RideError> {
        match caller.role {
            Role::Rider if !self.is_rider(caller) => {
                return Err(RideError::Unauthorized(format!(
                    "{} is not the rider of {}",
                    caller.user_id, self.id
                )));
            }
            Role::Driver if !self.is_assigned_driver(caller) => {
                return Err(RideError::Unauthorized(format!(
                    "{} is not the assigned driver of {}",
                    caller.user_id, self.id
                )));
            }
            _ => {}
        }
        if !cancellation::role_may_cancel(caller.role, self.status) {
            return Err(RideError::invalid(
                self.status,
                "cancel",
                format!("{} may not cancel at this stage", caller.role),
            ));
        }
        if cancellation::requires_reason(self.status) && req.reason.is_none() {
            return Err(RideError::MissingReason {
                status: self.status,
            });
        }
        if let Some(reason) = req.reason.filter(|r| !r.allowed_for(caller.role)) {
            return Err(RideError::InvalidRequest(format!(
                "{} may not cancel with reason {reason}",
                caller.role
            )));
        }
        if let Some(note) = &req.note {
            if note.chars().count() > cancellation::MAX_NOTE_LEN {
                return Err(RideError::InvalidRequest(format!(
                    "cancellation note exceeds {} characters",
                    cancellation::MAX_NOTE_LEN
                )));
            }
        }
        Ok(())
    }

    fn guard_safety(&self, caller: &Caller, action: &str) -> Result<(), RideError> {
        if self.status.is_terminal() {
            return Err(RideError::invalid(
                self.status,
                action,
                "safety checks require a non-terminal ride",
            ));
        }
        if !self.is_party(caller) {
            return Err(RideError::Unauthorized(format!(
                "{caller} is not a party to {}",
                self.id
            )));
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancelReason;
    use crate::safety::SafetyState;
    use proptest::prelude::*;
    use ride_core::GeoPoint;

    fn at(secs: i64) -> Timestamp {
        Timestamp::from_epoch_secs(1_780_000_000 + secs).unwrap()
    }

    fn request() -> RideRequest {
        RideRequest {
            pickup: Location::address("12 Harbour Rd"),
            dropoff: Location::address("Central Station"),
            passenger_count: 2,
            rider: RiderProfile {
                display_name: "Amina".into(),
                phone: Some("+15550100".into()),
                rating: Some(4.9),
            },
            fare_estimate: None,
        }
    }

    fn profile() -> DriverProfile {
        DriverProfile {
            display_name: "Kofi".into(),
            phone: None,
            vehicle: "Blue Corolla".into(),
            license_plate: "KX-204".into(),
            rating: Some(4.8),
        }
    }

    struct Fixture {
        ride: Ride,
        rider: Caller,
        driver: Caller,
        system: Caller,
        policy: RidePolicy,
    }

    impl Fixture {
        fn new() -> Self {
            let rider = Caller::rider(UserId::new());
            Self {
                ride: Ride::request(RideId::new(), rider.user_id, request(), at(0)).unwrap(),
                rider,
                driver: Caller::driver(UserId::new()),
                system: Caller::system(UserId::new()),
                policy: RidePolicy::default(),
            }
        }

        fn run(&mut self, caller: Caller, cmd: RideCommand, secs: i64) -> Result<RideTransition, RideError> {
            let policy = self.policy.clone();
            self.ride.apply(&caller, cmd, at(secs), &policy)
        }

        fn drive_to(&mut self, status: RideStatus) {
            let d = self.driver;
            let steps = [
                (RideStatus::Accepted, RideCommand::Accept { driver: profile() }),
                (RideStatus::DriverEnRoute, RideCommand::StartPickup),
                (RideStatus::Arrived, RideCommand::MarkArrived),
                (RideStatus::Waiting, RideCommand::StartWaiting),
                (RideStatus::InProgress, RideCommand::StartTrip),
                (RideStatus::Completed, RideCommand::CompleteTrip),
            ];
            for (i, (reached, cmd)) in steps.into_iter().enumerate() {
                self.run(d, cmd, 10 * (i as i64 + 1)).unwrap();
                if reached == status {
                    return;
                }
            }
        }
    }

    #[test]
    fn happy_path_sets_each_checkpoint_once() {
        let mut f = Fixture::new();
        let sys = f.system;
        f.run(sys, RideCommand::BeginMatching, 5).unwrap();
        f.drive_to(RideStatus::Completed);

        let cp = f.ride.checkpoints();
        let order = [
            Some(cp.requested_at),
            cp.matching_at,
            cp.accepted_at,
            cp.en_route_at,
            cp.arrived_at,
            cp.waiting_started_at,
            cp.in_progress_at,
            cp.completed_at,
        ];
        assert!(order.iter().all(Option::is_some));
        assert!(order.windows(2).all(|w| w[0] <= w[1]));
        assert!(cp.cancelled_at.is_none());
        assert_eq!(f.ride.status(), RideStatus::Completed);
        assert_eq!(f.ride.transition_log().len(), 7);
        assert_eq!(f.ride.transition_log()[0].action, "begin_matching");
    }

    #[test]
    fn terminal_ride_rejects_everything() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Completed);
        let d = f.driver;
        let r = f.rider;
        let before = f.ride.clone();
        let err = f.run(d, RideCommand::CompleteTrip, 500).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        let err = f.run(r, RideCommand::Cancel(CancelRequest::default()), 500).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(f.ride, before);
    }

    #[test]
    fn second_driver_loses_the_race() {
        let mut f = Fixture::new();
        let winner = f.driver;
        let loser = Caller::driver(UserId::new());
        f.run(winner, RideCommand::Accept { driver: profile() }, 1).unwrap();
        let err = f.run(loser, RideCommand::Accept { driver: profile() }, 2).unwrap_err();
        assert_eq!(err, RideError::AlreadyAccepted { ride_id: f.ride.id() });
        assert_eq!(f.ride.driver_id(), Some(winner.user_id));
    }

    #[test]
    fn rider_cannot_accept() {
        let mut f = Fixture::new();
        let r = f.rider;
        let err = f.run(r, RideCommand::Accept { driver: profile() }, 1).unwrap_err();
        assert!(matches!(err, RideError::Unauthorized(_)));
        assert!(f.ride.driver_id().is_none());
    }

    #[test]
    fn only_the_assigned_driver_progresses_the_ride() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Accepted);
        let stranger = Caller::driver(UserId::new());
        let err = f.run(stranger, RideCommand::StartPickup, 20).unwrap_err();
        assert!(matches!(err, RideError::Unauthorized(_)));
        let r = f.rider;
        let err = f.run(r, RideCommand::StartPickup, 20).unwrap_err();
        assert!(matches!(err, RideError::Unauthorized(_)));
        assert_eq!(f.ride.status(), RideStatus::Accepted);
    }

    #[test]
    fn begin_matching_is_system_only() {
        let mut f = Fixture::new();
        let r = f.rider;
        assert!(matches!(
            f.run(r, RideCommand::BeginMatching, 1),
            Err(RideError::Unauthorized(_))
        ));
        let s = f.system;
        f.run(s, RideCommand::BeginMatching, 1).unwrap();
        let err = f.run(s, RideCommand::BeginMatching, 2).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Accepted);
        let d = f.driver;
        let err = f.run(d, RideCommand::MarkArrived, 20).unwrap_err();
        assert!(matches!(
            err,
            RideError::InvalidTransition {
                status: RideStatus::Accepted,
                ..
            }
        ));
        assert!(f.ride.checkpoints().arrived_at.is_none());
    }

    #[test]
    fn trip_can_start_straight_from_arrived() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Arrived);
        let d = f.driver;
        f.run(d, RideCommand::StartTrip, 100).unwrap();
        assert_eq!(f.ride.status(), RideStatus::InProgress);
        assert!(f.ride.checkpoints().waiting_started_at.is_none());
    }

    #[test]
    fn in_progress_cancel_needs_reason() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::InProgress);
        let d = f.driver;
        let err = f.run(d, RideCommand::Cancel(CancelRequest::default()), 100).unwrap_err();
        assert_eq!(
            err,
            RideError::MissingReason {
                status: RideStatus::InProgress
            }
        );
        assert!(f.ride.cancellation().is_none());
        f.run(d, RideCommand::Cancel(CancelRequest::with_reason(CancelReason::UnsafeLocation)), 101)
            .unwrap();
        assert_eq!(f.ride.status(), RideStatus::Cancelled);
        assert_eq!(f.ride.cancellation().unwrap().by, CancelledBy::Driver);
    }

    #[test]
    fn requested_cancel_without_reason_succeeds() {
        let mut f = Fixture::new();
        let r = f.rider;
        let t = f.run(r, RideCommand::Cancel(CancelRequest::default()), 30).unwrap();
        assert_eq!(t.to, RideStatus::Cancelled);
        let c = f.ride.cancellation().unwrap();
        assert!(c.reason.is_none());
        assert!(!c.fee_applicable);
        assert_eq!(f.ride.checkpoints().cancelled_at, Some(at(30)));
    }

    #[test]
    fn rider_cannot_cancel_mid_trip() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::InProgress);
        let r = f.rider;
        let req = CancelRequest::with_reason(CancelReason::ChangedPlans);
        let err = f.run(r, RideCommand::Cancel(req), 100).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn late_rider_cancel_flags_fee() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::DriverEnRoute);
        let r = f.rider;
        // accepted at +10s, grace 180s
        f.run(r, RideCommand::Cancel(CancelRequest::default()), 400).unwrap();
        let c = f.ride.cancellation().unwrap();
        assert!(c.fee_applicable);
        assert!(!c.within_grace_period);
        assert!(c.compensation_eligible);
    }

    fn ping(lat: f64) -> Option<Location> {
        Some(Location::with_coordinates("ping", GeoPoint::new(lat, 3.0).unwrap()))
    }

    #[test]
    fn late_cancel_while_accepted_charges_only_after_driver_moves() {
        let mut idle = Fixture::new();
        idle.drive_to(RideStatus::Accepted);
        let r = idle.rider;
        idle.run(r, RideCommand::Cancel(CancelRequest::default()), 400).unwrap();
        let c = idle.ride.cancellation().unwrap();
        assert!(!c.fee_applicable);
        assert!(!c.compensation_eligible);

        let mut moved = Fixture::new();
        moved.drive_to(RideStatus::Accepted);
        let d = moved.driver;
        moved.ride.record_movement(&d, ping(6.40), at(60)).unwrap();
        moved.ride.record_movement(&d, ping(6.41), at(120)).unwrap();
        assert!(moved.ride.driver_movement(at(120)).distance_m > 1_000.0);
        let r = moved.rider;
        moved.run(r, RideCommand::Cancel(CancelRequest::default()), 400).unwrap();
        let c = moved.ride.cancellation().unwrap();
        assert!(c.fee_applicable);
        assert!(c.compensation_eligible);
    }

    #[test]
    fn movement_during_the_trip_is_not_approach_distance() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::InProgress);
        let d = f.driver;
        f.ride.record_movement(&d, ping(6.40), at(100)).unwrap();
        f.ride.record_movement(&d, ping(6.50), at(160)).unwrap();
        assert_eq!(f.ride.driver_movement(at(160)).distance_m, 0.0);
    }

    #[test]
    fn driver_reason_outside_the_driver_set_is_rejected() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::DriverEnRoute);
        let d = f.driver;
        let before = f.ride.clone();
        let req = CancelRequest::with_reason(CancelReason::DriverDelayed);
        let err = f.run(d, RideCommand::Cancel(req), 50).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert_eq!(f.ride, before);
        let req = CancelRequest::with_reason(CancelReason::RiderChangedDestination);
        f.run(d, RideCommand::Cancel(req), 51).unwrap();
        assert_eq!(f.ride.cancellation().unwrap().by, CancelledBy::Driver);
        assert!(!f.ride.cancellation().unwrap().compensation_eligible);
    }

    #[test]
    fn matching_expiry_is_advisory() {
        let mut f = Fixture::new();
        assert!(f.ride.matching_expires_at(&f.policy).is_none());
        let s = f.system;
        f.run(s, RideCommand::BeginMatching, 5).unwrap();
        assert_eq!(f.ride.matching_expires_at(&f.policy), Some(at(15)));
        f.drive_to(RideStatus::Accepted);
        assert!(f.ride.matching_expires_at(&f.policy).is_none());
    }

    #[test]
    fn overlong_note_is_rejected() {
        let mut f = Fixture::new();
        let r = f.rider;
        let req = CancelRequest {
            reason: Some(CancelReason::Other),
            note: Some("x".repeat(501)),
        };
        let err = f.run(r, RideCommand::Cancel(req), 5).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert_eq!(f.ride.status(), RideStatus::Requested);
    }

    #[test]
    fn early_end_completes_with_annotation() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::InProgress);
        let d = f.driver;
        let stop = Location::address("Elm St & 9th");
        let t = f
            .run(d, RideCommand::RequestEarlyEnd { position: Some(stop.clone()) }, 200)
            .unwrap();
        assert_eq!(t.to, RideStatus::Completed);
        assert!(t.early_end);
        assert_eq!(f.ride.effective_dropoff(), &stop);
        assert_eq!(f.ride.dropoff().address, "Central Station");
        assert!(f.ride.fare_override().is_early_end());
    }

    #[test]
    fn clock_running_backwards_keeps_checkpoints_monotonic() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Accepted);
        let d = f.driver;
        f.run(d, RideCommand::StartPickup, -50).unwrap();
        let cp = f.ride.checkpoints();
        assert!(cp.en_route_at >= cp.accepted_at);
    }

    #[test]
    fn escalation_leaves_status_untouched() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::Arrived);
        let r = f.rider;
        f.ride.trigger_safety_check(&r, SafetyTrigger::Manual, at(40)).unwrap();
        let t = f.ride.respond_safety(&r, SafetyResponse::NeedHelp, at(45)).unwrap();
        assert!(t.escalated);
        assert_eq!(f.ride.safety().state, SafetyState::Escalated);
        assert_eq!(f.ride.status(), RideStatus::Arrived);
        // Escalation does not gate progress.
        let d = f.driver;
        f.run(d, RideCommand::StartTrip, 50).unwrap();
    }

    #[test]
    fn safety_requires_party_and_active_ride() {
        let mut f = Fixture::new();
        let outsider = Caller::rider(UserId::new());
        assert!(matches!(
            f.ride.trigger_safety_check(&outsider, SafetyTrigger::Manual, at(1)),
            Err(RideError::Unauthorized(_))
        ));
        let r = f.rider;
        let err = f.ride.respond_safety(&r, SafetyResponse::Safe, at(1)).unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");

        f.drive_to(RideStatus::Completed);
        assert!(f.ride.trigger_safety_check(&r, SafetyTrigger::Manual, at(500)).is_err());
    }

    #[test]
    fn stall_uses_trip_start_then_movement() {
        let mut f = Fixture::new();
        f.drive_to(RideStatus::InProgress); // in_progress at +50
        assert!(!f.ride.stall_detected(at(200), 240));
        assert!(f.ride.stall_detected(at(290), 240));
        let d = f.driver;
        f.ride.record_movement(&d, None, at(280)).unwrap();
        assert!(!f.ride.stall_detected(at(290), 240));
    }

    #[test]
    fn fare_is_recorded_once_after_completion() {
        let mut f = Fixture::new();
        let fare = FareResult {
            amount_minor: 1_250,
            currency: "USD".into(),
            basis: crate::fare::FareBasis::QuotedRoute,
            computed_at: at(100),
            reference: None,
        };
        assert!(!f.ride.record_fare(fare.clone()));
        f.drive_to(RideStatus::Completed);
        assert!(f.ride.record_fare(fare.clone()));
        assert!(!f.ride.record_fare(fare));
    }

    #[test]
    fn zero_passengers_rejected() {
        let mut req = request();
        req.passenger_count = 0;
        let err = Ride::request(RideId::new(), UserId::new(), req, at(0)).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn status_names_round_trip() {
        for s in RideStatus::ALL {
            assert_eq!(RideStatus::from_name(s.as_str()), Some(s));
            assert_eq!(serde_json::to_value(s).unwrap(), s.as_str());
        }
        assert!(RideStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .all(|s| s.valid_transitions().is_empty()));
    }

    fn any_command() -> impl Strategy<Value = (u8, u8)> {
        (0u8..10, 0u8..4)
    }

    proptest! {
        #[test]
        fn arbitrary_command_sequences_keep_invariants(
            steps in proptest::collection::vec(any_command(), 1..40)
        ) {
            let mut f = Fixture::new();
            let other = Caller::driver(UserId::new());
            for (i, (cmd, who)) in steps.into_iter().enumerate() {
                let caller = match who {
                    0 => f.rider,
                    1 => f.driver,
                    2 => other,
                    _ => f.system,
                };
                let command = match cmd {
                    0 => RideCommand::BeginMatching,
                    1 => RideCommand::Accept { driver: profile() },
                    2 => RideCommand::StartPickup,
                    3 => RideCommand::MarkArrived,
                    4 => RideCommand::StartWaiting,
                    5 => RideCommand::StartTrip,
                    6 => RideCommand::CompleteTrip,
                    7 => RideCommand::RequestEarlyEnd { position: None },
                    8 => RideCommand::Cancel(CancelRequest::default()),
                    _ => RideCommand::Cancel(CancelRequest::with_reason(CancelReason::Other)),
                };
                let before = f.ride.clone();
                let was_terminal = before.is_terminal();
                match f.run(caller, command, i as i64) {
                    Ok(t) => {
                        prop_assert!(!was_terminal);
                        prop_assert!(t.from.can_transition_to(t.to));
                    }
                    Err(_) => prop_assert_eq!(&f.ride, &before),
                }

                let ride = &f.ride;
                prop_assert_eq!(ride.cancellation().is_some(), ride.status() == RideStatus::Cancelled);
                if ride.status().is_active() || ride.status() == RideStatus::Completed {
                    prop_assert!(ride.driver_id().is_some());
                }
                if matches!(ride.status(), RideStatus::Requested | RideStatus::Matching) {
                    prop_assert!(ride.driver_id().is_none());
                }
                let cp = ride.checkpoints();
                if cp.waiting_started_at.is_some() {
                    prop_assert!(cp.arrived_at.is_some());
                }
                if cp.arrived_at.is_some() {
                    prop_assert!(cp.en_route_at.is_some());
                }
            }
        }
    }
}
