//! # Role Action Gateways
//!
//! Capability-restricted façades over the [`Orchestrator`]. Each gateway
//! exposes only its role's commands and refuses callers in any other role.
//! The ride itself then re-checks identity against ride ownership, so a
//! caller who reached the wrong gateway, or the right gateway with someone
//! else's ride, is refused either way.

use std::sync::Arc;

use ride_core::{Caller, CommandId, Location, RideId, Role};
use ride_state::{CancelReason, CancelRequest, DriverProfile, RideCommand, RideError, RideRequest, RideView, SafetyResponse};

use crate::dispatch::DeadLetter;
use crate::error::OrchestratorError;
use crate::orchestrator::{CommandOutcome, Orchestrator, SweepReport};

fn require_role(gateway: &str, expected: Role, caller: &Caller) -> Result<(), OrchestratorError> {
    if caller.role == expected {
        return Ok(());
    }
    Err(RideError::Unauthorized(format!(
        "the {gateway} gateway does not accept {} callers",
        caller.role
    ))
    .into())
}

/// Rider commands: request, cancel, and the safety protocol.
#[derive(Clone)]
pub struct RiderGateway {
    orchestrator: Arc<Orchestrator>,
}

impl RiderGateway {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn check(&self, caller: &Caller) -> Result<(), OrchestratorError> {
        require_role("rider", Role::Rider, caller)
    }

    pub fn request(
        &self,
        caller: &Caller,
        request: RideRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.request_ride(caller, request, command_id)
    }

    pub fn cancel(
        &self,
        caller: &Caller,
        ride_id: RideId,
        request: CancelRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator
            .execute(caller, ride_id, RideCommand::Cancel(request), command_id)
    }

    pub fn trigger_safety_check(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.trigger_safety_check(caller, ride_id, command_id)
    }

    pub fn respond_safety(
        &self,
        caller: &Caller,
        ride_id: RideId,
        response: SafetyResponse,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator
            .respond_safety(caller, ride_id, response, command_id)
    }

    pub fn view(&self, caller: &Caller, ride_id: RideId) -> Result<RideView, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.view(caller, ride_id)
    }

    pub fn current(&self, caller: &Caller) -> Result<Option<RideView>, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.current_for(caller)
    }
}

/// Driver commands: accept through completion, position pings, cancel, and
/// the safety protocol.
#[derive(Clone)]
pub struct DriverGateway {
    orchestrator: Arc<Orchestrator>,
}

impl DriverGateway {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn run(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command: RideCommand,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator.execute(caller, ride_id, command, command_id)
    }

    pub fn accept(
        &self,
        caller: &Caller,
        ride_id: RideId,
        driver: DriverProfile,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::Accept { driver }, command_id)
    }

    pub fn start_pickup(&self, caller: &Caller, ride_id: RideId, command_id: Option<CommandId>) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::StartPickup, command_id)
    }

    pub fn mark_arrived(&self, caller: &Caller, ride_id: RideId, command_id: Option<CommandId>) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::MarkArrived, command_id)
    }

    pub fn start_waiting(&self, caller: &Caller, ride_id: RideId, command_id: Option<CommandId>) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::StartWaiting, command_id)
    }

    pub fn start_trip(&self, caller: &Caller, ride_id: RideId, command_id: Option<CommandId>) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::StartTrip, command_id)
    }

    pub fn complete_trip(&self, caller: &Caller, ride_id: RideId, command_id: Option<CommandId>) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::CompleteTrip, command_id)
    }

    /// End the trip at the current position; the fare is recomputed from
    /// actual distance.
    pub fn request_early_end(
        &self,
        caller: &Caller,
        ride_id: RideId,
        position: Option<Location>,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::RequestEarlyEnd { position }, command_id)
    }

    pub fn cancel(
        &self,
        caller: &Caller,
        ride_id: RideId,
        request: CancelRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.run(caller, ride_id, RideCommand::Cancel(request), command_id)
    }

    pub fn report_position(
        &self,
        caller: &Caller,
        ride_id: RideId,
        position: Option<Location>,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator
            .report_position(caller, ride_id, position, command_id)
    }

    pub fn trigger_safety_check(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator.trigger_safety_check(caller, ride_id, command_id)
    }

    pub fn respond_safety(
        &self,
        caller: &Caller,
        ride_id: RideId,
        response: SafetyResponse,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator
            .respond_safety(caller, ride_id, response, command_id)
    }

    pub fn view(&self, caller: &Caller, ride_id: RideId) -> Result<RideView, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator.view(caller, ride_id)
    }

    pub fn current(&self, caller: &Caller) -> Result<Option<RideView>, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator.current_for(caller)
    }

    pub fn open_rides(&self, caller: &Caller) -> Result<Vec<RideView>, OrchestratorError> {
        require_role("driver", Role::Driver, caller)?;
        self.orchestrator.open_rides(caller)
    }
}

/// Platform commands: matching, system cancellation, safety follow-up,
/// sweeps and the dead-letter queue.
#[derive(Clone)]
pub struct OperationsGateway {
    orchestrator: Arc<Orchestrator>,
}

impl OperationsGateway {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn check(&self, caller: &Caller) -> Result<(), OrchestratorError> {
        require_role("operations", Role::System, caller)
    }

    pub fn begin_matching(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.begin_matching(caller, ride_id, command_id)
    }

    pub fn cancel(
        &self,
        caller: &Caller,
        ride_id: RideId,
        request: CancelRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator
            .execute(caller, ride_id, RideCommand::Cancel(request), command_id)
    }

    /// Cancel with a reason and no caller-side command id.
    pub fn cancel_with_reason(
        &self,
        caller: &Caller,
        ride_id: RideId,
        reason: CancelReason,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.cancel(caller, ride_id, CancelRequest::with_reason(reason), None)
    }

    pub fn trigger_safety_check(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.trigger_safety_check(caller, ride_id, command_id)
    }

    pub fn respond_safety(
        &self,
        caller: &Caller,
        ride_id: RideId,
        response: SafetyResponse,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator
            .respond_safety(caller, ride_id, response, command_id)
    }

    pub fn view(&self, caller: &Caller, ride_id: RideId) -> Result<RideView, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.view(caller, ride_id)
    }

    pub fn open_rides(&self, caller: &Caller) -> Result<Vec<RideView>, OrchestratorError> {
        self.check(caller)?;
        self.orchestrator.open_rides(caller)
    }

    pub fn sweep(&self, caller: &Caller) -> Result<SweepReport, OrchestratorError> {
        self.check(caller)?;
        Ok(self.orchestrator.sweep())
    }

    pub fn dead_letters(&self, caller: &Caller) -> Result<Vec<DeadLetter>, OrchestratorError> {
        self.check(caller)?;
        Ok(self.orchestrator.dispatch().dead_letters())
    }

    pub fn redrive_dead_letters(&self, caller: &Caller) -> Result<usize, OrchestratorError> {
        self.check(caller)?;
        Ok(self.orchestrator.dispatch().redrive_dead_letters())
    }
}

/// All three gateways over one orchestrator.
#[derive(Clone)]
pub struct Gateways {
    pub rider: RiderGateway,
    pub driver: DriverGateway,
    pub operations: OperationsGateway,
}

impl Gateways {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            rider: RiderGateway::new(Arc::clone(&orchestrator)),
            driver: DriverGateway::new(Arc::clone(&orchestrator)),
            operations: OperationsGateway::new(orchestrator),
        }
    }
}
