//! # Orchestrator
//!
//! Owns the registry and the dispatch queue. Every mutating call follows the
//! same path:
//!
//! 1. look up the ride and take its lock (only that ride's lock);
//! 2. if the caller supplied a command id already applied to this ride,
//!    return the current projection and do nothing else;
//! 3. apply the command to the domain `Ride`, which either commits fully or
//!    returns an error with the ride untouched;
//! 4. enqueue the resulting events while still holding the lock, so events
//!    for one ride are queued in commit order;
//! 5. project the updated ride for the caller.
//!
//! Collaborator calls happen later, on the dispatch worker.

use std::sync::Arc;

use ride_core::{Caller, CommandId, Location, RideId, Role, Timestamp, UserId};
use ride_state::projection::project;
use ride_state::{
    CancelReason, CancelRequest, Ride, RideCommand, RideError, RideRequest, RideStatus, RideTransition,
    RideView, SafetyResponse, SafetyTrigger, WaitingPhase,
};
use serde::Serialize;

use crate::clock::Clock;
use crate::collaborators::Collaborators;
use crate::config::OrchestratorConfig;
use crate::dispatch::{self, DispatchQueue, DispatchWorker};
use crate::error::OrchestratorError;
use crate::events::{self, Parties, RideEvent};
use crate::registry::{Admission, RideRegistry};

/// Result of a gateway command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub view: RideView,
    /// The command id had already been applied; nothing changed.
    pub replayed: bool,
}

/// What one sweep pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rides_checked: usize,
    pub stalls_raised: usize,
    pub auto_cancelled: usize,
}

pub struct Orchestrator {
    registry: Arc<RideRegistry>,
    dispatch: DispatchQueue,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    /// Identity used for the orchestrator's own actions (sweeps).
    operator: Caller,
}

impl Orchestrator {
    /// Build an orchestrator and the worker that delivers its events. The
    /// caller decides where the worker runs.
    pub fn new(
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> (Self, DispatchWorker) {
        let registry = Arc::new(RideRegistry::new());
        let (queue, worker) = dispatch::channel(
            Arc::clone(&registry),
            collaborators,
            config.retry,
            Arc::clone(&clock),
        );
        let orchestrator = Self {
            registry,
            dispatch: queue,
            clock,
            config,
            operator: Caller::system(UserId::new()),
        };
        (orchestrator, worker)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn dispatch(&self) -> &DispatchQueue {
        &self.dispatch
    }

    /// Number of non-terminal rides.
    pub fn active_rides(&self) -> i64 {
        self.registry.active_count()
    }

    // ─── Commands ────────────────────────────────────────────────────

    /// Create a ride for a rider.
    pub fn request_ride(
        &self,
        caller: &Caller,
        request: RideRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.request_inner(caller, request, command_id)
            .map_err(|e| self.rejected("request", e))
    }

    fn request_inner(
        &self,
        caller: &Caller,
        request: RideRequest,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        if caller.role != Role::Rider {
            return Err(RideError::Unauthorized(format!("{} may not request rides", caller.role)).into());
        }
        let now = self.clock.now();
        if let Some(existing) = command_id.and_then(|cmd| self.registry.ride_for_request(&cmd)) {
            let slot = self.registry.get(existing)?;
            let guard = slot.lock();
            let view = project(&guard.ride, caller, now, &self.config.policy)?;
            return Ok(CommandOutcome { view, replayed: true });
        }

        let ride = Ride::request(RideId::new(), caller.user_id, request, now)?;
        let slot = match self.registry.insert(ride, command_id)? {
            Admission::Created(slot) => slot,
            Admission::Replayed(slot) => {
                let guard = slot.lock();
                let view = project(&guard.ride, caller, now, &self.config.policy)?;
                return Ok(CommandOutcome { view, replayed: true });
            }
        };
        let guard = slot.lock();
        tracing::info!(ride_id = %guard.ride.id(), rider = %caller.user_id, "ride requested");
        metrics::counter!("ride_transitions_total", "to" => RideStatus::Requested.as_str()).increment(1);
        metrics::gauge!("rides_active").set(self.registry.active_count() as f64);
        let view = project(&guard.ride, caller, now, &self.config.policy)?;
        Ok(CommandOutcome { view, replayed: false })
    }

    /// Apply a status-changing command.
    pub fn execute(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command: RideCommand,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let action = command.name();
        self.mutate(caller, ride_id, command_id, action, |ride, now| {
            let transition = ride.apply(caller, command, now, &self.config.policy)?;
            Ok(self.after_transition(ride, &transition))
        })
    }

    /// `requested → matching`, on behalf of the matching service.
    pub fn begin_matching(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.execute(caller, ride_id, RideCommand::BeginMatching, command_id)
    }

    /// Raise a manual safety check.
    pub fn trigger_safety_check(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.mutate(caller, ride_id, command_id, "safety_check", |ride, now| {
            let st = ride.trigger_safety_check(caller, SafetyTrigger::Manual, now)?;
            if !st.changed {
                return Ok(Vec::new());
            }
            tracing::info!(ride_id = %ride.id(), by = %caller.role, "safety check raised");
            Ok(events::for_safety_check(
                ride.id(),
                st.at,
                caller.role,
                SafetyTrigger::Manual,
                parties(ride),
            ))
        })
    }

    /// Answer the pending safety check. `need_help` fans out alerts.
    pub fn respond_safety(
        &self,
        caller: &Caller,
        ride_id: RideId,
        response: SafetyResponse,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.mutate(caller, ride_id, command_id, "respond_safety", |ride, now| {
            let st = ride.respond_safety(caller, response, now)?;
            if !st.escalated {
                tracing::info!(ride_id = %ride.id(), by = %caller.role, "safety check resolved safe");
                return Ok(Vec::new());
            }
            tracing::warn!(
                ride_id = %ride.id(),
                by = %caller.role,
                status = %ride.status(),
                "safety escalated, dispatching alerts"
            );
            metrics::counter!("ride_safety_escalations_total").increment(1);
            Ok(events::for_escalation(ride.id(), st.at, caller.role, parties(ride)))
        })
    }

    /// Driver position ping.
    pub fn report_position(
        &self,
        caller: &Caller,
        ride_id: RideId,
        position: Option<Location>,
        command_id: Option<CommandId>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.mutate(caller, ride_id, command_id, "report_position", |ride, now| {
            ride.record_movement(caller, position, now)?;
            Ok(Vec::new())
        })
    }

    // ─── Reads ───────────────────────────────────────────────────────

    /// The caller's projection of one ride. Side-effect free.
    pub fn view(&self, caller: &Caller, ride_id: RideId) -> Result<RideView, OrchestratorError> {
        let result = self.registry.get(ride_id).and_then(|slot| {
            let guard = slot.lock();
            Ok(project(&guard.ride, caller, self.clock.now(), &self.config.policy)?)
        });
        result.map_err(|e| self.rejected("view", e))
    }

    /// The caller's non-terminal ride, if any.
    pub fn current_for(&self, caller: &Caller) -> Result<Option<RideView>, OrchestratorError> {
        let Some(ride_id) = self.registry.active_ride_for(caller.user_id) else {
            return Ok(None);
        };
        let slot = self.registry.get(ride_id)?;
        let guard = slot.lock();
        if guard.ride.is_terminal() || !guard.ride.is_party(caller) {
            return Ok(None);
        }
        Ok(Some(project(&guard.ride, caller, self.clock.now(), &self.config.policy)?))
    }

    /// Rides awaiting a driver, oldest first. Drivers and system only.
    pub fn open_rides(&self, caller: &Caller) -> Result<Vec<RideView>, OrchestratorError> {
        if caller.role == Role::Rider {
            return Err(self.rejected(
                "open_rides",
                RideError::Unauthorized("riders may not list open rides".into()).into(),
            ));
        }
        let now = self.clock.now();
        let mut open: Vec<(Timestamp, RideView)> = Vec::new();
        for slot in self.registry.slots() {
            let guard = slot.lock();
            if !guard.ride.is_open() {
                continue;
            }
            let requested_at = guard.ride.checkpoints().requested_at;
            open.push((requested_at, project(&guard.ride, caller, now, &self.config.policy)?));
        }
        open.sort_by_key(|(at, _)| *at);
        Ok(open.into_iter().map(|(_, view)| view).collect())
    }

    // ─── Sweep ───────────────────────────────────────────────────────

    /// One pass over every ride: raise stall checks and, when enabled,
    /// system-cancel rides whose wait has expired.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let policy = &self.config.policy;
        let mut report = SweepReport::default();
        for slot in self.registry.slots() {
            let mut guard = slot.lock();
            let ride = &mut guard.ride;
            if ride.is_terminal() {
                continue;
            }
            report.rides_checked += 1;

            if ride.stall_detected(now, policy.idle_alert_secs) {
                match ride.trigger_safety_check(&self.operator, SafetyTrigger::StallDetected, now) {
                    Ok(st) if st.changed => {
                        tracing::warn!(
                            ride_id = %ride.id(),
                            idle_alert_secs = policy.idle_alert_secs,
                            "no driver movement, stall safety check raised"
                        );
                        for event in events::for_safety_check(
                            ride.id(),
                            st.at,
                            Role::System,
                            SafetyTrigger::StallDetected,
                            parties(ride),
                        ) {
                            self.dispatch.enqueue(event);
                        }
                        report.stalls_raised += 1;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(ride_id = %ride.id(), "stall check not raised: {e}"),
                }
            }

            let expired = ride
                .waiting(now, &policy.waiting)
                .is_some_and(|w| w.phase == WaitingPhase::Expired);
            if self.config.auto_cancel_expired_wait && expired {
                let cancel = RideCommand::Cancel(CancelRequest::with_reason(CancelReason::RiderNoShow));
                match ride.apply(&self.operator, cancel, now, policy) {
                    Ok(t) => {
                        tracing::info!(ride_id = %ride.id(), "waiting expired, ride auto-cancelled");
                        for event in self.after_transition(ride, &t) {
                            self.dispatch.enqueue(event);
                        }
                        report.auto_cancelled += 1;
                    }
                    Err(e) => tracing::warn!(ride_id = %ride.id(), "auto-cancel failed: {e}"),
                }
            }
        }
        if report.stalls_raised > 0 || report.auto_cancelled > 0 {
            tracing::info!(
                checked = report.rides_checked,
                stalls = report.stalls_raised,
                auto_cancelled = report.auto_cancelled,
                "sweep finished"
            );
        }
        report
    }

    /// Run [`Orchestrator::sweep`] on the configured interval, forever.
    pub async fn sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.sweep();
        }
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn mutate<F>(
        &self,
        caller: &Caller,
        ride_id: RideId,
        command_id: Option<CommandId>,
        action: &'static str,
        f: F,
    ) -> Result<CommandOutcome, OrchestratorError>
    where
        F: FnOnce(&mut Ride, Timestamp) -> Result<Vec<RideEvent>, RideError>,
    {
        let result = self.registry.get(ride_id).and_then(|slot| {
            let mut guard = slot.lock();
            let now = self.clock.now();
            if let Some(cmd) = command_id {
                if guard.has_applied(&cmd) {
                    tracing::debug!(%ride_id, command_id = %cmd, action, "command replayed, not re-applied");
                    let view = project(&guard.ride, caller, now, &self.config.policy)?;
                    return Ok(CommandOutcome { view, replayed: true });
                }
            }
            let events = f(&mut guard.ride, now)?;
            if let Some(cmd) = command_id {
                guard.mark_applied(cmd);
            }
            for event in events {
                self.dispatch.enqueue(event);
            }
            let view = project(&guard.ride, caller, now, &self.config.policy)?;
            Ok(CommandOutcome { view, replayed: false })
        });
        result.map_err(|e| self.rejected(action, e))
    }

    /// Bookkeeping for a committed transition; returns its events.
    fn after_transition(&self, ride: &Ride, t: &RideTransition) -> Vec<RideEvent> {
        tracing::info!(
            ride_id = %t.ride_id,
            from = %t.from,
            to = %t.to,
            actor = %t.actor,
            action = %t.action,
            early_end = t.early_end,
            "ride transition committed"
        );
        metrics::counter!("ride_transitions_total", "to" => t.to.as_str()).increment(1);
        if t.to == RideStatus::Accepted {
            if let Some(driver) = ride.driver_id() {
                self.registry.assign_driver(driver, ride.id());
            }
        }
        if t.to.is_terminal() {
            self.registry.release(ride);
        }
        metrics::gauge!("rides_active").set(self.registry.active_count() as f64);
        let fare_override = (t.to == RideStatus::Completed).then(|| ride.fare_override());
        events::for_transition(t, parties(ride), fare_override)
    }

    fn rejected(&self, action: &str, err: OrchestratorError) -> OrchestratorError {
        let code = err.code();
        tracing::info!(action, code, "command rejected: {err}");
        metrics::counter!("ride_commands_rejected_total", "code" => code).increment(1);
        err
    }
}

fn parties(ride: &Ride) -> Parties {
    Parties {
        rider: ride.rider_id(),
        driver: ride.driver_id(),
    }
}
