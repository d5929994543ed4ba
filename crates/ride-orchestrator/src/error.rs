//! Orchestrator-level errors.

use ride_core::{EventId, RideId};
use ride_state::RideError;
use thiserror::Error;

/// Errors returned by the orchestrator and its gateways.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// The ride domain rejected the command.
    #[error(transparent)]
    Ride(#[from] RideError),

    /// No ride with this id is known.
    #[error("ride {0} not found")]
    NotFound(RideId),

    /// A collaborator call exhausted its retries. The event was moved to the
    /// dead-letter queue; the ride itself is unaffected.
    #[error("delivery of {kind} event {event_id} failed after {attempts} attempts: {reason}")]
    DeliveryFailed {
        event_id: EventId,
        kind: String,
        attempts: u32,
        reason: String,
    },
}

impl OrchestratorError {
    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ride(e) => e.code(),
            Self::NotFound(_) => "NOT_FOUND",
            Self::DeliveryFailed { .. } => "DELIVERY_FAILED",
        }
    }
}
