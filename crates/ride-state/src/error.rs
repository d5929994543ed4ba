//! # Ride Errors
//!
//! Every rejection carries enough context (current status, attempted action)
//! for the client to map it to a message, and a stable machine-readable code.

use ride_core::RideId;
use thiserror::Error;

use crate::ride::RideStatus;

/// Errors returned when a command against a ride is rejected.
///
/// A rejected command never leaves the ride partially updated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RideError {
    /// The guard for the requested transition failed, or the ride is terminal.
    #[error("invalid transition: cannot {action} while ride is {status}: {reason}")]
    InvalidTransition {
        /// Status at the time of the attempt.
        status: RideStatus,
        /// The attempted action (e.g. `start_trip`).
        action: String,
        /// Why the guard failed.
        reason: String,
    },

    /// The caller's role or identity does not match ride ownership.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Another driver won the race for `accepted`.
    #[error("ride {ride_id} was already accepted by another driver")]
    AlreadyAccepted {
        /// The ride that was contested.
        ride_id: RideId,
    },

    /// An in-progress cancellation arrived without a reason.
    #[error("a cancellation reason is required while the ride is {status}")]
    MissingReason {
        /// Status at the time of the attempt.
        status: RideStatus,
    },

    /// The ride request itself is malformed.
    #[error("invalid ride request: {0}")]
    InvalidRequest(String),
}

impl RideError {
    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::AlreadyAccepted { .. } => "ALREADY_ACCEPTED",
            Self::MissingReason { .. } => "MISSING_REASON",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    pub(crate) fn invalid(status: RideStatus, action: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            status,
            action: action.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ride_core::CoreError> for RideError {
    fn from(err: ride_core::CoreError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
