//! # Error Types
//!
//! Validation errors raised while constructing core primitives. Domain
//! errors (state machine, gateways) live in the crates that own them.

use thiserror::Error;

/// Errors raised when a core primitive fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A timestamp string or epoch value could not be interpreted.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An identifier string is not a valid UUID.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A role name is not one of `rider`, `driver`, `system`.
    #[error("unknown role: {0:?}")]
    UnknownRole(String),

    /// A location descriptor is malformed.
    #[error("invalid location: {0}")]
    InvalidLocation(String),
}
