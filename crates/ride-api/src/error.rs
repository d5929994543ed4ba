//! # API Error Types
//!
//! Maps orchestrator and domain errors to HTTP status codes with a JSON body
//! of the form `{ "error": { "code", "message" } }`. Server-side failures are
//! logged and their details withheld from the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ride_orchestrator::OrchestratorError;
use ride_state::RideError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `ALREADY_ACCEPTED`.
    pub code: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// A gateway rejected the command.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Missing or invalid credentials or identity headers (401).
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Role may not use this endpoint at all (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Body, path or header value could not be parsed (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Nothing to return for this caller (404).
    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Orchestrator(err) => (orchestrator_status(err), err.code()),
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

fn orchestrator_status(err: &OrchestratorError) -> StatusCode {
    match err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::DeliveryFailed { .. } => StatusCode::BAD_GATEWAY,
        OrchestratorError::Ride(ride) => match ride {
            RideError::Unauthorized(_) => StatusCode::FORBIDDEN,
            RideError::InvalidTransition { .. } | RideError::AlreadyAccepted { .. } => {
                StatusCode::CONFLICT
            }
            RideError::MissingReason { .. } | RideError::InvalidRequest(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        },
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
            match status {
                StatusCode::BAD_GATEWAY => "A downstream delivery failed".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
