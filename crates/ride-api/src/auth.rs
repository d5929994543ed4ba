//! # Authentication and Caller Identity
//!
//! Two layers:
//!
//! - [`auth_middleware`] enforces the optional static bearer token on every
//!   `/v1` route. Health probes and `/metrics` are mounted outside it.
//! - [`CallerIdentity`] extracts the trusted session context from the
//!   `x-actor-role` / `x-actor-id` headers, plus the optional
//!   `idempotency-key` that becomes the command id.
//!
//! The orchestrator trusts the extracted pair and re-checks it against ride
//! ownership, so a forged header can never reach someone else's ride.

use std::str::FromStr;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use ride_core::{Caller, CommandId, Role, UserId};
use subtle::ConstantTimeEq;

use crate::error::AppError;
use crate::state::AppState;

pub const ROLE_HEADER: &str = "x-actor-role";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// A bearer token that never prints.
#[derive(Clone)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Constant-time comparison against the presented token.
    ///
    /// A length mismatch still runs a dummy comparison so the rejection
    /// takes the same time as a wrong token of the right length.
    fn matches(&self, presented: &str) -> bool {
        let expected = self.0.as_bytes();
        let presented = presented.as_bytes();
        if presented.len() != expected.len() {
            let _ = expected.ct_eq(expected);
            return false;
        }
        presented.ct_eq(expected).into()
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

/// Reject `/v1` requests without the configured bearer token.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &state.config.auth_token {
        let presented = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match presented {
            Some(token) if expected.matches(token) => {}
            Some(_) => {
                tracing::warn!(path = %request.uri().path(), "rejected invalid bearer token");
                return Err(AppError::Unauthenticated("invalid bearer token".into()));
            }
            None => return Err(AppError::Unauthenticated("missing bearer token".into())),
        }
    }
    Ok(next.run(request).await)
}

/// Who is calling, and the client's command id if one was sent.
#[derive(Debug, Clone, Copy)]
pub struct CallerIdentity {
    pub caller: Caller,
    pub command_id: Option<CommandId>,
}

impl CallerIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let role = header(headers, ROLE_HEADER)?
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {ROLE_HEADER} header")))?;
        let role = Role::from_str(role).map_err(|e| AppError::Unauthenticated(e.to_string()))?;

        let user = header(headers, ACTOR_HEADER)?
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {ACTOR_HEADER} header")))?;
        let user_id =
            UserId::from_str(user).map_err(|e| AppError::Unauthenticated(e.to_string()))?;

        let command_id = header(headers, IDEMPOTENCY_HEADER)?
            .map(|raw| {
                CommandId::from_str(raw)
                    .map_err(|e| AppError::BadRequest(format!("{IDEMPOTENCY_HEADER}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            caller: Caller::new(role, user_id),
            command_id,
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map(str::trim)
                .map_err(|_| AppError::BadRequest(format!("{name} is not valid ASCII")))
        })
        .transpose()
}

impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
