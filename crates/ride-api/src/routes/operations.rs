//! # Operations Routes
//!
//! System-only tooling: an on-demand sweep and the dead-letter queue.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use ride_orchestrator::{DeadLetter, SweepReport};
use serde::Serialize;

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeadLetters {
    pub dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Serialize)]
pub struct Redriven {
    pub redriven: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/ops/sweep", post(sweep))
        .route("/v1/ops/dead-letters", get(dead_letters))
        .route("/v1/ops/dead-letters/redrive", post(redrive))
}

async fn sweep(
    State(state): State<AppState>,
    id: CallerIdentity,
) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.gateways.operations.sweep(&id.caller)?))
}

async fn dead_letters(
    State(state): State<AppState>,
    id: CallerIdentity,
) -> Result<Json<DeadLetters>, AppError> {
    let dead_letters = state.gateways.operations.dead_letters(&id.caller)?;
    Ok(Json(DeadLetters { dead_letters }))
}

async fn redrive(
    State(state): State<AppState>,
    id: CallerIdentity,
) -> Result<Json<Redriven>, AppError> {
    let redriven = state.gateways.operations.redrive_dead_letters(&id.caller)?;
    Ok(Json(Redriven { redriven }))
}
