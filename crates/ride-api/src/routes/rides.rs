//! # Ride Routes
//!
//! Rider and driver command endpoints plus the read surface. Each handler
//! picks the gateway for the caller's role; the gateway and the ride then
//! decide whether that caller may act on that ride.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ride_core::{Caller, Location, Role};
use ride_orchestrator::CommandOutcome;
use ride_state::{CancelRequest, DriverProfile, RideRequest, RideView, SafetyResponse};
use serde::{Deserialize, Serialize};

use crate::auth::CallerIdentity;
use crate::error::AppError;
use crate::extractors::{OptionalJson, RidePath, ValidatedJson};
use crate::state::AppState;

type Outcome = Result<Json<CommandOutcome>, AppError>;

/// Body of `early-end` and `position`.
#[derive(Debug, Default, Deserialize)]
pub struct PositionBody {
    #[serde(default)]
    pub position: Option<Location>,
}

#[derive(Debug, Deserialize)]
pub struct SafetyRespondBody {
    pub response: SafetyResponse,
}

/// `GET /v1/rides/current`.
#[derive(Debug, Serialize)]
pub struct CurrentRide {
    pub ride: Option<RideView>,
}

#[derive(Debug, Serialize)]
pub struct OpenRides {
    pub rides: Vec<RideView>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/rides", post(request_ride))
        .route("/v1/rides/current", get(current_ride))
        .route("/v1/rides/open", get(open_rides))
        .route("/v1/rides/{ride_id}", get(view_ride))
        .route("/v1/rides/{ride_id}/matching", post(begin_matching))
        .route("/v1/rides/{ride_id}/accept", post(accept))
        .route("/v1/rides/{ride_id}/start-pickup", post(start_pickup))
        .route("/v1/rides/{ride_id}/arrive", post(mark_arrived))
        .route("/v1/rides/{ride_id}/start-waiting", post(start_waiting))
        .route("/v1/rides/{ride_id}/start-trip", post(start_trip))
        .route("/v1/rides/{ride_id}/complete", post(complete_trip))
        .route("/v1/rides/{ride_id}/early-end", post(request_early_end))
        .route("/v1/rides/{ride_id}/position", post(report_position))
        .route("/v1/rides/{ride_id}/cancel", post(cancel))
        .route("/v1/rides/{ride_id}/safety/check", post(trigger_safety_check))
        .route("/v1/rides/{ride_id}/safety/respond", post(respond_safety))
}

fn forbidden(caller: &Caller, what: &str) -> AppError {
    AppError::Forbidden(format!("{} callers cannot {what}", caller.role))
}

// ─── Reads ───────────────────────────────────────────────────────────

async fn view_ride(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
) -> Result<Json<RideView>, AppError> {
    let g = &state.gateways;
    let caller = &id.caller;
    let view = match caller.role {
        Role::Rider => g.rider.view(caller, ride_id)?,
        Role::Driver => g.driver.view(caller, ride_id)?,
        Role::System => g.operations.view(caller, ride_id)?,
    };
    Ok(Json(view))
}

async fn current_ride(
    State(state): State<AppState>,
    id: CallerIdentity,
) -> Result<Json<CurrentRide>, AppError> {
    let g = &state.gateways;
    let caller = &id.caller;
    let ride = match caller.role {
        Role::Rider => g.rider.current(caller)?,
        Role::Driver => g.driver.current(caller)?,
        Role::System => return Err(forbidden(caller, "hold a current ride")),
    };
    Ok(Json(CurrentRide { ride }))
}

async fn open_rides(
    State(state): State<AppState>,
    id: CallerIdentity,
) -> Result<Json<OpenRides>, AppError> {
    let g = &state.gateways;
    let caller = &id.caller;
    let rides = match caller.role {
        Role::Driver => g.driver.open_rides(caller)?,
        Role::System => g.operations.open_rides(caller)?,
        Role::Rider => return Err(forbidden(caller, "browse open rides")),
    };
    Ok(Json(OpenRides { rides }))
}

// ─── Rider ───────────────────────────────────────────────────────────

async fn request_ride(
    State(state): State<AppState>,
    id: CallerIdentity,
    ValidatedJson(request): ValidatedJson<RideRequest>,
) -> Result<(StatusCode, Json<CommandOutcome>), AppError> {
    let outcome = state.gateways.rider.request(&id.caller, request, id.command_id)?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

// ─── Driver ──────────────────────────────────────────────────────────

async fn accept(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
    ValidatedJson(driver): ValidatedJson<DriverProfile>,
) -> Outcome {
    Ok(Json(state.gateways.driver.accept(&id.caller, ride_id, driver, id.command_id)?))
}

async fn start_pickup(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.driver.start_pickup(&id.caller, ride_id, id.command_id)?))
}

async fn mark_arrived(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.driver.mark_arrived(&id.caller, ride_id, id.command_id)?))
}

async fn start_waiting(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.driver.start_waiting(&id.caller, ride_id, id.command_id)?))
}

async fn start_trip(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.driver.start_trip(&id.caller, ride_id, id.command_id)?))
}

async fn complete_trip(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.driver.complete_trip(&id.caller, ride_id, id.command_id)?))
}

async fn request_early_end(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
    OptionalJson(body): OptionalJson<PositionBody>,
) -> Outcome {
    Ok(Json(state.gateways.driver.request_early_end(
        &id.caller,
        ride_id,
        body.position,
        id.command_id,
    )?))
}

async fn report_position(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
    OptionalJson(body): OptionalJson<PositionBody>,
) -> Outcome {
    Ok(Json(state.gateways.driver.report_position(
        &id.caller,
        ride_id,
        body.position,
        id.command_id,
    )?))
}

// ─── System ──────────────────────────────────────────────────────────

async fn begin_matching(State(state): State<AppState>, id: CallerIdentity, RidePath(ride_id): RidePath) -> Outcome {
    Ok(Json(state.gateways.operations.begin_matching(&id.caller, ride_id, id.command_id)?))
}

// ─── Any party ───────────────────────────────────────────────────────

async fn cancel(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
    OptionalJson(request): OptionalJson<CancelRequest>,
) -> Outcome {
    let g = &state.gateways;
    let (caller, cmd) = (&id.caller, id.command_id);
    let outcome = match caller.role {
        Role::Rider => g.rider.cancel(caller, ride_id, request, cmd)?,
        Role::Driver => g.driver.cancel(caller, ride_id, request, cmd)?,
        Role::System => g.operations.cancel(caller, ride_id, request, cmd)?,
    };
    Ok(Json(outcome))
}

async fn trigger_safety_check(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
) -> Outcome {
    let g = &state.gateways;
    let (caller, cmd) = (&id.caller, id.command_id);
    let outcome = match caller.role {
        Role::Rider => g.rider.trigger_safety_check(caller, ride_id, cmd)?,
        Role::Driver => g.driver.trigger_safety_check(caller, ride_id, cmd)?,
        Role::System => g.operations.trigger_safety_check(caller, ride_id, cmd)?,
    };
    Ok(Json(outcome))
}

async fn respond_safety(
    State(state): State<AppState>,
    id: CallerIdentity,
    RidePath(ride_id): RidePath,
    ValidatedJson(body): ValidatedJson<SafetyRespondBody>,
) -> Outcome {
    let g = &state.gateways;
    let (caller, cmd) = (&id.caller, id.command_id);
    let outcome = match caller.role {
        Role::Rider => g.rider.respond_safety(caller, ride_id, body.response, cmd)?,
        Role::Driver => g.driver.respond_safety(caller, ride_id, body.response, cmd)?,
        Role::System => g.operations.respond_safety(caller, ride_id, body.response, cmd)?,
    };
    Ok(Json(outcome))
}
