//! # ride-api: HTTP Transport for the Ride Lifecycle Orchestrator
//!
//! Exposes the rider, driver and operations gateways and the role-scoped
//! read surface over Axum. Handlers carry no business logic: they extract
//! the caller, pick the gateway for the caller's role, and map errors.
//!
//! ## API Surface
//!
//! | Prefix                    | Module               | Callers                 |
//! |---------------------------|----------------------|-------------------------|
//! | `/v1/rides`               | [`routes::rides`]    | rider, driver, system   |
//! | `/v1/ops/*`               | [`routes::operations`] | system                |
//! | `/health/*`, `/metrics`   | this module          | unauthenticated         |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use state::{AppConfig, AppState};

/// Assemble the application router.
///
/// Health probes and `/metrics` sit outside the auth middleware so they stay
/// reachable without credentials.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::rides::router())
        .merge(routes::operations::router())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// Liveness probe: the process is up.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: the dispatch worker is still consuming events.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if !state.orchestrator.dispatch().is_open() {
        return (StatusCode::SERVICE_UNAVAILABLE, "dispatch worker stopped").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}

/// GET /metrics: Prometheus text exposition.
///
/// Ride gauges are refreshed from the orchestrator on each scrape.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let Some(handle) = &state.prometheus else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics exporter not installed").into_response();
    };
    metrics::gauge!("rides_active").set(state.orchestrator.active_rides() as f64);
    metrics::gauge!("ride_dead_letters")
        .set(state.orchestrator.dispatch().dead_letters().len() as f64);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
