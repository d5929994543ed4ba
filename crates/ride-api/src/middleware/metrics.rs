//! # HTTP Metrics
//!
//! Request counters and latency histograms recorded through the `metrics`
//! facade. The path label is the matched route template (`/v1/rides/{ride_id}`),
//! never the raw URI, so ride ids do not explode label cardinality.
//!
//! Ride-level gauges (`rides_active`, `ride_dead_letters`) are refreshed on
//! each `/metrics` scrape; see [`crate::app`].

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Label used when no route matched.
const UNMATCHED: &str = "unmatched";

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = route_label(request.extensions().get::<MatchedPath>());
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let elapsed = start.elapsed().as_secs_f64();
    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!("http_request_duration_seconds", "method" => method, "path" => path)
        .record(elapsed);

    response
}

fn route_label(matched: Option<&MatchedPath>) -> String {
    matched.map_or_else(|| UNMATCHED.to_string(), |m| m.as_str().to_string())
}
