//! # Integration Tests for ride-api
//!
//! Drives the router with `oneshot`: health probes, bearer auth, identity
//! headers, the full ride lifecycle over HTTP, error status mapping, and
//! command replay through the idempotency key.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use ride_api::auth::SecretToken;
use ride_api::{AppConfig, AppState};
use ride_orchestrator::{Collaborators, DispatchWorker, Orchestrator, OrchestratorConfig, SystemClock};

struct TestApp {
    router: axum::Router,
    // Held so the dispatch queue stays open.
    _worker: DispatchWorker,
}

impl TestApp {
    fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    fn with_token(token: &str) -> Self {
        Self::with_config(AppConfig {
            auth_token: Some(SecretToken::new(token)),
        })
    }

    fn with_config(config: AppConfig) -> Self {
        let (orchestrator, worker) = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(SystemClock),
            Collaborators::in_memory(),
        );
        let state = AppState::with_config(Arc::new(orchestrator), config);
        Self {
            router: ride_api::app(state),
            _worker: worker,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = body_string(response).await;
        let value = serde_json::from_str(&body).unwrap_or(Value::String(body));
        (status, value)
    }
}

struct Actor {
    role: &'static str,
    id: String,
}

impl Actor {
    fn new(role: &'static str) -> Self {
        Self {
            role,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn get(&self, uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-actor-role", self.role)
            .header("x-actor-id", &self.id)
            .body(Body::empty())
            .unwrap()
    }

    fn post(&self, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-actor-role", self.role)
            .header("x-actor-id", &self.id);
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn ride_request() -> Value {
    json!({
        "pickup": { "address": "14 Canal St" },
        "dropoff": { "address": "North Terminal" },
        "passenger_count": 2,
        "rider": { "display_name": "Mara", "phone": "+15550111", "rating": 4.6 }
    })
}

fn driver_profile() -> Value {
    json!({
        "display_name": "Joao",
        "phone": "+15550177",
        "vehicle": "Red Civic",
        "license_plate": "TX-5521"
    })
}

async fn requested_ride(app: &TestApp, rider: &Actor) -> String {
    let (status, body) = app.send(rider.post("/v1/rides", Some(ride_request()))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["view"]["ride_id"].as_str().unwrap().to_string()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn liveness_and_readiness() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::builder().uri("/health/liveness").body(Body::empty()).unwrap())
        .await;
    assert_eq!((status, body), (StatusCode::OK, json!("ok")));

    let (status, body) = app
        .send(Request::builder().uri("/health/readiness").body(Body::empty()).unwrap())
        .await;
    assert_eq!((status, body), (StatusCode::OK, json!("ready")));
}

#[tokio::test]
async fn readiness_fails_once_the_worker_is_gone() {
    let TestApp { router, _worker } = TestApp::new();
    drop(_worker);
    let response = router
        .oneshot(Request::builder().uri("/health/readiness").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_without_exporter_is_unavailable() {
    let app = TestApp::new();
    let (status, _) = app
        .send(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn bearer_token_is_enforced_on_v1_only() {
    let app = TestApp::with_token("s3cret");
    let rider = Actor::new("rider");

    let (status, body) = app.send(rider.get("/v1/rides/current")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");

    let mut wrong = rider.get("/v1/rides/current");
    wrong
        .headers_mut()
        .insert("authorization", "Bearer nope".parse().unwrap());
    assert_eq!(app.send(wrong).await.0, StatusCode::UNAUTHORIZED);

    let mut right = rider.get("/v1/rides/current");
    right
        .headers_mut()
        .insert("authorization", "Bearer s3cret".parse().unwrap());
    let (status, body) = app.send(right).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ride": null }));

    let (status, _) = app
        .send(Request::builder().uri("/health/liveness").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_identity_is_401() {
    let app = TestApp::new();
    let request = Request::builder()
        .method("POST")
        .uri("/v1/rides")
        .header("content-type", "application/json")
        .body(Body::from(ride_request().to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

// -- Lifecycle ----------------------------------------------------------------

#[tokio::test]
async fn full_trip_over_http() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let system = Actor::new("system");
    let id = requested_ride(&app, &rider).await;
    let base = format!("/v1/rides/{id}");

    let (status, body) = app.send(system.post(&format!("{base}/matching"), None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["status"], "matching");

    let (status, body) = app.send(driver.get("/v1/rides/open")).await;
    assert_eq!(status, StatusCode::OK);
    let open = body["rides"].as_array().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["audience"], "driver");
    assert!(open[0]["rider"].get("phone").is_none());

    let (status, body) = app
        .send(driver.post(&format!("{base}/accept"), Some(driver_profile())))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["status"], "accepted");
    assert_eq!(body["view"]["rider"]["phone"], "+15550111");

    for (step, expected) in [
        ("start-pickup", "driver_en_route"),
        ("arrive", "arrived"),
        ("start-waiting", "waiting"),
        ("start-trip", "in_progress"),
    ] {
        let (status, body) = app.send(driver.post(&format!("{base}/{step}"), None)).await;
        assert_eq!(status, StatusCode::OK, "{step}: {body}");
        assert_eq!(body["view"]["status"], expected);
    }

    let (status, body) = app
        .send(driver.post(
            &format!("{base}/position"),
            Some(json!({ "position": { "address": "Ring Rd" } })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["view"]["last_movement_at"].is_string());

    let (status, body) = app.send(rider.get(&base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audience"], "rider");
    assert_eq!(body["driver"]["license_plate"], "TX-5521");
    // Riders cannot cancel once the trip is under way.
    assert_eq!(body["can_cancel"], false);

    let (status, body) = app.send(driver.post(&format!("{base}/complete"), None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["status"], "completed");

    let (status, body) = app.send(rider.get("/v1/rides/current")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ride"], Value::Null);
}

#[tokio::test]
async fn early_end_without_body() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let id = requested_ride(&app, &rider).await;
    let base = format!("/v1/rides/{id}");
    app.send(driver.post(&format!("{base}/accept"), Some(driver_profile()))).await;
    for step in ["start-pickup", "arrive", "start-trip"] {
        assert_eq!(app.send(driver.post(&format!("{base}/{step}"), None)).await.0, StatusCode::OK);
    }

    let (status, body) = app.send(driver.post(&format!("{base}/early-end"), None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["status"], "completed");
    assert!(body["view"]["early_end"].is_object());

    let (_, body) = app.send(rider.get(&base)).await;
    assert_eq!(body["early_end"], true);
}

// -- Error mapping ------------------------------------------------------------

#[tokio::test]
async fn second_driver_gets_409() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let id = requested_ride(&app, &rider).await;
    let accept = format!("/v1/rides/{id}/accept");

    let first = Actor::new("driver");
    assert_eq!(app.send(first.post(&accept, Some(driver_profile()))).await.0, StatusCode::OK);

    let second = Actor::new("driver");
    let (status, body) = app.send(second.post(&accept, Some(driver_profile()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ALREADY_ACCEPTED");
}

#[tokio::test]
async fn wrong_role_or_owner_is_403() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let id = requested_ride(&app, &rider).await;

    let (status, body) = app.send(rider.post(&format!("/v1/rides/{id}/start-trip"), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let stranger = Actor::new("rider");
    let (status, _) = app.send(stranger.get(&format!("/v1/rides/{id}"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send(rider.get("/v1/rides/open")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn invalid_transition_is_409() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let id = requested_ride(&app, &rider).await;
    app.send(driver.post(&format!("/v1/rides/{id}/accept"), Some(driver_profile()))).await;

    let (status, body) = app.send(driver.post(&format!("/v1/rides/{id}/start-trip"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn in_progress_cancel_needs_a_reason() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let id = requested_ride(&app, &rider).await;
    let base = format!("/v1/rides/{id}");
    app.send(driver.post(&format!("{base}/accept"), Some(driver_profile()))).await;
    for step in ["start-pickup", "arrive", "start-trip"] {
        app.send(driver.post(&format!("{base}/{step}"), None)).await;
    }

    let (status, body) = app.send(rider.post(&format!("{base}/cancel"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, body) = app.send(driver.post(&format!("{base}/cancel"), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "MISSING_REASON");

    let (status, body) = app
        .send(driver.post(
            &format!("{base}/cancel"),
            Some(json!({ "reason": "vehicle_issue", "note": "flat tyre" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["status"], "cancelled");
    assert_eq!(body["view"]["cancellation"]["by"], "driver");
    assert_eq!(body["view"]["cancellation"]["reason"], "vehicle_issue");
}

#[tokio::test]
async fn driver_cancel_reasons_come_from_the_driver_set() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let id = requested_ride(&app, &rider).await;
    let base = format!("/v1/rides/{id}");
    app.send(driver.post(&format!("{base}/accept"), Some(driver_profile()))).await;

    let (status, body) = app
        .send(driver.post(&format!("{base}/cancel"), Some(json!({ "reason": "driver_delayed" }))))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");

    let (status, body) = app
        .send(driver.post(&format!("{base}/cancel"), Some(json!({ "reason": "unsafe_location" }))))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["cancellation"]["reason"], "unsafe_location");
    assert_eq!(body["view"]["cancellation"]["compensation_eligible"], false);
}

#[tokio::test]
async fn open_rides_show_the_matching_expiry() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let system = Actor::new("system");
    let id = requested_ride(&app, &rider).await;

    let (_, body) = app.send(driver.get("/v1/rides/open")).await;
    let listed = body["rides"].as_array().unwrap();
    let ride = listed.iter().find(|r| r["ride_id"] == id.as_str()).unwrap();
    assert!(ride["matching_expires_at"].is_null());

    let (status, _) = app.send(system.post(&format!("/v1/rides/{id}/matching"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = app.send(driver.get("/v1/rides/open")).await;
    let listed = body["rides"].as_array().unwrap();
    let ride = listed.iter().find(|r| r["ride_id"] == id.as_str()).unwrap();
    assert_eq!(ride["status"], "matching");
    assert!(ride["matching_expires_at"].is_string());
}

#[tokio::test]
async fn unknown_ride_and_bad_input() {
    let app = TestApp::new();
    let rider = Actor::new("rider");

    let (status, body) = app
        .send(rider.get(&format!("/v1/rides/{}", uuid::Uuid::new_v4())))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = app.send(rider.get("/v1/rides/not-a-uuid")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = app
        .send(rider.post("/v1/rides", Some(json!({ "pickup": "nowhere" }))))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let mut zero = ride_request();
    zero["passenger_count"] = json!(0);
    let (status, body) = app.send(rider.post("/v1/rides", Some(zero))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

// -- Safety and replay --------------------------------------------------------

#[tokio::test]
async fn need_help_escalates_without_changing_status() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let driver = Actor::new("driver");
    let id = requested_ride(&app, &rider).await;
    let base = format!("/v1/rides/{id}");
    app.send(driver.post(&format!("{base}/accept"), Some(driver_profile()))).await;

    let (status, body) = app.send(rider.post(&format!("{base}/safety/check"), None)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["safety"]["state"], "pending");

    let (status, body) = app
        .send(rider.post(
            &format!("{base}/safety/respond"),
            Some(json!({ "response": "need_help" })),
        ))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["view"]["safety"]["state"], "escalated");
    assert_eq!(body["view"]["status"], "accepted");

    let (status, body) = app
        .send(driver.post(
            &format!("{base}/safety/respond"),
            Some(json!({ "response": "safe" })),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn idempotency_key_replays() {
    let app = TestApp::new();
    let rider = Actor::new("rider");
    let key = uuid::Uuid::new_v4().to_string();

    let mut first = rider.post("/v1/rides", Some(ride_request()));
    first.headers_mut().insert("idempotency-key", key.parse().unwrap());
    let (status, a) = app.send(first).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(a["replayed"], false);

    let mut again = rider.post("/v1/rides", Some(ride_request()));
    again.headers_mut().insert("idempotency-key", key.parse().unwrap());
    let (status, b) = app.send(again).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(b["replayed"], true);
    assert_eq!(a["view"]["ride_id"], b["view"]["ride_id"]);
}

// -- Operations ---------------------------------------------------------------

#[tokio::test]
async fn operations_routes_are_system_only() {
    let app = TestApp::new();
    let system = Actor::new("system");
    let driver = Actor::new("driver");

    let (status, body) = app.send(system.post("/v1/ops/sweep", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stalls_raised"], 0);

    let (status, body) = app.send(system.get("/v1/ops/dead-letters")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dead_letters"], json!([]));

    let (status, body) = app.send(driver.post("/v1/ops/dead-letters/redrive", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}
