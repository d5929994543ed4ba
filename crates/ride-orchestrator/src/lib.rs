//! # ride-orchestrator: Ride Lifecycle Orchestrator
//!
//! Wraps the pure `ride-state` domain with everything needed to run it as a
//! service: per-ride locking, role gateways, idempotent commands, and
//! asynchronous delivery to the fare, notification, and trip-history
//! collaborators.
//!
//! ## Concurrency
//!
//! Each ride sits behind its own mutex inside a sharded map. Commands on the
//! same ride are serialized (two drivers racing to accept: exactly one wins,
//! the other gets `ALREADY_ACCEPTED`); commands on different rides never
//! contend. Reads take the same per-ride lock briefly and have no side
//! effects.
//!
//! ## Delivery
//!
//! Side effects are queued as [`events::RideEvent`]s after the ride commits
//! and delivered by a [`dispatch::DispatchWorker`] with retry, event-id
//! deduplication, and a dead-letter queue. A failed delivery never rolls
//! back a ride.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod orchestrator;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CollaboratorError, Collaborators, FareCalculator, InMemoryTripArchive, Notifier, RecordingFareCalculator,
    RecordingNotifier, TripArchive,
};
pub use config::{ConfigError, OrchestratorConfig, RetryPolicy};
pub use dispatch::{DeadLetter, DispatchQueue, DispatchWorker};
pub use error::OrchestratorError;
pub use events::{Notification, NotificationChannel, NotificationTopic, RideEvent, RideEventKind};
pub use gateway::{DriverGateway, Gateways, OperationsGateway, RiderGateway};
pub use orchestrator::{CommandOutcome, Orchestrator, SweepReport};
pub use registry::{Admission, RideRegistry};
