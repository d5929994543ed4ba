//! # External Collaborators
//!
//! The orchestrator depends on three external systems, each behind an
//! object-safe `Send + Sync` trait so deployments can choose an
//! implementation at runtime and share it behind an `Arc`:
//!
//! - [`FareCalculator`]: prices a completed ride.
//! - [`Notifier`]: delivers status announcements and safety alerts.
//! - [`TripArchive`]: durable trip history for terminal rides.
//!
//! The in-memory implementations here record every call. Tests and the
//! development server use them; they can be told to fail a number of
//! times to exercise retry and dead-letter paths.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use ride_core::{RideId, Timestamp};
use ride_state::{FareOverride, FareResult, Ride};
use thiserror::Error;

use crate::events::Notification;

/// Flat fare used when a ride carries no estimate.
const DEFAULT_FARE_MINOR: i64 = 1_500;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Transient failure; worth retrying.
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable {
        collaborator: &'static str,
        reason: String,
    },

    /// The collaborator refused the request.
    #[error("{collaborator} rejected the request: {reason}")]
    Rejected {
        collaborator: &'static str,
        reason: String,
    },
}

pub trait FareCalculator: Send + Sync {
    /// Compute the final fare for a completed ride.
    fn compute_fare(&self, ride: &Ride, fare_override: &FareOverride) -> Result<FareResult, CollaboratorError>;
}

pub trait Notifier: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

pub trait TripArchive: Send + Sync {
    /// Store a terminal snapshot. Archiving the same ride twice overwrites.
    fn archive(&self, ride: &Ride) -> Result<(), CollaboratorError>;
}

/// The collaborator set handed to the dispatcher.
#[derive(Clone)]
pub struct Collaborators {
    pub fare: Arc<dyn FareCalculator>,
    pub notifier: Arc<dyn Notifier>,
    pub archive: Arc<dyn TripArchive>,
}

impl Collaborators {
    /// All in-memory implementations.
    pub fn in_memory() -> Self {
        Self {
            fare: Arc::new(RecordingFareCalculator::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            archive: Arc::new(InMemoryTripArchive::default()),
        }
    }
}

/// Consume one pending injected failure, if any.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Prices the estimate (or a flat fare) and records each call.
#[derive(Debug, Default)]
pub struct RecordingFareCalculator {
    calls: Mutex<Vec<(RideId, FareOverride)>>,
    failures: AtomicU32,
}

impl RecordingFareCalculator {
    /// Fail the next `n` calls.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(RideId, FareOverride)> {
        self.calls.lock().clone()
    }
}

impl FareCalculator for RecordingFareCalculator {
    fn compute_fare(&self, ride: &Ride, fare_override: &FareOverride) -> Result<FareResult, CollaboratorError> {
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Unavailable {
                collaborator: "fare",
                reason: "injected failure".into(),
            });
        }
        self.calls.lock().push((ride.id(), fare_override.clone()));
        let (amount_minor, currency) = match &ride.fare().estimate {
            Some(e) => (e.amount_minor, e.currency.clone()),
            None => (DEFAULT_FARE_MINOR, "USD".to_string()),
        };
        Ok(FareResult {
            amount_minor,
            currency,
            basis: fare_override.basis(),
            computed_at: Timestamp::now(),
            reference: Some(format!("fare-{}", ride.id().as_uuid())),
        })
    }
}

/// Records delivered notifications.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Notification>>,
    failures: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingNotifier {
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }

    /// Calls made, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Unavailable {
                collaborator: "notifier",
                reason: "injected failure".into(),
            });
        }
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTripArchive {
    trips: DashMap<RideId, Ride>,
}

impl InMemoryTripArchive {
    pub fn get(&self, id: &RideId) -> Option<Ride> {
        self.trips.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }
}

impl TripArchive for InMemoryTripArchive {
    fn archive(&self, ride: &Ride) -> Result<(), CollaboratorError> {
        if !ride.is_terminal() {
            return Err(CollaboratorError::Rejected {
                collaborator: "archive",
                reason: format!("ride {} is {}, not terminal", ride.id(), ride.status()),
            });
        }
        self.trips.insert(ride.id(), ride.clone());
        Ok(())
    }
}
