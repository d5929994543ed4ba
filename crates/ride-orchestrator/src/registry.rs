//! # Ride Registry
//!
//! In-memory ride storage with one lock per ride. The map itself is a
//! sharded `DashMap`; each entry is an `Arc<Mutex<RideSlot>>`, so a command
//! on ride A never waits on ride B, and commands on the same ride are
//! serialized. Map guards are released before a slot is locked.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use ride_core::{CommandId, RideId, UserId};
use ride_state::{Ride, RideError};

use crate::error::OrchestratorError;

/// A ride plus the command ids already applied to it.
#[derive(Debug)]
pub struct RideSlot {
    pub ride: Ride,
    applied: HashSet<CommandId>,
}

impl RideSlot {
    fn new(ride: Ride) -> Self {
        Self {
            ride,
            applied: HashSet::new(),
        }
    }

    pub fn has_applied(&self, id: &CommandId) -> bool {
        self.applied.contains(id)
    }

    pub fn mark_applied(&mut self, id: CommandId) {
        self.applied.insert(id);
    }
}

pub type SharedSlot = Arc<Mutex<RideSlot>>;

/// Outcome of [`RideRegistry::insert`].
#[derive(Debug)]
pub enum Admission {
    Created(SharedSlot),
    /// The request key was already claimed by this ride.
    Replayed(SharedSlot),
}

#[derive(Debug, Default)]
pub struct RideRegistry {
    rides: DashMap<RideId, SharedSlot>,
    /// Each user's non-terminal ride, as rider or driver.
    active_by_user: DashMap<UserId, RideId>,
    /// Ride created by each request command id.
    requests: DashMap<CommandId, RideId>,
    active_count: AtomicI64,
}

impl RideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly requested ride. A rider may hold one non-terminal
    /// ride at a time.
    ///
    /// When `command_id` is given, the request key is claimed in the same
    /// step: a concurrent request with the same key gets the ride that won
    /// the claim back as [`Admission::Replayed`] and `ride` is discarded.
    pub fn insert(&self, ride: Ride, command_id: Option<CommandId>) -> Result<Admission, OrchestratorError> {
        let Some(cmd) = command_id else {
            return self.admit(ride).map(Admission::Created);
        };
        // Lock order: requests, then active_by_user, then rides.
        match self.requests.entry(cmd) {
            Entry::Occupied(claimed) => self.get(*claimed.get()).map(Admission::Replayed),
            Entry::Vacant(claim) => {
                let id = ride.id();
                let shared = self.admit(ride)?;
                claim.insert(id);
                Ok(Admission::Created(shared))
            }
        }
    }

    fn admit(&self, ride: Ride) -> Result<SharedSlot, OrchestratorError> {
        let id = ride.id();
        match self.active_by_user.entry(ride.rider_id()) {
            Entry::Occupied(existing) => {
                return Err(RideError::InvalidRequest(format!(
                    "rider already has an active ride {}",
                    existing.get()
                ))
                .into());
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        let shared = Arc::new(Mutex::new(RideSlot::new(ride)));
        self.rides.insert(id, Arc::clone(&shared));
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Ok(shared)
    }

    pub fn get(&self, id: RideId) -> Result<SharedSlot, OrchestratorError> {
        self.rides
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(OrchestratorError::NotFound(id))
    }

    /// Clone of the ride's current state.
    pub fn snapshot(&self, id: RideId) -> Result<Ride, OrchestratorError> {
        Ok(self.get(id)?.lock().ride.clone())
    }

    /// Ride previously created by `command_id`.
    pub fn ride_for_request(&self, command_id: &CommandId) -> Option<RideId> {
        self.requests.get(command_id).map(|r| *r.value())
    }

    pub fn active_ride_for(&self, user: UserId) -> Option<RideId> {
        self.active_by_user.get(&user).map(|r| *r.value())
    }

    /// Record that `driver` now holds `ride`.
    pub fn assign_driver(&self, driver: UserId, ride: RideId) {
        self.active_by_user.insert(driver, ride);
    }

    /// Drop index entries once `ride` reaches a terminal status.
    pub fn release(&self, ride: &Ride) {
        let id = ride.id();
        self.active_by_user.remove_if(&ride.rider_id(), |_, r| *r == id);
        if let Some(driver) = ride.driver_id() {
            self.active_by_user.remove_if(&driver, |_, r| *r == id);
        }
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of non-terminal rides.
    pub fn active_count(&self) -> i64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// All slots, for sweeps and listings. Locks nothing.
    pub fn slots(&self) -> Vec<SharedSlot> {
        self.rides.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.rides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rides.is_empty()
    }
}
