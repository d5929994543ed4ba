//! # Event Dispatch
//!
//! Committed commands enqueue [`RideEvent`]s on an unbounded channel; a
//! single [`DispatchWorker`] delivers them to the collaborators. Delivery is
//! at-least-once with idempotent consumption:
//!
//! - every collaborator call is retried with exponential backoff;
//! - an event id is delivered at most once per worker, so replays are skipped;
//! - an event that exhausts its retries lands in the dead-letter queue with
//!   its error, and stays there until [`DispatchQueue::redrive_dead_letters`];
//! - follow-up work a delivery produces (archival after the fare write-back)
//!   is handled by the worker before it takes the next queued event, so it
//!   survives the channel closing during shutdown.
//!
//! `Archive` is the last event of a ride. Once it is delivered the ride's
//! delivered ids are released, which keeps the dedupe set bounded by the
//! number of rides still in flight.
//!
//! Enqueueing never blocks, so a command never waits on a collaborator, and
//! a failed delivery never rolls back the ride.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use ride_core::{EventId, RideId, Timestamp};
use ride_state::FareOverride;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::collaborators::{CollaboratorError, Collaborators};
use crate::config::RetryPolicy;
use crate::error::OrchestratorError;
use crate::events::{RideEvent, RideEventKind};
use crate::registry::RideRegistry;

/// An event that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub event: RideEvent,
    pub error: String,
    pub attempts: u32,
    pub failed_at: Timestamp,
}

#[derive(Debug, Default)]
struct Shared {
    /// Delivered event ids, per ride, until the ride is archived.
    processed: Mutex<HashMap<RideId, HashSet<EventId>>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<RideEvent>,
    shared: Arc<Shared>,
}

impl DispatchQueue {
    pub fn enqueue(&self, event: RideEvent) {
        let event_id = event.event_id;
        if self.tx.send(event).is_err() {
            tracing::error!(%event_id, "dispatch worker has stopped, event not queued");
            metrics::counter!("ride_dispatch_failures_total", "kind" => "queue_closed").increment(1);
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().clone()
    }

    /// Re-enqueue every dead letter. Returns how many were re-queued.
    pub fn redrive_dead_letters(&self) -> usize {
        let letters: Vec<DeadLetter> = std::mem::take(&mut *self.shared.dead_letters.lock());
        let count = letters.len();
        for letter in letters {
            tracing::info!(
                event_id = %letter.event.event_id,
                kind = letter.event.kind.label(),
                "redriving dead letter"
            );
            self.enqueue(letter.event);
        }
        count
    }

    /// False once the worker has been dropped.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Whether `event_id` has been delivered and its ride is not yet archived.
    pub fn is_processed(&self, event_id: &EventId) -> bool {
        self.shared.processed.lock().values().any(|ids| ids.contains(event_id))
    }

    /// Delivered event ids still held for dedupe.
    pub fn tracked_events(&self) -> usize {
        self.shared.processed.lock().values().map(HashSet::len).sum()
    }
}

/// Consumer side.
pub struct DispatchWorker {
    rx: mpsc::UnboundedReceiver<RideEvent>,
    follow_ups: Mutex<VecDeque<RideEvent>>,
    shared: Arc<Shared>,
    registry: Arc<RideRegistry>,
    collaborators: Collaborators,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

/// Create a connected queue and worker.
pub fn channel(
    registry: Arc<RideRegistry>,
    collaborators: Collaborators,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
) -> (DispatchQueue, DispatchWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    let worker = DispatchWorker {
        rx,
        follow_ups: Mutex::new(VecDeque::new()),
        shared: Arc::clone(&shared),
        registry,
        collaborators,
        retry,
        clock,
    };
    (DispatchQueue { tx, shared }, worker)
}

impl DispatchWorker {
    /// Deliver events until every producer is dropped.
    pub async fn run(mut self) {
        tracing::info!("dispatch worker started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
        tracing::info!("dispatch worker stopped");
    }

    /// Deliver everything queued right now, including follow-up events the
    /// deliveries themselves enqueue. Returns the number of events handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            handled += self.handle(event).await;
        }
        handled
    }

    /// Process `event` and every follow-up it produces.
    async fn handle(&self, event: RideEvent) -> usize {
        self.process(event).await;
        let mut handled = 1;
        loop {
            let next = self.follow_ups.lock().pop_front();
            let Some(next) = next else { break };
            self.process(next).await;
            handled += 1;
        }
        handled
    }

    async fn process(&self, event: RideEvent) {
        let seen = self
            .shared
            .processed
            .lock()
            .get(&event.ride_id)
            .is_some_and(|ids| ids.contains(&event.event_id));
        if seen {
            tracing::debug!(event_id = %event.event_id, "duplicate event skipped");
            return;
        }
        let label = event.kind.label();
        match self.deliver(&event).await {
            Ok(()) => {
                self.mark_delivered(&event);
                tracing::debug!(event_id = %event.event_id, ride_id = %event.ride_id, kind = label, "event delivered");
            }
            Err(err) => {
                let (attempts, reason) = match &err {
                    OrchestratorError::DeliveryFailed { attempts, reason, .. } => (*attempts, reason.clone()),
                    other => (1, other.to_string()),
                };
                tracing::error!(
                    event_id = %event.event_id,
                    ride_id = %event.ride_id,
                    kind = label,
                    attempts,
                    "event moved to dead-letter queue: {err}"
                );
                metrics::counter!("ride_dispatch_failures_total", "kind" => label).increment(1);
                self.shared.dead_letters.lock().push(DeadLetter {
                    event,
                    error: reason,
                    attempts,
                    failed_at: self.clock.now(),
                });
            }
        }
    }

    fn mark_delivered(&self, event: &RideEvent) {
        let mut processed = self.shared.processed.lock();
        if matches!(event.kind, RideEventKind::Archive) {
            processed.remove(&event.ride_id);
        } else {
            processed.entry(event.ride_id).or_default().insert(event.event_id);
        }
    }

    async fn deliver(&self, event: &RideEvent) -> Result<(), OrchestratorError> {
        match &event.kind {
            RideEventKind::Notify(notification) => {
                let notifier = Arc::clone(&self.collaborators.notifier);
                self.with_retry(event, || notifier.deliver(notification)).await
            }
            RideEventKind::FinalizeFare { fare_override } => self.finalize_fare(event, fare_override).await,
            RideEventKind::Archive => {
                let ride = self.registry.snapshot(event.ride_id)?;
                let archive = Arc::clone(&self.collaborators.archive);
                self.with_retry(event, || archive.archive(&ride)).await
            }
        }
    }

    /// Price the ride, write the result back once, then queue archival.
    async fn finalize_fare(&self, event: &RideEvent, fare_override: &FareOverride) -> Result<(), OrchestratorError> {
        let ride = self.registry.snapshot(event.ride_id)?;
        if ride.fare().is_finalized() {
            return Ok(());
        }
        let fare = Arc::clone(&self.collaborators.fare);
        let result = self.with_retry(event, || fare.compute_fare(&ride, fare_override)).await?;
        let recorded = self.registry.get(event.ride_id)?.lock().ride.record_fare(result);
        if recorded {
            tracing::info!(ride_id = %event.ride_id, "final fare recorded");
            self.follow_up(event.ride_id, RideEventKind::Archive);
        }
        Ok(())
    }

    fn follow_up(&self, ride_id: RideId, kind: RideEventKind) {
        let event = RideEvent::new(ride_id, self.clock.now(), kind);
        tracing::debug!(event_id = %event.event_id, %ride_id, kind = event.kind.label(), "follow-up queued");
        self.follow_ups.lock().push_back(event);
    }

    /// Call `f` until it succeeds, retrying with backoff.
    async fn with_retry<T, F>(&self, event: &RideEvent, f: F) -> Result<T, OrchestratorError>
    where
        F: Fn() -> Result<T, CollaboratorError>,
    {
        let mut last: Option<CollaboratorError> = None;
        for attempt in 0..=self.retry.max_retries {
            match f() {
                Ok(value) => return Ok(value),
                Err(e @ CollaboratorError::Rejected { .. }) => {
                    return Err(self.failed(event, attempt + 1, &e));
                }
                Err(e) => {
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.delay_for(attempt);
                        tracing::warn!(
                            event_id = %event.event_id,
                            attempt = attempt + 1,
                            max_retries = self.retry.max_retries,
                            "delivery failed, retrying in {delay:?}: {e}"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(e);
                }
            }
        }
        let reason = last.map(|e| e.to_string()).unwrap_or_default();
        Err(OrchestratorError::DeliveryFailed {
            event_id: event.event_id,
            kind: event.kind.label().to_string(),
            attempts: self.retry.max_retries + 1,
            reason,
        })
    }

    fn failed(&self, event: &RideEvent, attempts: u32, err: &CollaboratorError) -> OrchestratorError {
        OrchestratorError::DeliveryFailed {
            event_id: event.event_id,
            kind: event.kind.label().to_string(),
            attempts,
            reason: err.to_string(),
        }
    }
}
