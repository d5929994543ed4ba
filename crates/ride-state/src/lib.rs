//! # ride-state: Ride Lifecycle Domain
//!
//! Pure, synchronous domain logic for a single ride. Nothing in this crate
//! performs I/O, reads the wall clock, or takes locks: every operation is
//! given the current time and the caller explicitly, which keeps the state
//! machine deterministic and directly testable.
//!
//! ## Components
//!
//! - **Ride State Machine** (`ride.rs`): the aggregate root. Validates a
//!   command against status, role, and ownership, then applies it in one
//!   step. A rejected command leaves the ride untouched.
//!
//! - **Waiting-Compensation Engine** (`waiting.rs`): derives the grace /
//!   paid / bonus / expired phase from checkpoints and the configured
//!   windows. Never stored.
//!
//! - **Safety Escalation Protocol** (`safety.rs`): side-channel state machine
//!   (`idle → pending → resolved_safe | escalated`) that runs alongside the
//!   ride status without gating it.
//!
//! - **Cancellation policy** (`cancellation.rs`): who may cancel when, the
//!   fixed reason set, and the rider fee assessment.
//!
//! - **Ride View Projector** (`projection.rs`): the rider and driver read
//!   views, computed synchronously from the same `Ride` value.
//!
//! ## States
//!
//! ```text
//! requested ─▶ matching ─▶ accepted ─▶ driver_en_route ─▶ arrived ─▶ waiting ─▶ in_progress ─▶ completed
//!     │            │           │              │              │   └──────────────────▲
//!     └────────────┴───────────┴──────────────┴──────────────┴──▶ cancelled ◀── (any non-terminal)
//! ```
//!
//! `requested → accepted` is also valid (a driver may accept before the
//! matching step runs), and `arrived → in_progress` skips the wait.

pub mod cancellation;
pub mod error;
pub mod fare;
pub mod policy;
pub mod projection;
pub mod ride;
pub mod safety;
pub mod waiting;

pub use cancellation::{
    CancelReason, CancelRequest, Cancellation, CancellationAssessment, CancelledBy, DriverMovement,
};
pub use error::RideError;
pub use fare::{Fare, FareBasis, FareEstimate, FareOverride, FareResult};
pub use policy::RidePolicy;
pub use projection::{DriverSummary, DriverView, RideView, RiderSummary, RiderView, RiderWaitingView, SafetyView};
pub use ride::{
    Checkpoints, DriverProfile, EarlyEnd, Ride, RideCommand, RideRequest, RideStatus, RideTransition,
    RideTransitionRecord, RiderProfile,
};
pub use safety::{SafetyCheck, SafetyResponse, SafetyState, SafetyTransition, SafetyTrigger};
pub use waiting::{WaitBreakdown, WaitingPhase, WaitingPolicy, WaitingSnapshot};
