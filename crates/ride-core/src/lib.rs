//! # ride-core: Foundational Types for the Ride Lifecycle Orchestrator
//!
//! This crate is the leaf of the workspace dependency graph. It defines the
//! primitives every other crate shares, so that the state machine, the
//! gateways, and the transport agree on identity and time without
//! re-deriving them.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `RideId`, `UserId`, `CommandId`,
//!    `EventId`. You cannot pass a rider's id where a ride id is expected.
//!
//! 2. **UTC-only timestamps.** `Timestamp` is always UTC, truncated to whole
//!    seconds. Checkpoints, waiting windows, and safety checks all use it.
//!
//! 3. **Explicit caller identity.** Every command carries a `Caller`
//!    (`Role` + `UserId`). Nothing in the workspace reads an ambient session.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `ride-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod location;
pub mod role;
pub mod temporal;

pub use error::CoreError;
pub use identity::{CommandId, EventId, RideId, UserId};
pub use location::{GeoPoint, Location};
pub use role::{Caller, Role};
pub use temporal::Timestamp;
