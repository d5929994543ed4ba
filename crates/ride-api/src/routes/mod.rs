//! # Route Modules
//!
//! Each module defines an Axum Router for one API surface area. They are
//! merged in [`crate::app`].

pub mod operations;
pub mod rides;
