//! Common types for geowatch
//!
//! This crate provides the connection model, geo attribution types and
//! platform abstractions shared by the geowatch library and binary.

pub mod events;
pub mod platform;

pub use events::*;
pub use platform::*;
