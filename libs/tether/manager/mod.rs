//! # Tether Manager
//!
//! Bookkeeping for many managed connections keyed by id.

pub mod registry;

pub use registry::{ConnectionId, ConnectionRegistry};
