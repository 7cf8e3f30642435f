//! Projection module
//!
//! Read-model pipeline: consumes committed events in commit-sequence order
//! and maintains the denormalized view tables.

mod runner;

pub use runner::{ProjectionError, ProjectionRunner};
