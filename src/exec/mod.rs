// src/exec/mod.rs

//! Execution layer for pool-bounded runs.
//!
//! - [`pool`] provides the `TaskPool` trait plus the `UnboundedPool` and
//!   `BoundedPool` implementations. The controller submits node bodies to a
//!   pool and never cares how they are scheduled.

pub mod pool;

pub use pool::{BoundedPool, TaskPool, UnboundedPool, WorkItem};
