// src/engine/mod.rs

//! Run orchestration.
//!
//! - [`controller`] owns the graph and exposes the build API plus the two run
//!   strategies.
//! - [`runner`] derives per-run state and implements the node body and the
//!   termination wait.
//! - [`aggregate`] holds the error lists and the compensation stack shared by
//!   every node of a run.
//! - [`message`] is the completion notice passed between nodes.

pub mod aggregate;
pub mod controller;
pub mod message;
pub(crate) mod runner;

pub use aggregate::{CancelList, ErrorList, ErrorMessage, StateMessage, UndoEntry, UndoStack};
pub use controller::{Controller, TaskHandle, Topology, TopologyEntry};
pub use message::Message;
