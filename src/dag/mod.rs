// src/dag/mod.rs

//! Graph data model and analysis.
//!
//! - [`expr`] holds the boolean dependency-expression algebra.
//! - [`node`] defines task nodes, their gates and the argument bags handed to
//!   task and compensation functions.
//! - [`graph`] detects cycles, computes layers and decides whether a graph
//!   may run on a bounded pool.

pub mod expr;
pub mod graph;
pub mod node;

pub use expr::{DependencyExpr, DependencyFlags};
pub use graph::{DependencyGraph, Layering};
pub use node::{Gate, TaskArgs, TaskFn, TaskNode, UndoArgs, UndoFn};
