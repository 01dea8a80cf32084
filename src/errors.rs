// src/errors.rs

//! Crate-wide error types.
//!
//! - [`TccError`] is what controller operations return to the caller.
//! - [`TaskError`] is what task functions return; its variant decides how the
//!   controller classifies the failure.
//! - [`AbortedError`] bundles everything recorded during a failed run.

use std::fmt;

use thiserror::Error;

use crate::engine::aggregate::{ErrorMessage, StateMessage};
use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum TccError {
    #[error("no termination condition has been set")]
    NoTermination,

    #[error("loop dependency detected involving task '{0}'")]
    LoopDependency(String),

    #[error("pool-bounded run unsupported: task '{0}' has a dependency expression that is not a pure conjunction")]
    PoolUnsupported(String),

    #[error("run aborted: {0}")]
    Aborted(#[from] AbortedError),

    #[error("pool submission failed: {0}")]
    Pool(#[from] PoolError),

    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    #[error("dependency expression for '{task}' reads flags owned by another node")]
    ForeignDependency { task: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TccError>;

/// Failure reported by a task function.
///
/// `?` on an `anyhow::Result` inside a task yields [`TaskError::Fatal`].
#[derive(Error, Debug)]
pub enum TaskError {
    /// Recorded, but the run keeps going. Lets an OR-gated dependent still
    /// succeed through another branch.
    #[error("task failed silently: {0}")]
    Silent(anyhow::Error),

    /// The task observed the run's cancellation and stopped; `state` is a
    /// snapshot of how far it got.
    #[error("task cancelled at state: {state}")]
    Cancelled { state: String },

    /// Recorded and cancels the whole run.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl TaskError {
    pub fn silent(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Silent(err.into())
    }

    pub fn cancelled(state: impl fmt::Display) -> Self {
        TaskError::Cancelled {
            state: state.to_string(),
        }
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Fatal(err.into())
    }
}

/// Rejection from a [`crate::exec::TaskPool`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("pool is saturated")]
    Saturated,
}

/// Composite failure returned when a run aborts.
///
/// Holds every task error, every compensation error and every cancelled-state
/// snapshot recorded during the run, in recording order.
#[derive(Debug, Clone, Default)]
pub struct AbortedError {
    pub task_errors: Vec<ErrorMessage>,
    pub undo_errors: Vec<ErrorMessage>,
    pub cancelled: Vec<StateMessage>,
}

impl AbortedError {
    /// Names of the tasks whose failure was recorded.
    pub fn failed_tasks(&self) -> impl Iterator<Item = &str> {
        self.task_errors.iter().map(|m| m.task_name.as_str())
    }
}

impl fmt::Display for AbortedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "[x] TaskErrors:")?;
        for msg in &self.task_errors {
            writeln!(f, "{msg}")?;
        }
        writeln!(f, "[-] UndoErrors:")?;
        for msg in &self.undo_errors {
            writeln!(f, "{msg}")?;
        }
        writeln!(f, "[/] Cancelled:")?;
        for msg in &self.cancelled {
            writeln!(f, "{msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AbortedError {}
