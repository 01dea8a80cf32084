// src/lib.rs

//! `tcc`: a re-runnable task concurrency controller.
//!
//! Tasks are async functions wired together by boolean dependency expressions
//! (`AND`/`OR`/`XOR`/`NOT` over "predecessor finished" flags). A run launches
//! every task whose expression becomes true, hands each task the values of
//! the predecessors it consumed, and stops once the termination expression
//! holds. A fatal task error cancels the run and replays the compensations of
//! every succeeded task, most recent first.
//!
//! ```no_run
//! use tcc::{Controller, TaskError};
//!
//! # async fn demo() -> tcc::Result<()> {
//! let mut ctl: Controller<i64, i64> = Controller::new();
//! let a = ctl.add_task("A", |args| async move { Ok::<_, TaskError>(args.bound) }, 1);
//! let b = ctl.add_task(
//!     "B",
//!     |args| async move { Ok::<_, TaskError>(args.bound + args.upstream.values().sum::<i64>()) },
//!     2,
//! );
//! let leaf = ctl.dependency_leaf(b, a)?;
//! ctl.set_dependency(b, leaf)?;
//! let done = ctl.termination_leaf(b)?;
//! ctl.set_termination(done)?;
//!
//! let results = ctl.run().await?;
//! assert_eq!(results["B"], 3);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::Path;

use tracing::{debug, warn};

pub use crate::config::ControllerConfig;
pub use crate::dag::{DependencyExpr, TaskArgs, UndoArgs};
pub use crate::engine::{Controller, ErrorMessage, StateMessage, TaskHandle, Topology};
pub use crate::errors::{AbortedError, PoolError, Result, TaskError, TccError};
pub use crate::exec::{BoundedPool, TaskPool, UnboundedPool};
pub use crate::types::{LogLevel, SubmitMode, TaskId, TaskName};

use crate::config::loader::load_and_validate;
use crate::logging::init_logging;

/// Load a config file and install logging at its `[logging]` level.
///
/// An already installed global subscriber is kept as is. The returned config
/// feeds [`BoundedPool::from_config`].
pub fn bootstrap(path: impl AsRef<Path>) -> Result<ControllerConfig> {
    let cfg = load_and_validate(path)?;

    if let Err(err) = init_logging(cfg.logging().level) {
        warn!(error = %err, "keeping existing tracing subscriber");
    }
    debug!(
        capacity = cfg.pool().capacity,
        submit = ?cfg.pool().submit,
        "controller config loaded"
    );

    Ok(cfg)
}
