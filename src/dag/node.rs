// src/dag/node.rs

//! Task node data model.
//!
//! A [`TaskNode`] is one schedulable unit of work: the task function, its bound
//! argument, an optional compensation and the [`Gate`] deciding when it may
//! start. The termination sink is a bare [`Gate`] owned by the controller.
//!
//! Nodes only record *edges* while the graph is being built. Inboxes and
//! subscriber lists are derived from the final edge sets when a run starts, so
//! every inbox is sized exactly once from an immutable predecessor count.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::dag::expr::{DependencyExpr, DependencyFlags};
use crate::engine::aggregate::{ErrorMessage, StateMessage};
use crate::errors::TaskError;
use crate::types::{TaskId, TaskName};

/// Runtime arguments handed to a task function.
#[derive(Debug, Clone)]
pub struct TaskArgs<B, V> {
    /// The value bound to the task when it was added.
    pub bound: B,
    /// The run's cancellation handle. Long-running tasks should watch it and
    /// return [`TaskError::Cancelled`] once it fires.
    pub cancel: CancellationToken,
    /// The task's own name.
    pub name: TaskName,
    /// One entry per predecessor whose completion was consumed before the
    /// gate opened, keyed by predecessor name.
    pub upstream: HashMap<TaskName, V>,
}

/// Arguments handed to a compensation: the bag the task ran with plus the
/// failure records accumulated so far.
#[derive(Debug, Clone)]
pub struct UndoArgs<B, V> {
    pub args: TaskArgs<B, V>,
    pub task_errors: Vec<ErrorMessage>,
    pub undo_errors: Vec<ErrorMessage>,
    pub cancelled: Vec<StateMessage>,
}

pub type TaskFn<B, V> =
    Arc<dyn Fn(TaskArgs<B, V>) -> BoxFuture<'static, Result<V, TaskError>> + Send + Sync>;

pub type UndoFn<B, V> =
    Arc<dyn Fn(UndoArgs<B, V>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) fn boxed_task<B, V, F, Fut>(f: F) -> TaskFn<B, V>
where
    B: 'static,
    V: 'static,
    F: Fn(TaskArgs<B, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, TaskError>> + Send + 'static,
{
    Arc::new(move |args: TaskArgs<B, V>| f(args).boxed())
}

pub(crate) fn boxed_undo<B, V, F, Fut>(f: F) -> UndoFn<B, V>
where
    B: 'static,
    V: 'static,
    F: Fn(UndoArgs<B, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |args: UndoArgs<B, V>| f(args).boxed())
}

fn noop_undo<B, V>() -> UndoFn<B, V>
where
    B: Send + 'static,
    V: Send + 'static,
{
    Arc::new(|_: UndoArgs<B, V>| async { Ok::<(), anyhow::Error>(()) }.boxed())
}

/// Gating condition of a node: the distinct predecessors it has registered
/// plus the expression evaluated over their flags.
#[derive(Debug, Clone)]
pub struct Gate {
    owner: TaskId,
    dependencies: BTreeSet<TaskId>,
    expr: DependencyExpr,
}

impl Gate {
    pub(crate) fn new(owner: TaskId) -> Self {
        Self {
            owner,
            dependencies: BTreeSet::new(),
            expr: DependencyExpr::always(),
        }
    }

    pub fn owner(&self) -> TaskId {
        self.owner
    }

    /// Register `predecessor` (once) and return a leaf reading its flag.
    pub(crate) fn leaf(&mut self, predecessor: TaskId) -> DependencyExpr {
        self.dependencies.insert(predecessor);
        DependencyExpr::leaf(self.owner, predecessor)
    }

    /// Install `expr`, rejecting leaves built for another node.
    pub(crate) fn set_expr(&mut self, expr: DependencyExpr) -> Result<(), TaskId> {
        if let Some(foreign) = expr.foreign_owner(self.owner) {
            return Err(foreign);
        }
        self.expr = expr;
        Ok(())
    }

    pub fn expr(&self) -> &DependencyExpr {
        &self.expr
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    /// One slot per distinct predecessor; each sends exactly once per run.
    pub fn inbox_capacity(&self) -> usize {
        self.dependencies.len()
    }

    /// Fresh, all-unset flags for a new run.
    pub fn fresh_flags(&self) -> DependencyFlags {
        DependencyFlags::new(self.dependencies.iter().copied())
    }
}

/// One task in the graph.
pub struct TaskNode<B, V> {
    id: TaskId,
    name: TaskName,
    bound: B,
    task: TaskFn<B, V>,
    undo: UndoFn<B, V>,
    undo_skip_error: bool,
    gate: Gate,
}

impl<B, V> TaskNode<B, V>
where
    B: Send + 'static,
    V: Send + 'static,
{
    pub(crate) fn new(name: TaskName, task: TaskFn<B, V>, bound: B) -> Self {
        let id = TaskId::next();
        Self {
            id,
            name,
            bound,
            task,
            undo: noop_undo(),
            undo_skip_error: false,
            gate: Gate::new(id),
        }
    }
}

impl<B, V> TaskNode<B, V> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bound(&self) -> &B {
        &self.bound
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub(crate) fn gate_mut(&mut self) -> &mut Gate {
        &mut self.gate
    }

    pub(crate) fn task(&self) -> &TaskFn<B, V> {
        &self.task
    }

    pub(crate) fn undo(&self) -> &UndoFn<B, V> {
        &self.undo
    }

    pub fn undo_skip_error(&self) -> bool {
        self.undo_skip_error
    }

    pub(crate) fn set_undo(&mut self, undo: UndoFn<B, V>, skip_on_error: bool) {
        self.undo = undo;
        self.undo_skip_error = skip_on_error;
    }
}

impl<B, V> fmt::Debug for TaskNode<B, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("undo_skip_error", &self.undo_skip_error)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
