// src/engine/controller.rs

//! The task-concurrency controller.
//!
//! Callers build a graph once (tasks, dependency expressions, compensations,
//! termination) and then run it any number of times, either with one tokio
//! task per node ([`Controller::run`]) or through a bounded pool
//! ([`Controller::run_with_pool`]).
//!
//! Every run follows the same shape:
//! 1. structural checks (termination configured, acyclic, pool-eligible);
//! 2. fresh per-run state is prepared and every node body launched;
//! 3. the controller waits on the termination gate;
//! 4. success: cancel the stragglers, wait for them, return the results;
//!    abort: wait for every node, unwind the compensations, return
//!    [`TccError::Aborted`];
//! 5. reset, so the next run starts clean.
//!
//! Per-run state is also rebuilt when a run starts, and dropping a run
//! future cancels that run's tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dag::expr::DependencyExpr;
use crate::dag::graph::DependencyGraph;
use crate::dag::node::{Gate, TaskArgs, TaskNode, UndoArgs, boxed_task, boxed_undo};
use crate::engine::runner::{self, Aggregates, PreparedNode, RunContext};
use crate::errors::{AbortedError, PoolError, Result, TaskError, TccError};
use crate::exec::pool::{TaskPool, WorkItem};
use crate::types::{TaskId, TaskName};

/// Handle to a task registered with a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle {
    id: TaskId,
}

impl TaskHandle {
    pub fn id(self) -> TaskId {
        self.id
    }
}

/// One node as seen by [`Controller::topology`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEntry {
    pub id: TaskId,
    pub name: TaskName,
    pub dependencies: BTreeSet<TaskId>,
    pub inbox_capacity: usize,
    pub conjunctive: bool,
}

/// Comparable snapshot of the graph structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Tasks in registration order.
    pub tasks: Vec<TopologyEntry>,
    pub termination: BTreeSet<TaskId>,
}

/// Re-runnable task graph.
pub struct Controller<B, V> {
    nodes: BTreeMap<TaskId, TaskNode<B, V>>,
    termination: Gate,
    cancel: CancellationToken,
    aggregates: Arc<Aggregates<B, V>>,
    runs: u64,
}

impl<B, V> Default for Controller<B, V>
where
    B: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<B, V> Controller<B, V>
where
    B: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            termination: Gate::new(TaskId::next()),
            cancel: CancellationToken::new(),
            aggregates: Arc::new(Aggregates::default()),
            runs: 0,
        }
    }

    /// Register a task. It starts gated by `always()`, with a no-op
    /// compensation.
    pub fn add_task<F, Fut>(&mut self, name: impl Into<TaskName>, task: F, bound: B) -> TaskHandle
    where
        F: Fn(TaskArgs<B, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, TaskError>> + Send + 'static,
    {
        let node = TaskNode::new(name.into(), boxed_task(task), bound);
        let id = node.id();
        debug!(task = %node.name(), task_id = %id, "task registered");
        self.nodes.insert(id, node);
        TaskHandle { id }
    }

    fn node(&self, handle: TaskHandle) -> Result<&TaskNode<B, V>> {
        self.nodes
            .get(&handle.id)
            .ok_or(TccError::UnknownTask(handle.id))
    }

    fn node_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskNode<B, V>> {
        self.nodes
            .get_mut(&handle.id)
            .ok_or(TccError::UnknownTask(handle.id))
    }

    /// Register `predecessor` as a dependency of `node` and return a leaf
    /// reading its flag. Registering the same predecessor twice is a no-op
    /// apart from returning another leaf.
    pub fn dependency_leaf(
        &mut self,
        node: TaskHandle,
        predecessor: TaskHandle,
    ) -> Result<DependencyExpr> {
        self.node(predecessor)?;
        let node = self.node_mut(node)?;
        Ok(node.gate_mut().leaf(predecessor.id))
    }

    /// Replace the gating expression of `node`.
    pub fn set_dependency(&mut self, node: TaskHandle, expr: DependencyExpr) -> Result<()> {
        let node = self.node_mut(node)?;
        let name = node.name().to_string();
        node.gate_mut()
            .set_expr(expr)
            .map_err(|_| TccError::ForeignDependency { task: name })
    }

    /// The gating expression currently installed on `node`.
    pub fn dependency_expr(&self, node: TaskHandle) -> Result<DependencyExpr> {
        Ok(self.node(node)?.gate().expr().clone())
    }

    /// Install a compensation for `node`. With `skip_on_error` set, a
    /// failure of this compensation does not stop the rollback.
    pub fn set_undo<F, Fut>(&mut self, node: TaskHandle, undo: F, skip_on_error: bool) -> Result<()>
    where
        F: Fn(UndoArgs<B, V>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.node_mut(node)?.set_undo(boxed_undo(undo), skip_on_error);
        Ok(())
    }

    /// Register `predecessor` as a dependency of the termination.
    pub fn termination_leaf(&mut self, predecessor: TaskHandle) -> Result<DependencyExpr> {
        self.node(predecessor)?;
        Ok(self.termination.leaf(predecessor.id))
    }

    pub fn set_termination(&mut self, expr: DependencyExpr) -> Result<()> {
        self.termination
            .set_expr(expr)
            .map_err(|_| TccError::ForeignDependency {
                task: "<termination>".to_string(),
            })
    }

    pub fn termination_expr(&self) -> DependencyExpr {
        self.termination.expr().clone()
    }

    pub fn task_name(&self, node: TaskHandle) -> Option<&str> {
        self.nodes.get(&node.id).map(|n| n.name())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn topology(&self) -> Topology {
        Topology {
            tasks: self
                .nodes
                .values()
                .map(|n| TopologyEntry {
                    id: n.id(),
                    name: n.name().to_string(),
                    dependencies: n.gate().dependencies().clone(),
                    inbox_capacity: n.gate().inbox_capacity(),
                    conjunctive: n.gate().expr().is_conjunctive(),
                })
                .collect(),
            termination: self.termination.dependencies().clone(),
        }
    }

    /// Analysis snapshot of the current task graph.
    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::from_nodes(self.nodes.values())
    }

    fn check_termination(&self) -> Result<()> {
        if self.termination.dependencies().is_empty() {
            return Err(TccError::NoTermination);
        }
        Ok(())
    }

    /// Run every node on its own tokio task.
    ///
    /// Returns the values of the termination's predecessors, keyed by task
    /// name, or [`TccError::Aborted`] after rolling back.
    pub async fn run(&mut self) -> Result<HashMap<TaskName, V>> {
        self.check_termination()?;
        self.graph().check_acyclic()?;

        let result = self.run_unbounded().await;
        self.reset();
        result
    }

    /// Run through `pool`, submitting nodes in layer-then-name order.
    ///
    /// Only graphs whose task expressions are all pure conjunctions are
    /// accepted. A submission error aborts the run right away with
    /// [`TccError::Pool`], without waiting for submitted work and without
    /// compensation.
    pub async fn run_with_pool<P>(&mut self, pool: &P) -> Result<HashMap<TaskName, V>>
    where
        P: TaskPool + ?Sized,
    {
        self.check_termination()?;
        let graph = self.graph();
        let layering = graph.layering()?;
        graph.check_pool_eligible()?;
        let order = graph.submission_order(&layering);

        let result = self.run_pooled(pool, order).await;
        self.reset();
        result
    }

    /// Fresh token and aggregates for this run, plus a guard that cancels
    /// the token if the run future is dropped before it finishes.
    fn begin_run(&mut self, mode: &'static str) -> (RunContext<B, V>, CancelOnDrop) {
        self.reset();
        self.runs += 1;
        info!(run = self.runs, mode, tasks = self.nodes.len(), "run started");
        let ctx = RunContext {
            cancel: self.cancel.clone(),
            aggregates: Arc::clone(&self.aggregates),
        };
        let guard = CancelOnDrop {
            token: self.cancel.clone(),
            run: self.runs,
        };
        (ctx, guard)
    }

    async fn run_unbounded(&mut self) -> Result<HashMap<TaskName, V>> {
        let (ctx, _guard) = self.begin_run("unbounded");
        let (prepared, sink) = runner::prepare(&self.nodes, &self.termination);

        let tracker = TaskTracker::new();
        for node in prepared.into_values() {
            tracker.spawn(runner::run_node(node, ctx.clone()));
        }
        tracker.close();

        let outcome = runner::wait_termination(sink, &ctx.cancel).await;
        ctx.cancel.cancel();
        self.finish(outcome, &ctx, &tracker).await
    }

    async fn run_pooled<P>(&mut self, pool: &P, order: Vec<TaskId>) -> Result<HashMap<TaskName, V>>
    where
        P: TaskPool + ?Sized,
    {
        let (ctx, _guard) = self.begin_run("pool");
        let (prepared, sink) = runner::prepare(&self.nodes, &self.termination);
        let tracker = TaskTracker::new();

        let wait = async {
            let outcome = runner::wait_termination(sink, &ctx.cancel).await;
            // Also stops the submission loop once the termination is reached.
            ctx.cancel.cancel();
            outcome
        };
        let (submitted, outcome) =
            tokio::join!(submit_in_order(pool, order, prepared, &ctx, &tracker), wait);
        tracker.close();

        if let Err(err) = submitted {
            warn!(run = self.runs, error = %err, "pool submission failed; aborting run");
            return Err(TccError::Pool(err));
        }

        self.finish(outcome, &ctx, &tracker).await
    }

    async fn finish(
        &self,
        outcome: Option<HashMap<TaskName, V>>,
        ctx: &RunContext<B, V>,
        tracker: &TaskTracker,
    ) -> Result<HashMap<TaskName, V>> {
        tracker.wait().await;

        match outcome {
            Some(results) => {
                info!(run = self.runs, results = results.len(), "run finished");
                Ok(results)
            }
            None => {
                let aggregates = &ctx.aggregates;
                let undo_errors = aggregates
                    .undo
                    .unwind(&aggregates.errors, &aggregates.cancelled)
                    .await;
                let aborted = AbortedError {
                    task_errors: aggregates.errors.snapshot(),
                    undo_errors,
                    cancelled: aggregates.cancelled.snapshot(),
                };
                info!(
                    run = self.runs,
                    task_errors = aborted.task_errors.len(),
                    undo_errors = aborted.undo_errors.len(),
                    cancelled = aborted.cancelled.len(),
                    "run aborted"
                );
                Err(TccError::Aborted(aborted))
            }
        }
    }

    /// Drop every piece of per-run state: new cancellation token, new
    /// aggregates. Called when a run starts and again when it returns.
    /// Inboxes and flags are rebuilt by `runner::prepare`.
    ///
    /// Work left over from an aborted or dropped run keeps the old token and
    /// aggregates, so it cannot leak into the next run.
    fn reset(&mut self) {
        self.cancel = CancellationToken::new();
        self.aggregates = Arc::new(Aggregates::default());
        debug!(run = self.runs, "controller reset");
    }
}

/// Cancels a run's token when the run future goes away, finished or not.
struct CancelOnDrop {
    token: CancellationToken,
    run: u64,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            debug!(run = self.run, "run dropped before finishing; cancelling its tasks");
            self.token.cancel();
        }
    }
}

async fn submit_in_order<B, V, P>(
    pool: &P,
    order: Vec<TaskId>,
    mut prepared: HashMap<TaskId, PreparedNode<B, V>>,
    ctx: &RunContext<B, V>,
    tracker: &TaskTracker,
) -> std::result::Result<(), PoolError>
where
    B: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: TaskPool + ?Sized,
{
    for id in order {
        if ctx.cancel.is_cancelled() {
            debug!(remaining = prepared.len(), "run cancelled; stop submitting");
            return Ok(());
        }
        let Some(node) = prepared.remove(&id) else {
            continue;
        };
        debug_assert_eq!(node.id(), id);

        let work: WorkItem = Box::pin(tracker.track_future(runner::run_node(node, ctx.clone())));
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                debug!(remaining = prepared.len(), "run cancelled while submitting");
                return Ok(());
            }
            submitted = pool.submit(work) => {
                if let Err(err) = submitted {
                    ctx.cancel.cancel();
                    return Err(err);
                }
            }
        }
    }
    Ok(())
}

impl<B, V> fmt::Display for Controller<B, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_of = |id: &TaskId| {
            self.nodes
                .get(id)
                .map(|n| n.name().to_string())
                .unwrap_or_else(|| id.to_string())
        };

        writeln!(f, "Controller ({} tasks)", self.nodes.len())?;
        for node in self.nodes.values() {
            let deps: Vec<String> = node.gate().dependencies().iter().map(name_of).collect();
            writeln!(
                f,
                "  {} {} inbox={} expr={} deps=[{}]",
                node.id(),
                node.name(),
                node.gate().inbox_capacity(),
                node.gate().expr(),
                deps.join(", ")
            )?;
        }
        let deps: Vec<String> = self.termination.dependencies().iter().map(name_of).collect();
        writeln!(
            f,
            "  termination expr={} deps=[{}]",
            self.termination.expr(),
            deps.join(", ")
        )
    }
}

impl<B, V> fmt::Debug for Controller<B, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("nodes", &self.nodes)
            .field("termination", &self.termination)
            .field("runs", &self.runs)
            .finish_non_exhaustive()
    }
}
