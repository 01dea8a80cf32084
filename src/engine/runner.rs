// src/engine/runner.rs

//! Per-run state and the body every node executes.
//!
//! A run starts by deriving fresh per-run state from the immutable graph:
//! - one inbox per node (and one for the termination), sized to its number of
//!   distinct predecessors, so no producer ever waits on a full inbox;
//! - each producer's subscriber list (the senders of its dependents' inboxes);
//! - all dependency flags unset.
//!
//! Everything here is dropped when the run ends, which is what keeps the graph
//! itself untouched across runs.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::dag::expr::{DependencyExpr, DependencyFlags};
use crate::dag::node::{Gate, TaskArgs, TaskFn, TaskNode, UndoFn};
use crate::engine::aggregate::{
    CancelList, ErrorList, ErrorMessage, StateMessage, UndoEntry, UndoStack, panic_message,
};
use crate::engine::message::Message;
use crate::errors::TaskError;
use crate::types::{TaskId, TaskName};

/// Shared aggregates of a single run.
pub(crate) struct Aggregates<B, V> {
    pub errors: ErrorList,
    pub cancelled: CancelList,
    pub undo: UndoStack<B, V>,
}

impl<B, V> Default for Aggregates<B, V> {
    fn default() -> Self {
        Self {
            errors: ErrorList::default(),
            cancelled: CancelList::default(),
            undo: UndoStack::default(),
        }
    }
}

/// What every node activity of a run shares.
pub(crate) struct RunContext<B, V> {
    pub cancel: CancellationToken,
    pub aggregates: Arc<Aggregates<B, V>>,
}

impl<B, V> Clone for RunContext<B, V> {
    fn clone(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            aggregates: Arc::clone(&self.aggregates),
        }
    }
}

/// A node ready to be launched for one run.
pub(crate) struct PreparedNode<B, V> {
    id: TaskId,
    name: TaskName,
    bound: B,
    task: TaskFn<B, V>,
    undo: UndoFn<B, V>,
    undo_skip_error: bool,
    expr: DependencyExpr,
    flags: DependencyFlags,
    inbox: mpsc::Receiver<Message<V>>,
    subscribers: Vec<mpsc::Sender<Message<V>>>,
}

impl<B, V> PreparedNode<B, V> {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

/// The termination's per-run state.
pub(crate) struct PreparedSink<V> {
    expr: DependencyExpr,
    flags: DependencyFlags,
    inbox: mpsc::Receiver<Message<V>>,
}

fn inbox_for<V>(gate: &Gate) -> (mpsc::Sender<Message<V>>, mpsc::Receiver<Message<V>>) {
    // tokio channels need a non-zero buffer; a node without predecessors
    // never receives anything anyway.
    mpsc::channel(gate.inbox_capacity().max(1))
}

/// Build fresh per-run state for every node and the termination.
pub(crate) fn prepare<B, V>(
    nodes: &BTreeMap<TaskId, TaskNode<B, V>>,
    termination: &Gate,
) -> (HashMap<TaskId, PreparedNode<B, V>>, PreparedSink<V>)
where
    B: Clone,
{
    let mut senders: HashMap<TaskId, mpsc::Sender<Message<V>>> = HashMap::new();
    let mut receivers: HashMap<TaskId, mpsc::Receiver<Message<V>>> = HashMap::new();
    for (id, node) in nodes {
        let (tx, rx) = inbox_for(node.gate());
        senders.insert(*id, tx);
        receivers.insert(*id, rx);
    }
    let (sink_tx, sink_rx) = inbox_for(termination);

    let mut subscribers: HashMap<TaskId, Vec<mpsc::Sender<Message<V>>>> = HashMap::new();
    for (id, node) in nodes {
        for dep in node.gate().dependencies() {
            if let Some(tx) = senders.get(id) {
                subscribers.entry(*dep).or_default().push(tx.clone());
            }
        }
    }
    for dep in termination.dependencies() {
        subscribers.entry(*dep).or_default().push(sink_tx.clone());
    }
    // Only subscriber lists may keep inboxes open.
    drop(senders);
    drop(sink_tx);

    let mut prepared = HashMap::with_capacity(nodes.len());
    for (id, node) in nodes {
        let Some(inbox) = receivers.remove(id) else {
            continue;
        };
        prepared.insert(
            *id,
            PreparedNode {
                id: *id,
                name: node.name().to_string(),
                bound: node.bound().clone(),
                task: Arc::clone(node.task()),
                undo: Arc::clone(node.undo()),
                undo_skip_error: node.undo_skip_error(),
                expr: node.gate().expr().clone(),
                flags: node.gate().fresh_flags(),
                inbox,
                subscribers: subscribers.remove(id).unwrap_or_default(),
            },
        );
    }

    let sink = PreparedSink {
        expr: termination.expr().clone(),
        flags: termination.fresh_flags(),
        inbox: sink_rx,
    };

    (prepared, sink)
}

enum Gating<V> {
    Open,
    Cancelled,
    /// Every producer is gone and the gate is still closed.
    Starved,
    Message(Message<V>),
}

async fn next_event<V>(
    inbox: &mut mpsc::Receiver<Message<V>>,
    cancel: &CancellationToken,
) -> Gating<V> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Gating::Cancelled,
        msg = inbox.recv() => match msg {
            Some(msg) => Gating::Message(msg),
            None => Gating::Starved,
        },
    }
}

/// Wait until `expr` holds over `flags`, folding every arriving message in
/// through `on_message`.
async fn wait_gate<V>(
    expr: &DependencyExpr,
    flags: &mut DependencyFlags,
    inbox: &mut mpsc::Receiver<Message<V>>,
    cancel: &CancellationToken,
    mut on_message: impl FnMut(TaskName, V),
) -> Gating<V> {
    while !expr.evaluate(flags) {
        match next_event(inbox, cancel).await {
            Gating::Message(msg) => {
                trace!(from = %msg.sender_name, "dependency satisfied");
                flags.mark(msg.sender_id, true);
                on_message(msg.sender_name, msg.value);
            }
            other => return other,
        }
    }
    Gating::Open
}

/// Body of one node for one run.
pub(crate) async fn run_node<B, V>(node: PreparedNode<B, V>, ctx: RunContext<B, V>)
where
    B: Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    let PreparedNode {
        id,
        name,
        bound,
        task,
        undo,
        undo_skip_error,
        expr,
        mut flags,
        mut inbox,
        subscribers,
    } = node;

    let mut args = TaskArgs {
        bound,
        cancel: ctx.cancel.clone(),
        name: name.clone(),
        upstream: HashMap::new(),
    };

    let gating = wait_gate(&expr, &mut flags, &mut inbox, &ctx.cancel, |sender, value| {
        args.upstream.insert(sender, value);
    })
    .await;

    match gating {
        Gating::Open => {}
        Gating::Cancelled => {
            debug!(task = %name, "cancelled while waiting for dependencies");
            return;
        }
        Gating::Starved | Gating::Message(_) => {
            debug!(task = %name, "dependencies can no longer be satisfied; not running");
            return;
        }
    }
    drop(inbox);

    debug!(task = %name, task_id = %id, "dependencies satisfied; running task");

    let result = AssertUnwindSafe(task(args.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(TaskError::Fatal(anyhow::anyhow!(
                "task panicked: {}",
                panic_message(&*panic)
            )))
        });

    match result {
        Ok(value) => {
            ctx.aggregates.undo.push(UndoEntry {
                task_name: name.clone(),
                skip_on_error: undo_skip_error,
                args,
                undo,
            });

            let msg = Message {
                sender_id: id,
                sender_name: name.clone(),
                value,
            };
            for subscriber in &subscribers {
                if let Err(err) = subscriber.try_send(msg.clone()) {
                    // Only happens when the dependent already left its gate.
                    debug!(task = %name, error = %err, "completion not delivered");
                }
            }
            debug!(task = %name, subscribers = subscribers.len(), "task succeeded");
        }
        Err(err @ TaskError::Silent(_)) => {
            warn!(task = %name, error = %err, "task failed silently; run continues");
            ctx.aggregates.errors.append(ErrorMessage::new(name, err));
        }
        Err(TaskError::Cancelled { state }) => {
            debug!(task = %name, %state, "task reported cancellation");
            ctx.aggregates.cancelled.append(StateMessage::new(name, state));
        }
        Err(err @ TaskError::Fatal(_)) => {
            warn!(task = %name, error = %err, "task failed; cancelling run");
            ctx.aggregates.errors.append(ErrorMessage::new(name, err));
            ctx.cancel.cancel();
        }
    }
}

/// Wait on the termination gate.
///
/// Returns the collected `name -> value` results once the gate opens, or
/// `None` if the run was cancelled first or the gate can no longer open.
pub(crate) async fn wait_termination<V>(
    sink: PreparedSink<V>,
    cancel: &CancellationToken,
) -> Option<HashMap<TaskName, V>> {
    let PreparedSink {
        expr,
        mut flags,
        mut inbox,
    } = sink;

    let mut results = HashMap::new();
    let gating = wait_gate(&expr, &mut flags, &mut inbox, cancel, |sender, value| {
        results.insert(sender, value);
    })
    .await;

    match gating {
        Gating::Open => Some(results),
        Gating::Cancelled => None,
        Gating::Starved | Gating::Message(_) => {
            warn!("termination can no longer be satisfied; aborting run");
            None
        }
    }
}
