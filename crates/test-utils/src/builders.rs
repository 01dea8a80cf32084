#![allow(dead_code)]

//! Canned tasks, compensations and graph shapes over `i64` values.

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use futures::FutureExt;
use futures::future::BoxFuture;
use tcc::{Controller, TaskArgs, TaskError, TaskHandle, UndoArgs};

pub type SumController = Controller<i64, i64>;
pub type SumArgs = TaskArgs<i64, i64>;

/// Bound value plus every upstream value.
pub async fn sum_task(args: SumArgs) -> Result<i64, TaskError> {
    Ok(args.bound + args.upstream.values().sum::<i64>())
}

/// Fails fatally, cancelling the run.
pub async fn fatal_task(args: SumArgs) -> Result<i64, TaskError> {
    Err(TaskError::fatal(anyhow!("{} failed", args.name)))
}

/// Fails without cancelling the run.
pub async fn silent_task(args: SumArgs) -> Result<i64, TaskError> {
    Err(TaskError::silent(anyhow!("{} failed quietly", args.name)))
}

/// Waits for the run's cancellation and reports it with a state snapshot.
pub async fn cancel_aware_task(args: SumArgs) -> Result<i64, TaskError> {
    args.cancel.cancelled().await;
    Err(TaskError::cancelled(format!("{} stopped at step 1", args.name)))
}

/// Shared, ordered record of names.
#[derive(Debug, Clone, Default)]
pub struct NameLog(Arc<Mutex<Vec<String>>>);

impl NameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: impl Into<String>) {
        self.0.lock().unwrap().push(name.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `sum_task` that also records its name when it runs.
pub fn logged_sum_task(
    log: NameLog,
) -> impl Fn(SumArgs) -> BoxFuture<'static, Result<i64, TaskError>> + Send + Sync + 'static {
    move |args| {
        log.record(args.name.clone());
        sum_task(args).boxed()
    }
}

/// Compensation recording the task name, failing when `fail` is set.
pub fn recording_undo(
    log: NameLog,
    fail: bool,
) -> impl Fn(UndoArgs<i64, i64>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static
{
    move |undo| {
        let log = log.clone();
        async move {
            log.record(undo.args.name.clone());
            if fail {
                Err(anyhow!("undo of {} failed", undo.args.name))
            } else {
                Ok(())
            }
        }
        .boxed()
    }
}

/// `n` summing tasks with bound 1, each depending on the previous one; the
/// termination depends on the last. Returns the handles in chain order.
pub fn build_chain(ctl: &mut SumController, n: usize) -> Vec<TaskHandle> {
    let mut handles: Vec<TaskHandle> = Vec::with_capacity(n);
    for i in 0..n {
        let handle = ctl.add_task(format!("chain_{i}"), sum_task, 1);
        if let Some(prev) = handles.last().copied() {
            let leaf = ctl.dependency_leaf(handle, prev).unwrap();
            ctl.set_dependency(handle, leaf).unwrap();
        }
        handles.push(handle);
    }
    if let Some(last) = handles.last().copied() {
        let leaf = ctl.termination_leaf(last).unwrap();
        ctl.set_termination(leaf).unwrap();
    }
    handles
}

/// `node` gated by the AND of every handle in `preds`, extending its current
/// expression one leaf at a time.
pub fn depend_on_all(ctl: &mut SumController, node: TaskHandle, preds: &[TaskHandle]) {
    for pred in preds {
        let leaf = ctl.dependency_leaf(node, *pred).unwrap();
        let expr = ctl.dependency_expr(node).unwrap() & leaf;
        ctl.set_dependency(node, expr).unwrap();
    }
}

/// Termination gated by the AND of every handle in `preds`.
pub fn terminate_on_all(ctl: &mut SumController, preds: &[TaskHandle]) {
    for pred in preds {
        let leaf = ctl.termination_leaf(*pred).unwrap();
        let expr = ctl.termination_expr() & leaf;
        ctl.set_termination(expr).unwrap();
    }
}
