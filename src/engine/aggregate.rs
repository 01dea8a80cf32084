// src/engine/aggregate.rs

//! Run-wide failure records and the compensation stack.
//!
//! These are the only structures written by several node activities at once;
//! each one sits behind its own mutex. Records are never mutated after being
//! appended.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::dag::node::{TaskArgs, UndoArgs, UndoFn};
use crate::types::TaskName;

/// A task (or compensation) failure.
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub task_name: TaskName,
    pub error: Arc<anyhow::Error>,
}

impl ErrorMessage {
    pub fn new(task_name: impl Into<TaskName>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            task_name: task_name.into(),
            error: Arc::new(error.into()),
        }
    }
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task_name, self.error)
    }
}

/// A task that stopped on cancellation, with the state it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMessage {
    pub task_name: TaskName,
    pub state: String,
}

impl StateMessage {
    pub fn new(task_name: impl Into<TaskName>, state: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            state: state.into(),
        }
    }
}

impl fmt::Display for StateMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.task_name, self.state)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe append-only list.
#[derive(Debug)]
pub struct SharedList<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Default for SharedList<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> SharedList<T> {
    pub fn append(&self, item: T) {
        lock(&self.items).push(item);
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    pub fn reset(&self) {
        lock(&self.items).clear();
    }
}

pub type ErrorList = SharedList<ErrorMessage>;
pub type CancelList = SharedList<StateMessage>;

/// Compensation recorded right after a task succeeded.
pub struct UndoEntry<B, V> {
    pub task_name: TaskName,
    pub skip_on_error: bool,
    pub args: TaskArgs<B, V>,
    pub undo: UndoFn<B, V>,
}

impl<B, V> fmt::Debug for UndoEntry<B, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoEntry")
            .field("task_name", &self.task_name)
            .field("skip_on_error", &self.skip_on_error)
            .finish_non_exhaustive()
    }
}

/// LIFO stack of compensations, in task *success* order.
pub struct UndoStack<B, V> {
    items: Mutex<Vec<UndoEntry<B, V>>>,
}

impl<B, V> Default for UndoStack<B, V> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }
}

impl<B, V> fmt::Debug for UndoStack<B, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoStack")
            .field("len", &self.len())
            .finish()
    }
}

impl<B, V> UndoStack<B, V> {
    pub fn push(&self, entry: UndoEntry<B, V>) {
        lock(&self.items).push(entry);
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Task names from bottom (first success) to top.
    pub fn task_names(&self) -> Vec<TaskName> {
        lock(&self.items).iter().map(|e| e.task_name.clone()).collect()
    }

    pub fn reset(&self) {
        lock(&self.items).clear();
    }
}

impl<B, V> UndoStack<B, V>
where
    B: Clone,
    V: Clone,
{
    /// Run every compensation from the top of the stack down.
    ///
    /// Each compensation sees the task errors, the undo errors so far and the
    /// cancelled list. A failing compensation whose `skip_on_error` is unset
    /// stops the unwinding. Returns the undo errors collected.
    pub async fn unwind(
        &self,
        task_errors: &ErrorList,
        cancelled: &CancelList,
    ) -> Vec<ErrorMessage> {
        let entries = std::mem::take(&mut *lock(&self.items));
        let mut undo_errors: Vec<ErrorMessage> = Vec::new();

        info!(entries = entries.len(), "rolling back completed tasks");

        for entry in entries.into_iter().rev() {
            let undo_args = UndoArgs {
                args: entry.args.clone(),
                task_errors: task_errors.snapshot(),
                undo_errors: undo_errors.clone(),
                cancelled: cancelled.snapshot(),
            };

            let outcome = AssertUnwindSafe((entry.undo)(undo_args))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("undo panicked: {}", panic_message(&*panic)))
                });

            match outcome {
                Ok(()) => debug!(task = %entry.task_name, "compensation finished"),
                Err(err) => {
                    warn!(
                        task = %entry.task_name,
                        error = %err,
                        skip_on_error = entry.skip_on_error,
                        "compensation failed"
                    );
                    undo_errors.push(ErrorMessage::new(entry.task_name.clone(), err));
                    if !entry.skip_on_error {
                        break;
                    }
                }
            }
        }

        undo_errors
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
