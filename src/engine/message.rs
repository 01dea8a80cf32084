// src/engine/message.rs

use crate::types::{TaskId, TaskName};

/// Completion notice delivered verbatim from a finished task to every
/// subscribed inbox.
#[derive(Debug, Clone)]
pub struct Message<V> {
    pub sender_id: TaskId,
    pub sender_name: TaskName,
    pub value: V,
}
