use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::state_machine::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[default]
    Task,
    Parallel,
    SubWorkflow,
    Decision,
}

/// Snapshot of one task instance as it travels through the broker.
///
/// Times are epoch milliseconds; `ack_timeout`, `timeout` and `retry_delay` are
/// durations in milliseconds, zero meaning "use the task definition's value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub task_id: String,
    pub task_name: String,
    pub task_reference_name: String,
    pub workflow_id: String,
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskState,
    pub input: Value,
    pub output: Value,
    pub create_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub retries: u32,
    pub is_retried: bool,
    pub ack_timeout: u64,
    pub timeout: u64,
    pub retry_delay: u64,
}

impl Task {
    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.transaction_id, &self.task_id)
    }

    /// Both identifiers present; anything else cannot be tracked or keyed
    pub fn is_identifiable(&self) -> bool {
        !self.task_id.is_empty() && !self.transaction_id.is_empty()
    }

    /// Copy of this snapshot prepared for another attempt
    pub fn next_attempt(&self) -> Task {
        Task {
            status: TaskState::Scheduled,
            retries: self.retries.saturating_add(1),
            is_retried: true,
            output: Value::Null,
            start_time: 0,
            end_time: 0,
            ..self.clone()
        }
    }
}

/// Identity of a task instance: `(transactionId, taskId)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub transaction_id: String,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(transaction_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            task_id: task_id.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.transaction_id, self.task_id)
    }
}
