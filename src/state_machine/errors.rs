use thiserror::Error;

use super::states::TaskState;

/// Errors raised while applying task status changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Unknown task {task_id} in transaction {transaction_id}")]
    UnknownTask {
        transaction_id: String,
        task_id: String,
    },
}

impl StateMachineError {
    pub fn invalid_transition(from: TaskState, to: TaskState) -> Self {
        Self::InvalidTransition { from, to }
    }

    pub fn unknown_task(transaction_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::UnknownTask {
            transaction_id: transaction_id.into(),
            task_id: task_id.into(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
