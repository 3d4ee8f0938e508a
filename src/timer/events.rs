//! Timer events carried through the bucket topics.
//!
//! Wire format is a JSON object tagged by `type`:
//!
//! ```json
//! {"type": "TIMEOUT", "scheduledAt": 1700000000000, "taskId": "t-1", "transactionId": "tx-1"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Task, TaskKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum TimerEvent {
    /// Put `task` back on its work queue at `scheduled_at`
    Delay { scheduled_at: i64, task: Task },
    /// The dispatched task must have been acknowledged by `scheduled_at`
    AckTimeout {
        scheduled_at: i64,
        task_id: String,
        transaction_id: String,
    },
    /// The running task must have finished by `scheduled_at`
    Timeout {
        scheduled_at: i64,
        task_id: String,
        transaction_id: String,
    },
    /// Force completion at `scheduled_at` unless the task finished on its own
    Complete {
        scheduled_at: i64,
        task_id: String,
        transaction_id: String,
    },
}

/// Discriminant of a [`TimerEvent`], used in logs and outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEventKind {
    Delay,
    AckTimeout,
    Timeout,
    Complete,
}

impl fmt::Display for TimerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delay => "DELAY",
            Self::AckTimeout => "ACK_TIMEOUT",
            Self::Timeout => "TIMEOUT",
            Self::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

impl TimerEvent {
    pub fn delay(task: Task, scheduled_at: i64) -> Self {
        Self::Delay { scheduled_at, task }
    }

    pub fn ack_timeout(key: &TaskKey, scheduled_at: i64) -> Self {
        Self::AckTimeout {
            scheduled_at,
            task_id: key.task_id.clone(),
            transaction_id: key.transaction_id.clone(),
        }
    }

    pub fn timeout(key: &TaskKey, scheduled_at: i64) -> Self {
        Self::Timeout {
            scheduled_at,
            task_id: key.task_id.clone(),
            transaction_id: key.transaction_id.clone(),
        }
    }

    pub fn complete(key: &TaskKey, scheduled_at: i64) -> Self {
        Self::Complete {
            scheduled_at,
            task_id: key.task_id.clone(),
            transaction_id: key.transaction_id.clone(),
        }
    }

    pub fn kind(&self) -> TimerEventKind {
        match self {
            Self::Delay { .. } => TimerEventKind::Delay,
            Self::AckTimeout { .. } => TimerEventKind::AckTimeout,
            Self::Timeout { .. } => TimerEventKind::Timeout,
            Self::Complete { .. } => TimerEventKind::Complete,
        }
    }

    /// Absolute due time in epoch milliseconds
    pub fn scheduled_at(&self) -> i64 {
        match self {
            Self::Delay { scheduled_at, .. }
            | Self::AckTimeout { scheduled_at, .. }
            | Self::Timeout { scheduled_at, .. }
            | Self::Complete { scheduled_at, .. } => *scheduled_at,
        }
    }

    /// Partition key of the event
    pub fn transaction_id(&self) -> &str {
        match self {
            Self::Delay { task, .. } => &task.transaction_id,
            Self::AckTimeout { transaction_id, .. }
            | Self::Timeout { transaction_id, .. }
            | Self::Complete { transaction_id, .. } => transaction_id,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::Delay { task, .. } => &task.task_id,
            Self::AckTimeout { task_id, .. }
            | Self::Timeout { task_id, .. }
            | Self::Complete { task_id, .. } => task_id,
        }
    }

    pub fn task_key(&self) -> TaskKey {
        TaskKey::new(self.transaction_id(), self.task_id())
    }

    /// Milliseconds until the event is due; zero or negative means due now
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        self.scheduled_at().saturating_sub(now_ms)
    }
}
