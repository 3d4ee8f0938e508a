use serde::{Deserialize, Serialize};
use std::fmt;

/// Task instance status as carried on the wire
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    /// Queued for a worker, not yet acknowledged. New tasks start here.
    #[default]
    Scheduled,
    /// Acknowledged by a worker and executing
    Inprogress,
    /// Suspended by the workflow layer
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Exceeded its execution window
    TimeOut,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Scheduled,
        Self::Inprogress,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::TimeOut,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Failed or timed out; the only states a retry can leave from
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::TimeOut)
    }

    /// Check if a worker currently owns the task
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Inprogress | Self::Paused)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scheduled => write!(f, "SCHEDULED"),
            Self::Inprogress => write!(f, "INPROGRESS"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::TimeOut => write!(f, "TIMEOUT"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "INPROGRESS" => Ok(Self::Inprogress),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TIMEOUT" => Ok(Self::TimeOut),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}
