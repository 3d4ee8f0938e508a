//! Messages the watcher exchanges with the rest of the engine over the `event` and
//! `command` topics. Every message is keyed by its transaction id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{Task, TaskKey};
use crate::state_machine::TaskState;

/// Status change for one task instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub transaction_id: String,
    pub task_id: String,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default)]
    pub logs: Vec<String>,
    /// Emitted by the watcher itself rather than by a worker
    #[serde(default)]
    pub is_system: bool,
}

impl TaskUpdate {
    pub fn new(key: &TaskKey, status: TaskState) -> Self {
        Self {
            transaction_id: key.transaction_id.clone(),
            task_id: key.task_id.clone(),
            status,
            output: Value::Null,
            logs: Vec::new(),
            is_system: false,
        }
    }

    /// Update raised by a watcher timer
    pub fn system(key: &TaskKey, status: TaskState, log: impl Into<String>) -> Self {
        Self {
            logs: vec![log.into()],
            is_system: true,
            ..Self::new(key, status)
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(&self.transaction_id, &self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadTaskCommand {
    pub transaction_id: String,
    pub task: Task,
}

/// Commands published to the `command` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Ask the dispatcher to put the task back on its work queue
    ReloadTask(ReloadTaskCommand),
}

impl Command {
    pub fn reload_task(task: Task) -> Self {
        Self::ReloadTask(ReloadTaskCommand {
            transaction_id: task.transaction_id.clone(),
            task,
        })
    }

    pub fn transaction_id(&self) -> &str {
        match self {
            Self::ReloadTask(reload) => &reload.transaction_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_update_wire_format() {
        let update = TaskUpdate::system(&TaskKey::new("tx-1", "t-1"), TaskState::TimeOut, "Task timed out");
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(
            value,
            json!({
                "transactionId": "tx-1",
                "taskId": "t-1",
                "status": "TIMEOUT",
                "logs": ["Task timed out"],
                "isSystem": true
            })
        );
    }

    #[test]
    fn test_worker_update_decodes_with_defaults() {
        let update: TaskUpdate = serde_json::from_value(json!({
            "transactionId": "tx-1",
            "taskId": "t-1",
            "status": "COMPLETED",
            "output": {"ok": true}
        }))
        .unwrap();

        assert_eq!(update.status, TaskState::Completed);
        assert!(!update.is_system);
        assert!(update.logs.is_empty());
        assert_eq!(update.output, json!({"ok": true}));
    }

    #[test]
    fn test_reload_command_wire_format() {
        let task = Task {
            task_id: "t-1".to_string(),
            transaction_id: "tx-1".to_string(),
            ..Task::default()
        };
        let command = Command::reload_task(task);
        let value = serde_json::to_value(&command).unwrap();

        assert_eq!(value["type"], json!("RELOAD_TASK"));
        assert_eq!(value["transactionId"], json!("tx-1"));
        assert_eq!(value["task"]["taskId"], json!("t-1"));
        assert_eq!(command.transaction_id(), "tx-1");
    }
}
