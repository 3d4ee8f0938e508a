//! # Task Instance Ledger
//!
//! In-process record of every task instance the watcher has seen, keyed by
//! `(transactionId, taskId)`. Status changes go through [`TaskStateMachine`]; a
//! rejected change leaves the stored status untouched.
//!
//! Mutations that carry side effects (publishing timers) run the side effect under
//! the entry's lock against a working copy, and only commit the copy when the side
//! effect succeeded. A failed publish therefore leaves the entry exactly as it was,
//! and the redelivered broker record replays the same transition.
//!
//! Callbacks passed to the `*_with` methods must not call back into the ledger.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::WatcherResult;
use crate::models::{Task, TaskKey, TaskUpdate};
use crate::state_machine::{StateMachineError, TaskState, TaskStateMachine};

/// Stored state of one task instance
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub status: TaskState,
    /// Latest snapshot, with status and output kept in step with accepted updates
    pub snapshot: Task,
    /// Latest acknowledgement deadline scheduled for the current dispatch
    pub ack_deadline_ms: Option<i64>,
    /// Latest execution deadline scheduled for the current attempt
    pub timeout_deadline_ms: Option<i64>,
}

impl TaskRecord {
    fn new(snapshot: Task) -> Self {
        Self {
            status: snapshot.status,
            snapshot,
            ack_deadline_ms: None,
            timeout_deadline_ms: None,
        }
    }
}

/// How a dispatched snapshot was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// First sighting of the task
    Inserted,
    /// Re-dispatch of a task that was still scheduled
    Refreshed,
    /// New attempt of a task that had failed or timed out
    Rescheduled { from: TaskState },
}

/// An update the state machine accepted
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedUpdate {
    pub previous: TaskState,
    pub current: TaskState,
    pub snapshot: Task,
}

#[derive(Debug, Default)]
pub struct TaskInstanceLedger {
    entries: DashMap<TaskKey, TaskRecord>,
}

impl TaskInstanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dispatched snapshot
    pub fn track(&self, task: &Task) -> WatcherResult<TrackOutcome> {
        self.track_with(task, |_, _| Ok(()))
    }

    /// Record a dispatched snapshot, running `on_accept` before the record is stored
    pub fn track_with<F>(&self, task: &Task, on_accept: F) -> WatcherResult<TrackOutcome>
    where
        F: FnOnce(TrackOutcome, &mut TaskRecord) -> WatcherResult<()>,
    {
        match self.entries.entry(task.key()) {
            Entry::Vacant(vacant) => {
                let mut record = TaskRecord::new(task.clone());
                on_accept(TrackOutcome::Inserted, &mut record)?;
                vacant.insert(record);
                Ok(TrackOutcome::Inserted)
            }
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().status;
                let mut record = occupied.get().clone();

                let outcome = if current == TaskState::Scheduled {
                    TrackOutcome::Refreshed
                } else {
                    TaskStateMachine::transition(current, TaskState::Scheduled)?;
                    record.ack_deadline_ms = None;
                    record.timeout_deadline_ms = None;
                    TrackOutcome::Rescheduled { from: current }
                };

                record.status = TaskState::Scheduled;
                record.snapshot = Task {
                    status: TaskState::Scheduled,
                    ..task.clone()
                };

                on_accept(outcome, &mut record)?;
                occupied.insert(record);
                Ok(outcome)
            }
        }
    }

    /// Apply a status update
    pub fn apply_update(&self, update: &TaskUpdate) -> WatcherResult<AppliedUpdate> {
        self.apply_update_with(update, |_, _| Ok(()))
    }

    /// Apply a status update, running `on_accept` before the change is committed
    pub fn apply_update_with<F>(&self, update: &TaskUpdate, on_accept: F) -> WatcherResult<AppliedUpdate>
    where
        F: FnOnce(&AppliedUpdate, &mut TaskRecord) -> WatcherResult<()>,
    {
        let Some(mut entry) = self.entries.get_mut(&update.key()) else {
            return Err(StateMachineError::unknown_task(&update.transaction_id, &update.task_id).into());
        };

        let previous = entry.status;
        let current = TaskStateMachine::transition(previous, update.status)?;

        let mut record = entry.value().clone();
        record.status = current;
        record.snapshot.status = current;
        if !update.output.is_null() {
            record.snapshot.output = update.output.clone();
        }

        let applied = AppliedUpdate {
            previous,
            current,
            snapshot: record.snapshot.clone(),
        };
        on_accept(&applied, &mut record)?;
        *entry.value_mut() = record;

        Ok(applied)
    }

    /// Run `f` against a working copy of the record and commit it when `f`
    /// succeeds. `None` when the task is unknown.
    pub fn modify<F, R>(&self, key: &TaskKey, f: F) -> WatcherResult<Option<R>>
    where
        F: FnOnce(&mut TaskRecord) -> WatcherResult<R>,
    {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };

        let mut record = entry.value().clone();
        let result = f(&mut record)?;
        *entry.value_mut() = record;
        Ok(Some(result))
    }

    pub fn status(&self, key: &TaskKey) -> Option<TaskState> {
        self.entries.get(key).map(|entry| entry.status)
    }

    pub fn snapshot(&self, key: &TaskKey) -> Option<Task> {
        self.entries.get(key).map(|entry| entry.snapshot.clone())
    }

    pub fn record(&self, key: &TaskKey) -> Option<TaskRecord> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use crate::messaging::MessagingError;
    use serde_json::json;

    fn task(status: TaskState) -> Task {
        Task {
            task_id: "t1".to_string(),
            transaction_id: "tx1".to_string(),
            task_name: "send_email".to_string(),
            status,
            ..Task::default()
        }
    }

    fn key() -> TaskKey {
        TaskKey::new("tx1", "t1")
    }

    #[test]
    fn test_completion_before_acknowledgement_rejected() {
        let ledger = TaskInstanceLedger::new();
        ledger.track(&task(TaskState::Scheduled)).unwrap();

        let result = ledger.apply_update(&TaskUpdate::new(&key(), TaskState::Completed));
        assert!(matches!(
            result,
            Err(WatcherError::StateTransition(StateMachineError::InvalidTransition {
                from: TaskState::Scheduled,
                to: TaskState::Completed
            }))
        ));
        assert_eq!(ledger.status(&key()), Some(TaskState::Scheduled));
    }

    #[test]
    fn test_duplicate_progress_update_accepted() {
        let ledger = TaskInstanceLedger::new();
        ledger.track(&task(TaskState::Scheduled)).unwrap();
        ledger
            .apply_update(&TaskUpdate::new(&key(), TaskState::Inprogress))
            .unwrap();

        let applied = ledger
            .apply_update(&TaskUpdate::new(&key(), TaskState::Inprogress))
            .unwrap();
        assert_eq!(applied.previous, TaskState::Inprogress);
        assert_eq!(applied.current, TaskState::Inprogress);
        assert_eq!(ledger.status(&key()), Some(TaskState::Inprogress));
    }

    #[test]
    fn test_update_for_unknown_task() {
        let ledger = TaskInstanceLedger::new();
        let result = ledger.apply_update(&TaskUpdate::new(&key(), TaskState::Inprogress));
        assert!(matches!(
            result,
            Err(WatcherError::StateTransition(StateMachineError::UnknownTask { .. }))
        ));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_output_carried_into_snapshot() {
        let ledger = TaskInstanceLedger::new();
        ledger.track(&task(TaskState::Scheduled)).unwrap();
        ledger
            .apply_update(&TaskUpdate::new(&key(), TaskState::Inprogress))
            .unwrap();

        let mut update = TaskUpdate::new(&key(), TaskState::Completed);
        update.output = json!({"sent": true});
        ledger.apply_update(&update).unwrap();

        let snapshot = ledger.snapshot(&key()).unwrap();
        assert_eq!(snapshot.status, TaskState::Completed);
        assert_eq!(snapshot.output, json!({"sent": true}));
    }

    #[test]
    fn test_track_outcomes() {
        let ledger = TaskInstanceLedger::new();
        assert_eq!(
            ledger.track(&task(TaskState::Scheduled)).unwrap(),
            TrackOutcome::Inserted
        );
        assert_eq!(
            ledger.track(&task(TaskState::Scheduled)).unwrap(),
            TrackOutcome::Refreshed
        );

        ledger
            .apply_update(&TaskUpdate::new(&key(), TaskState::Inprogress))
            .unwrap();
        assert!(ledger.track(&task(TaskState::Scheduled)).is_err());
        assert_eq!(ledger.status(&key()), Some(TaskState::Inprogress));

        ledger
            .apply_update(&TaskUpdate::new(&key(), TaskState::Failed))
            .unwrap();
        let retry = task(TaskState::Failed).next_attempt();
        assert_eq!(
            ledger.track(&retry).unwrap(),
            TrackOutcome::Rescheduled {
                from: TaskState::Failed
            }
        );
        assert_eq!(ledger.snapshot(&key()).unwrap().retries, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_failed_side_effect_leaves_entry_untouched() {
        let ledger = TaskInstanceLedger::new();
        ledger.track(&task(TaskState::Scheduled)).unwrap();

        let result = ledger.apply_update_with(
            &TaskUpdate::new(&key(), TaskState::Inprogress),
            |_, record| {
                record.timeout_deadline_ms = Some(42);
                Err(MessagingError::QueueFull { capacity: 1 }.into())
            },
        );
        assert!(matches!(result, Err(WatcherError::Messaging(_))));

        let record = ledger.record(&key()).unwrap();
        assert_eq!(record.status, TaskState::Scheduled);
        assert_eq!(record.timeout_deadline_ms, None);

        let inserted = ledger.track_with(&task(TaskState::Scheduled), |_, _| {
            Err(MessagingError::ProducerClosed.into())
        });
        assert!(inserted.is_err());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_modify_commits_on_success() {
        let ledger = TaskInstanceLedger::new();
        ledger.track(&task(TaskState::Scheduled)).unwrap();

        let changed = ledger
            .modify(&key(), |record| {
                record.ack_deadline_ms = Some(1_000);
                Ok(true)
            })
            .unwrap();
        assert_eq!(changed, Some(true));
        assert_eq!(ledger.record(&key()).unwrap().ack_deadline_ms, Some(1_000));

        let missing = ledger
            .modify(&TaskKey::new("tx-x", "t-x"), |_| Ok(()))
            .unwrap();
        assert_eq!(missing, None);
    }
}
