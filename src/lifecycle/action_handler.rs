//! # Timer Action Handler
//!
//! Single consumer of the action channel. Each due timer is checked against the
//! ledger when it fires; a timer whose guard no longer holds is a logical
//! cancellation and is dropped with a debug log.
//!
//! A publish the producer refuses is answered as a failure on the action's
//! completion, which leaves the timer record uncommitted for redelivery.
//!
//! Status changes raised here are published to the event topic rather than applied
//! directly. The task-event intake applies them like any worker update, so all
//! status writes for a transaction are ordered by its partition of the event topic.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ledger::TaskInstanceLedger;
use crate::error::{WatcherError, WatcherResult};
use crate::models::{Task, TaskKey, TaskUpdate};
use crate::state_machine::{TaskState, TaskStateMachine};
use crate::messaging::MessagingResult;
use crate::timer::{PendingAction, TimerAction, TimerActionReceiver, TimerDispatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    /// Guard no longer held when the timer fired
    Stale,
}

#[derive(Debug)]
pub struct TimerActionHandler {
    handler_id: Uuid,
    ledger: Arc<TaskInstanceLedger>,
    dispatcher: Arc<TimerDispatcher>,
}

impl TimerActionHandler {
    pub fn new(ledger: Arc<TaskInstanceLedger>, dispatcher: Arc<TimerDispatcher>) -> Self {
        Self {
            handler_id: Uuid::new_v4(),
            ledger,
            dispatcher,
        }
    }

    pub fn handler_id(&self) -> Uuid {
        self.handler_id
    }

    /// Evaluate one due timer as seen at `now_ms`
    pub fn handle(&self, action: &TimerAction, now_ms: i64) -> WatcherResult<ActionOutcome> {
        match action {
            TimerAction::DispatchTask(task) => self.dispatch_task(task),
            TimerAction::AckTimeoutElapsed(key) => self.ack_timeout_elapsed(key, now_ms),
            TimerAction::TimeoutElapsed(key) => self.timeout_elapsed(key, now_ms),
            TimerAction::CompletionDue(key) => self.completion_due(key),
        }
    }

    fn dispatch_task(&self, task: &Task) -> WatcherResult<ActionOutcome> {
        let key = task.key();
        if let Some(current) = self.ledger.status(&key) {
            if !TaskStateMachine::can_transition(current, TaskState::Scheduled) {
                return Ok(self.stale("dispatch_task", &key, Some(current)));
            }
        }

        self.dispatcher.reload_task(task.clone())?;
        info!(
            handler_id = %self.handler_id,
            task_id = %task.task_id,
            transaction_id = %task.transaction_id,
            retries = task.retries,
            "Re-dispatching delayed task"
        );
        Ok(ActionOutcome::Applied)
    }

    fn ack_timeout_elapsed(&self, key: &TaskKey, now_ms: i64) -> WatcherResult<ActionOutcome> {
        let reloaded = self.ledger.modify(key, |record| {
            let due = record.status == TaskState::Scheduled
                && record
                    .ack_deadline_ms
                    .is_some_and(|deadline| deadline <= now_ms);
            if !due {
                return Ok(false);
            }
            self.dispatcher.reload_task(record.snapshot.clone())?;
            record.ack_deadline_ms = None;
            Ok(true)
        })?;

        if reloaded != Some(true) {
            return Ok(self.stale("ack_timeout_elapsed", key, self.ledger.status(key)));
        }

        info!(
            handler_id = %self.handler_id,
            task_id = %key.task_id,
            transaction_id = %key.transaction_id,
            "Task not acknowledged in time, re-dispatching"
        );
        Ok(ActionOutcome::Applied)
    }

    fn timeout_elapsed(&self, key: &TaskKey, now_ms: i64) -> WatcherResult<ActionOutcome> {
        let Some(record) = self.ledger.record(key) else {
            return Ok(self.stale("timeout_elapsed", key, None));
        };

        let due = TaskStateMachine::can_transition(record.status, TaskState::TimeOut)
            && record
                .timeout_deadline_ms
                .is_some_and(|deadline| deadline <= now_ms);
        if !due {
            return Ok(self.stale("timeout_elapsed", key, Some(record.status)));
        }

        self.dispatcher
            .update_task(&TaskUpdate::system(key, TaskState::TimeOut, "Task timed out"))?;
        info!(
            handler_id = %self.handler_id,
            task_id = %key.task_id,
            transaction_id = %key.transaction_id,
            status = %record.status,
            "Task timed out"
        );
        Ok(ActionOutcome::Applied)
    }

    fn completion_due(&self, key: &TaskKey) -> WatcherResult<ActionOutcome> {
        let current = self.ledger.status(key);
        match current {
            Some(status) if TaskStateMachine::can_transition(status, TaskState::Completed) => {
                self.dispatcher.update_task(&TaskUpdate::system(
                    key,
                    TaskState::Completed,
                    "Task completed by timer",
                ))?;
                info!(
                    handler_id = %self.handler_id,
                    task_id = %key.task_id,
                    transaction_id = %key.transaction_id,
                    "Completing task on schedule"
                );
                Ok(ActionOutcome::Applied)
            }
            _ => Ok(self.stale("completion_due", key, current)),
        }
    }

    fn stale(&self, action: &str, key: &TaskKey, status: Option<TaskState>) -> ActionOutcome {
        debug!(
            handler_id = %self.handler_id,
            action = action,
            task_id = %key.task_id,
            transaction_id = %key.transaction_id,
            status = ?status,
            "Timer no longer applies"
        );
        ActionOutcome::Stale
    }

    /// Handle actions until shutdown, then drain whatever is already queued
    pub async fn run(self, mut receiver: TimerActionReceiver, mut shutdown: watch::Receiver<bool>) {
        info!(handler_id = %self.handler_id, "Starting timer action handler");

        loop {
            tokio::select! {
                pending = receiver.recv() => match pending {
                    Some(pending) => self.answer(pending),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        receiver.close();
        let mut drained = 0usize;
        while let Some(pending) = receiver.recv().await {
            self.answer(pending);
            drained += 1;
        }

        info!(
            handler_id = %self.handler_id,
            drained = drained,
            "Timer action handler stopped"
        );
    }

    fn answer(&self, pending: PendingAction) {
        let result = self.settle(&pending.action, Utc::now().timestamp_millis());
        pending.complete(result);
    }

    /// Handle one action and decide whether its timer record may be committed
    pub fn settle(&self, action: &TimerAction, now_ms: i64) -> MessagingResult<()> {
        let key = action.task_key();
        match self.handle(action, now_ms) {
            Ok(_) => Ok(()),
            Err(WatcherError::Messaging(e)) => {
                warn!(
                    handler_id = %self.handler_id,
                    action = action.name(),
                    task_id = %key.task_id,
                    transaction_id = %key.transaction_id,
                    error = %e,
                    "Timer action publish refused, timer will be redelivered"
                );
                Err(e)
            }
            Err(e) => {
                // Redelivery cannot change a ledger rejection
                error!(
                    handler_id = %self.handler_id,
                    action = action.name(),
                    task_id = %key.task_id,
                    transaction_id = %key.transaction_id,
                    error = %e,
                    "Timer action failed"
                );
                Ok(())
            }
        }
    }
}
