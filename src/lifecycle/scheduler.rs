//! # Lifecycle Scheduler
//!
//! Turns task-level events into timer events:
//!
//! - a dispatched task gets an acknowledgement deadline;
//! - the first acknowledgement (`SCHEDULED -> INPROGRESS`) gets an execution deadline;
//! - a failure or timeout whose strategy is `RETRY` gets a delayed re-dispatch while
//!   retries remain.
//!
//! Every other strategy is left to the decision layer outside the watcher.
//!
//! Windows resolve task value first (when non-zero), then the registered definition,
//! then the configured fallback. A resolved window of zero disables the timer.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ledger::{AppliedUpdate, TaskInstanceLedger, TaskRecord, TrackOutcome};
use super::registry::TaskDefinitionRegistry;
use crate::config::TimerConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::logging::log_transition_rejected;
use crate::models::{FailureStrategy, Task, TaskUpdate};
use crate::state_machine::{StateMachineError, TaskState};
use crate::timer::{TimerDispatcher, TimerEvent};

/// Result of observing a dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Tracked(TrackOutcome),
    /// Stale or duplicate dispatch the state machine refused
    Rejected,
    /// Snapshot without identifiers
    Ignored,
}

/// Result of observing a task update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied {
        previous: TaskState,
        current: TaskState,
    },
    Rejected,
    UnknownTask,
}

#[derive(Debug)]
pub struct TaskLifecycleScheduler {
    registry: Arc<TaskDefinitionRegistry>,
    ledger: Arc<TaskInstanceLedger>,
    dispatcher: Arc<TimerDispatcher>,
    default_ack_timeout_ms: u64,
    default_execution_timeout_ms: u64,
}

impl TaskLifecycleScheduler {
    pub fn new(
        registry: Arc<TaskDefinitionRegistry>,
        ledger: Arc<TaskInstanceLedger>,
        dispatcher: Arc<TimerDispatcher>,
        config: &TimerConfig,
    ) -> Self {
        Self {
            registry,
            ledger,
            dispatcher,
            default_ack_timeout_ms: config.default_ack_timeout_seconds.saturating_mul(1000),
            default_execution_timeout_ms: config
                .default_execution_timeout_seconds
                .saturating_mul(1000),
        }
    }

    /// Record a task seen on its work queue and start its acknowledgement window
    pub fn on_task_dispatched(&self, task: Task, now_ms: i64) -> WatcherResult<DispatchOutcome> {
        if !task.is_identifiable() {
            warn!(
                task_name = %task.task_name,
                "Ignoring dispatched task without task or transaction id"
            );
            return Ok(DispatchOutcome::Ignored);
        }

        let ack_window_ms = self.ack_window_ms(&task);
        let result = self.ledger.track_with(&task, |outcome, record| {
            if let Some(window) = ack_window_ms {
                let deadline = deadline_after(now_ms, window);
                self.dispatcher
                    .schedule_at(TimerEvent::ack_timeout(&task.key(), deadline), now_ms)?;
                record.ack_deadline_ms = Some(deadline);
            }
            debug!(
                task_id = %task.task_id,
                transaction_id = %task.transaction_id,
                outcome = ?outcome,
                "Tracked dispatched task"
            );
            Ok(())
        });

        match result {
            Ok(outcome) => Ok(DispatchOutcome::Tracked(outcome)),
            Err(WatcherError::StateTransition(StateMachineError::InvalidTransition { from, to })) => {
                log_transition_rejected(&task.task_id, &task.transaction_id, from, to, "dispatch");
                Ok(DispatchOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Apply a status update and schedule whatever timer the new status calls for
    pub fn on_task_update(&self, update: &TaskUpdate, now_ms: i64) -> WatcherResult<UpdateOutcome> {
        let result = self
            .ledger
            .apply_update_with(update, |applied, record| {
                self.on_accepted(applied, record, now_ms)
            });

        match result {
            Ok(applied) => Ok(UpdateOutcome::Applied {
                previous: applied.previous,
                current: applied.current,
            }),
            Err(WatcherError::StateTransition(StateMachineError::InvalidTransition { from, to })) => {
                log_transition_rejected(&update.task_id, &update.transaction_id, from, to, "update");
                Ok(UpdateOutcome::Rejected)
            }
            Err(WatcherError::StateTransition(StateMachineError::UnknownTask { .. })) => {
                debug!(
                    task_id = %update.task_id,
                    transaction_id = %update.transaction_id,
                    status = %update.status,
                    "Ignoring update for a task that was never dispatched here"
                );
                Ok(UpdateOutcome::UnknownTask)
            }
            Err(e) => Err(e),
        }
    }

    fn on_accepted(
        &self,
        applied: &AppliedUpdate,
        record: &mut TaskRecord,
        now_ms: i64,
    ) -> WatcherResult<()> {
        let task = &applied.snapshot;
        match (applied.previous, applied.current) {
            (TaskState::Scheduled, TaskState::Inprogress) => {
                record.ack_deadline_ms = None;
                if let Some(window) = self.execution_window_ms(task) {
                    let deadline = deadline_after(now_ms, window);
                    self.dispatcher
                        .schedule_at(TimerEvent::timeout(&task.key(), deadline), now_ms)?;
                    record.timeout_deadline_ms = Some(deadline);
                }
            }
            (_, status) if status.is_error() => self.apply_retry_policy(task, status, now_ms)?,
            _ => {}
        }
        Ok(())
    }

    fn apply_retry_policy(&self, task: &Task, status: TaskState, now_ms: i64) -> WatcherResult<()> {
        let Some(definition) = self.registry.get(&task.task_name) else {
            debug!(
                task_name = %task.task_name,
                status = %status,
                "No task definition registered, leaving outcome to the decision layer"
            );
            return Ok(());
        };

        match definition.strategy_for(status) {
            Some(FailureStrategy::Retry) => {
                let Some(retry) = definition.retry else {
                    return Ok(());
                };
                if task.retries >= retry.limit {
                    info!(
                        task_id = %task.task_id,
                        transaction_id = %task.transaction_id,
                        retries = task.retries,
                        retry_limit = retry.limit,
                        "Retry limit reached"
                    );
                    return Ok(());
                }

                let delay_ms = if task.retry_delay > 0 {
                    task.retry_delay
                } else {
                    retry.delay_ms()
                };
                let next_attempt = task.next_attempt();
                let attempt = next_attempt.retries;
                self.dispatcher.schedule_at(
                    TimerEvent::delay(next_attempt, deadline_after(now_ms, delay_ms)),
                    now_ms,
                )?;
                info!(
                    task_id = %task.task_id,
                    transaction_id = %task.transaction_id,
                    status = %status,
                    attempt = attempt,
                    delay_ms = delay_ms,
                    "Scheduled retry"
                );
            }
            Some(strategy) => {
                debug!(
                    task_id = %task.task_id,
                    transaction_id = %task.transaction_id,
                    status = %status,
                    strategy = %strategy,
                    "Leaving outcome to the decision layer"
                );
            }
            None => {}
        }
        Ok(())
    }

    fn ack_window_ms(&self, task: &Task) -> Option<u64> {
        let window = if task.ack_timeout > 0 {
            task.ack_timeout
        } else {
            self.registry
                .get(&task.task_name)
                .map(|d| d.response_timeout_second.saturating_mul(1000))
                .unwrap_or(self.default_ack_timeout_ms)
        };
        (window > 0).then_some(window)
    }

    fn execution_window_ms(&self, task: &Task) -> Option<u64> {
        let window = if task.timeout > 0 {
            task.timeout
        } else {
            self.registry
                .get(&task.task_name)
                .map(|d| d.timeout_second.saturating_mul(1000))
                .unwrap_or(self.default_execution_timeout_ms)
        };
        (window > 0).then_some(window)
    }

    pub fn ledger(&self) -> &TaskInstanceLedger {
        &self.ledger
    }
}

fn deadline_after(now_ms: i64, window_ms: u64) -> i64 {
    now_ms.saturating_add(i64::try_from(window_ms).unwrap_or(i64::MAX))
}
