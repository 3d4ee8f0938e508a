//! # Timer Actions
//!
//! Due timer events become [`TimerAction`]s and are handed from the bucket consumers
//! to the single timer-action handler over one bounded channel. The channel is
//! wrapped in newtypes so a sender of actions cannot be confused with any other
//! channel in the watcher.
//!
//! Every hand-off carries a completion the handler answers once the action's
//! publish was accepted or refused. The bucket consumer waits on it before the
//! record counts as handled, so a refused publish leaves the record uncommitted
//! and it is delivered again. Handing off never waits for channel space: a full or
//! closed channel is reported as an error right away.

use tokio::sync::{mpsc, oneshot};

use super::events::TimerEvent;
use crate::messaging::{MessagingError, MessagingResult};
use crate::models::{Task, TaskKey};

const CHANNEL_NAME: &str = "timer_actions";

/// A timer that came due
#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    /// Re-dispatch a delayed task
    DispatchTask(Task),
    /// Dispatched task was not acknowledged in time
    AckTimeoutElapsed(TaskKey),
    /// Running task did not finish in time
    TimeoutElapsed(TaskKey),
    /// Task is due to be force-completed
    CompletionDue(TaskKey),
}

impl TimerAction {
    pub fn task_key(&self) -> TaskKey {
        match self {
            Self::DispatchTask(task) => task.key(),
            Self::AckTimeoutElapsed(key) | Self::TimeoutElapsed(key) | Self::CompletionDue(key) => {
                key.clone()
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DispatchTask(_) => "dispatch_task",
            Self::AckTimeoutElapsed(_) => "ack_timeout_elapsed",
            Self::TimeoutElapsed(_) => "timeout_elapsed",
            Self::CompletionDue(_) => "completion_due",
        }
    }
}

impl From<TimerEvent> for TimerAction {
    fn from(event: TimerEvent) -> Self {
        match event {
            TimerEvent::Delay { task, .. } => Self::DispatchTask(task),
            TimerEvent::AckTimeout {
                task_id,
                transaction_id,
                ..
            } => Self::AckTimeoutElapsed(TaskKey::new(transaction_id, task_id)),
            TimerEvent::Timeout {
                task_id,
                transaction_id,
                ..
            } => Self::TimeoutElapsed(TaskKey::new(transaction_id, task_id)),
            TimerEvent::Complete {
                task_id,
                transaction_id,
                ..
            } => Self::CompletionDue(TaskKey::new(transaction_id, task_id)),
        }
    }
}

/// An action waiting in the channel, with the completion its sender waits on
#[derive(Debug)]
pub struct PendingAction {
    pub action: TimerAction,
    completion: oneshot::Sender<MessagingResult<()>>,
}

impl PendingAction {
    /// Report the handling result back to the bucket consumer
    pub fn complete(self, result: MessagingResult<()>) {
        // The consumer may have stopped waiting; its record is then redelivered anyway
        let _ = self.completion.send(result);
    }
}

/// Handling result of one handed-off action
#[derive(Debug)]
pub struct ActionCompletion(oneshot::Receiver<MessagingResult<()>>);

impl ActionCompletion {
    /// Wait for the handler. A handler that went away without answering counts
    /// as a failure.
    pub async fn wait(self) -> MessagingResult<()> {
        self.0
            .await
            .map_err(|_| MessagingError::channel_closed(CHANNEL_NAME))?
    }
}

/// Sending half used by the bucket consumers
#[derive(Debug, Clone)]
pub struct TimerActionSender(pub(crate) mpsc::Sender<PendingAction>);

/// Receiving half owned by the timer-action handler
#[derive(Debug)]
pub struct TimerActionReceiver(pub(crate) mpsc::Receiver<PendingAction>);

/// Create the bounded action channel
pub fn timer_action_channel(capacity: usize) -> (TimerActionSender, TimerActionReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (TimerActionSender(sender), TimerActionReceiver(receiver))
}

impl TimerActionSender {
    /// Hand an action over without waiting for channel space
    pub fn try_send(&self, action: TimerAction) -> MessagingResult<ActionCompletion> {
        let (completion, result) = oneshot::channel();
        self.0
            .try_send(PendingAction { action, completion })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => MessagingError::channel_full(CHANNEL_NAME),
                mpsc::error::TrySendError::Closed(_) => {
                    MessagingError::channel_closed(CHANNEL_NAME)
                }
            })?;
        Ok(ActionCompletion(result))
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Remaining free slots
    pub fn capacity(&self) -> usize {
        self.0.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.0.max_capacity()
    }
}

impl TimerActionReceiver {
    pub async fn recv(&mut self) -> Option<PendingAction> {
        self.0.recv().await
    }

    pub fn try_recv(&mut self) -> Result<PendingAction, mpsc::error::TryRecvError> {
        self.0.try_recv()
    }

    /// Stop accepting actions; already queued actions can still be received
    pub fn close(&mut self) {
        self.0.close()
    }
}
