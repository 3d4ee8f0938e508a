use super::{
    errors::{StateMachineError, StateMachineResult},
    states::TaskState,
};

/// Transition table for task instance statuses.
///
/// Stateless: callers own the stored status and ask the machine whether an incoming
/// status may replace it. Under at-least-once delivery this is the only guard against
/// duplicate and reordered updates, so every rejection leaves the stored status as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Statuses reachable from `current` in one step
    pub fn allowed_next(current: TaskState) -> &'static [TaskState] {
        use TaskState::*;

        match current {
            Scheduled => &[Inprogress, Paused],
            Inprogress => &[Completed, Failed, Inprogress, TimeOut, Paused],
            Paused => &[Completed, Failed, Inprogress, TimeOut, Paused],
            Failed => &[Scheduled],
            TimeOut => &[Scheduled],
            Completed => &[],
        }
    }

    pub fn can_transition(current: TaskState, incoming: TaskState) -> bool {
        Self::allowed_next(current).contains(&incoming)
    }

    /// Validate `incoming` against `current`, returning the new stored status
    pub fn transition(current: TaskState, incoming: TaskState) -> StateMachineResult<TaskState> {
        if Self::can_transition(current, incoming) {
            Ok(incoming)
        } else {
            Err(StateMachineError::invalid_transition(current, incoming))
        }
    }
}
