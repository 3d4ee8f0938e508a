//! # Task Lifecycle
//!
//! Everything between the broker topics and the timer wheel: the registry of task
//! definitions, the ledger of task instances, the scheduler that turns lifecycle
//! events into timers, the handler that evaluates due timers, and the intake loop
//! feeding the scheduler from the work queues and the event topic.

pub mod action_handler;
pub mod intake;
pub mod ledger;
pub mod registry;
pub mod scheduler;

pub use action_handler::{ActionOutcome, TimerActionHandler};
pub use intake::{IntakeOutcome, IntakeReport, TaskEventIntake};
pub use ledger::{AppliedUpdate, TaskInstanceLedger, TaskRecord, TrackOutcome};
pub use registry::TaskDefinitionRegistry;
pub use scheduler::{DispatchOutcome, TaskLifecycleScheduler, UpdateOutcome};
