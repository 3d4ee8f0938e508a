//! # Task Status State Machine
//!
//! A pure decision function over task statuses. Storage of the current status lives
//! in the lifecycle ledger; this module only answers whether a change is legal.

pub mod errors;
pub mod states;
pub mod task_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use states::TaskState;
pub use task_state_machine::TaskStateMachine;
