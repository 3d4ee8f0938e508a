//! # Crate Error Types
//!
//! Top-level error for the watcher. Each layer keeps its own `thiserror` enum and
//! converts into [`WatcherError`] at the seams where layers meet.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::state_machine::StateMachineError;
use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid task definition: {0}")]
    TaskDefinition(#[from] ValidationError),

    #[error("Task definition already registered: {name}")]
    DefinitionAlreadyRegistered { name: String },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateMachineError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl WatcherError {
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::DefinitionAlreadyRegistered { name: name.into() }
    }
}

pub type WatcherResult<T> = std::result::Result<T, WatcherError>;
