//! Input validation for the watcher
//!
//! Identifier policy for task names and defensive decoding of broker payloads.
//! Payloads arrive as schema-less UTF-8 JSON, so decoding never panics and never
//! propagates a parse error into a consumption loop.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::constants::{DEFAULT_TASK_TOPIC_PREFIX, MAX_TOPIC_NAME_LENGTH};

/// Longest task name whose work-queue topic `task.<name>` is still a legal topic name
pub const MAX_TASK_NAME_LENGTH: usize = MAX_TOPIC_NAME_LENGTH - DEFAULT_TASK_TOPIC_PREFIX.len();

/// Reasons a task definition is rejected at registration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid task name: {name:?}")]
    InvalidName { name: String },

    #[error("Recovery workflow strategy requires recoveryWorkflow.name and recoveryWorkflow.rev")]
    MissingRecoveryWorkflowConfig,

    #[error("Retry strategy requires retry.limit and retry.delaySecond")]
    MissingRetryConfig,

    #[error("Malformed task definition: {reason}")]
    MalformedDefinition { reason: String },
}

impl ValidationError {
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::MalformedDefinition {
            reason: reason.to_string(),
        }
    }
}

/// Task names become part of broker topic names, so they follow the broker's
/// topic-name rules: non-empty, ASCII alphanumerics plus `.`, `_` and `-`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TASK_NAME_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Decode a JSON payload, falling back to `fallback` when the bytes are not valid
/// JSON for `T`.
pub fn json_try_parse<T: DeserializeOwned>(payload: &[u8], fallback: T) -> T {
    serde_json::from_slice(payload).unwrap_or(fallback)
}
