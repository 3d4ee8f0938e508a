//! # Task Definition
//!
//! Registered configuration for a task type. Definitions arrive as sparse,
//! loosely-typed JSON ([`TaskDefinitionInput`]) and are turned into a fully
//! populated [`TaskDefinition`] by [`TaskDefinition::validate`], which checks the
//! name and the strategy requirements before applying defaults field by field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{task_definition as defaults, topic_configuration as topic_defaults};
use crate::state_machine::TaskState;
use crate::utils::serde::{
    deserialize_lenient_number, deserialize_lenient_string, deserialize_lenient_unsigned,
    deserialize_unsigned_or_numeric_string,
};
use crate::validation::{is_valid_name, ValidationError};

/// What the workflow layer does when a task fails or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    #[default]
    Failed,
    RecoveryWorkflow,
    Retry,
    /// Accepted and stored; no timer behavior is attached to it
    Rewide,
    Ignore,
}

impl fmt::Display for FailureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed => write!(f, "FAILED"),
            Self::RecoveryWorkflow => write!(f, "RECOVERY_WORKFLOW"),
            Self::Retry => write!(f, "RETRY"),
            Self::Rewide => write!(f, "REWIDE"),
            Self::Ignore => write!(f, "IGNORE"),
        }
    }
}

/// Broker topic settings for a task type's work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfiguration {
    #[serde(rename = "cleanup.policy")]
    pub cleanup_policy: String,
    #[serde(rename = "compression.type")]
    pub compression_type: String,
    #[serde(rename = "delete.retention.ms")]
    pub delete_retention_ms: u64,
    #[serde(rename = "file.delete.delay.ms")]
    pub file_delete_delay_ms: u64,
    /// Any other broker topic setting supplied by the caller
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for TopicConfiguration {
    fn default() -> Self {
        Self {
            cleanup_policy: topic_defaults::CLEANUP_POLICY.to_string(),
            compression_type: topic_defaults::COMPRESSION_TYPE.to_string(),
            delete_retention_ms: topic_defaults::DELETE_RETENTION_MS,
            file_delete_delay_ms: topic_defaults::FILE_DELETE_DELAY_MS,
            extra: BTreeMap::new(),
        }
    }
}

impl TopicConfiguration {
    /// Overlay caller-supplied settings onto `self`; supplied keys win, every other
    /// key keeps its current value.
    pub fn merged(self, overrides: TopicConfigurationOverrides) -> Self {
        let mut extra = self.extra;
        extra.extend(overrides.extra);

        Self {
            cleanup_policy: overrides.cleanup_policy.unwrap_or(self.cleanup_policy),
            compression_type: overrides.compression_type.unwrap_or(self.compression_type),
            delete_retention_ms: overrides
                .delete_retention_ms
                .unwrap_or(self.delete_retention_ms),
            file_delete_delay_ms: overrides
                .file_delete_delay_ms
                .unwrap_or(self.file_delete_delay_ms),
            extra,
        }
    }
}

/// Sparse topic settings as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicConfigurationOverrides {
    #[serde(
        rename = "cleanup.policy",
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub cleanup_policy: Option<String>,
    #[serde(
        rename = "compression.type",
        default,
        deserialize_with = "deserialize_lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub compression_type: Option<String>,
    #[serde(
        rename = "delete.retention.ms",
        default,
        deserialize_with = "deserialize_unsigned_or_numeric_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub delete_retention_ms: Option<u64>,
    #[serde(
        rename = "file.delete.delay.ms",
        default,
        deserialize_with = "deserialize_unsigned_or_numeric_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_delete_delay_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryInput {
    #[serde(default, deserialize_with = "deserialize_lenient_number")]
    pub limit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_number")]
    pub delay_second: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecoveryWorkflowInput {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_unsigned")]
    pub rev: Option<u32>,
}

/// Sparse task definition as submitted for registration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDefinitionInput {
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "deserialize_lenient_unsigned")]
    pub partitions_count: Option<u32>,
    #[serde(alias = "topicConfigurations")]
    pub topic_configuration: Option<TopicConfigurationOverrides>,
    #[serde(deserialize_with = "deserialize_lenient_unsigned")]
    pub response_timeout_second: Option<u64>,
    #[serde(deserialize_with = "deserialize_lenient_unsigned")]
    pub timeout_second: Option<u64>,
    pub timeout_strategy: Option<FailureStrategy>,
    pub failure_strategy: Option<FailureStrategy>,
    pub retry: Option<RetryInput>,
    pub recovery_workflow: Option<RecoveryWorkflowInput>,
}

impl TaskDefinitionInput {
    fn uses_strategy(&self, strategy: FailureStrategy) -> bool {
        self.timeout_strategy == Some(strategy) || self.failure_strategy == Some(strategy)
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        let retry = self.retry.as_ref()?;
        let limit = retry.limit?;
        Some(RetryPolicy {
            // Retry counts are whole, so 2.5 allows as many retries as 3
            limit: limit.ceil().clamp(0.0, f64::from(u32::MAX)) as u32,
            delay_second: retry.delay_second?,
        })
    }

    fn recovery_workflow(&self) -> Option<RecoveryWorkflow> {
        let recovery = self.recovery_workflow.as_ref()?;
        Some(RecoveryWorkflow {
            name: recovery.name.clone()?,
            rev: recovery.rev?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub limit: u32,
    /// May be fractional
    pub delay_second: f64,
}

impl RetryPolicy {
    /// Delay before the next attempt, rounded to whole milliseconds
    pub fn delay_ms(&self) -> u64 {
        (self.delay_second * 1000.0).round().max(0.0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryWorkflow {
    pub name: String,
    pub rev: u32,
}

/// Validated, fully populated task definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    pub partitions_count: u32,
    pub topic_configuration: TopicConfiguration,
    pub response_timeout_second: u64,
    pub timeout_second: u64,
    pub timeout_strategy: FailureStrategy,
    pub failure_strategy: FailureStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_workflow: Option<RecoveryWorkflow>,
}

impl TaskDefinition {
    /// Validate a sparse definition and fill in defaults.
    ///
    /// Checks run in a fixed order: name, recovery-workflow requirements, retry
    /// requirements. The first failing check decides the error.
    pub fn validate(input: TaskDefinitionInput) -> Result<Self, ValidationError> {
        let name = match input.name.as_deref() {
            Some(name) if is_valid_name(name) => name.to_string(),
            other => return Err(ValidationError::invalid_name(other.unwrap_or_default())),
        };

        let recovery_workflow = input.recovery_workflow();
        if input.uses_strategy(FailureStrategy::RecoveryWorkflow) && recovery_workflow.is_none() {
            return Err(ValidationError::MissingRecoveryWorkflowConfig);
        }

        let retry = input.retry_policy();
        if input.uses_strategy(FailureStrategy::Retry) && retry.is_none() {
            return Err(ValidationError::MissingRetryConfig);
        }

        let topic_configuration = TopicConfiguration::default()
            .merged(input.topic_configuration.unwrap_or_default());

        Ok(Self {
            name,
            description: input
                .description
                .unwrap_or_else(|| defaults::DESCRIPTION.to_string()),
            partitions_count: input.partitions_count.unwrap_or(defaults::PARTITIONS_COUNT),
            topic_configuration,
            response_timeout_second: input
                .response_timeout_second
                .unwrap_or(defaults::RESPONSE_TIMEOUT_SECOND),
            timeout_second: input.timeout_second.unwrap_or(defaults::TIMEOUT_SECOND),
            timeout_strategy: input.timeout_strategy.unwrap_or_default(),
            failure_strategy: input.failure_strategy.unwrap_or_default(),
            retry,
            recovery_workflow,
        })
    }

    /// Decode and validate a definition from raw JSON
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let input: TaskDefinitionInput =
            serde_json::from_value(value).map_err(ValidationError::malformed)?;
        Self::validate(input)
    }

    pub fn retry_limit(&self) -> Option<u32> {
        self.retry.map(|r| r.limit)
    }

    pub fn retry_delay_second(&self) -> Option<f64> {
        self.retry.map(|r| r.delay_second)
    }

    pub fn retry_delay_ms(&self) -> Option<u64> {
        self.retry.map(|r| r.delay_ms())
    }

    pub fn recovery_workflow_name(&self) -> Option<&str> {
        self.recovery_workflow.as_ref().map(|r| r.name.as_str())
    }

    pub fn recovery_workflow_rev(&self) -> Option<u32> {
        self.recovery_workflow.as_ref().map(|r| r.rev)
    }

    /// Strategy that applies when a task ends in `status`; `None` for non-error statuses
    pub fn strategy_for(&self, status: TaskState) -> Option<FailureStrategy> {
        match status {
            TaskState::Failed => Some(self.failure_strategy),
            TaskState::TimeOut => Some(self.timeout_strategy),
            TaskState::Scheduled
            | TaskState::Inprogress
            | TaskState::Paused
            | TaskState::Completed => None,
        }
    }
}
