//! # System Constants
//!
//! Default topic names, bucket thresholds and topic-configuration defaults shared by
//! the configuration layer and the task-definition validator.

/// Prefix of per-task-type work queues; the full topic is `<prefix><task name>`
pub const DEFAULT_TASK_TOPIC_PREFIX: &str = "task.";
pub const DEFAULT_TIMER_TOPIC: &str = "timer";
pub const DEFAULT_EVENT_TOPIC: &str = "event";
pub const DEFAULT_COMMAND_TOPIC: &str = "command";

/// Ascending bucket thresholds in seconds
pub const DEFAULT_DELAY_BUCKETS_SECONDS: [u64; 5] = [5, 15, 60, 300, 1800];

/// Broker limit on topic name length
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Task definition defaults
pub mod task_definition {
    pub const DESCRIPTION: &str = "No description";
    pub const PARTITIONS_COUNT: u32 = 10;
    pub const RESPONSE_TIMEOUT_SECOND: u64 = 5;
    pub const TIMEOUT_SECOND: u64 = 30;
}

/// Per-task-type topic configuration defaults
pub mod topic_configuration {
    pub const CLEANUP_POLICY: &str = "compact";
    pub const COMPRESSION_TYPE: &str = "snappy";
    pub const DELETE_RETENTION_MS: u64 = 86_400_000;
    pub const FILE_DELETE_DELAY_MS: u64 = 60_000;
}
