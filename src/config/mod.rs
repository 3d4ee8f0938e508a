//! # Watcher Configuration
//!
//! Typed configuration for every component of the watcher. Each section carries a
//! `Default` so an empty configuration source yields a runnable watcher, and
//! [`WatcherConfig::validate`] rejects values the components cannot run with.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use task_watcher::config::ConfigManager;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let buckets = &manager.config().timer.delay_buckets_seconds;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{
    DEFAULT_COMMAND_TOPIC, DEFAULT_DELAY_BUCKETS_SECONDS, DEFAULT_EVENT_TOPIC,
    DEFAULT_TASK_TOPIC_PREFIX, DEFAULT_TIMER_TOPIC,
};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    pub broker: BrokerConfig,
    pub topics: TopicsConfig,
    pub topic_creation: TopicCreationConfig,
    pub timer: TimerConfig,
    pub producer: ProducerConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Consumer group shared by every watcher instance
    pub group_id: String,
    /// How long bootstrap waits for the broker handshake
    pub ready_timeout_ms: u64,
    /// How often the task intake refreshes its list of `task.*` topics
    pub metadata_refresh_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            group_id: "task-watcher".to_string(),
            ready_timeout_ms: 30_000,
            metadata_refresh_interval_ms: 5_000,
        }
    }
}

impl BrokerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn metadata_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.metadata_refresh_interval_ms)
    }
}

/// Topic names used by the watcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicsConfig {
    pub task_prefix: String,
    pub timer: String,
    pub event: String,
    pub command: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            task_prefix: DEFAULT_TASK_TOPIC_PREFIX.to_string(),
            timer: DEFAULT_TIMER_TOPIC.to_string(),
            event: DEFAULT_EVENT_TOPIC.to_string(),
            command: DEFAULT_COMMAND_TOPIC.to_string(),
        }
    }
}

/// Parameters for topics the watcher creates at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TopicCreationConfig {
    pub num_partitions: u32,
    pub replication_factor: u16,
    pub cleanup_policy: String,
    pub compression_type: String,
    pub retention_ms: u64,
    pub unclean_leader_election: bool,
}

impl Default for TopicCreationConfig {
    fn default() -> Self {
        Self {
            num_partitions: 10,
            replication_factor: 1,
            cleanup_policy: "delete".to_string(),
            compression_type: "snappy".to_string(),
            retention_ms: 604_800_000,
            unclean_leader_election: false,
        }
    }
}

/// Timer wheel settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimerConfig {
    /// Bucket thresholds in seconds; sorted and de-duplicated by the router
    pub delay_buckets_seconds: Vec<u64>,
    pub poll_batch_size: usize,
    pub poll_timeout_ms: u64,
    pub max_poll_interval_multiplier: u64,
    pub min_max_poll_interval_seconds: u64,
    /// Upper bound on the pause after a batch that only re-queued into its own bucket
    pub requeue_pause_ms: u64,
    pub action_channel_capacity: usize,
    /// Fallback acknowledgement window when neither task nor definition sets one
    pub default_ack_timeout_seconds: u64,
    /// Fallback execution window when neither task nor definition sets one
    pub default_execution_timeout_seconds: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            delay_buckets_seconds: DEFAULT_DELAY_BUCKETS_SECONDS.to_vec(),
            poll_batch_size: 100,
            poll_timeout_ms: 5,
            max_poll_interval_multiplier: 5,
            min_max_poll_interval_seconds: 30,
            requeue_pause_ms: 500,
            action_channel_capacity: 1_000,
            default_ack_timeout_seconds: 5,
            default_execution_timeout_seconds: 30,
        }
    }
}

impl TimerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn requeue_pause(&self) -> Duration {
        Duration::from_millis(self.requeue_pause_ms)
    }
}

/// Shared publish path settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProducerConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_size: 500,
            flush_interval_ms: 10,
        }
    }
}

impl ProducerConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl WatcherConfig {
    /// Validate configuration values the components cannot run without
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.group_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "group_id",
                "broker configuration",
            ));
        }

        for (field, name) in [
            ("topics.task_prefix", &self.topics.task_prefix),
            ("topics.timer", &self.topics.timer),
            ("topics.event", &self.topics.event),
            ("topics.command", &self.topics.command),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    field,
                    "topic configuration",
                ));
            }
        }

        if self.topic_creation.num_partitions == 0 {
            return Err(ConfigurationError::invalid_value(
                "topic_creation.num_partitions",
                self.topic_creation.num_partitions,
                "must be greater than 0",
            ));
        }

        if self.topic_creation.replication_factor == 0 {
            return Err(ConfigurationError::invalid_value(
                "topic_creation.replication_factor",
                self.topic_creation.replication_factor,
                "must be greater than 0",
            ));
        }

        if self.timer.delay_buckets_seconds.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "delay_buckets_seconds",
                "timer configuration",
            ));
        }

        if self.timer.delay_buckets_seconds.contains(&0) {
            return Err(ConfigurationError::invalid_value(
                "timer.delay_buckets_seconds",
                format!("{:?}", self.timer.delay_buckets_seconds),
                "thresholds must be greater than 0",
            ));
        }

        if self.timer.poll_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "timer.poll_batch_size",
                self.timer.poll_batch_size,
                "must be greater than 0",
            ));
        }

        if self.timer.action_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "timer.action_channel_capacity",
                self.timer.action_channel_capacity,
                "must be greater than 0",
            ));
        }

        if self.producer.buffer_capacity == 0 || self.producer.batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "producer",
                format!(
                    "buffer_capacity={}, batch_size={}",
                    self.producer.buffer_capacity, self.producer.batch_size
                ),
                "buffer capacity and batch size must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timer.delay_buckets_seconds, vec![5, 15, 60, 300, 1800]);
        assert_eq!(config.topic_creation.retention_ms, 604_800_000);
        assert_eq!(config.timer.poll_batch_size, 100);
    }

    #[test]
    fn test_empty_buckets_rejected() {
        let mut config = WatcherConfig::default();
        config.timer.delay_buckets_seconds.clear();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::MissingRequiredField { ref field, .. } if field == "delay_buckets_seconds"
        ));
    }

    #[test]
    fn test_zero_partitions_rejected() {
        let mut config = WatcherConfig::default();
        config.topic_creation.num_partitions = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_blank_topic_name_rejected() {
        let mut config = WatcherConfig::default();
        config.topics.event = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sparse_toml_keeps_section_defaults() {
        let config: WatcherConfig = serde_json::from_value(serde_json::json!({
            "timer": { "delay_buckets_seconds": [1, 10] }
        }))
        .unwrap();

        assert_eq!(config.timer.delay_buckets_seconds, vec![1, 10]);
        assert_eq!(config.timer.poll_timeout_ms, 5);
        assert_eq!(config.topics, TopicsConfig::default());
    }
}
