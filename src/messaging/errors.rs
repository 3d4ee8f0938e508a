//! # Messaging Error Types
//!
//! Structured errors for the broker boundary, the shared producer and the
//! in-process hand-off channels.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("Broker not ready after {timeout_ms}ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("Topic already exists: {topic}")]
    TopicAlreadyExists { topic: String },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Topic creation failed: {topic}: {message}")]
    TopicCreation { topic: String, message: String },

    #[error("Produce failed: {topic}: {message}")]
    Produce { topic: String, message: String },

    #[error("Commit failed for group {group_id}: {message}")]
    Commit { group_id: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Producer buffer full: capacity {capacity}")]
    QueueFull { capacity: usize },

    #[error("Producer closed")]
    ProducerClosed,

    #[error("Producer closed with {records} undelivered records")]
    Undelivered { records: usize },

    #[error("Channel full: {channel}")]
    ChannelFull { channel: String },

    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },
}

impl MessagingError {
    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::BrokerUnavailable {
            message: message.into(),
        }
    }

    pub fn topic_already_exists(topic: impl Into<String>) -> Self {
        Self::TopicAlreadyExists {
            topic: topic.into(),
        }
    }

    pub fn topic_not_found(topic: impl Into<String>) -> Self {
        Self::TopicNotFound {
            topic: topic.into(),
        }
    }

    pub fn topic_creation(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TopicCreation {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn produce(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Produce {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn commit(group_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Commit {
            group_id: group_id.into(),
            message: message.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn channel_full(channel: impl Into<String>) -> Self {
        Self::ChannelFull {
            channel: channel.into(),
        }
    }

    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Transient conditions worth retrying on the next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable { .. }
                | Self::ReadyTimeout { .. }
                | Self::Produce { .. }
                | Self::Commit { .. }
                | Self::QueueFull { .. }
                | Self::ChannelFull { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(error: serde_json::Error) -> Self {
        Self::message_serialization(error.to_string())
    }
}

pub type MessagingResult<T> = Result<T, MessagingError>;
