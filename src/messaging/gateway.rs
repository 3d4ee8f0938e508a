//! # Broker Gateway
//!
//! Provider-agnostic boundary over a partitioned, log-based message broker.
//!
//! A single gateway handle is constructed at startup and shared as
//! `Arc<dyn BrokerGateway>` by every component. Readiness is an explicit wait
//! ([`BrokerGateway::wait_until_ready`]) rather than a callback.
//!
//! Semantics every provider must honor:
//!
//! - records with the same key land on the same partition, in produce order
//! - consumers read per consumer group; `poll` advances the group's position,
//!   `commit` records the next offset to read after a restart or a seek
//! - `seek_to_committed` rewinds a partition to its committed offset so that
//!   uncommitted records are delivered again (at-least-once)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::errors::{MessagingError, MessagingResult};
use crate::config::TopicCreationConfig;

/// Parameters for creating a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub num_partitions: u32,
    pub replication_factor: u16,
    pub config: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, num_partitions: u32, replication_factor: u16) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    /// Topic spec carrying the watcher's configured creation parameters
    pub fn from_creation_config(name: impl Into<String>, config: &TopicCreationConfig) -> Self {
        let mut spec = Self::new(name, config.num_partitions, config.replication_factor);
        spec.config
            .insert("cleanup.policy".to_string(), config.cleanup_policy.clone());
        spec.config
            .insert("compression.type".to_string(), config.compression_type.clone());
        spec.config
            .insert("retention.ms".to_string(), config.retention_ms.to_string());
        spec.config.insert(
            "unclean.leader.election.enable".to_string(),
            config.unclean_leader_election.to_string(),
        );
        spec
    }
}

/// Record handed to the broker for publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    /// Partition key; records without a key are spread across partitions
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: Some(key.into()),
            payload,
        }
    }

    /// Serialize `message` as JSON keyed by `key`
    pub fn json<T: BrokerMessage>(
        topic: impl Into<String>,
        key: impl Into<String>,
        message: &T,
    ) -> MessagingResult<Self> {
        Ok(Self::new(topic, key, message.to_bytes()?))
    }
}

/// Record read back from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    /// Append time in epoch milliseconds
    pub timestamp_ms: i64,
}

impl BrokerRecord {
    /// Offset to commit once this record is handled
    pub fn next_offset(&self) -> TopicPartitionOffset {
        TopicPartitionOffset {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset + 1,
        }
    }
}

/// Position within one topic partition. When committed, `offset` is the next
/// offset the group will read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// JSON encoding for anything published through the gateway
pub trait BrokerMessage: Send + Sync + 'static {
    fn to_bytes(&self) -> MessagingResult<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> MessagingResult<Self>
    where
        Self: Sized;
}

impl<T> BrokerMessage for T
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

/// Operations the watcher needs from a broker
#[async_trait]
pub trait BrokerGateway: Send + Sync + fmt::Debug + 'static {
    /// Resolve once the connection handshake has completed, or fail after `timeout`
    async fn wait_until_ready(&self, timeout: Duration) -> MessagingResult<()>;

    /// Create a topic. An existing topic is reported as
    /// [`MessagingError::TopicAlreadyExists`]; see [`ensure_topic`].
    async fn create_topic(&self, spec: &TopicSpec) -> MessagingResult<()>;

    async fn list_topics(&self) -> MessagingResult<Vec<String>>;

    /// Publish records; per-key order within the batch is preserved
    async fn produce(&self, records: &[ProducerRecord]) -> MessagingResult<()>;

    /// Read up to `max_records` from `topics` for `group_id`, waiting at most
    /// `timeout` for the first record to arrive
    async fn poll(
        &self,
        group_id: &str,
        topics: &[String],
        max_records: usize,
        timeout: Duration,
    ) -> MessagingResult<Vec<BrokerRecord>>;

    async fn commit(&self, group_id: &str, offsets: &[TopicPartitionOffset])
        -> MessagingResult<()>;

    /// Rewind the group's position on one partition to its committed offset
    async fn seek_to_committed(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> MessagingResult<()>;

    async fn health_check(&self) -> MessagingResult<bool>;

    fn provider_name(&self) -> &'static str;
}

/// Create a topic, treating "already exists" as success. Returns whether the
/// topic was newly created.
pub async fn ensure_topic(gateway: &dyn BrokerGateway, spec: &TopicSpec) -> MessagingResult<bool> {
    match gateway.create_topic(spec).await {
        Ok(()) => Ok(true),
        Err(MessagingError::TopicAlreadyExists { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

pub type SharedGateway = Arc<dyn BrokerGateway>;
