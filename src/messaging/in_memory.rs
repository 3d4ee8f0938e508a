//! # In-Memory Broker
//!
//! Partitioned, log-structured broker kept entirely in memory, for tests and local
//! development.
//!
//! ## Features
//!
//! - **Partitioned logs**: records are hashed by key onto a topic's partitions and
//!   keep their produce order within a partition
//! - **Consumer groups**: per-group position and committed offset for every
//!   partition, with `seek_to_committed` for redelivery
//! - **Blocking poll**: `poll` waits up to its timeout for new records
//! - **Fault injection**: readiness and produce failures can be toggled for tests

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::errors::{MessagingError, MessagingResult};
use super::gateway::{BrokerGateway, BrokerRecord, ProducerRecord, TopicPartitionOffset, TopicSpec};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    payload: Vec<u8>,
    timestamp_ms: i64,
}

#[derive(Debug)]
struct InMemoryTopic {
    spec: TopicSpec,
    partitions: Vec<Vec<StoredRecord>>,
}

impl InMemoryTopic {
    fn new(spec: TopicSpec) -> Self {
        let partitions = (0..spec.num_partitions.max(1)).map(|_| Vec::new()).collect();
        Self { spec, partitions }
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }
}

/// Read position of one consumer group on one partition
#[derive(Debug, Clone, Copy, Default)]
struct GroupCursor {
    position: i64,
    committed: i64,
}

type CursorKey = (String, String, i32);

/// In-memory broker implementing [`BrokerGateway`]
#[derive(Debug)]
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, InMemoryTopic>>,
    cursors: Mutex<HashMap<CursorKey, GroupCursor>>,
    appended: Notify,
    ready: watch::Sender<bool>,
    auto_create_topics: bool,
    default_partitions: u32,
    fail_produce: AtomicBool,
    unkeyed_counter: AtomicU64,
    total_produced: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Ready broker that creates unknown topics on first produce
    pub fn new() -> Self {
        let (ready, _) = watch::channel(true);
        Self {
            topics: RwLock::new(HashMap::new()),
            cursors: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            ready,
            auto_create_topics: true,
            default_partitions: 3,
            fail_produce: AtomicBool::new(false),
            unkeyed_counter: AtomicU64::new(0),
            total_produced: AtomicU64::new(0),
        }
    }

    pub fn with_auto_create_topics(mut self, enabled: bool) -> Self {
        self.auto_create_topics = enabled;
        self
    }

    pub fn with_default_partitions(mut self, partitions: u32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Broker whose handshake has not completed yet; see [`Self::set_ready`]
    pub fn not_ready(self) -> Self {
        self.ready.send_replace(false);
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
    }

    /// Make every produce call fail until switched off (for testing)
    pub fn set_produce_failure(&self, fail: bool) {
        self.fail_produce.store(fail, Ordering::SeqCst);
    }

    /// Total records appended since creation
    pub fn total_produced(&self) -> u64 {
        self.total_produced.load(Ordering::Relaxed)
    }

    /// Number of records in a topic across partitions (for testing)
    pub async fn topic_len(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics.get(topic).map(InMemoryTopic::len).unwrap_or(0)
    }

    /// Every record of a topic, partition by partition (for testing)
    pub async fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        let topics = self.topics.read().await;
        let Some(stored) = topics.get(topic) else {
            return Vec::new();
        };

        stored
            .partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, record)| to_broker_record(topic, partition, offset, record))
            })
            .collect()
    }

    /// Committed offset of `group_id` on one partition (for testing)
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.cursors
            .lock()
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .map(|cursor| cursor.committed)
    }

    /// Spec a topic was created with (for testing)
    pub async fn topic_spec(&self, topic: &str) -> Option<TopicSpec> {
        let topics = self.topics.read().await;
        topics.get(topic).map(|t| t.spec.clone())
    }

    fn partition_for(&self, key: Option<&str>, partitions: usize) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions as u64) as usize
            }
            None => (self.unkeyed_counter.fetch_add(1, Ordering::Relaxed) % partitions as u64) as usize,
        }
    }

    async fn collect(
        &self,
        group_id: &str,
        topics: &[String],
        max_records: usize,
    ) -> Vec<BrokerRecord> {
        let stored = self.topics.read().await;
        let mut cursors = self.cursors.lock();
        let mut collected = Vec::new();

        for topic in topics {
            let Some(log) = stored.get(topic) else {
                continue;
            };

            for (partition, records) in log.partitions.iter().enumerate() {
                if collected.len() >= max_records {
                    return collected;
                }

                let cursor = cursors
                    .entry((group_id.to_string(), topic.clone(), partition as i32))
                    .or_default();

                while collected.len() < max_records {
                    let Some(record) = records.get(cursor.position as usize) else {
                        break;
                    };
                    collected.push(to_broker_record(
                        topic,
                        partition,
                        cursor.position as usize,
                        record,
                    ));
                    cursor.position += 1;
                }
            }
        }

        collected
    }
}

fn to_broker_record(topic: &str, partition: usize, offset: usize, record: &StoredRecord) -> BrokerRecord {
    BrokerRecord {
        topic: topic.to_string(),
        partition: partition as i32,
        offset: offset as i64,
        key: record.key.clone(),
        payload: record.payload.clone(),
        timestamp_ms: record.timestamp_ms,
    }
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn wait_until_ready(&self, timeout: Duration) -> MessagingResult<()> {
        let mut ready = self.ready.subscribe();
        let waited = tokio::time::timeout(timeout, ready.wait_for(|ready| *ready))
            .await
            .map(|result| result.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MessagingError::broker_unavailable("readiness signal dropped")),
            Err(_) => Err(MessagingError::ReadyTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn create_topic(&self, spec: &TopicSpec) -> MessagingResult<()> {
        if spec.num_partitions == 0 {
            return Err(MessagingError::topic_creation(
                &spec.name,
                "partition count must be greater than 0",
            ));
        }

        let mut topics = self.topics.write().await;
        if topics.contains_key(&spec.name) {
            return Err(MessagingError::topic_already_exists(&spec.name));
        }

        debug!(topic = %spec.name, partitions = spec.num_partitions, "Creating in-memory topic");
        topics.insert(spec.name.clone(), InMemoryTopic::new(spec.clone()));
        Ok(())
    }

    async fn list_topics(&self) -> MessagingResult<Vec<String>> {
        let topics = self.topics.read().await;
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn produce(&self, records: &[ProducerRecord]) -> MessagingResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        if self.fail_produce.load(Ordering::SeqCst) {
            let topic = records
                .first()
                .map(|r| r.topic.clone())
                .unwrap_or_default();
            return Err(MessagingError::produce(topic, "injected produce failure"));
        }

        let mut topics = self.topics.write().await;

        // Reject the whole batch before appending anything
        if !self.auto_create_topics {
            if let Some(missing) = records.iter().find(|r| !topics.contains_key(&r.topic)) {
                return Err(MessagingError::topic_not_found(&missing.topic));
            }
        }

        let now = Utc::now().timestamp_millis();
        let count = records.len() as u64;
        for record in records {
            let default_partitions = self.default_partitions;
            let topic = topics.entry(record.topic.clone()).or_insert_with(|| {
                InMemoryTopic::new(TopicSpec::new(&record.topic, default_partitions, 1))
            });
            let partition = self.partition_for(record.key.as_deref(), topic.partitions.len());
            topic.partitions[partition].push(StoredRecord {
                key: record.key.clone(),
                payload: record.payload.clone(),
                timestamp_ms: now,
            });
        }
        drop(topics);

        self.total_produced.fetch_add(count, Ordering::Relaxed);
        self.appended.notify_waiters();
        Ok(())
    }

    async fn poll(
        &self,
        group_id: &str,
        topics: &[String],
        max_records: usize,
        timeout: Duration,
    ) -> MessagingResult<Vec<BrokerRecord>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before reading so a concurrent produce is not missed
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let records = self.collect(group_id, topics, max_records).await;
            if !records.is_empty() {
                return Ok(records);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            if tokio::time::timeout(deadline - now, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self, group_id: &str, offsets: &[TopicPartitionOffset]) -> MessagingResult<()> {
        let topics = self.topics.read().await;
        let mut cursors = self.cursors.lock();

        for tpo in offsets {
            let Some(topic) = topics.get(&tpo.topic) else {
                return Err(MessagingError::topic_not_found(&tpo.topic));
            };
            if tpo.partition < 0 || tpo.partition as usize >= topic.partitions.len() {
                return Err(MessagingError::commit(
                    group_id,
                    format!("partition {} out of range for {}", tpo.partition, tpo.topic),
                ));
            }

            let cursor = cursors
                .entry((group_id.to_string(), tpo.topic.clone(), tpo.partition))
                .or_default();
            cursor.committed = tpo.offset;
        }

        Ok(())
    }

    async fn seek_to_committed(
        &self,
        group_id: &str,
        topic: &str,
        partition: i32,
    ) -> MessagingResult<()> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors
            .entry((group_id.to_string(), topic.to_string(), partition))
            .or_default();
        cursor.position = cursor.committed;
        Ok(())
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(*self.ready.borrow())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
