//! # Buffered Producer
//!
//! The single publish path shared by every loop in the watcher. Sends are accepted
//! into a bounded local buffer without waiting; a background task flushes the buffer
//! to the broker once a batch fills up and on every flush interval.
//!
//! A send succeeding means "accepted into the buffer". A flush that fails keeps its
//! batch and retries it on the next interval, so per-key order is preserved.
//!
//! Flush and close requests travel on their own channel, which the flush loop keeps
//! reading even while a failing broker has stopped it from accepting records.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use super::gateway::{BrokerGateway, BrokerMessage, ProducerRecord};
use crate::config::ProducerConfig;

const CONTROL_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug)]
enum ControlMessage {
    Flush(oneshot::Sender<MessagingResult<()>>),
    Close(oneshot::Sender<MessagingResult<()>>),
}

/// Cloneable handle onto the shared producer
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    records: mpsc::Sender<ProducerRecord>,
    control: mpsc::Sender<ControlMessage>,
    capacity: usize,
    producer_id: Uuid,
}

/// Background flush loop behind a [`ProducerHandle`]
pub struct BufferedProducer {
    gateway: Arc<dyn BrokerGateway>,
    config: ProducerConfig,
    records: mpsc::Receiver<ProducerRecord>,
    control: mpsc::Receiver<ControlMessage>,
    pending: Vec<ProducerRecord>,
    producer_id: Uuid,
}

impl std::fmt::Debug for BufferedProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedProducer")
            .field("producer_id", &self.producer_id)
            .field("provider", &self.gateway.provider_name())
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl BufferedProducer {
    /// Spawn the flush loop and return a handle onto it
    pub fn start(gateway: Arc<dyn BrokerGateway>, config: ProducerConfig) -> ProducerHandle {
        let capacity = config.buffer_capacity.max(1);
        let (record_sender, record_receiver) = mpsc::channel(capacity);
        let (control_sender, control_receiver) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let producer_id = Uuid::new_v4();

        info!(
            producer_id = %producer_id,
            provider = gateway.provider_name(),
            buffer_capacity = capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            "Starting buffered producer"
        );

        let producer = Self {
            gateway,
            config,
            records: record_receiver,
            control: control_receiver,
            pending: Vec::new(),
            producer_id,
        };
        tokio::spawn(producer.run());

        ProducerHandle {
            records: record_sender,
            control: control_sender,
            capacity,
            producer_id,
        }
    }

    async fn run(mut self) {
        let mut ticker = interval(self.config.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let batch_size = self.config.batch_size.max(1);
        // Stop draining the record channel while a failing broker keeps this many
        // records pending, so callers see QueueFull instead of unbounded growth.
        let pending_limit = self.config.buffer_capacity.max(batch_size);

        loop {
            tokio::select! {
                biased;

                control = self.control.recv() => {
                    match control {
                        Some(ControlMessage::Flush(reply)) => {
                            self.drain_records();
                            let _ = reply.send(self.flush().await);
                        }
                        Some(ControlMessage::Close(reply)) => {
                            let _ = reply.send(self.close().await);
                            break;
                        }
                        None => {
                            let _ = self.close().await;
                            break;
                        }
                    }
                }
                record = self.records.recv(), if self.pending.len() < pending_limit => {
                    match record {
                        Some(record) => {
                            self.pending.push(record);
                            if self.pending.len() >= batch_size {
                                let _ = self.flush().await;
                            }
                        }
                        None => {
                            let _ = self.close().await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !self.pending.is_empty() {
                        let _ = self.flush().await;
                    }
                }
            }
        }

        info!(
            producer_id = %self.producer_id,
            unflushed = self.pending.len(),
            "Buffered producer stopped"
        );
    }

    /// Move every record already accepted into the pending batch
    fn drain_records(&mut self) {
        while let Ok(record) = self.records.try_recv() {
            self.pending.push(record);
        }
    }

    /// Refuse further sends and make one last flush attempt. Records the broker
    /// did not take are reported, not retried.
    async fn close(&mut self) -> MessagingResult<()> {
        self.records.close();
        self.control.close();
        self.drain_records();

        match self.flush().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    producer_id = %self.producer_id,
                    undelivered = self.pending.len(),
                    error = %e,
                    "Producer closed with undelivered records"
                );
                Err(MessagingError::Undelivered {
                    records: self.pending.len(),
                })
            }
        }
    }

    async fn flush(&mut self) -> MessagingResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        match self.gateway.produce(&self.pending).await {
            Ok(()) => {
                debug!(
                    producer_id = %self.producer_id,
                    records = self.pending.len(),
                    "Flushed producer batch"
                );
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                warn!(
                    producer_id = %self.producer_id,
                    records = self.pending.len(),
                    error = %e,
                    "Producer flush failed, retaining batch for retry"
                );
                Err(e)
            }
        }
    }
}

impl ProducerHandle {
    /// Accept a record into the send buffer without waiting
    pub fn send(&self, record: ProducerRecord) -> MessagingResult<()> {
        self.records.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MessagingError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => MessagingError::ProducerClosed,
        })
    }

    /// Serialize `message` as JSON and accept it into the send buffer
    pub fn send_json<T: BrokerMessage>(
        &self,
        topic: impl Into<String>,
        key: impl Into<String>,
        message: &T,
    ) -> MessagingResult<()> {
        self.send(ProducerRecord::json(topic, key, message)?)
    }

    /// Flush everything accepted so far and wait for the broker's answer
    pub async fn flush(&self) -> MessagingResult<()> {
        self.request(ControlMessage::Flush).await
    }

    /// Flush remaining records and stop the producer. Later sends fail with
    /// [`MessagingError::ProducerClosed`]; records the broker refused during the
    /// final flush are reported as [`MessagingError::Undelivered`].
    pub async fn close(&self) -> MessagingResult<()> {
        self.request(ControlMessage::Close).await
    }

    async fn request(
        &self,
        message: fn(oneshot::Sender<MessagingResult<()>>) -> ControlMessage,
    ) -> MessagingResult<()> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(message(reply))
            .await
            .map_err(|_| MessagingError::ProducerClosed)?;
        response.await.map_err(|_| MessagingError::ProducerClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.records.is_closed()
    }

    pub fn producer_id(&self) -> Uuid {
        self.producer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::in_memory::InMemoryBroker;
    use std::time::Duration;

    fn config(buffer_capacity: usize, batch_size: usize, flush_interval_ms: u64) -> ProducerConfig {
        ProducerConfig {
            buffer_capacity,
            batch_size,
            flush_interval_ms,
        }
    }

    fn record(key: &str) -> ProducerRecord {
        ProducerRecord::new("timer-5", key, b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_explicit_flush_publishes() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BufferedProducer::start(broker.clone(), config(100, 50, 60_000));

        producer.send(record("tx-1")).unwrap();
        producer.send(record("tx-2")).unwrap();
        producer.flush().await.unwrap();

        assert_eq!(broker.topic_len("timer-5").await, 2);
    }

    #[tokio::test]
    async fn test_interval_flush_publishes() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BufferedProducer::start(broker.clone(), config(100, 50, 5));

        producer
            .send_json("event", "tx-1", &serde_json::json!({"status": "COMPLETED"}))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.topic_len("event").await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_failed_flush_retained_and_retried() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BufferedProducer::start(broker.clone(), config(100, 50, 60_000));

        broker.set_produce_failure(true);
        producer.send(record("tx-1")).unwrap();
        assert!(producer.flush().await.is_err());
        assert_eq!(broker.topic_len("timer-5").await, 0);

        broker.set_produce_failure(false);
        producer.flush().await.unwrap();
        assert_eq!(broker.topic_len("timer-5").await, 1);
    }

    #[tokio::test]
    async fn test_full_buffer_reports_queue_full() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_produce_failure(true);
        let producer = BufferedProducer::start(broker.clone(), config(2, 1, 60_000));

        let mut saw_full = false;
        for i in 0..20 {
            match producer.send(record(&format!("tx-{i}"))) {
                Ok(()) => tokio::task::yield_now().await,
                Err(MessagingError::QueueFull { capacity }) => {
                    assert_eq!(capacity, 2);
                    saw_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_full);
    }

    #[tokio::test]
    async fn test_close_flushes_and_rejects_later_sends() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BufferedProducer::start(broker.clone(), config(100, 50, 60_000));

        producer.send(record("tx-1")).unwrap();
        producer.close().await.unwrap();

        assert_eq!(broker.topic_len("timer-5").await, 1);
        assert_eq!(
            producer.send(record("tx-2")),
            Err(MessagingError::ProducerClosed)
        );
        assert!(producer.is_closed());
    }

    #[tokio::test]
    async fn test_flush_and_close_answer_while_broker_down() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_produce_failure(true);
        let producer = BufferedProducer::start(broker.clone(), config(2, 1, 60_000));

        let mut accepted = 0usize;
        for i in 0..20 {
            match producer.send(record(&format!("tx-{i}"))) {
                Ok(()) => accepted += 1,
                Err(MessagingError::QueueFull { .. }) => break,
                Err(other) => panic!("unexpected error: {other}"),
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(accepted >= 2);

        let flushed = tokio::time::timeout(Duration::from_secs(3), producer.flush())
            .await
            .expect("flush answered");
        assert!(flushed.is_err());

        let closed = tokio::time::timeout(Duration::from_secs(3), producer.close())
            .await
            .expect("close answered");
        assert_eq!(closed, Err(MessagingError::Undelivered { records: accepted }));
        assert_eq!(broker.topic_len("timer-5").await, 0);
        assert_eq!(
            producer.send(record("tx-late")),
            Err(MessagingError::ProducerClosed)
        );
    }
}
