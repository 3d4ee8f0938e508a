//! # Timer Dispatcher
//!
//! Builds timer events, routes them to a bucket topic and publishes them through the
//! shared producer, keyed by transaction id. Also the publish path for task updates
//! and reload commands.
//!
//! Every call returns as soon as the record is accepted into the producer's send
//! buffer. A returned error means nothing was accepted.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::events::{TimerEvent, TimerEventKind};
use super::router::DelayBucketRouter;
use crate::logging::log_timer_scheduled;
use crate::messaging::{MessagingResult, ProducerHandle, TopicNames};
use crate::models::{Command, Task, TaskKey, TaskUpdate};

#[derive(Debug, Clone)]
pub struct TimerDispatcher {
    producer: ProducerHandle,
    router: Arc<DelayBucketRouter>,
    topics: TopicNames,
}

impl TimerDispatcher {
    pub fn new(producer: ProducerHandle, router: Arc<DelayBucketRouter>, topics: TopicNames) -> Self {
        Self {
            producer,
            router,
            topics,
        }
    }

    /// Re-dispatch `task` at `scheduled_at` (epoch ms)
    pub fn schedule_delay(&self, task: Task, scheduled_at: i64) -> MessagingResult<()> {
        self.schedule(TimerEvent::delay(task, scheduled_at))
    }

    pub fn schedule_ack_timeout(
        &self,
        task_id: &str,
        transaction_id: &str,
        scheduled_at: i64,
    ) -> MessagingResult<()> {
        self.schedule(TimerEvent::ack_timeout(
            &TaskKey::new(transaction_id, task_id),
            scheduled_at,
        ))
    }

    pub fn schedule_timeout(
        &self,
        task_id: &str,
        transaction_id: &str,
        scheduled_at: i64,
    ) -> MessagingResult<()> {
        self.schedule(TimerEvent::timeout(
            &TaskKey::new(transaction_id, task_id),
            scheduled_at,
        ))
    }

    pub fn schedule_complete(
        &self,
        task_id: &str,
        transaction_id: &str,
        scheduled_at: i64,
    ) -> MessagingResult<()> {
        self.schedule(TimerEvent::complete(
            &TaskKey::new(transaction_id, task_id),
            scheduled_at,
        ))
    }

    /// Route and publish a prepared event relative to the current time
    pub fn schedule(&self, event: TimerEvent) -> MessagingResult<()> {
        self.schedule_at(event, Utc::now().timestamp_millis())
            .map(|_| ())
    }

    /// Route `event` as seen at `now_ms` and publish it. Returns the chosen bucket
    /// threshold in seconds.
    pub fn schedule_at(&self, event: TimerEvent, now_ms: i64) -> MessagingResult<u64> {
        let remaining_ms = event.remaining_ms(now_ms);
        let threshold = self.router.route(remaining_ms);
        let topic = self.topics.bucket_topic(threshold);

        self.producer
            .send_json(topic, event.transaction_id(), &event)?;

        match event.kind() {
            TimerEventKind::Delay => {}
            kind @ (TimerEventKind::AckTimeout
            | TimerEventKind::Timeout
            | TimerEventKind::Complete) => log_timer_scheduled(
                kind,
                event.task_id(),
                event.transaction_id(),
                threshold,
                remaining_ms,
            ),
        }

        Ok(threshold)
    }

    /// Publish a status change to the event topic
    pub fn update_task(&self, update: &TaskUpdate) -> MessagingResult<()> {
        debug!(
            task_id = %update.task_id,
            transaction_id = %update.transaction_id,
            status = %update.status,
            is_system = update.is_system,
            "Publishing task update"
        );
        self.producer
            .send_json(self.topics.event(), update.transaction_id.clone(), update)
    }

    /// Ask the dispatcher to put `task` back on its work queue
    pub fn reload_task(&self, task: Task) -> MessagingResult<()> {
        debug!(
            task_id = %task.task_id,
            transaction_id = %task.transaction_id,
            task_name = %task.task_name,
            "Publishing reload command"
        );
        let command = Command::reload_task(task);
        self.producer.send_json(
            self.topics.command(),
            command.transaction_id().to_string(),
            &command,
        )
    }

    pub fn producer(&self) -> &ProducerHandle {
        &self.producer
    }

    pub fn router(&self) -> &DelayBucketRouter {
        &self.router
    }

    pub fn topics(&self) -> &TopicNames {
        &self.topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProducerConfig;
    use crate::messaging::{BrokerMessage, BufferedProducer, InMemoryBroker};
    use crate::state_machine::TaskState;

    fn dispatcher(broker: &Arc<InMemoryBroker>) -> TimerDispatcher {
        let producer = BufferedProducer::start(broker.clone(), ProducerConfig::default());
        let router = DelayBucketRouter::new(&[5, 15, 60, 300, 1800]).unwrap();
        TimerDispatcher::new(producer, Arc::new(router), TopicNames::default())
    }

    #[tokio::test]
    async fn test_timeout_routed_to_coarse_bucket() {
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = dispatcher(&broker);
        let now = 1_000_000;

        let event = TimerEvent::timeout(&TaskKey::new("tx-1", "t-1"), now + 200_000);
        let threshold = dispatcher.schedule_at(event.clone(), now).unwrap();
        assert_eq!(threshold, 60);

        dispatcher.producer.flush().await.unwrap();
        let records = broker.records("timer-60").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_deref(), Some("tx-1"));
        assert_eq!(TimerEvent::from_bytes(&records[0].payload).unwrap(), event);
    }

    #[tokio::test]
    async fn test_near_event_routed_to_smallest_bucket() {
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = dispatcher(&broker);
        let now = 1_000_000;

        let task = Task {
            task_id: "t-1".to_string(),
            transaction_id: "tx-1".to_string(),
            ..Task::default()
        };
        assert_eq!(
            dispatcher
                .schedule_at(TimerEvent::delay(task, now + 3_000), now)
                .unwrap(),
            5
        );
    }

    #[tokio::test]
    async fn test_update_and_reload_topics() {
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = dispatcher(&broker);
        let key = TaskKey::new("tx-2", "t-2");

        dispatcher
            .update_task(&TaskUpdate::system(&key, TaskState::TimeOut, "Task timed out"))
            .unwrap();
        dispatcher
            .reload_task(Task {
                task_id: "t-2".to_string(),
                transaction_id: "tx-2".to_string(),
                ..Task::default()
            })
            .unwrap();
        dispatcher.producer.flush().await.unwrap();

        let updates = broker.records("event").await;
        let update = TaskUpdate::from_bytes(&updates[0].payload).unwrap();
        assert_eq!(update.status, TaskState::TimeOut);
        assert!(update.is_system);

        let commands = broker.records("command").await;
        let command = Command::from_bytes(&commands[0].payload).unwrap();
        assert_eq!(command.transaction_id(), "tx-2");
        assert_eq!(commands[0].key.as_deref(), Some("tx-2"));
    }

    #[tokio::test]
    async fn test_closed_producer_fails_schedule() {
        let broker = Arc::new(InMemoryBroker::new());
        let dispatcher = dispatcher(&broker);
        dispatcher.producer.close().await.unwrap();

        let result = dispatcher.schedule_timeout("t-1", "tx-1", 0);
        assert!(result.is_err());
    }
}
