//! # Task Watcher Bootstrap
//!
//! Wires every component from one [`WatcherConfig`] and one broker handle:
//!
//! 1. wait for the broker to be ready;
//! 2. ensure the timer, bucket, event and command topics exist;
//! 3. start the shared producer;
//! 4. build router, dispatcher, registry, ledger and scheduler;
//! 5. start the action handler, the bucket consumers and the task intake.
//!
//! [`TaskWatcher::shutdown`] stops every loop between iterations, then flushes and
//! closes the producer.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use task_watcher::config::WatcherConfig;
//! use task_watcher::messaging::InMemoryBroker;
//! use task_watcher::watcher::TaskWatcher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let watcher = TaskWatcher::start(WatcherConfig::default(), Arc::new(InMemoryBroker::new())).await?;
//! watcher
//!     .registry()
//!     .register_json(serde_json::json!({"name": "send_email"}))?;
//! watcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WatcherConfig;
use crate::error::WatcherResult;
use crate::lifecycle::{
    TaskDefinitionRegistry, TaskEventIntake, TaskInstanceLedger, TaskLifecycleScheduler,
    TimerActionHandler,
};
use crate::messaging::{
    ensure_topic, BrokerGateway, BufferedProducer, ProducerHandle, SharedGateway, TopicNames,
    TopicSpec,
};
use crate::timer::{timer_action_channel, BucketConsumerPool, DelayBucketRouter, TimerDispatcher};

/// A running watcher
pub struct TaskWatcher {
    watcher_id: Uuid,
    config: WatcherConfig,
    gateway: SharedGateway,
    producer: ProducerHandle,
    dispatcher: Arc<TimerDispatcher>,
    registry: Arc<TaskDefinitionRegistry>,
    ledger: Arc<TaskInstanceLedger>,
    scheduler: Arc<TaskLifecycleScheduler>,
    shutdown_sender: watch::Sender<bool>,
    bucket_pool: BucketConsumerPool,
    action_handler: JoinHandle<()>,
    intake: JoinHandle<()>,
}

impl std::fmt::Debug for TaskWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWatcher")
            .field("watcher_id", &self.watcher_id)
            .field("provider", &self.gateway.provider_name())
            .field("bucket_topics", &self.bucket_pool.topics())
            .field("registered_definitions", &self.registry.len())
            .field("tracked_tasks", &self.ledger.len())
            .finish()
    }
}

impl TaskWatcher {
    /// Bootstrap and start every loop
    pub async fn start(config: WatcherConfig, gateway: SharedGateway) -> WatcherResult<Self> {
        let watcher_id = Uuid::new_v4();
        config.validate()?;

        info!(
            watcher_id = %watcher_id,
            provider = gateway.provider_name(),
            group_id = %config.broker.group_id,
            buckets = ?config.timer.delay_buckets_seconds,
            "Starting task watcher"
        );

        gateway
            .wait_until_ready(config.broker.ready_timeout())
            .await?;

        let router = Arc::new(DelayBucketRouter::from_config(&config.timer)?);
        let topics = TopicNames::new(&config.topics);
        ensure_watcher_topics(gateway.as_ref(), &config, &router, &topics).await;

        let producer = BufferedProducer::start(gateway.clone(), config.producer.clone());
        let dispatcher = Arc::new(TimerDispatcher::new(
            producer.clone(),
            router,
            topics,
        ));
        let registry = Arc::new(TaskDefinitionRegistry::new());
        let ledger = Arc::new(TaskInstanceLedger::new());
        let scheduler = Arc::new(TaskLifecycleScheduler::new(
            registry.clone(),
            ledger.clone(),
            dispatcher.clone(),
            &config.timer,
        ));

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let (action_sender, action_receiver) =
            timer_action_channel(config.timer.action_channel_capacity);

        let handler = TimerActionHandler::new(ledger.clone(), dispatcher.clone());
        let action_handler = tokio::spawn(handler.run(action_receiver, shutdown_receiver.clone()));

        let bucket_pool = BucketConsumerPool::start(
            gateway.clone(),
            dispatcher.clone(),
            action_sender,
            &config.broker.group_id,
            &config.timer,
            shutdown_receiver.clone(),
        );

        let intake = TaskEventIntake::new(gateway.clone(), scheduler.clone(), &config);
        let intake = tokio::spawn(intake.run(shutdown_receiver));

        info!(
            watcher_id = %watcher_id,
            bucket_consumers = bucket_pool.len(),
            "Task watcher started"
        );

        Ok(Self {
            watcher_id,
            config,
            gateway,
            producer,
            dispatcher,
            registry,
            ledger,
            scheduler,
            shutdown_sender,
            bucket_pool,
            action_handler,
            intake,
        })
    }

    /// Stop every loop, then flush and close the producer
    pub async fn shutdown(self) -> WatcherResult<()> {
        info!(watcher_id = %self.watcher_id, "Shutting down task watcher");
        let _ = self.shutdown_sender.send(true);

        self.bucket_pool.join().await;
        for (name, handle) in [("intake", self.intake), ("action_handler", self.action_handler)] {
            if let Err(e) = handle.await {
                error!(watcher_id = %self.watcher_id, task = name, error = %e, "Watcher task panicked");
            }
        }

        self.producer.close().await?;
        info!(watcher_id = %self.watcher_id, "Task watcher stopped");
        Ok(())
    }

    pub fn watcher_id(&self) -> Uuid {
        self.watcher_id
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskDefinitionRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &TaskInstanceLedger {
        &self.ledger
    }

    pub fn dispatcher(&self) -> &TimerDispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &TaskLifecycleScheduler {
        &self.scheduler
    }

    pub fn bucket_topics(&self) -> &[String] {
        self.bucket_pool.topics()
    }
}

/// Create the watcher's own topics. Failures are logged and do not stop startup.
async fn ensure_watcher_topics(
    gateway: &dyn BrokerGateway,
    config: &WatcherConfig,
    router: &DelayBucketRouter,
    topics: &TopicNames,
) {
    let mut names = vec![topics.timer().to_string()];
    names.extend(router.thresholds().iter().map(|t| topics.bucket_topic(*t)));
    names.push(topics.event().to_string());
    names.push(topics.command().to_string());

    for name in names {
        let spec = TopicSpec::from_creation_config(&name, &config.topic_creation);
        match ensure_topic(gateway, &spec).await {
            Ok(true) => info!(topic = %name, partitions = spec.num_partitions, "Created topic"),
            Ok(false) => debug!(topic = %name, "Topic already exists"),
            Err(e) => warn!(topic = %name, error = %e, "Failed to create topic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatcherError;
    use crate::messaging::{InMemoryBroker, MessagingError, ProducerRecord};
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_creates_topics_and_shuts_down() {
        let broker = Arc::new(InMemoryBroker::new());
        let watcher = TaskWatcher::start(WatcherConfig::default(), broker.clone())
            .await
            .unwrap();

        let topics = broker.list_topics().await.unwrap();
        for expected in ["timer", "timer-5", "timer-1800", "event", "command"] {
            assert!(topics.contains(&expected.to_string()), "missing {expected}");
        }
        let spec = broker.topic_spec("timer-5").await.unwrap();
        assert_eq!(spec.num_partitions, 10);
        assert_eq!(
            spec.config.get("cleanup.policy").map(String::as_str),
            Some("delete")
        );
        assert_eq!(watcher.bucket_topics().len(), 6);

        tokio::time::timeout(Duration::from_secs(10), watcher.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_reports_undelivered_records_while_broker_down() {
        let broker = Arc::new(InMemoryBroker::new());
        let watcher = TaskWatcher::start(WatcherConfig::default(), broker.clone())
            .await
            .unwrap();

        broker.set_produce_failure(true);
        watcher
            .dispatcher()
            .producer()
            .send(ProducerRecord::new("event", "tx-1", b"{}".to_vec()))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), watcher.shutdown())
            .await
            .expect("shutdown returned");
        assert!(matches!(
            result,
            Err(WatcherError::Messaging(MessagingError::Undelivered { records: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_start_fails_when_broker_never_ready() {
        let broker = Arc::new(InMemoryBroker::new().not_ready());
        let mut config = WatcherConfig::default();
        config.broker.ready_timeout_ms = 20;

        let result = TaskWatcher::start(config, broker).await;
        assert!(matches!(
            result,
            Err(WatcherError::Messaging(MessagingError::ReadyTimeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut config = WatcherConfig::default();
        config.timer.delay_buckets_seconds.clear();

        let result = TaskWatcher::start(config, Arc::new(InMemoryBroker::new())).await;
        assert!(matches!(result, Err(WatcherError::Configuration(_))));
    }
}
