//! # Task Event Intake
//!
//! One loop over every `task.*` work queue plus the `event` topic. Tasks seen on a
//! work queue are tracked as dispatched; updates seen on the event topic are applied
//! to the ledger. Both paths may schedule timers through the lifecycle scheduler.
//!
//! Commit semantics match the bucket consumers: a record is committed only once it
//! was handled, and a failed publish rewinds its partition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::scheduler::{DispatchOutcome, TaskLifecycleScheduler, UpdateOutcome};
use crate::config::WatcherConfig;
use crate::error::{WatcherError, WatcherResult};
use crate::messaging::{BatchProgress, BrokerRecord, MessagingResult, SharedGateway, TopicNames};
use crate::models::{Task, TaskUpdate};
use crate::validation::json_try_parse;

const ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// What happened to one intake record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    Dispatch(DispatchOutcome),
    Update(UpdateOutcome),
    Dropped,
}

/// Counters for one polled batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntakeReport {
    pub polled: usize,
    pub dispatches: usize,
    pub updates: usize,
    pub rejected: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl IntakeReport {
    fn observe(&mut self, outcome: IntakeOutcome) {
        match outcome {
            IntakeOutcome::Dispatch(DispatchOutcome::Rejected)
            | IntakeOutcome::Update(UpdateOutcome::Rejected) => self.rejected += 1,
            IntakeOutcome::Dispatch(_) => self.dispatches += 1,
            IntakeOutcome::Update(_) => self.updates += 1,
            IntakeOutcome::Dropped => self.dropped += 1,
        }
    }
}

pub struct TaskEventIntake {
    intake_id: Uuid,
    gateway: SharedGateway,
    scheduler: Arc<TaskLifecycleScheduler>,
    topics: TopicNames,
    group_id: String,
    batch_size: usize,
    poll_timeout: Duration,
    refresh_interval: Duration,
    subscribed: Vec<String>,
    last_refresh: Option<Instant>,
}

impl std::fmt::Debug for TaskEventIntake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEventIntake")
            .field("intake_id", &self.intake_id)
            .field("group_id", &self.group_id)
            .field("subscribed", &self.subscribed)
            .field("provider", &self.gateway.provider_name())
            .finish()
    }
}

impl TaskEventIntake {
    pub fn new(
        gateway: SharedGateway,
        scheduler: Arc<TaskLifecycleScheduler>,
        config: &WatcherConfig,
    ) -> Self {
        let topics = TopicNames::new(&config.topics);
        Self {
            intake_id: Uuid::new_v4(),
            gateway,
            scheduler,
            subscribed: vec![topics.event().to_string()],
            topics,
            group_id: config.broker.group_id.clone(),
            batch_size: config.timer.poll_batch_size.max(1),
            poll_timeout: config.timer.poll_timeout(),
            refresh_interval: config.broker.metadata_refresh_interval(),
            last_refresh: None,
        }
    }

    pub fn intake_id(&self) -> Uuid {
        self.intake_id
    }

    /// Topics consumed by the last poll
    pub fn subscribed(&self) -> &[String] {
        &self.subscribed
    }

    /// Re-read the broker's topic list and subscribe to every task work queue
    pub async fn refresh_topics(&mut self) -> MessagingResult<()> {
        let mut subscribed: Vec<String> = self
            .gateway
            .list_topics()
            .await?
            .into_iter()
            .filter(|topic| self.topics.is_task_topic(topic))
            .collect();
        subscribed.sort();
        subscribed.push(self.topics.event().to_string());

        if subscribed != self.subscribed {
            info!(
                intake_id = %self.intake_id,
                topics = ?subscribed,
                "Task intake subscription changed"
            );
            self.subscribed = subscribed;
        }
        self.last_refresh = Some(Instant::now());
        Ok(())
    }

    fn refresh_due(&self) -> bool {
        self.last_refresh
            .map_or(true, |at| at.elapsed() >= self.refresh_interval)
    }

    /// Decode and apply one record as seen at `now_ms`
    pub fn handle_record(&self, record: &BrokerRecord, now_ms: i64) -> WatcherResult<IntakeOutcome> {
        if record.topic == self.topics.event() {
            let Some(update) = json_try_parse::<Option<TaskUpdate>>(&record.payload, None) else {
                return Ok(self.dropped(record, "task update"));
            };
            return self
                .scheduler
                .on_task_update(&update, now_ms)
                .map(IntakeOutcome::Update);
        }

        let Some(task) = json_try_parse::<Option<Task>>(&record.payload, None) else {
            return Ok(self.dropped(record, "task"));
        };
        self.scheduler
            .on_task_dispatched(task, now_ms)
            .map(IntakeOutcome::Dispatch)
    }

    fn dropped(&self, record: &BrokerRecord, expected: &str) -> IntakeOutcome {
        warn!(
            intake_id = %self.intake_id,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            expected = expected,
            "Dropping undecodable record"
        );
        IntakeOutcome::Dropped
    }

    /// Poll one batch, apply it and commit what was handled
    pub async fn process_batch(&mut self) -> WatcherResult<IntakeReport> {
        if self.refresh_due() {
            self.refresh_topics().await?;
        }

        let records = self
            .gateway
            .poll(
                &self.group_id,
                &self.subscribed,
                self.batch_size,
                self.poll_timeout,
            )
            .await?;

        let mut report = IntakeReport {
            polled: records.len(),
            ..IntakeReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let mut progress = BatchProgress::new();
        for record in &records {
            if !progress.should_handle(record) {
                continue;
            }

            match self.handle_record(record, Utc::now().timestamp_millis()) {
                Ok(outcome) => {
                    report.observe(outcome);
                    progress.record_success(record);
                }
                Err(e) => {
                    warn!(
                        intake_id = %self.intake_id,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Task record not handled, will be redelivered"
                    );
                    report.failed += 1;
                    progress.record_failure(record);
                }
            }
        }

        progress.finish(self.gateway.as_ref(), &self.group_id).await?;
        Ok(report)
    }

    /// Run until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            intake_id = %self.intake_id,
            group_id = %self.group_id,
            "Starting task event intake"
        );

        while !*shutdown.borrow() {
            match self.process_batch().await {
                Ok(report) => {
                    if report.polled > 0 {
                        debug!(
                            intake_id = %self.intake_id,
                            polled = report.polled,
                            dispatches = report.dispatches,
                            updates = report.updates,
                            rejected = report.rejected,
                            dropped = report.dropped,
                            failed = report.failed,
                            "Processed task event batch"
                        );
                    }
                }
                Err(e) => {
                    if matches!(&e, WatcherError::Messaging(m) if m.is_retryable()) {
                        warn!(intake_id = %self.intake_id, error = %e, "Task intake cycle failed, retrying");
                    } else {
                        error!(intake_id = %self.intake_id, error = %e, "Task intake cycle failed");
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        info!(intake_id = %self.intake_id, "Task event intake stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimerConfig;
    use crate::lifecycle::{TaskDefinitionRegistry, TaskInstanceLedger};
    use crate::messaging::{BrokerGateway, BufferedProducer, InMemoryBroker, ProducerRecord};
    use crate::models::TaskKey;
    use crate::state_machine::TaskState;
    use crate::timer::{DelayBucketRouter, TimerDispatcher};

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        ledger: Arc<TaskInstanceLedger>,
        intake: TaskEventIntake,
    }

    fn fixture() -> Fixture {
        let config = WatcherConfig::default();
        let broker = Arc::new(InMemoryBroker::new().with_default_partitions(1));
        let producer = BufferedProducer::start(broker.clone(), config.producer.clone());
        let router = DelayBucketRouter::from_config(&config.timer).unwrap();
        let dispatcher = Arc::new(TimerDispatcher::new(
            producer,
            Arc::new(router),
            TopicNames::new(&config.topics),
        ));
        let ledger = Arc::new(TaskInstanceLedger::new());
        let scheduler = Arc::new(TaskLifecycleScheduler::new(
            Arc::new(TaskDefinitionRegistry::new()),
            ledger.clone(),
            dispatcher,
            &TimerConfig::default(),
        ));
        let intake = TaskEventIntake::new(broker.clone(), scheduler, &config);
        Fixture {
            broker,
            ledger,
            intake,
        }
    }

    fn task() -> Task {
        Task {
            task_id: "t1".to_string(),
            transaction_id: "tx1".to_string(),
            task_name: "send_email".to_string(),
            ..Task::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_then_update_applied() {
        let mut fixture = fixture();
        fixture
            .broker
            .produce(&[ProducerRecord::json("task.send_email", "tx1", &task()).unwrap()])
            .await
            .unwrap();

        let report = fixture.intake.process_batch().await.unwrap();
        assert_eq!(report.dispatches, 1);
        assert!(fixture
            .intake
            .subscribed()
            .contains(&"task.send_email".to_string()));

        let key = TaskKey::new("tx1", "t1");
        fixture
            .broker
            .produce(&[
                ProducerRecord::json("event", "tx1", &TaskUpdate::new(&key, TaskState::Inprogress))
                    .unwrap(),
                ProducerRecord::json("event", "tx1", &TaskUpdate::new(&key, TaskState::Scheduled))
                    .unwrap(),
            ])
            .await
            .unwrap();

        let report = fixture.intake.process_batch().await.unwrap();
        assert_eq!(report.updates, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(fixture.ledger.status(&key), Some(TaskState::Inprogress));
        assert_eq!(fixture.broker.committed_offset("task-watcher", "event", 0), Some(2));
    }

    #[tokio::test]
    async fn test_undecodable_records_dropped_and_committed() {
        let mut fixture = fixture();
        fixture
            .broker
            .produce(&[
                ProducerRecord::new("event", "tx1", b"{\"status\": 7}".to_vec()),
                ProducerRecord::new("event", "tx1", b"garbage".to_vec()),
            ])
            .await
            .unwrap();

        let report = fixture.intake.process_batch().await.unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(fixture.broker.committed_offset("task-watcher", "event", 0), Some(2));
    }
}
