//! # Bucket Consumers
//!
//! One consumption loop per bucket topic plus one on the raw timer topic. Each loop
//! polls a bounded batch, promotes events that are due into [`TimerAction`]s and
//! republishes events that are not yet due into the bucket their remaining time now
//! maps to. Records are committed only after they were handled: a promoted event
//! counts once the action handler reports its publish accepted. A failed hand-off,
//! action or publish rewinds the partition so the record comes back on the next poll.
//!
//! Loops share nothing but the producer and the action channel, and observe the
//! shutdown signal between iterations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::{TimerAction, TimerActionSender};
use super::dispatcher::TimerDispatcher;
use super::events::{TimerEvent, TimerEventKind};
use crate::config::TimerConfig;
use crate::messaging::{BatchProgress, BrokerRecord, MessagingResult, SharedGateway};
use crate::validation::json_try_parse;

/// Pause after a failed poll or commit before the loop tries again
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// What happened to one timer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Due; handled by the action handler
    Promoted(TimerEventKind),
    /// Not yet due; republished into the bucket for `threshold`
    Rebucketed { threshold: u64, remaining_ms: i64 },
    /// Undecodable; skipped
    Dropped,
}

/// Counters for one polled batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub polled: usize,
    pub promoted: usize,
    pub rebucketed: usize,
    pub dropped: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Smallest remaining time among events republished into this consumer's own bucket
    same_bucket_remaining_ms: Option<i64>,
    other_outcomes: usize,
}

impl BatchReport {
    /// Pause to take before the next poll when the batch did nothing but cycle
    /// not-yet-due events back into the bucket it reads.
    pub fn requeue_pause(&self, max_pause: Duration) -> Option<Duration> {
        if self.other_outcomes > 0 || self.failed > 0 || self.deferred > 0 {
            return None;
        }
        let remaining = self.same_bucket_remaining_ms?;
        let remaining = Duration::from_millis(remaining.max(0) as u64);
        Some(remaining.min(max_pause))
    }

    fn observe(&mut self, outcome: RecordOutcome, own_threshold: Option<u64>) {
        match outcome {
            RecordOutcome::Promoted(_) => {
                self.promoted += 1;
                self.other_outcomes += 1;
            }
            RecordOutcome::Rebucketed {
                threshold,
                remaining_ms,
            } => {
                self.rebucketed += 1;
                if own_threshold == Some(threshold) {
                    self.same_bucket_remaining_ms = Some(
                        self.same_bucket_remaining_ms
                            .map_or(remaining_ms, |current| current.min(remaining_ms)),
                    );
                } else {
                    self.other_outcomes += 1;
                }
            }
            RecordOutcome::Dropped => {
                self.dropped += 1;
                self.other_outcomes += 1;
            }
        }
    }
}

/// Consumption loop over one timer topic
pub struct BucketConsumer {
    consumer_id: Uuid,
    /// `None` for the raw timer topic
    threshold: Option<u64>,
    topic: String,
    group_id: String,
    gateway: SharedGateway,
    dispatcher: Arc<TimerDispatcher>,
    actions: TimerActionSender,
    batch_size: usize,
    poll_timeout: Duration,
    requeue_pause: Duration,
    max_poll_interval: Duration,
}

impl std::fmt::Debug for BucketConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketConsumer")
            .field("consumer_id", &self.consumer_id)
            .field("threshold", &self.threshold)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("provider", &self.gateway.provider_name())
            .finish()
    }
}

impl BucketConsumer {
    /// Consumer for the bucket of `threshold` seconds
    pub fn for_bucket(
        threshold: u64,
        gateway: SharedGateway,
        dispatcher: Arc<TimerDispatcher>,
        actions: TimerActionSender,
        group_id: impl Into<String>,
        config: &TimerConfig,
    ) -> Self {
        let topic = dispatcher.topics().bucket_topic(threshold);
        let max_poll_interval = dispatcher.router().max_poll_interval(threshold);
        Self::build(
            Some(threshold),
            topic,
            max_poll_interval,
            gateway,
            dispatcher,
            actions,
            group_id.into(),
            config,
        )
    }

    /// Consumer for the raw timer topic, which only assigns initial buckets
    pub fn for_timer_intake(
        gateway: SharedGateway,
        dispatcher: Arc<TimerDispatcher>,
        actions: TimerActionSender,
        group_id: impl Into<String>,
        config: &TimerConfig,
    ) -> Self {
        let topic = dispatcher.topics().timer().to_string();
        let max_poll_interval = dispatcher
            .router()
            .max_poll_interval(dispatcher.router().smallest());
        Self::build(
            None,
            topic,
            max_poll_interval,
            gateway,
            dispatcher,
            actions,
            group_id.into(),
            config,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        threshold: Option<u64>,
        topic: String,
        max_poll_interval: Duration,
        gateway: SharedGateway,
        dispatcher: Arc<TimerDispatcher>,
        actions: TimerActionSender,
        group_id: String,
        config: &TimerConfig,
    ) -> Self {
        Self {
            consumer_id: Uuid::new_v4(),
            threshold,
            topic,
            group_id,
            gateway,
            dispatcher,
            actions,
            batch_size: config.poll_batch_size.max(1),
            poll_timeout: config.poll_timeout(),
            requeue_pause: config.requeue_pause(),
            max_poll_interval,
        }
    }

    pub fn consumer_id(&self) -> Uuid {
        self.consumer_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn threshold(&self) -> Option<u64> {
        self.threshold
    }

    /// Decide what to do with one record as seen at `now_ms`.
    ///
    /// An error means the record's action or republish did not go through and the
    /// record must not be committed.
    pub async fn handle_record(
        &self,
        record: &BrokerRecord,
        now_ms: i64,
    ) -> MessagingResult<RecordOutcome> {
        let Some(event) = json_try_parse::<Option<TimerEvent>>(&record.payload, None) else {
            warn!(
                consumer_id = %self.consumer_id,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Dropping undecodable timer event"
            );
            return Ok(RecordOutcome::Dropped);
        };

        let remaining_ms = event.remaining_ms(now_ms);
        if remaining_ms <= 0 {
            let kind = event.kind();
            self.actions.try_send(TimerAction::from(event))?.wait().await?;
            debug!(
                consumer_id = %self.consumer_id,
                kind = %kind,
                overdue_ms = -remaining_ms,
                "Timer event promoted"
            );
            return Ok(RecordOutcome::Promoted(kind));
        }

        let threshold = self.dispatcher.schedule_at(event, now_ms)?;
        Ok(RecordOutcome::Rebucketed {
            threshold,
            remaining_ms,
        })
    }

    /// Poll one batch, handle it and commit what was handled
    pub async fn process_batch(&self) -> MessagingResult<BatchReport> {
        let topics = [self.topic.clone()];
        let records = self
            .gateway
            .poll(&self.group_id, &topics, self.batch_size, self.poll_timeout)
            .await?;

        let mut report = BatchReport {
            polled: records.len(),
            ..BatchReport::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let mut progress = BatchProgress::new();
        for record in &records {
            if !progress.should_handle(record) {
                report.deferred += 1;
                continue;
            }

            match self.handle_record(record, Utc::now().timestamp_millis()).await {
                Ok(outcome) => {
                    report.observe(outcome, self.threshold);
                    progress.record_success(record);
                }
                Err(e) => {
                    warn!(
                        consumer_id = %self.consumer_id,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Timer event not handled, will be redelivered"
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
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            consumer_id = %self.consumer_id,
            topic = %self.topic,
            threshold = ?self.threshold,
            max_poll_interval_secs = self.max_poll_interval.as_secs(),
            "Starting bucket consumer"
        );

        let mut last_poll = Instant::now();
        while !*shutdown.borrow() {
            let since_last_poll = last_poll.elapsed();
            if since_last_poll > self.max_poll_interval {
                warn!(
                    consumer_id = %self.consumer_id,
                    topic = %self.topic,
                    elapsed_ms = since_last_poll.as_millis() as u64,
                    max_poll_interval_ms = self.max_poll_interval.as_millis() as u64,
                    "Bucket consumer exceeded its poll interval"
                );
            }
            last_poll = Instant::now();

            let pause = match self.process_batch().await {
                Ok(report) => {
                    if report.polled > 0 {
                        debug!(
                            consumer_id = %self.consumer_id,
                            topic = %self.topic,
                            polled = report.polled,
                            promoted = report.promoted,
                            rebucketed = report.rebucketed,
                            dropped = report.dropped,
                            failed = report.failed,
                            "Processed timer batch"
                        );
                    }
                    report.requeue_pause(self.requeue_pause)
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        consumer_id = %self.consumer_id,
                        topic = %self.topic,
                        error = %e,
                        "Bucket consumer cycle failed, retrying"
                    );
                    Some(ERROR_BACKOFF)
                }
                Err(e) => {
                    error!(
                        consumer_id = %self.consumer_id,
                        topic = %self.topic,
                        error = %e,
                        "Bucket consumer cycle failed"
                    );
                    Some(ERROR_BACKOFF)
                }
            };

            if let Some(pause) = pause.filter(|p| !p.is_zero()) {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!(
            consumer_id = %self.consumer_id,
            topic = %self.topic,
            "Bucket consumer stopped"
        );
    }
}

/// Every timer consumption loop of one watcher
#[derive(Debug)]
pub struct BucketConsumerPool {
    handles: Vec<JoinHandle<()>>,
    topics: Vec<String>,
}

impl BucketConsumerPool {
    /// Spawn one loop per bucket threshold and one for the raw timer topic
    pub fn start(
        gateway: SharedGateway,
        dispatcher: Arc<TimerDispatcher>,
        actions: TimerActionSender,
        group_id: &str,
        config: &TimerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut consumers: Vec<BucketConsumer> = dispatcher
            .router()
            .thresholds()
            .iter()
            .map(|threshold| {
                BucketConsumer::for_bucket(
                    *threshold,
                    gateway.clone(),
                    dispatcher.clone(),
                    actions.clone(),
                    group_id,
                    config,
                )
            })
            .collect();
        consumers.push(BucketConsumer::for_timer_intake(
            gateway,
            dispatcher,
            actions,
            group_id,
            config,
        ));

        let topics = consumers.iter().map(|c| c.topic().to_string()).collect();
        let handles = consumers
            .into_iter()
            .map(|consumer| tokio::spawn(consumer.run(shutdown.clone())))
            .collect();

        Self { handles, topics }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every loop to exit after shutdown was signalled
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Bucket consumer task panicked");
            }
        }
    }
}
