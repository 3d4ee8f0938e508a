//! End-to-end timer wheel behavior over the in-memory broker

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use task_watcher::config::WatcherConfig;
use task_watcher::messaging::{BrokerGateway, BrokerMessage, InMemoryBroker, ProducerRecord};
use task_watcher::models::{Command, Task, TaskKey, TaskUpdate};
use task_watcher::state_machine::TaskState;
use task_watcher::timer::TimerEvent;
use task_watcher::watcher::TaskWatcher;

fn test_config() -> WatcherConfig {
    let mut config = WatcherConfig::default();
    config.broker.ready_timeout_ms = 1_000;
    config.broker.metadata_refresh_interval_ms = 20;
    config.timer.delay_buckets_seconds = vec![1, 5];
    config.timer.requeue_pause_ms = 20;
    config.topic_creation.num_partitions = 2;
    config
}

fn task(task_id: &str, timeout_ms: u64) -> Task {
    Task {
        task_id: task_id.to_string(),
        transaction_id: "tx-e2e".to_string(),
        task_name: "send_email".to_string(),
        ack_timeout: 60_000,
        timeout: timeout_ms,
        ..Task::default()
    }
}

async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn produce_json<T: BrokerMessage>(broker: &InMemoryBroker, topic: &str, value: &T) {
    broker
        .produce(&[ProducerRecord::json(topic, "tx-e2e", value).unwrap()])
        .await
        .unwrap();
}

#[tokio::test]
async fn execution_timeout_fires_through_the_buckets() {
    let broker = Arc::new(InMemoryBroker::new().with_default_partitions(2));
    let watcher = TaskWatcher::start(test_config(), broker.clone())
        .await
        .unwrap();
    watcher
        .registry()
        .register_json(json!({"name": "send_email"}))
        .unwrap();

    let key = TaskKey::new("tx-e2e", "t-timeout");
    produce_json(&broker, "task.send_email", &task("t-timeout", 1_000)).await;
    wait_for("task to be tracked", || {
        watcher.ledger().status(&key) == Some(TaskState::Scheduled)
    })
    .await;

    produce_json(&broker, "event", &TaskUpdate::new(&key, TaskState::Inprogress)).await;
    wait_for("task to time out", || {
        watcher.ledger().status(&key) == Some(TaskState::TimeOut)
    })
    .await;

    let updates: Vec<TaskUpdate> = broker
        .records("event")
        .await
        .iter()
        .filter_map(|record| serde_json::from_slice(&record.payload).ok())
        .collect();
    let timeout_update = updates
        .iter()
        .find(|update| update.status == TaskState::TimeOut)
        .expect("timeout update on the event topic");
    assert!(timeout_update.is_system);
    assert_eq!(timeout_update.key(), key);

    tokio::time::timeout(Duration::from_secs(10), watcher.shutdown())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn completed_task_ignores_its_timeout() {
    let broker = Arc::new(InMemoryBroker::new().with_default_partitions(2));
    let watcher = TaskWatcher::start(test_config(), broker.clone())
        .await
        .unwrap();

    let key = TaskKey::new("tx-e2e", "t-done");
    produce_json(&broker, "task.send_email", &task("t-done", 500)).await;
    wait_for("task to be tracked", || watcher.ledger().status(&key).is_some()).await;

    produce_json(&broker, "event", &TaskUpdate::new(&key, TaskState::Inprogress)).await;
    produce_json(&broker, "event", &TaskUpdate::new(&key, TaskState::Completed)).await;
    wait_for("task to complete", || {
        watcher.ledger().status(&key) == Some(TaskState::Completed)
    })
    .await;

    // Give the timeout timer time to come due and be discarded
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(watcher.ledger().status(&key), Some(TaskState::Completed));

    let system_updates = broker
        .records("event")
        .await
        .iter()
        .filter_map(|record| serde_json::from_slice::<TaskUpdate>(&record.payload).ok())
        .filter(|update| update.is_system)
        .count();
    assert_eq!(system_updates, 0);

    watcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn overdue_raw_timer_is_promoted_from_the_timer_topic() {
    let broker = Arc::new(InMemoryBroker::new().with_default_partitions(2));
    let watcher = TaskWatcher::start(test_config(), broker.clone())
        .await
        .unwrap();

    // A delayed dispatch for a task the ledger has never seen
    let overdue = chrono::Utc::now().timestamp_millis() - 10;
    let event = TimerEvent::delay(task("t-delayed", 0), overdue);
    produce_json(&broker, "timer", &event).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while broker.topic_len("command").await == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for reload command"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let records = broker.records("command").await;
    let command: Command = serde_json::from_slice(&records[0].payload).unwrap();
    assert_eq!(command.transaction_id(), "tx-e2e");

    watcher.shutdown().await.unwrap();
}
