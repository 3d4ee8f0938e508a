//! Per-partition bookkeeping for one polled batch.
//!
//! Records are committed only after they were handled. When handling fails, the
//! rest of that partition's records in the batch are skipped and the partition is
//! rewound to its committed offset, so the failed record is delivered again on the
//! next poll with its partition order intact.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::errors::MessagingResult;
use super::gateway::{BrokerGateway, BrokerRecord, TopicPartitionOffset};

type PartitionKey = (String, i32);

#[derive(Debug, Default)]
pub struct BatchProgress {
    commits: BTreeMap<PartitionKey, i64>,
    failed: BTreeSet<PartitionKey>,
}

/// What a finished batch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub committed_partitions: usize,
    pub rewound_partitions: usize,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// False once an earlier record of the same partition failed in this batch
    pub fn should_handle(&self, record: &BrokerRecord) -> bool {
        !self
            .failed
            .contains(&(record.topic.clone(), record.partition))
    }

    pub fn record_success(&mut self, record: &BrokerRecord) {
        let next = record.next_offset();
        self.commits
            .insert((next.topic, next.partition), next.offset);
    }

    pub fn record_failure(&mut self, record: &BrokerRecord) {
        self.failed.insert((record.topic.clone(), record.partition));
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Commit handled records and rewind partitions that hit a failure
    pub async fn finish(
        self,
        gateway: &dyn BrokerGateway,
        group_id: &str,
    ) -> MessagingResult<BatchSummary> {
        let offsets: Vec<TopicPartitionOffset> = self
            .commits
            .into_iter()
            .map(|((topic, partition), offset)| TopicPartitionOffset {
                topic,
                partition,
                offset,
            })
            .collect();

        if !offsets.is_empty() {
            gateway.commit(group_id, &offsets).await?;
        }

        for (topic, partition) in &self.failed {
            debug!(
                group_id = %group_id,
                topic = %topic,
                partition = partition,
                "Rewinding partition to committed offset"
            );
            gateway.seek_to_committed(group_id, topic, *partition).await?;
        }

        Ok(BatchSummary {
            committed_partitions: offsets.len(),
            rewound_partitions: self.failed.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::gateway::ProducerRecord;
    use crate::messaging::in_memory::InMemoryBroker;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failure_skips_rest_of_partition_and_redelivers() {
        let broker = InMemoryBroker::new().with_default_partitions(1);
        let records: Vec<ProducerRecord> = ["a", "b", "c"]
            .iter()
            .map(|p| ProducerRecord::new("timer", "tx", p.as_bytes().to_vec()))
            .collect();
        broker.produce(&records).await.unwrap();

        let topics = vec!["timer".to_string()];
        let polled = broker
            .poll("g", &topics, 10, Duration::from_millis(1))
            .await
            .unwrap();

        let mut progress = BatchProgress::new();
        let mut handled = Vec::new();
        for record in &polled {
            if !progress.should_handle(record) {
                continue;
            }
            if record.payload == b"b" {
                progress.record_failure(record);
            } else {
                handled.push(record.payload.clone());
                progress.record_success(record);
            }
        }

        assert_eq!(handled, vec![b"a".to_vec()]);
        assert!(progress.has_failures());

        let summary = progress.finish(&broker, "g").await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                committed_partitions: 1,
                rewound_partitions: 1
            }
        );
        assert_eq!(broker.committed_offset("g", "timer", 0), Some(1));

        let redelivered = broker
            .poll("g", &topics, 10, Duration::from_millis(1))
            .await
            .unwrap();
        let payloads: Vec<Vec<u8>> = redelivered.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(payloads, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_batch_commits_nothing() {
        let broker = InMemoryBroker::new();
        let summary = BatchProgress::new().finish(&broker, "g").await.unwrap();
        assert_eq!(summary, BatchSummary::default());
    }
}
