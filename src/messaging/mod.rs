//! # Messaging
//!
//! Broker boundary ([`BrokerGateway`]), the in-memory provider, the shared buffered
//! producer and consumer-side batch bookkeeping.

pub mod consumer;
pub mod errors;
pub mod gateway;
pub mod in_memory;
pub mod producer;
pub mod topics;

pub use consumer::{BatchProgress, BatchSummary};
pub use errors::{MessagingError, MessagingResult};
pub use gateway::{
    ensure_topic, BrokerGateway, BrokerMessage, BrokerRecord, ProducerRecord, SharedGateway,
    TopicPartitionOffset, TopicSpec,
};
pub use in_memory::InMemoryBroker;
pub use producer::{BufferedProducer, ProducerHandle};
pub use topics::TopicNames;
