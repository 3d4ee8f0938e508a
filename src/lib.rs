#![allow(clippy::doc_markdown)] // Allow technical terms like SCREAMING_SNAKE_CASE in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Task Watcher
//!
//! Timer scheduling and task lifecycle core for a broker-backed workflow engine.
//!
//! ## Overview
//!
//! The watcher decides when a pending task has to be looked at again (dispatch delay,
//! acknowledgement timeout, execution timeout, completion guard) and carries that
//! decision through the message broker instead of in-process timers. Far-future timers
//! sit in coarse buckets that are polled rarely; near-future timers sit in fine buckets
//! polled often. A strict state machine keeps task statuses correct under at-least-once
//! delivery, reordering and duplicates.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Legal task status transitions
//! - [`timer`] - Bucket router, dispatcher and bucket consumers
//! - [`lifecycle`] - Definition registry, task ledger, scheduler, action handler, intake
//! - [`messaging`] - Broker gateway, in-memory provider, buffered producer
//! - [`models`] - Tasks, task definitions, updates and commands
//! - [`validation`] - Identifier rules and defensive JSON decoding
//! - [`config`] - Layered watcher configuration
//! - [`watcher`] - Bootstrap and graceful shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use task_watcher::{ConfigManager, InMemoryBroker, TaskWatcher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! task_watcher::logging::init_structured_logging();
//!
//! let manager = ConfigManager::load()?;
//! let watcher = TaskWatcher::start(manager.config().clone(), Arc::new(InMemoryBroker::new())).await?;
//!
//! watcher.registry().register_json(serde_json::json!({
//!     "name": "send_email",
//!     "failureStrategy": "RETRY",
//!     "retry": { "limit": 3, "delaySecond": 10 }
//! }))?;
//!
//! watcher.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod state_machine;
pub mod timer;
pub mod utils;
pub mod validation;
pub mod watcher;

pub use config::{ConfigManager, ConfigurationError, TimerConfig, WatcherConfig};
pub use error::{WatcherError, WatcherResult};
pub use lifecycle::{
    TaskDefinitionRegistry, TaskEventIntake, TaskInstanceLedger, TaskLifecycleScheduler,
    TimerActionHandler,
};
pub use messaging::{
    BrokerGateway, BufferedProducer, InMemoryBroker, MessagingError, ProducerHandle,
    SharedGateway,
};
pub use models::{Command, Task, TaskDefinition, TaskKey, TaskUpdate};
pub use state_machine::{StateMachineError, TaskState, TaskStateMachine};
pub use timer::{BucketConsumerPool, DelayBucketRouter, TimerDispatcher, TimerEvent};
pub use validation::ValidationError;
pub use watcher::TaskWatcher;
