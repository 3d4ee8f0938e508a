//! # Timer Wheel
//!
//! A hierarchical timer wheel whose slots are broker topics. Timer events are routed
//! into the coarsest bucket their remaining time allows, re-read by one consumer per
//! bucket, and either promoted (due) or moved into a finer bucket (not yet due).
//!
//! Correctness rests on at-least-once delivery; a timer that fires after its guard no
//! longer applies is ignored by the action handler.

pub mod actions;
pub mod bucket_consumer;
pub mod dispatcher;
pub mod events;
pub mod router;

pub use actions::{
    timer_action_channel, ActionCompletion, PendingAction, TimerAction, TimerActionReceiver,
    TimerActionSender,
};
pub use bucket_consumer::{BatchReport, BucketConsumer, BucketConsumerPool, RecordOutcome};
pub use dispatcher::TimerDispatcher;
pub use events::{TimerEvent, TimerEventKind};
pub use router::DelayBucketRouter;
