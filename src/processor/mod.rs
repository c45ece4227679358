//! The `processor` module drives pipelines against a message broker.
//!
//! A [`QueueProcessor`] owns one broker channel at a time. It stores every
//! subscription, runs a single background task that consumes deliveries,
//! feeds them through the subscribed [`Pipeline`](crate::pipeline::Pipeline)
//! and settles them:
//!
//! - pipeline dropped the message: ack
//! - pipeline produced a message: publish to the output queue, then ack
//! - publish failed or a stage panicked: nack with requeue
//!
//! When the channel is lost the task reconnects with capped exponential
//! backoff and replays every subscription on the new channel. Delivery is
//! at-least-once.

pub mod engine;
pub mod options;
mod state;

pub use engine::QueueProcessor;
pub use options::{HandlerFailurePolicy, ProcessorOptions, SubscriptionOptions, backoff_delay};
pub use state::Subscription;
