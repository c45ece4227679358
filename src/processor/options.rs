use std::time::Duration;

use crate::broker::PublishOptions;

/// Tuning knobs for one `QueueProcessor`.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Used in consumer tags and in log lines.
    pub processor_id: String,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    /// Longest time the consume task holds the lock waiting for a delivery.
    pub poll_slice: Duration,
    /// Pause between two consume iterations.
    pub idle_pause: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            processor_id: "X".to_string(),
            reconnect_base: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(300),
            poll_slice: Duration::from_millis(200),
            idle_pause: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// What to do with a delivery when the error handler itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerFailurePolicy {
    /// Nack with requeue so the message is retried.
    #[default]
    Requeue,
    /// Ack and forget the message.
    Drop,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Properties applied to every message published to the output queue.
    pub publish: PublishOptions,
    pub on_handler_failure: HandlerFailurePolicy,
}

impl SubscriptionOptions {
    pub fn with_publish(mut self, publish: PublishOptions) -> Self {
        self.publish = publish;
        self
    }

    pub fn on_handler_failure(mut self, policy: HandlerFailurePolicy) -> Self {
        self.on_handler_failure = policy;
        self
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}
