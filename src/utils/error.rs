//! The `error` module defines the error types used within `queuechain`.
//!
//! Broker adapters report [`BrokerError`], the queue processor surfaces
//! [`ProcessorError`] to its callers, and the script converter reports
//! [`ScriptError`]. Stage functions are free to fail with any error, which is
//! why they use [`StageError`] (an `anyhow::Error`).

use thiserror::Error;

/// Error raised by a pipeline stage or error handler.
pub type StageError = anyhow::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("not connected to broker")]
    NotConnected,

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),

    #[error("publish not confirmed: {0}")]
    Unconfirmed(String),

    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor is not connected to the broker")]
    NotConnected,

    #[error("processor is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid range '{0}' in media line")]
    InvalidRange(String),

    #[error("invalid effect parameter '{0}' in media line")]
    InvalidEffect(String),
}
