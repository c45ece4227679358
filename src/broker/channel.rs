//! Broker seam
//!
//! The queue processor talks to the broker only through these traits, so the
//! same consume/publish logic runs against RabbitMQ ([`super::amqp`]) and the
//! in-process broker ([`super::memory`]).
//!
//! A [`Connector`] opens a fresh [`BrokerChannel`] per (re)connection. The
//! channel object is not safe for concurrent use; callers serialize access.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::utils::error::BrokerError;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// One inbound message as handed out by the broker.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel-scoped token used to ack or nack this delivery.
    pub delivery_tag: u64,
    pub queue: String,
    pub payload: Vec<u8>,
    pub message_id: Option<String>,
    pub redelivered: bool,
}

/// Properties applied when publishing. Messages are always persistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub content_type: String,
    pub message_id: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            message_id: None,
            headers: BTreeMap::new(),
        }
    }
}

impl PublishOptions {
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare a queue; declaring an existing queue is a no-op.
    async fn declare_queue(&mut self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries per consumer.
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError>;

    /// Register a consumer on `queue`; its deliveries show up in `next_delivery`.
    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Stop a consumer registered with `consume`.
    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), BrokerError>;

    /// Wait at most `wait` for the next delivery from any consumer.
    ///
    /// `Ok(None)` means nothing arrived within the time slice. An error means
    /// the channel or its connection is gone.
    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, BrokerError>;

    async fn publish(
        &mut self,
        queue: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<(), BrokerError>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    /// Human readable endpoint, safe to log (no credentials).
    fn describe(&self) -> String;
}
