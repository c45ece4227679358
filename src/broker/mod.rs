//! Broker adapters
//!
//! - `channel`: the `Connector` / `BrokerChannel` seam the processor is written against
//! - `amqp`: RabbitMQ through `lapin`
//! - `memory`: in-process queues for local runs and tests

pub mod amqp;
pub mod channel;
pub mod memory;

pub use amqp::{AmqpConnector, AmqpParams};
pub use channel::{BrokerChannel, Connector, Delivery, JSON_CONTENT_TYPE, PublishOptions};
pub use memory::{BrokerStats, Envelope, MemoryBroker};

#[cfg(test)]
mod tests;
