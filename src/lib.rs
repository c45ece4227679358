//! # queuechain
//!
//! `queuechain` consumes messages from an AMQP queue, runs each one through a
//! chain of processing stages and publishes the result to an output queue. It
//! survives broker disconnects, stage failures and shutdown without losing
//! messages: every delivery is acked only after its result is published.
//!
//! ## Core Modules
//!
//! - `pipeline`: ordered, synchronous stage chain with one error-recovery policy.
//! - `processor`: the resilient consumer/publisher that drives pipelines.
//! - `app`: the queue, file and local modes behind the CLI.
//! - `broker`: the broker seam, with a RabbitMQ adapter and an in-process broker.
//! - `stages`: article extraction and script conversion stages.
//! - `config`: loading settings from `config/default.toml` and the environment.
//! - `utils`: error types and logging setup.

pub mod app;
pub mod broker;
pub mod config;
pub mod pipeline;
pub mod processor;
pub mod stages;
pub mod utils;
