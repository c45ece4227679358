//! The `pipeline` module implements the message transformation chain.
//!
//! A [`Pipeline`] is an ordered list of named [`Stage`]s plus one optional
//! [`ErrorHandler`]. It is synchronous and stateless between invocations; the
//! queue processor calls it once per delivery.

pub mod chain;
pub mod message;
pub mod stage;

pub use chain::{Pipeline, ProcessReport};
pub use message::Message;
pub use stage::{ErrorHandler, Outcome, Stage, StageResult};
