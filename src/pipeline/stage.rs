//! Stage contract
//!
//! A stage takes ownership of the current message and either forwards a
//! (possibly rewritten) message, asks for the message to be dropped, or
//! fails. Plain functions and closures with the right signature are stages.

use crate::pipeline::message::Message;
use crate::utils::error::StageError;

/// What a stage (or the whole pipeline) decided to do with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Continue with this message.
    Forward(Message),
    /// Stop processing; nothing is published.
    Drop,
}

impl Outcome {
    pub fn is_drop(&self) -> bool {
        matches!(self, Outcome::Drop)
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Outcome::Forward(message) => Some(message),
            Outcome::Drop => None,
        }
    }
}

pub type StageResult = Result<Outcome, StageError>;

pub trait Stage: Send + Sync {
    fn process(&self, message: Message) -> StageResult;
}

impl<F> Stage for F
where
    F: Fn(Message) -> StageResult + Send + Sync,
{
    fn process(&self, message: Message) -> StageResult {
        self(message)
    }
}

/// Recovery policy invoked when a stage fails.
///
/// Receives the message as it entered the pipeline, not the partially
/// transformed value, together with the error and the failing stage's name.
pub trait ErrorHandler: Send + Sync {
    fn recover(&self, original: &Message, error: &StageError, stage: &str) -> StageResult;
}

impl<F> ErrorHandler for F
where
    F: Fn(&Message, &StageError, &str) -> StageResult + Send + Sync,
{
    fn recover(&self, original: &Message, error: &StageError, stage: &str) -> StageResult {
        self(original, error, stage)
    }
}
