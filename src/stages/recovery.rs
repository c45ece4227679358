use serde_json::json;
use tracing::error;

use crate::pipeline::{Message, Outcome, StageResult};
use crate::stages::unix_seconds;
use crate::utils::error::StageError;

/// Default error handler: tag the original message with what went wrong.
///
/// Structured objects get a `processing_error` field and are forwarded to the
/// remaining stages. Anything else is dropped.
pub fn annotate_error(original: &Message, error: &StageError, stage: &str) -> StageResult {
    error!(stage, error = %error, "stage failed, annotating message");

    let mut message = original.clone();
    let Some(map) = message.as_object_mut() else {
        return Ok(Outcome::Drop);
    };
    map.insert(
        "processing_error".to_string(),
        json!({
            "processor": stage,
            "error": error.to_string(),
            "timestamp": unix_seconds(),
        }),
    );
    Ok(Outcome::Forward(message))
}
