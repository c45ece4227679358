use anyhow::anyhow;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::pipeline::{Message, Outcome, StageResult};

/// Keep only `article` and `title` from an inbound message.
///
/// A message without an article (missing, null or empty) is dropped. Raw text
/// and non-object JSON are stage failures, left to the error handler.
pub fn extract_article(message: Message) -> StageResult {
    let Some(map) = message.as_object() else {
        return Err(anyhow!("expected a JSON object, got {}", describe(&message)));
    };
    debug!(keys = ?message.keys(), "extracting article");

    let article = match map.get("article") {
        None | Some(Value::Null) => "",
        Some(Value::String(article)) => article.as_str(),
        Some(other) => return Err(anyhow!("article must be a string, got {other}")),
    };
    if article.is_empty() {
        warn!("no article found in message");
        return Ok(Outcome::Drop);
    }

    let title = map.get("title").cloned().unwrap_or_else(|| json!(""));
    info!(article_chars = article.chars().count(), title = %title, "extracted article");

    Ok(Outcome::Forward(
        json!({ "article": article, "title": title }).into(),
    ))
}

fn describe(message: &Message) -> &'static str {
    match message {
        Message::Raw(_) => "raw text",
        Message::Structured(Value::Array(_)) => "an array",
        Message::Structured(_) => "a scalar",
    }
}
