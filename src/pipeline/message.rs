//! Message definitions for the pipeline
//!
//! `Message` is the payload handed from stage to stage. The broker delivers
//! bytes; whatever parses as JSON becomes `Structured`, anything else is kept
//! as `Raw` text so that stages can still inspect it.
//!
//! Wire encoding mirrors decoding: `Structured` values are written as compact
//! JSON, `Raw` text is passed through untouched.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Structured(Value),
    Raw(String),
}

impl Message {
    /// Decode a broker payload. Never fails: invalid JSON (or invalid UTF-8)
    /// falls back to raw text.
    pub fn decode(payload: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => Message::Structured(value),
            Err(_) => Message::Raw(String::from_utf8_lossy(payload).into_owned()),
        }
    }

    /// Encode the message into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Structured(value) => serde_json::to_vec(value),
            Message::Raw(text) => Ok(text.as_bytes().to_vec()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Message::Raw(_))
    }

    /// The JSON object behind a structured message, if it is one.
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Message::Structured(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match self {
            Message::Structured(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    /// String field lookup on a structured object.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.as_object()
            .and_then(|map| map.get(key))
            .and_then(Value::as_str)
    }

    /// Top-level field names, used for log previews.
    pub fn keys(&self) -> Vec<&str> {
        self.as_object()
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Structured(value)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Raw(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Raw(text.to_string())
    }
}
