//! The `stages` module holds the business stages of the article pipeline.
//!
//! - [`extract_article`]: keep `article` and `title`, drop messages without an article
//! - [`script_to_json`]: convert the article script into the video document
//! - [`annotate_error`]: default recovery, records the failure on the message
//!
//! [`complete_pipeline`] wires them together the way the worker runs them.

pub mod article;
pub mod recovery;
pub mod script;

pub use article::extract_article;
pub use recovery::annotate_error;
pub use script::{MUSIC_TRACKS, parse_media_line, script_to_json, script2json};

use crate::pipeline::Pipeline;

pub const COMPLETE_PIPELINE: &str = "complete_pipeline";

/// `extract_article -> script2json`, recovering with `annotate_error`.
pub fn complete_pipeline() -> Pipeline {
    Pipeline::new(COMPLETE_PIPELINE)
        .add_stage("extract_article", extract_article)
        .add_stage("script2json", script_to_json)
        .with_error_handler(annotate_error)
}

/// Seconds since the epoch with sub-second precision.
pub(crate) fn unix_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
