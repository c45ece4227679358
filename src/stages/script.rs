//! Script conversion
//!
//! Turns the plain-text video script format into the structured document the
//! rendering workers consume:
//!
//! ```text
//! Technology: Rust in production      <- "Category: Title"
//! - comment lines start with a dash
//! +speaker: Alice                     <- top-level field
//! #rust, systems                      <- keyword
//! $https://example.com/source         <- src
//! https://cdn.example.com/a.jpg,scroll:duration=10;direction=right
//! First narration line.
//! https://youtu.be/abc,10-30,crop:100-0-1920-1080,excludes=12-14
//! <break=2>
//! Second narration line.
//! ```
//!
//! Media lines accumulate until text follows them; text then closes a segment
//! `{media_clips, content}` as soon as the next media line starts.

use std::sync::LazyLock;
use std::time::Instant;

use rand::seq::SliceRandom;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::pipeline::{Message, Outcome, StageResult};
use crate::stages::unix_seconds;
use crate::utils::error::ScriptError;

/// Background tracks picked from when a script does not choose one.
pub const MUSIC_TRACKS: [&str; 3] = ["track_random_1", "track_random_2", "track_random_3"];

static IMAGE_EXTENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(jpg|jpeg|png|gif|bmp|webp|tiff|svg)(\?|$|#)").expect("image extension regex")
});
static RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+-[0-9]+$").expect("range regex"));
static DASH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*-\s*").expect("dash regex"));
static BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<break(?:=(\d+))?>$").expect("break regex"));
static MUSIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<music(?:=(\d+))?>$").expect("music regex"));

/// Convert a script into the structured video document.
pub fn script2json(script: &str) -> Result<Value, ScriptError> {
    let mut doc = initial_document();
    let mut media: Vec<Value> = Vec::new();
    let mut text: Vec<String> = Vec::new();
    let mut header_seen = false;

    for line in script.trim().lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        let line = DASH.replace_all(line, "-");
        let line = line.as_ref();

        if !header_seen {
            parse_header(line, &mut doc);
            header_seen = true;
            continue;
        }

        if parse_metadata(line, &mut doc) {
            continue;
        }

        if line.starts_with("http://") || line.starts_with("https://") {
            if !text.is_empty() {
                // text with no media before it is discarded here
                flush_segment(&mut media, &mut text, &mut doc);
            }
            let clip = parse_media_line(line)?;
            debug!(url = %clip["url"], kind = %clip["type"], "added media");
            media.push(clip);
        } else if let Some(command) = command_of(line) {
            debug!(command, "skipped command line");
        } else {
            text.push(line.to_string());
        }
    }
    flush_segment(&mut media, &mut text, &mut doc);

    if doc["background_music"].as_str().is_none_or(str::is_empty) {
        if let Some(track) = MUSIC_TRACKS.choose(&mut rand::thread_rng()) {
            doc["background_music"] = json!(track);
        }
    }

    info!(
        category = %doc["category"],
        segments = doc["video"].as_array().map_or(0, Vec::len),
        "converted script"
    );
    Ok(doc)
}

fn initial_document() -> Value {
    json!({
        "category": null,
        "title": null,
        "keyword": [],
        "src": null,
        "description": null,
        "unique_id": null,
        "ads": null,
        "playlist": [],
        "test": false,
        "speaker": null,
        "upload": ["youtube"],
        "thumbnail": null,
        "background_music": null,
        "video": [],
        "is_vertical": false,
    })
}

fn parse_header(line: &str, doc: &mut Value) {
    match line.split_once(':') {
        Some((category, title)) => {
            doc["category"] = json!(category.trim());
            doc["title"] = json!(title.trim());
        }
        None => doc["category"] = json!(line),
    }
}

/// `+key: value`, `#keywords` and `$source` lines.
fn parse_metadata(line: &str, doc: &mut Value) -> bool {
    if let Some(rest) = line.strip_prefix('+') {
        let rest = rest.trim_start_matches('+').trim();
        if let Some((key, value)) = rest.split_once(':') {
            doc[key.trim()] = json!(value.trim());
        }
        true
    } else if line.starts_with('#') {
        doc["keyword"] = json!(line.trim_start_matches('#').trim());
        true
    } else if line.starts_with('$') {
        doc["src"] = json!(line.trim_start_matches('$').trim());
        true
    } else {
        false
    }
}

fn command_of(line: &str) -> Option<&'static str> {
    if BREAK.is_match(line) {
        Some("break")
    } else if MUSIC.is_match(line) {
        Some("music")
    } else {
        None
    }
}

/// Image by file extension, anything else (hosted or direct video) is video.
fn media_kind(url: &str) -> &'static str {
    if IMAGE_EXTENSION.is_match(&url.to_lowercase()) {
        "image"
    } else {
        "video"
    }
}

fn parse_span(pair: &str) -> Result<Value, ScriptError> {
    let invalid = || ScriptError::InvalidRange(pair.to_string());
    let (start, end) = pair.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end: u64 = end.trim().parse().map_err(|_| invalid())?;
    Ok(json!({ "start": start, "end": end }))
}

fn effect_value(raw: &str) -> Value {
    match raw.parse::<u64>() {
        Ok(number) if raw.bytes().all(|b| b.is_ascii_digit()) => json!(number),
        _ => json!(raw),
    }
}

/// Parse `url[,start-end...][,crop:...][,excludes=a-b;c-d][,name:k=v;...][,type=...]`.
pub fn parse_media_line(line: &str) -> Result<Value, ScriptError> {
    let mut parts = line.split(',').map(str::trim);
    let url = parts.next().unwrap_or_default();

    let mut pickes = Vec::new();
    let mut crop = Value::Null;
    let mut excludes = Vec::new();
    let mut effect = Map::new();
    let mut kind = media_kind(url).to_string();

    for part in parts {
        if RANGE.is_match(part) {
            pickes.push(parse_span(part)?);
        } else if let Some(value) = part.strip_prefix("crop:") {
            crop = json!(value.trim());
        } else if let Some(value) = part.strip_prefix("excludes=") {
            for pair in value.trim().split(';').filter(|pair| pair.contains('-')) {
                excludes.push(parse_span(pair)?);
            }
        } else if let Some((name, params)) = part.split_once(':') {
            let mut parsed = Map::new();
            for param in params.trim().split(';').filter(|p| p.contains('=')) {
                let mut fields = param.split('=');
                let (Some(key), Some(value), None) = (fields.next(), fields.next(), fields.next())
                else {
                    return Err(ScriptError::InvalidEffect(param.to_string()));
                };
                parsed.insert(key.trim().to_string(), effect_value(value.trim()));
            }
            effect.insert("name".to_string(), json!(name.trim()));
            effect.insert("params".to_string(), Value::Object(parsed));
        } else if let Some(value) = part.strip_prefix("type=") {
            kind = value.trim().to_string();
        }
    }

    Ok(json!({
        "url": url,
        "type": kind,
        "pickes": pickes,
        "crop": crop,
        "excludes": excludes,
        "effect": effect,
    }))
}

/// Close the current segment. Both buffers are emptied either way.
fn flush_segment(media: &mut Vec<Value>, text: &mut Vec<String>, doc: &mut Value) {
    let media = std::mem::take(media);
    let mut text = std::mem::take(text);
    if media.is_empty() {
        return;
    }
    if text.is_empty() {
        text.push(String::new());
    }
    let segment = json!({
        "media_clips": media,
        "content": text,
    });
    if let Some(video) = doc["video"].as_array_mut() {
        video.push(segment);
    }
}

/// Pipeline stage: convert the `article` field of a structured message.
///
/// Raw text and messages without an article are dropped. A malformed script
/// is not a stage failure: an error document is forwarded instead, so the
/// downstream consumer learns about it.
pub fn script_to_json(message: Message) -> StageResult {
    let Some(article) = message.get_str("article").filter(|a| !a.is_empty()) else {
        warn!(raw = message.is_raw(), "no article to convert, dropping message");
        return Ok(Outcome::Drop);
    };

    let started = Instant::now();
    match script2json(article) {
        Ok(doc) => {
            debug!(elapsed_ms = started.elapsed().as_millis() as u64, "script2json finished");
            Ok(Outcome::Forward(doc.into()))
        }
        Err(e) => {
            warn!(error = %e, "script conversion failed, forwarding error document");
            Ok(Outcome::Forward(
                json!({
                    "error": e.to_string(),
                    "error_type": "ScriptError",
                    "timestamp": unix_seconds(),
                    "original_length": article.chars().count(),
                })
                .into(),
            ))
        }
    }
}
