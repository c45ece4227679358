use std::fs;

use serde_json::Value;
use tempfile::TempDir;

use super::{process_file, run_local};
use crate::config::Settings;
use crate::pipeline::Message;

const SCRIPT: &str = "Science: Tides\nhttps://a.example.com/moon.png\nThe moon pulls the oceans.\n";

#[test]
fn test_process_file_writes_pretty_json() {
    let dir = TempDir::new().expect("create tempdir");
    let input = dir.path().join("script.txt");
    let output = dir.path().join("result.json");
    fs::write(&input, SCRIPT).unwrap();

    process_file(&input, &output, "Tides").expect("file mode failed");

    let written = fs::read_to_string(&output).unwrap();
    assert!(written.contains("\n  \"category\": \"Science\""));
    let doc: Value = serde_json::from_str(&written).unwrap();
    assert_eq!(doc["title"], "Tides");
    assert_eq!(doc["video"][0]["content"][0], "The moon pulls the oceans.");
    assert_eq!(doc["video"][0]["media_clips"][0]["type"], "image");
}

#[test]
fn test_process_file_rejects_empty_input() {
    let dir = TempDir::new().expect("create tempdir");
    let input = dir.path().join("empty.txt");
    let output = dir.path().join("out.json");
    fs::write(&input, "").unwrap();

    let err = process_file(&input, &output, "").unwrap_err();
    assert!(err.to_string().contains("empty"));
    assert!(!output.exists());
}

#[test]
fn test_process_file_reports_missing_input() {
    let dir = TempDir::new().expect("create tempdir");
    let err = process_file(&dir.path().join("nope.txt"), &dir.path().join("out.json"), "")
        .unwrap_err();
    assert!(err.to_string().contains("failed to read"));
}

#[test]
fn test_process_file_whitespace_only_script() {
    let dir = TempDir::new().expect("create tempdir");
    let input = dir.path().join("blank.txt");
    let output = dir.path().join("out.json");
    fs::write(&input, "   ").unwrap();

    process_file(&input, &output, "").expect("whitespace still converts");
    let doc: Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert!(doc["category"].is_null());
    assert_eq!(doc["video"], serde_json::json!([]));
}

#[tokio::test]
async fn test_run_local_with_sample_article() {
    let outputs = run_local(&Settings::default(), None).await.expect("local run failed");

    assert_eq!(outputs.len(), 1);
    let Message::Structured(doc) = &outputs[0] else {
        panic!("expected JSON output");
    };
    assert_eq!(doc["category"], "Technology");
    assert_eq!(doc["video"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_local_drops_raw_text() {
    let dir = TempDir::new().expect("create tempdir");
    let input = dir.path().join("raw.txt");
    fs::write(&input, "just some words").unwrap();

    let outputs = run_local(&Settings::default(), Some(&input)).await.expect("local run failed");
    assert!(outputs.is_empty());
}
