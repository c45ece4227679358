//! Entry points behind the CLI subcommands.
//!
//! - [`run_queue`]: consume from RabbitMQ until Ctrl-C or SIGTERM
//! - [`process_file`]: convert one script file without a broker
//! - [`run_local`]: push one message through a `QueueProcessor` backed by the
//!   in-process broker, useful for smoke tests

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use serde_json::json;
use tracing::{error, info, warn};

use crate::broker::{AmqpConnector, MemoryBroker};
use crate::config::Settings;
use crate::pipeline::{Message, Outcome};
use crate::processor::{QueueProcessor, SubscriptionOptions};
use crate::stages::complete_pipeline;

/// How long `run_local` waits for its message to be settled.
const LOCAL_TIMEOUT: Duration = Duration::from_secs(5);

pub const SAMPLE_ARTICLE: &str = "\
Technology: Getting started with Rust
#rust
https://upload.wikimedia.org/wikipedia/commons/d/d5/Rust_programming_language_black_logo.svg
Rust is a language empowering everyone to build reliable and efficient software.
https://www.youtube.com/watch?v=5C_HPTJg5ek,10-40
Its ownership model guarantees memory safety at compile time.
";

/// Queue mode: subscribe the complete pipeline and run until interrupted.
pub async fn run_queue(
    settings: &Settings,
    input_queue: &str,
    output_queue: &str,
) -> anyhow::Result<()> {
    let connector = Arc::new(AmqpConnector::new(settings.amqp_params()));
    let processor = QueueProcessor::new(connector, settings.processor_options());

    if !processor.connect().await {
        bail!(
            "failed to connect to RabbitMQ at {}:{}",
            settings.rabbitmq.host,
            settings.rabbitmq.port
        );
    }
    processor
        .subscribe(
            input_queue,
            Arc::new(complete_pipeline()),
            output_queue,
            SubscriptionOptions::default(),
        )
        .await
        .context("failed to subscribe to the input queue")?;

    info!(
        processor = processor.processor_id(),
        input = input_queue,
        output = output_queue,
        "chain processor running, press Ctrl+C to exit"
    );
    wait_for_shutdown().await;

    info!("shutdown signal received, closing processor");
    processor.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
    }
}

/// File mode: run the complete pipeline over a script file and write pretty JSON.
pub fn process_file(input: &Path, output: &Path, title: &str) -> anyhow::Result<()> {
    info!(input = %input.display(), "reading input file");
    let article = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    if article.is_empty() {
        bail!("input file is empty: {}", input.display());
    }

    let report =
        complete_pipeline().process_detailed(json!({ "article": article, "title": title }).into());
    if let Some(stage) = &report.failed_stage {
        warn!(stage = %stage, recovered = report.recovered, "stage failed while processing file");
    }
    let Outcome::Forward(result) = report.outcome else {
        bail!("pipeline dropped the message");
    };

    let text = match result {
        Message::Structured(value) => serde_json::to_string_pretty(&value)?,
        Message::Raw(text) => text,
    };
    fs::write(output, text).with_context(|| format!("failed to write {}", output.display()))?;

    info!(input = %input.display(), output = %output.display(), "processing completed");
    Ok(())
}

/// Local mode: process one message through the queue processor and return
/// whatever reached the output queue.
///
/// `input` is a file holding the raw message body; without it a built-in
/// sample article is used.
pub async fn run_local(settings: &Settings, input: Option<&Path>) -> anyhow::Result<Vec<Message>> {
    let payload = match input {
        Some(path) => fs::read(path).with_context(|| format!("failed to read {}", path.display()))?,
        None => serde_json::to_vec(&json!({ "article": SAMPLE_ARTICLE, "title": "Sample" }))?,
    };

    let broker = MemoryBroker::new();
    let mut options = settings.processor_options();
    options.poll_slice = Duration::from_millis(20);
    options.idle_pause = Duration::from_millis(1);
    let processor = QueueProcessor::new(Arc::new(broker.clone()), options);

    let input_queue = settings.input.queue.as_str();
    let output_queue = settings.output.queue.as_str();
    processor
        .subscribe(
            input_queue,
            Arc::new(complete_pipeline()),
            output_queue,
            SubscriptionOptions::default(),
        )
        .await?;
    broker.inject(input_queue, payload);

    let deadline = Instant::now() + LOCAL_TIMEOUT;
    while broker.queue_len(input_queue) > 0 || broker.unacked_count() > 0 {
        if Instant::now() >= deadline {
            warn!("message was not settled in time");
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    processor.close().await;

    let stats = broker.stats();
    info!(
        acked = stats.acked,
        nacked = stats.nacked,
        requeued = stats.requeued,
        "local run finished"
    );
    Ok(broker
        .drain(output_queue)
        .iter()
        .map(|envelope| Message::decode(&envelope.payload))
        .collect())
}

#[cfg(test)]
mod tests;
