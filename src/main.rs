//! CLI for queuechain
//!
//! Subcommands:
//! - `run`: consume from RabbitMQ and publish results until interrupted
//! - `file`: convert a script file to JSON without a broker
//! - `local`: run one message through the processor with the in-process broker

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use queuechain::app::{process_file, run_local, run_queue};
use queuechain::config::load_config;
use queuechain::pipeline::Message;
use queuechain::utils::logging;
use tracing::error;

#[derive(Parser)]
#[command(name = "queuechain", version, about = "Chained article processor")]
struct Cli {
    /// Log level (DEBUG, INFO, WARNING, ERROR, CRITICAL); defaults to LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume from the input queue until Ctrl+C or SIGTERM
    Run {
        /// Input queue name (default: INPUT_QUEUE)
        #[arg(long)]
        input_queue: Option<String>,
        /// Output queue name (default: OUTPUT_QUEUE)
        #[arg(long)]
        output_queue: Option<String>,
    },
    /// Convert a script file and write the JSON result
    File {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Article title passed along with the script
        #[arg(long, default_value = "")]
        title: String,
    },
    /// Process one message against the in-process broker and print the output
    Local {
        /// File holding the message body (default: a built-in sample article)
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init(cli.log_level.as_deref().unwrap_or("info"));
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(cli.log_level.as_deref().unwrap_or(&settings.log.level));

    let result = match cli.command {
        Command::Run {
            input_queue,
            output_queue,
        } => {
            let input = input_queue.unwrap_or_else(|| settings.input.queue.clone());
            let output = output_queue.unwrap_or_else(|| settings.output.queue.clone());
            run_queue(&settings, &input, &output).await
        }
        Command::File {
            input,
            output,
            title,
        } => process_file(&input, &output, &title),
        Command::Local { input } => run_local(&settings, input.as_deref())
            .await
            .and_then(|outputs| print_outputs(&outputs)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_outputs(outputs: &[Message]) -> anyhow::Result<()> {
    if outputs.is_empty() {
        println!("(no message reached the output queue)");
    }
    for message in outputs {
        match message {
            Message::Structured(value) => println!("{}", serde_json::to_string_pretty(value)?),
            Message::Raw(text) => println!("{text}"),
        }
    }
    Ok(())
}
