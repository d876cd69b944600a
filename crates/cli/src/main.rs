//! CLI entry point for soundbatch
//!
//! Reads a job payload as JSON, runs it, and streams progress events as
//! newline-delimited JSON on stdout. Logs go to stderr so the event
//! stream stays machine-readable.

use clap::Parser;
use soundbatch::{create_event_channel, Config, EventEmitter, JobRequest, JobRunner, JobStatus};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Soundbatch - batch audio conversion, mastering, trimming and analysis
#[derive(Parser, Debug)]
#[command(name = "soundbatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (soundbatch.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read the job payload from this file instead of stdin
    #[arg(short, long)]
    job: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let request = match read_request(args.job.as_deref()) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("Failed to read job payload: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (tx, mut rx) = create_event_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "failed to serialize event"),
            }
        }
    });

    let runner = JobRunner::new(config);
    let emitter = EventEmitter::new(tx);
    let result = runner.run(&request, &emitter).await;

    // Closing the last sender ends the printer once the queue drains
    drop(emitter);
    if printer.await.is_err() {
        tracing::warn!("event printer task failed");
    }

    match result {
        Ok(report) => match report.status {
            JobStatus::Success => ExitCode::SUCCESS,
            JobStatus::Error => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("Job rejected: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load configuration from the given file, or defaults plus environment
/// overrides when no file was named.
fn load_config(path: Option<&Path>) -> Result<Config, soundbatch::config::ConfigError> {
    match path {
        Some(path) => Config::load(path),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Read the job payload from a file or stdin and parse it.
fn read_request(path: Option<&Path>) -> Result<JobRequest, String> {
    let payload = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| e.to_string())?;
            buffer
        }
    };

    serde_json::from_str(&payload).map_err(|e| e.to_string())
}
