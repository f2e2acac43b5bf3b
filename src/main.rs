//! Routing-triage CLI entry point.
//!
//! Provides `start` (the default) to run the service, `config` to print the
//! effective configuration, and `analyze` to triage a single payload by hand.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use routing_triage::config::Config;
use routing_triage::logging;
use routing_triage::monitor::MessageMetadata;
use routing_triage::supervisor::{build_engine, ServiceSupervisor};

/// Triage messages a routing layer could not classify and report the likely
/// cause to Backstage.
#[derive(Parser)]
#[command(name = "routing-triage", version, about)]
struct Cli {
    /// Subcommand to execute (default: `start`).
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the service: status endpoint plus topic monitor.
    Start,
    /// Print the effective configuration as JSON, secrets redacted.
    Config,
    /// Triage one payload read from a file or stdin, without the bus.
    Analyze {
        /// File holding the message payload. Reads stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Topic recorded in the metadata (default: the monitored topic).
        #[arg(long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => handle_start().await,
        Command::Config => handle_config(),
        Command::Analyze { file, topic } => handle_analyze(file, topic).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run the service until a shutdown signal or a fatal bus error.
async fn handle_start() -> anyhow::Result<()> {
    let config = load_config()?;
    let _logging_guard = logging::init(&config.logging)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        topic = %config.kafka.monitored_topic,
        "starting routing triage service"
    );

    let result = run_service(Arc::new(config)).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "fatal error, exiting");
    }
    result
}

async fn run_service(config: Arc<Config>) -> anyhow::Result<()> {
    let engine = build_engine(&config)?;
    let supervisor = ServiceSupervisor::new(Arc::clone(&config), engine);
    run_monitor(&supervisor, &config).await
}

#[cfg(feature = "kafka")]
async fn run_monitor(supervisor: &ServiceSupervisor, config: &Config) -> anyhow::Result<()> {
    let source = routing_triage::monitor::kafka::KafkaSource::connect(&config.kafka)
        .await
        .context("failed to connect to Kafka")?;
    supervisor.run(source).await?;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
async fn run_monitor(_supervisor: &ServiceSupervisor, _config: &Config) -> anyhow::Result<()> {
    anyhow::bail!("built without the `kafka` feature, no message source available")
}

/// Print the effective configuration.
fn handle_config() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let rendered = serde_json::to_string_pretty(&config.redacted())
        .context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

/// Triage one payload and print the outcome as JSON.
async fn handle_analyze(file: Option<PathBuf>, topic: Option<String>) -> anyhow::Result<()> {
    let config = load_config()?;
    logging::init_cli(&config.logging.level);

    let content = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("failed to read payload from stdin")?;
            buf
        }
    };

    let metadata = MessageMetadata {
        topic: topic.unwrap_or_else(|| config.kafka.monitored_topic.clone()),
        partition: 0,
        offset: 0,
        timestamp: chrono::Utc::now().timestamp_millis(),
        key: None,
        headers: BTreeMap::new(),
    };

    let engine = build_engine(&config)?;
    let outcome = engine.analyze(content.trim_end(), &metadata).await;
    let rendered =
        serde_json::to_string_pretty(&outcome).context("failed to render analysis outcome")?;
    println!("{rendered}");
    Ok(())
}
