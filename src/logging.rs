//! Structured logging setup using `tracing-subscriber` and `tracing-appender`.
//!
//! The console layer writes to stdout, as JSON (default, one object per line
//! for log collectors) or in a human-readable format. When a log directory is
//! configured, a second JSON layer writes daily-rotated files there.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level (default: `info`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise logging for the long-running service.
///
/// Returns a [`LoggingGuard`] when file logging is enabled; it must be kept
/// alive for log flushing.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init(config: &LoggingConfig) -> anyhow::Result<Option<LoggingGuard>> {
    let console_layer: BoxedLayer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_writer(std::io::stdout)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .boxed(),
    };

    let mut layers = vec![console_layer];
    let mut guard = None;
    if let Some(dir) = config.dir.as_deref() {
        let (layer, worker_guard) = file_layer(dir)?;
        layers.push(layer);
        guard = Some(LoggingGuard {
            _guard: worker_guard,
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&config.level))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(guard)
}

/// Initialise minimal logging for one-shot subcommands.
///
/// Emits human-readable output to stderr only so stdout stays clean for
/// command output. Controlled by `RUST_LOG` (default: the configured level).
pub fn init_cli(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .try_init();
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn file_layer(dir: &Path) -> anyhow::Result<(BoxedLayer, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("failed to create logs directory {}: {e}", dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(dir, "routing-triage.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .boxed();
    Ok((layer, guard))
}
