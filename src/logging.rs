//! Tracing subscriber setup

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::Layered;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LogTarget, LoggingConfig};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must be kept alive for as long as file logging should be flushed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(fmt_layer(&config.format, BoxMakeWriter::new(std::io::stdout), true));
    }

    if matches!(config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(config)?;
        guard = Some(file_guard);
        layers.push(fmt_layer(&config.format, BoxMakeWriter::new(writer), false));
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

/// Create a file writer with optional daily rotation
fn create_file_writer(config: &LoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", config.log_dir))?;

    let file_appender = if config.daily_rotation {
        tracing_appender::rolling::daily(&config.log_dir, &config.log_prefix)
    } else {
        tracing_appender::rolling::never(&config.log_dir, &config.log_prefix)
    };

    Ok(tracing_appender::non_blocking(file_appender))
}

fn fmt_layer(format: &LogFormat, writer: BoxMakeWriter, ansi: bool) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    }
}
