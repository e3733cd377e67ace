//! Logger assembly
//!
//! Builds a tracing subscriber from [`LogConfig`]: an optional stdout layer,
//! a rotating main log file and a rotating error-only file. The rotation
//! engine only ever sees formatted bytes through [`SinkWriter`].

mod sink;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LogConfig;
use crate::error::RotateError;
use crate::rotation::{RotatingFile, RotationPolicy};

pub use sink::{Sink, SinkWriter};

type Filtered = Layered<EnvFilter, Registry>;

/// A type-erased fmt layer on top of the global filter
pub type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

/// The subscriber produced by [`build`]
pub type LogSubscriber = Layered<Vec<BoxedLayer>, Filtered>;

/// Keeps the rotating files alive for the duration of logging
///
/// Dropping the guard closes the files; [`LoggingGuard::shutdown`] does the
/// same but reports errors.
pub struct LoggingGuard {
    files: Vec<Arc<RotatingFile>>,
}

impl LoggingGuard {
    /// Rotating files owned by this logger (main first, then error log)
    pub fn files(&self) -> &[Arc<RotatingFile>] {
        &self.files
    }

    /// Flush and close every file, waiting for pending compression
    pub fn shutdown(self) -> Result<(), RotateError> {
        let mut first_err = None;
        for file in &self.files {
            if let Err(e) = file.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        for file in &self.files {
            let _ = file.close();
        }
    }
}

/// Parse the configured level into a filter
pub fn filter_for(config: &LogConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level directive: {}", config.level))
}

/// Assemble the subscriber without installing it
pub fn build(config: &LogConfig, filter: EnvFilter) -> Result<(LogSubscriber, LoggingGuard)> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut files = Vec::new();

    if !config.disable_stdout {
        layers.push(fmt_layer(config, std::io::stdout, true, false));
    }

    if let Some(policy) = config.main_policy()? {
        let file = open_rotating(policy)?;
        layers.push(fmt_layer(
            config,
            SinkWriter::new(Arc::clone(&file)),
            false,
            config.json_format,
        ));
        files.push(file);
    }

    if let Some(policy) = config.error_policy()? {
        let file = open_rotating(policy)?;
        layers.push(
            fmt_layer(
                config,
                SinkWriter::new(Arc::clone(&file)),
                false,
                config.json_format,
            )
            .with_filter(LevelFilter::ERROR)
            .boxed(),
        );
        files.push(file);
    }

    let subscriber = tracing_subscriber::registry().with(filter).with(layers);
    Ok((subscriber, LoggingGuard { files }))
}

/// Build the subscriber and install it globally
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter_for(config)?,
    };
    let (subscriber, guard) = build(config, filter)?;
    subscriber
        .try_init()
        .context("A global tracing subscriber is already installed")?;
    Ok(guard)
}

fn open_rotating(policy: RotationPolicy) -> Result<Arc<RotatingFile>> {
    let base = policy.base_path().to_path_buf();
    let file = RotatingFile::new(policy)
        .with_context(|| format!("Failed to open log file {}", base.display()))?;
    Ok(Arc::new(file))
}

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool, json: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.trace {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(config.trace)
        .with_span_events(span_events);

    if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}
