use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use rotalog::config::LogConfig;
use rotalog::logging;
use rotalog::rotation::RotatingFile;

#[derive(Parser, Debug)]
#[command(name = "rotalog")]
#[command(about = "Write stdin to a rotating, self-pruning log file", long_about = None)]
struct Cli {
    /// TOML config file (default: ~/.config/rotalog/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stable alias path of the log file
    #[arg(short, long)]
    base_path: Option<PathBuf>,

    /// Rotate every N seconds (0 disables time rotation)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Rotate before a file would exceed N bytes (0 disables)
    #[arg(long)]
    max_size_bytes: Option<u64>,

    /// Delete archives older than N seconds (0 disables)
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Keep at most N expired archives (0 disables)
    #[arg(long)]
    max_count: Option<usize>,

    /// Leave rotated files uncompressed
    #[arg(long)]
    no_compress: bool,
}

impl Cli {
    /// Command line flags override the config file
    fn apply(&self, config: &mut LogConfig) {
        if let Some(base) = &self.base_path {
            config.base_path = Some(base.clone());
        }
        let rotation = &mut config.rotation;
        if let Some(secs) = self.interval_secs {
            rotation.interval_secs = secs;
        }
        if let Some(bytes) = self.max_size_bytes {
            rotation.max_size_bytes = bytes;
        }
        if let Some(secs) = self.max_age_secs {
            rotation.max_age_secs = secs;
        }
        if let Some(count) = self.max_count {
            rotation.max_count = count;
        }
        if self.no_compress {
            rotation.compress = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LogConfig::load(path)?,
        None => LogConfig::load_default()?,
    };
    cli.apply(&mut config);

    // Our own diagnostics go to stderr; stdin data goes to the rotating file
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => logging::filter_for(&config)?,
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let policy = config
        .main_policy()?
        .context("No log file configured: pass --base-path or set base_path")?;
    let file = Arc::new(RotatingFile::new(policy)?);

    if let Some(current) = file.current_path() {
        tracing::info!(
            alias = %file.policy().base_path().display(),
            current = %current.display(),
            "Writing stdin to rotating log"
        );
    }

    tokio::select! {
        res = pump(BufReader::new(tokio::io::stdin()), &file) => {
            let stats = res?;
            tracing::info!(lines = stats.lines, dropped = stats.dropped, "Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, closing log");
        }
    }

    // Close joins the maintenance thread, so keep it off the async workers
    let closing = Arc::clone(&file);
    tokio::task::spawn_blocking(move || closing.close())
        .await
        .context("Close task panicked")??;
    Ok(())
}

#[derive(Debug, Default)]
struct PumpStats {
    lines: u64,
    dropped: u64,
}

/// Copy input into the file one line per write, bytes unchanged
///
/// A write is blocking file I/O and may rotate the file, so it runs under
/// `block_in_place`. Needs the multi-threaded runtime.
async fn pump<R: AsyncBufRead + Unpin>(mut reader: R, file: &RotatingFile) -> Result<PumpStats> {
    let mut line = Vec::new();
    let mut stats = PumpStats::default();

    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .await
            .context("Failed to read stdin")?;
        if n == 0 {
            break;
        }
        stats.lines += 1;
        if let Err(e) = tokio::task::block_in_place(|| file.write(&line)) {
            stats.dropped += 1;
            tracing::warn!(error = %e, "Dropped input line");
        }
    }

    Ok(stats)
}
