// src/logging.rs
// Tracing setup: stderr always, plus an optional file under logging.log_dir.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*, Layer, Registry};

use crate::config::{LoggingConfig, APP_NAME};

/// Picks the filter directive: RUST_LOG wins, then the CLI flag, then config.toml.
/// RUST_LOG=clusterwiz=trace,warn (sets clusterwiz to trace, others to warn)
pub fn build_filter(cli_level: Option<&str>, config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = cli_level.unwrap_or(config.level.as_str());
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn file_layer(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_name = format!("{}.log", APP_NAME);
    let appender = if config.rotate_daily {
        tracing_appender::rolling::daily(log_dir, file_name)
    } else {
        tracing_appender::rolling::never(log_dir, file_name)
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    let layer = if config.format.eq_ignore_ascii_case("json") {
        layer.json().boxed()
    } else {
        layer.boxed()
    };
    Ok((layer, guard))
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the program or buffered file output is lost.
pub fn init(config: &LoggingConfig, log_dir: Option<&Path>, cli_level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let (file, guard) = match log_dir {
        Some(dir) => {
            let (layer, guard) = file_layer(config, dir)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(build_filter(cli_level, config))
        .try_init()
        .context("Setting default tracing subscriber failed")?;

    Ok(guard)
}
