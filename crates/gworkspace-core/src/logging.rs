//! Tracing subscriber setup shared by the binaries

use std::str::FromStr;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;
use crate::error::Result;

/// Log to a daily-rolling file under the configured data directory.
///
/// Used by the stdio server, where stdout carries JSON-RPC and must stay clean.
pub fn init_file_logging(config: &Config, file_name: &str) -> Result<()> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, file_name);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(false)
        .with_target(false);

    let level = LevelFilter::from_str(&config.general.log_level).unwrap_or(LevelFilter::INFO);

    // try_init: a second call in the same process is not an error
    let _ = tracing_subscriber::registry()
        .with(file_layer.with_filter(level))
        .try_init();

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `warn`).
pub fn init_stderr_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
