use anyhow::{Context, Result};
use std::{fs, path::Path};
use time::{macros::format_description, UtcOffset};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, fmt::time::OffsetTime, prelude::*, EnvFilter};

/// Installs the global subscriber: `RUST_LOG` filtered (default `info`),
/// local wall-clock timestamps, stdout always and `<log_dir>/<name>.log`
/// when a directory is given. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn init_logger(name: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Resolving the local offset fails once other threads exist; fall back
    // to UTC rather than refuse to log.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        offset,
        format_description!("[hour]:[minute]:[second].[subsecond digits:3]"),
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_timer(timer.clone());

    let (file, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating log dir {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(name)
                .filename_suffix("log")
                .build(dir)
                .context("creating log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(timer)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second initialisation (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();
    Ok(guard)
}
