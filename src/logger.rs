use std::path::Path;

use anyhow::Result;
use stucco_driver::Sink;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

pub const LOG_FILE: &str = "stucco-rhai.log";

/// `log_level` is an `EnvFilter` directive (e.g. `"info"`). Transport crates
/// are capped at `warn` unless named explicitly.
pub fn filter(log_level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(log_level)?;
    for quiet in ["h2=warn", "hyper=warn", "tower=warn", "rustls=warn"] {
        if !log_level.contains(quiet.split('=').next().unwrap_or_default()) {
            filter = filter.add_directive(quiet.parse()?);
        }
    }
    Ok(filter)
}

/// Console logs go to `stderr`, the multiplexed stderr channel, so they reach
/// the engine through the `Stderr` stream in plugin mode. With `log_dir` a
/// daily rolling file is written as well; keep the guard alive to flush it.
pub fn subscriber(
    log_level: &str,
    log_dir: Option<&Path>,
    stderr: Sink,
) -> Result<(impl Subscriber + Send + Sync + 'static, Option<WorkerGuard>)> {
    let console = fmt::layer().with_writer(stderr).with_ansi(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = Registry::default().with(filter(log_level)?).with(console).with(file);
    Ok((subscriber, guard))
}

pub fn init_tracing(log_level: &str, log_dir: Option<&Path>, stderr: Sink) -> Result<Option<WorkerGuard>> {
    let (subscriber, guard) = subscriber(log_level, log_dir, stderr)?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}
