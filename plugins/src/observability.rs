//! Process-wide tracing setup from `[logging]`.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use conductor_core::config::LoggingConfig;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

const LOG_DIR_NAME: &str = "conductor";

/// Directory the file layer writes to.
pub fn log_directory(logging: &LoggingConfig) -> PathBuf {
    match logging
        .directory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        Some(d) => PathBuf::from(d),
        None => std::env::temp_dir().join(LOG_DIR_NAME),
    }
}

/// `RUST_LOG` wins over the configured level when set.
pub fn build_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => Ok(EnvFilter::from_default_env()),
        _ => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid log level '{}'", logging.level)),
    }
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = build_filter(logging)?;

    let mut maybe_writer = None;
    if logging.file {
        let dir = log_directory(logging);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create log dir {}", dir.display()))?;
        let file_name = format!("conductor.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err(anyhow!("logging disabled for both console and file"));
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(())
}
