use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::paths::QuarryDirs;

/// Used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn,quarry_core=info,quarry_keystore=info,quarry_project=info";

const LOG_FILE_PREFIX: &str = "quarry";

/// Where and how a command logs.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub filter: String,
    /// Mirror events to stderr, keeping stdout for command output.
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            console: true,
        }
    }
}

/// Installs the process-wide subscriber: a daily-rolling file under
/// `<dirs>/logs` plus an optional stderr layer. Keep the guard alive until
/// the command finishes or buffered events are lost.
pub fn init_logging(dirs: &QuarryDirs, options: &LogOptions) -> Result<WorkerGuard> {
    let logs_dir = dirs.logs_dir();
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating log directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX));
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.filter));

    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer);
    let console_layer = options.console.then(|| {
        fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
