//! Logging initialization
//!
//! The codebase logs through the `log` facade; records are bridged into a
//! `tracing` fmt subscriber so library spans and log lines end up in one
//! place.

use anyhow::Result;
use std::sync::Mutex;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use crate::core::config::LogSettings;

/// Initialize the global logger.
///
/// `RUST_LOG` overrides the configured level. With `settings.file` set,
/// output goes to that file without ANSI colors; otherwise to stderr.
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Log file could not be created or a global logger is already set
pub fn init_logger(settings: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", settings.level, e))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match &settings.file {
        Some(path) => {
            let log_file = fs_err::File::create(path)?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(log_file)).finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
        }
    }

    LogTracer::init().map_err(|e| anyhow::anyhow!("Failed to bridge log records: {}", e))?;

    Ok(())
}
