//! Debug logging setup.
//!
//! Logging is off unless `--log FILE` is given, in which case a `tracing`
//! subscriber writes to the file. `RUST_LOG` overrides the default filter,
//! so `RUST_LOG=lectic=trace lectic --log dbg.log ...` works as expected.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Installs a file-backed `tracing` subscriber.
///
/// Stdout stays clean for the streamed reply; all diagnostics go to the
/// log file without ANSI escapes.
pub fn init(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=debug", crate::constants::APP_NAME)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Arc::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
