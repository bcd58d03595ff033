//! Opt-in `tracing` subscriber setup.
//!
//! The library itself only emits `tracing` events. Applications that do
//! not install their own subscriber can call [`init_tracing`].

use tracing_subscriber::{fmt, EnvFilter};

use crate::{Result, SdkError};

/// Output format of the installed subscriber.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// # Errors
///
/// Returns `SdkError::Config` if a global subscriber is already installed.
pub fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| SdkError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| SdkError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
