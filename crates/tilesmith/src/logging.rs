//! Process-wide tracing subscriber.
//!
//! Library code logs through both `tracing` and `log`; [`init_logging`]
//! routes everything into one `tracing-subscriber` registry.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to install log bridge: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Output shape for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global subscriber.
///
/// `default_filter` applies when `RUST_LOG` is unset (e.g. `"info"` or
/// `"tilesmith=debug"`). Logs go to stderr so stdout stays usable for
/// command output.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Pretty => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false);
            let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr);
            let subscriber = tracing_subscriber::registry().with(env_filter).with(layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    tracing_log::LogTracer::init()?;
    Ok(())
}
