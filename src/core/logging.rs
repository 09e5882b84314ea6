//! Tracing subscriber setup.

use crate::core::config::LoggingConfig;
use crate::core::{Result, TallyError};

/// Environment variable consulted when `RUST_LOG` is not set.
pub const LOG_LEVEL_ENV: &str = "TALLY_LOG_LEVEL";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins, then `TALLY_LOG_LEVEL`, then the configured level. Fails if a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level =
        std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| config.level.as_str().to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = if config.structured {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .compact()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TallyError::config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}
