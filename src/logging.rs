//! Structured logging setup.
//!
//! Diagnostics go through `tracing` to stderr so stdout stays clean for
//! command output. The filter comes from `TUTOR_LOG` when set, otherwise
//! from `[logging].level`.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "TUTOR_LOG";

/// Install the global subscriber. Fails if one is already installed or the
/// configured directive does not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_env(LOG_ENV) {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow!("invalid logging.level '{}': {}", config.level, e))?,
    };
    let registry = Registry::default().with(filter);

    if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!(level = %config.level, json = config.json, "logging initialized");
    Ok(())
}
