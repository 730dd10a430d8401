//! Logging and tracing utilities

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Subscriber settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Resolve the effective filter, preferring `RUST_LOG`
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter)
                .map_err(|e| anyhow::anyhow!("invalid log filter '{}': {e}", self.filter)),
        }
    }
}

/// Initialize tracing subscriber with default configuration
pub fn init_tracing() -> anyhow::Result<()> {
    init_tracing_with(&LogConfig::default())
}

/// Initialize tracing subscriber from explicit settings
///
/// Fails instead of panicking when a global subscriber is already installed.
pub fn init_tracing_with(config: &LogConfig) -> anyhow::Result<()> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.filter, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_invalid_filter_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LogConfig {
            filter: "agent_market=notalevel".to_string(),
            json: false,
        };
        assert!(config.env_filter().is_err());
    }

    #[test]
    fn test_second_init_fails_without_panicking() {
        let _ = init_tracing();
        assert!(init_tracing().is_err());
    }
}
