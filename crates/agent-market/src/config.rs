//! Configuration for market analysis runs

use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-stage timeout override, in whole seconds (`0` disables the timeout)
pub const ENV_STAGE_TIMEOUT_SECS: &str = "MARKET_AGENTS_STAGE_TIMEOUT_SECS";

/// Enables cross-stage context propagation when set to `true`/`1`/`yes`
pub const ENV_PROPAGATE_CONTEXT: &str = "MARKET_AGENTS_PROPAGATE_CONTEXT";

/// Indicator windows and signal thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSettings {
    pub sma_short: usize,
    pub sma_long: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    /// Band width in standard deviations
    pub bollinger_std: f64,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_long: 50,
            ema_period: 20,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
        }
    }
}

impl IndicatorSettings {
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("sma_short", self.sma_short),
            ("sma_long", self.sma_long),
            ("ema_period", self.ema_period),
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bollinger_period", self.bollinger_period),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, w)| *w == 0) {
            return Err(MarketError::ConfigError(format!(
                "{name} must be greater than 0"
            )));
        }

        if self.sma_short >= self.sma_long {
            return Err(MarketError::ConfigError(
                "sma_short must be shorter than sma_long".to_string(),
            ));
        }

        if self.macd_fast >= self.macd_slow {
            return Err(MarketError::ConfigError(
                "macd_fast must be shorter than macd_slow".to_string(),
            ));
        }

        if !(self.bollinger_std.is_finite() && self.bollinger_std > 0.0) {
            return Err(MarketError::ConfigError(
                "bollinger_std must be a positive number".to_string(),
            ));
        }

        if !(0.0 < self.rsi_oversold
            && self.rsi_oversold < self.rsi_overbought
            && self.rsi_overbought < 100.0)
        {
            return Err(MarketError::ConfigError(
                "RSI thresholds must satisfy 0 < oversold < overbought < 100".to_string(),
            ));
        }

        Ok(())
    }
}

/// Chart image feature extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSettings {
    /// Samples below this value count as ink
    pub dark_threshold: u8,
    /// Minimum share of inked pixels for a row to be a horizontal level
    pub level_density: f64,
    /// Number of horizontal bands in the volume profile
    pub profile_bands: usize,
    /// Maximum height difference between the two extremes of a double top/bottom
    pub pattern_tolerance: f64,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            dark_threshold: 128,
            level_density: 0.6,
            profile_bands: 10,
            pattern_tolerance: 0.03,
        }
    }
}

impl ChartSettings {
    pub fn validate(&self) -> Result<()> {
        if self.dark_threshold == 0 {
            return Err(MarketError::ConfigError(
                "dark_threshold must be greater than 0".to_string(),
            ));
        }

        if !(self.level_density > 0.0 && self.level_density <= 1.0) {
            return Err(MarketError::ConfigError(
                "level_density must be within (0, 1]".to_string(),
            ));
        }

        if self.profile_bands == 0 {
            return Err(MarketError::ConfigError(
                "profile_bands must be greater than 0".to_string(),
            ));
        }

        if !(self.pattern_tolerance.is_finite() && self.pattern_tolerance >= 0.0) {
            return Err(MarketError::ConfigError(
                "pattern_tolerance must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for an analysis orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Upper bound for each lower stage; `None` lets stages run to completion
    pub stage_timeout: Option<Duration>,

    /// Push cross-stage context into each stage after a run
    pub propagate_context: bool,

    pub indicators: IndicatorSettings,

    pub chart: ChartSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stage_timeout: None,
            propagate_context: false,
            indicators: IndicatorSettings::default(),
            chart: ChartSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Create a new configuration builder
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_STAGE_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                MarketError::ConfigError(format!(
                    "{ENV_STAGE_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            self.stage_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(raw) = lookup(ENV_PROPAGATE_CONTEXT) {
            self.propagate_context = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(MarketError::ConfigError(format!(
                        "{ENV_PROPAGATE_CONTEXT} must be a boolean, got '{raw}'"
                    )));
                }
            };
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stage_timeout.is_some_and(|t| t.is_zero()) {
            return Err(MarketError::ConfigError(
                "stage_timeout must be greater than 0".to_string(),
            ));
        }

        self.indicators.validate()?;
        self.chart.validate()
    }
}

/// Builder for AnalysisConfig
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    stage_timeout: Option<Duration>,
    propagate_context: Option<bool>,
    indicators: Option<IndicatorSettings>,
    chart: Option<ChartSettings>,
}

impl AnalysisConfigBuilder {
    /// Bound each lower stage's runtime
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Enable or disable cross-stage context propagation
    pub fn propagate_context(mut self, enabled: bool) -> Self {
        self.propagate_context = Some(enabled);
        self
    }

    pub fn indicators(mut self, settings: IndicatorSettings) -> Self {
        self.indicators = Some(settings);
        self
    }

    pub fn chart(mut self, settings: ChartSettings) -> Self {
        self.chart = Some(settings);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AnalysisConfig> {
        let defaults = AnalysisConfig::default();

        let config = AnalysisConfig {
            stage_timeout: self.stage_timeout.or(defaults.stage_timeout),
            propagate_context: self.propagate_context.unwrap_or(defaults.propagate_context),
            indicators: self.indicators.unwrap_or(defaults.indicators),
            chart: self.chart.unwrap_or(defaults.chart),
        };

        config.validate()?;
        Ok(config)
    }
}
