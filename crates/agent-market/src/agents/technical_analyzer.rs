//! Technical analysis stage

use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::IndicatorSettings;
use crate::error::{MarketError, Result};
use crate::tools::technical::names;
use crate::tools::{IndicatorCalculator, IndicatorSet, TaIndicatorCalculator};
use crate::types::{PriceBar, PriceSeries};

/// Bars considered for recent support and resistance
const LEVEL_LOOKBACK: usize = 20;

/// Input for [`TechnicalAnalysisStage`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalInput {
    #[serde(default)]
    pub price_data: Vec<PriceBar>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// Moving-average cross completed on the latest bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossPattern {
    pub pattern: String,
    pub bias: Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub indicator: String,
    pub signal: String,
    pub value: f64,
    pub bias: Bias,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyLevels {
    /// Nearest first
    pub support: Vec<f64>,
    /// Nearest first
    pub resistance: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSummary {
    pub trend: Bias,
    /// Share of trend evidence agreeing with `trend`, 0 when there is none
    pub strength: f64,
    /// Sample standard deviation of close-to-close changes
    pub volatility: Option<f64>,
    pub key_levels: KeyLevels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalReport {
    pub indicators: IndicatorSet,
    pub patterns: Vec<CrossPattern>,
    pub signals: Vec<Signal>,
    pub summary: TechnicalSummary,
}

/// Indicator-driven analysis of an OHLCV series
pub struct TechnicalAnalysisStage {
    calculator: Arc<dyn IndicatorCalculator>,
    settings: IndicatorSettings,
    context: ContextHandle,
}

impl TechnicalAnalysisStage {
    pub const NAME: &'static str = "technical_analysis";

    pub fn new(settings: IndicatorSettings) -> Self {
        let calculator = Arc::new(TaIndicatorCalculator::new(settings.clone()));
        Self::with_calculator(calculator, settings)
    }

    pub fn with_calculator(
        calculator: Arc<dyn IndicatorCalculator>,
        settings: IndicatorSettings,
    ) -> Self {
        Self {
            calculator,
            settings,
            context: ContextHandle::new(),
        }
    }

    fn analyze(&self, input: &TechnicalInput) -> Result<Data> {
        if input.price_data.is_empty() {
            return Err(MarketError::MissingInput("No price data provided".to_string()));
        }

        let series = PriceSeries::from_bars(&input.price_data)?;
        let indicators = self.calculator.compute(&series)?;
        debug!(bars = series.len(), indicators = indicators.len(), "Computed indicators");

        let report = TechnicalReport {
            patterns: cross_patterns(&series, &indicators),
            signals: self.signals(&series, &indicators),
            summary: TechnicalSummary {
                trend: Bias::Neutral,
                strength: 0.0,
                volatility: volatility(&series),
                key_levels: key_levels(&series, &indicators),
            }
            .with_trend(trend_evidence(&series, &indicators)),
            indicators,
        };

        super::to_data(&report)
    }

    fn signals(&self, series: &PriceSeries, indicators: &IndicatorSet) -> Vec<Signal> {
        let mut signals = Vec::new();

        if let Some(rsi) = indicators.latest(names::RSI) {
            if rsi > self.settings.rsi_overbought {
                signals.push(signal(names::RSI, "overbought", rsi, Bias::Bearish));
            } else if rsi < self.settings.rsi_oversold {
                signals.push(signal(names::RSI, "oversold", rsi, Bias::Bullish));
            }
        }

        if let Some(direction) = crossing(indicators, names::MACD, names::MACD_SIGNAL) {
            let value = indicators.latest(names::MACD_DIFF).unwrap_or_default();
            match direction {
                Bias::Bullish => {
                    signals.push(signal(names::MACD, "bullish_cross", value, direction));
                }
                Bias::Bearish => {
                    signals.push(signal(names::MACD, "bearish_cross", value, direction));
                }
                Bias::Neutral => {}
            }
        }

        if let Some(close) = series.last_close() {
            if indicators.latest(names::BB_HIGH).is_some_and(|high| close > high) {
                signals.push(signal("bollinger", "upper_band_breach", close, Bias::Bearish));
            } else if indicators.latest(names::BB_LOW).is_some_and(|low| close < low) {
                signals.push(signal("bollinger", "lower_band_breach", close, Bias::Bullish));
            }
        }

        signals
    }
}

impl TechnicalSummary {
    fn with_trend(mut self, evidence: Vec<Bias>) -> Self {
        let bullish = evidence.iter().filter(|b| **b == Bias::Bullish).count();
        let bearish = evidence.iter().filter(|b| **b == Bias::Bearish).count();
        self.trend = match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Bias::Bullish,
            std::cmp::Ordering::Less => Bias::Bearish,
            std::cmp::Ordering::Equal => Bias::Neutral,
        };
        if !evidence.is_empty() && self.trend != Bias::Neutral {
            self.strength = bullish.abs_diff(bearish) as f64 / evidence.len() as f64;
        }
        self
    }
}

fn signal(indicator: &str, kind: &str, value: f64, bias: Bias) -> Signal {
    Signal {
        indicator: indicator.to_string(),
        signal: kind.to_string(),
        value,
        bias,
    }
}

/// Direction in which `fast` crossed `slow` between the last two bars
fn crossing(indicators: &IndicatorSet, fast: &str, slow: &str) -> Option<Bias> {
    let (fast_prev, fast_now) = (indicators.previous(fast)?, indicators.latest(fast)?);
    let (slow_prev, slow_now) = (indicators.previous(slow)?, indicators.latest(slow)?);
    if fast_prev <= slow_prev && fast_now > slow_now {
        Some(Bias::Bullish)
    } else if fast_prev >= slow_prev && fast_now < slow_now {
        Some(Bias::Bearish)
    } else {
        None
    }
}

fn cross_patterns(series: &PriceSeries, indicators: &IndicatorSet) -> Vec<CrossPattern> {
    let mut patterns = Vec::new();

    match crossing(indicators, names::SMA_20, names::SMA_50) {
        Some(Bias::Bullish) => patterns.push(CrossPattern {
            pattern: "golden_cross".to_string(),
            bias: Bias::Bullish,
        }),
        Some(Bias::Bearish) => patterns.push(CrossPattern {
            pattern: "death_cross".to_string(),
            bias: Bias::Bearish,
        }),
        _ => {}
    }

    let closes = series.close();
    let sma = indicators.get(names::SMA_20).unwrap_or_default();
    if let ([.., close_prev, close_now], [.., Some(sma_prev), Some(sma_now)]) = (closes, sma) {
        if close_prev <= sma_prev && close_now > sma_now {
            patterns.push(CrossPattern {
                pattern: "price_cross_above_sma_20".to_string(),
                bias: Bias::Bullish,
            });
        } else if close_prev >= sma_prev && close_now < sma_now {
            patterns.push(CrossPattern {
                pattern: "price_cross_below_sma_20".to_string(),
                bias: Bias::Bearish,
            });
        }
    }

    patterns
}

/// One vote per available comparison: close vs short MA, short vs long MA, MACD vs signal
fn trend_evidence(series: &PriceSeries, indicators: &IndicatorSet) -> Vec<Bias> {
    let vote = |a: f64, b: f64| {
        if a > b {
            Bias::Bullish
        } else if a < b {
            Bias::Bearish
        } else {
            Bias::Neutral
        }
    };

    let short = indicators.latest(names::SMA_20);
    let long = indicators.latest(names::SMA_50);
    let macd = indicators.latest(names::MACD);
    let macd_signal = indicators.latest(names::MACD_SIGNAL);

    [
        series.last_close().zip(short),
        short.zip(long),
        macd.zip(macd_signal),
    ]
    .into_iter()
    .flatten()
    .map(|(a, b)| vote(a, b))
    .collect()
}

fn volatility(series: &PriceSeries) -> Option<f64> {
    if series.len() < 3 {
        return None;
    }
    let changes = series.pct_change();
    if changes.len() < 2 {
        return None;
    }
    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let variance = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

fn key_levels(series: &PriceSeries, indicators: &IndicatorSet) -> KeyLevels {
    let Some(close) = series.last_close() else {
        return KeyLevels::default();
    };
    let start = series.len().saturating_sub(LEVEL_LOOKBACK);
    let recent_low = series.low()[start..].iter().copied().fold(f64::INFINITY, f64::min);
    let recent_high = series.high()[start..]
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let candidates = [
        Some(recent_low),
        Some(recent_high),
        indicators.latest(names::SMA_20),
        indicators.latest(names::SMA_50),
    ];

    let mut levels = KeyLevels::default();
    for level in candidates.into_iter().flatten() {
        if level <= close {
            levels.support.push(level);
        } else {
            levels.resistance.push(level);
        }
    }
    levels.support.sort_by(|a, b| b.total_cmp(a));
    levels.support.dedup();
    levels.resistance.sort_by(f64::total_cmp);
    levels.resistance.dedup();
    levels
}

#[async_trait]
impl Stage for TechnicalAnalysisStage {
    type Input = TechnicalInput;

    async fn process(&self, input: TechnicalInput) -> ResultEnvelope {
        super::log_context(Self::NAME, &self.context).await;
        let result = self.analyze(&input);
        if let Err(e) = &result {
            warn!(stage = Self::NAME, error = %e, "Technical analysis failed");
        }
        result.into()
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Performs technical analysis using various indicators"
    }

    fn context(&self) -> &ContextHandle {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::technical::MockIndicatorCalculator;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn bars(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    fn stage_with(set: IndicatorSet) -> TechnicalAnalysisStage {
        let mut calculator = MockIndicatorCalculator::new();
        calculator.expect_compute().returning(move |_| Ok(set.clone()));
        TechnicalAnalysisStage::with_calculator(Arc::new(calculator), IndicatorSettings::default())
    }

    #[tokio::test]
    async fn test_missing_prices() {
        let stage = TechnicalAnalysisStage::new(IndicatorSettings::default());
        let envelope = stage.process(TechnicalInput::default()).await;
        assert_eq!(envelope.error(), Some("No price data provided"));
    }

    #[tokio::test]
    async fn test_malformed_series_is_failure() {
        let mut price_data = bars(&[10.0, 11.0]);
        price_data[1].close = f64::INFINITY;
        let stage = TechnicalAnalysisStage::new(IndicatorSettings::default());

        let envelope = stage.process(TechnicalInput { price_data }).await;
        assert_eq!(
            envelope.error(),
            Some("Malformed price series: non-finite close at record 1")
        );
    }

    #[tokio::test]
    async fn test_uptrend_summary() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + f64::from(i)).collect();
        let stage = TechnicalAnalysisStage::new(IndicatorSettings::default());

        let envelope = stage.process(TechnicalInput { price_data: bars(&closes) }).await;
        let data = envelope.data().expect("technical analysis should succeed");

        for key in ["indicators", "patterns", "signals", "summary"] {
            assert!(data.contains_key(key), "missing {key}");
        }
        assert_eq!(data["summary"]["trend"], json!("bullish"));
        assert_eq!(data["indicators"]["sma_20"].as_array().unwrap().len(), 60);
        assert!(data["summary"]["volatility"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_short_series_has_null_volatility() {
        let stage = TechnicalAnalysisStage::new(IndicatorSettings::default());
        let envelope = stage
            .process(TechnicalInput {
                price_data: bars(&[10.0, 11.0]),
            })
            .await;
        let data = envelope.data().unwrap();
        assert_eq!(data["summary"]["volatility"], json!(null));
        assert_eq!(data["summary"]["trend"], json!("neutral"));
        assert_eq!(data["summary"]["strength"], json!(0.0));
    }

    #[tokio::test]
    async fn test_golden_cross_and_overbought() {
        let mut set = IndicatorSet::new();
        set.insert(names::SMA_20, vec![Some(99.0), Some(101.0)]);
        set.insert(names::SMA_50, vec![Some(100.0), Some(100.0)]);
        set.insert(names::RSI, vec![Some(65.0), Some(75.0)]);
        let stage = stage_with(set);

        let envelope = stage
            .process(TechnicalInput {
                price_data: bars(&[100.0, 102.0]),
            })
            .await;
        let data = envelope.data().unwrap();

        assert_eq!(
            data["patterns"],
            json!([{"pattern": "golden_cross", "bias": "bullish"}])
        );
        assert_eq!(data["signals"][0]["signal"], json!("overbought"));
        assert_eq!(data["signals"][0]["bias"], json!("bearish"));
        assert_eq!(data["summary"]["trend"], json!("bullish"));
        assert_eq!(data["summary"]["strength"], json!(1.0));
    }

    #[tokio::test]
    async fn test_macd_cross_and_band_breach() {
        let mut set = IndicatorSet::new();
        set.insert(names::MACD, vec![Some(1.0), Some(-0.5)]);
        set.insert(names::MACD_SIGNAL, vec![Some(0.5), Some(0.0)]);
        set.insert(names::MACD_DIFF, vec![Some(0.5), Some(-0.5)]);
        set.insert(names::BB_LOW, vec![Some(95.0), Some(95.0)]);
        set.insert(names::BB_HIGH, vec![Some(105.0), Some(105.0)]);
        let stage = stage_with(set);

        let envelope = stage
            .process(TechnicalInput {
                price_data: bars(&[100.0, 90.0]),
            })
            .await;
        let signals = envelope.data().unwrap()["signals"].clone();

        assert_eq!(signals[0]["indicator"], json!("macd"));
        assert_eq!(signals[0]["signal"], json!("bearish_cross"));
        assert_eq!(signals[1]["signal"], json!("lower_band_breach"));
    }

    #[tokio::test]
    async fn test_calculator_error_is_failure() {
        let mut calculator = MockIndicatorCalculator::new();
        calculator
            .expect_compute()
            .returning(|_| Err(MarketError::IndicatorError("window too large".to_string())));
        let stage = TechnicalAnalysisStage::with_calculator(
            Arc::new(calculator),
            IndicatorSettings::default(),
        );

        let envelope = stage
            .process(TechnicalInput {
                price_data: bars(&[1.0]),
            })
            .await;
        assert_eq!(
            envelope.error(),
            Some("Technical indicator error: window too large")
        );
    }

    #[test]
    fn test_key_levels_split_around_close() {
        let series = PriceSeries::from_bars(&bars(&[10.0, 12.0, 11.0])).unwrap();
        let levels = key_levels(&series, &IndicatorSet::new());
        assert_eq!(levels.support, vec![9.0]);
        assert_eq!(levels.resistance, vec![13.0]);
    }

    #[test]
    fn test_volatility_matches_sample_std() {
        let series = PriceSeries::from_bars(&bars(&[100.0, 110.0, 99.0])).unwrap();
        // changes: +0.1, -0.1
        let vol = volatility(&series).unwrap();
        assert!((vol - 0.02_f64.sqrt()).abs() < 1e-9);
    }
}
