//! Technical indicator computation over a price series

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ta::{
    Next,
    indicators::{
        BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
        RelativeStrengthIndex, SimpleMovingAverage,
    },
};

use crate::config::IndicatorSettings;
use crate::error::Result;
use crate::types::PriceSeries;

/// Indicator names produced by [`TaIndicatorCalculator`]
pub mod names {
    pub const SMA_20: &str = "sma_20";
    pub const SMA_50: &str = "sma_50";
    pub const EMA_20: &str = "ema_20";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_DIFF: &str = "macd_diff";
    pub const RSI: &str = "rsi";
    pub const BB_HIGH: &str = "bb_high";
    pub const BB_LOW: &str = "bb_low";
    pub const BB_MID: &str = "bb_mid";
}

/// Named indicator series aligned with the input series index
///
/// Positions still inside an indicator's warm-up window hold `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorSet {
    series: BTreeMap<String, Vec<Option<f64>>>,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) {
        self.series.insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<&[Option<f64>]> {
        self.series.get(name).map(Vec::as_slice)
    }

    /// Value at the last index, if warmed up
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|s| s.last().copied().flatten())
    }

    /// Value at the second-to-last index, if warmed up
    pub fn previous(&self, name: &str) -> Option<f64> {
        self.get(name)
            .and_then(|s| s.len().checked_sub(2).and_then(|i| s[i]))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Computes named indicator series from prices
#[cfg_attr(test, mockall::automock)]
pub trait IndicatorCalculator: Send + Sync {
    fn compute(&self, series: &PriceSeries) -> Result<IndicatorSet>;
}

/// Indicator calculator backed by the `ta` crate
#[derive(Debug, Clone, Default)]
pub struct TaIndicatorCalculator {
    settings: IndicatorSettings,
}

impl TaIndicatorCalculator {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self { settings }
    }
}

impl IndicatorCalculator for TaIndicatorCalculator {
    fn compute(&self, series: &PriceSeries) -> Result<IndicatorSet> {
        let s = &self.settings;
        let closes = series.close();
        let mut set = IndicatorSet::new();

        let mut sma_short = SimpleMovingAverage::new(s.sma_short)?;
        set.insert(
            names::SMA_20,
            warmed(closes, s.sma_short - 1, |c| sma_short.next(c)),
        );

        let mut sma_long = SimpleMovingAverage::new(s.sma_long)?;
        set.insert(
            names::SMA_50,
            warmed(closes, s.sma_long - 1, |c| sma_long.next(c)),
        );

        let mut ema = ExponentialMovingAverage::new(s.ema_period)?;
        set.insert(
            names::EMA_20,
            warmed(closes, s.ema_period - 1, |c| ema.next(c)),
        );

        // RSI needs one extra bar to form its first change
        let mut rsi = RelativeStrengthIndex::new(s.rsi_period)?;
        set.insert(names::RSI, warmed(closes, s.rsi_period, |c| rsi.next(c)));

        let mut macd =
            MovingAverageConvergenceDivergence::new(s.macd_fast, s.macd_slow, s.macd_signal)?;
        let outputs: Vec<_> = closes.iter().map(|&c| macd.next(c)).collect();
        let line_warmup = s.macd_slow - 1;
        let signal_warmup = line_warmup + s.macd_signal - 1;
        set.insert(
            names::MACD,
            mask(outputs.iter().map(|o| o.macd), line_warmup),
        );
        set.insert(
            names::MACD_SIGNAL,
            mask(outputs.iter().map(|o| o.signal), signal_warmup),
        );
        set.insert(
            names::MACD_DIFF,
            mask(outputs.iter().map(|o| o.histogram), signal_warmup),
        );

        let mut bands = BollingerBands::new(s.bollinger_period, s.bollinger_std)?;
        let outputs: Vec<_> = closes.iter().map(|&c| bands.next(c)).collect();
        let warmup = s.bollinger_period - 1;
        set.insert(names::BB_HIGH, mask(outputs.iter().map(|o| o.upper), warmup));
        set.insert(names::BB_LOW, mask(outputs.iter().map(|o| o.lower), warmup));
        set.insert(names::BB_MID, mask(outputs.iter().map(|o| o.average), warmup));

        Ok(set)
    }
}

fn warmed(closes: &[f64], warmup: usize, mut step: impl FnMut(f64) -> f64) -> Vec<Option<f64>> {
    mask(closes.iter().map(|&c| step(c)), warmup)
}

fn mask(values: impl Iterator<Item = f64>, warmup: usize) -> Vec<Option<f64>> {
    values
        .enumerate()
        .map(|(i, v)| (i >= warmup && v.is_finite()).then_some(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBar;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<PriceBar> = closes
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
            .collect();
        PriceSeries::from_bars(&bars).unwrap()
    }

    #[test]
    fn test_all_series_aligned_with_input() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + f64::from(i)).collect();
        let set = TaIndicatorCalculator::default()
            .compute(&series(&closes))
            .unwrap();

        assert_eq!(set.len(), 10);
        for name in set.names() {
            assert_eq!(set.get(name).unwrap().len(), 60, "{name}");
        }
    }

    #[test]
    fn test_warmup_is_none() {
        let closes: Vec<f64> = (0..30).map(|i| 50.0 + f64::from(i % 5)).collect();
        let set = TaIndicatorCalculator::default()
            .compute(&series(&closes))
            .unwrap();

        let sma = set.get(names::SMA_20).unwrap();
        assert!(sma[18].is_none());
        assert!(sma[19].is_some());

        // fewer bars than the long window
        assert!(set.get(names::SMA_50).unwrap().iter().all(Option::is_none));
        assert!(set.latest(names::SMA_50).is_none());

        let rsi = set.get(names::RSI).unwrap();
        assert!(rsi[13].is_none());
        assert!(rsi[14].is_some());
    }

    #[test]
    fn test_sma_value() {
        let closes: Vec<f64> = (1..=20).map(f64::from).collect();
        let set = TaIndicatorCalculator::default()
            .compute(&series(&closes))
            .unwrap();
        let latest = set.latest(names::SMA_20).unwrap();
        assert!((latest - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_bollinger_brackets_mean() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + f64::from(i % 3)).collect();
        let set = TaIndicatorCalculator::default()
            .compute(&series(&closes))
            .unwrap();

        let high = set.latest(names::BB_HIGH).unwrap();
        let mid = set.latest(names::BB_MID).unwrap();
        let low = set.latest(names::BB_LOW).unwrap();
        assert!(low < mid && mid < high);
    }

    #[test]
    fn test_previous_and_latest() {
        let mut set = IndicatorSet::new();
        set.insert("x", vec![None, Some(1.0), Some(2.0)]);
        assert_eq!(set.latest("x"), Some(2.0));
        assert_eq!(set.previous("x"), Some(1.0));

        set.insert("y", vec![Some(1.0)]);
        assert_eq!(set.previous("y"), None);
        assert_eq!(set.latest("missing"), None);
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut set = IndicatorSet::new();
        set.insert(names::RSI, vec![None, Some(55.0)]);
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            serde_json::json!({"rsi": [null, 55.0]})
        );
    }
}
