//! Market data inputs shared by the analysis stages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use agent_core::{Data, ResultEnvelope};

use crate::error::{MarketError, Result};

/// One OHLCV record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    #[serde(alias = "Date", alias = "Datetime", alias = "date")]
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "Open")]
    pub open: f64,
    #[serde(alias = "High")]
    pub high: f64,
    #[serde(alias = "Low")]
    pub low: f64,
    #[serde(alias = "Close")]
    pub close: f64,
    #[serde(alias = "Volume")]
    pub volume: f64,
}

impl PriceBar {
    fn first_non_finite(&self) -> Option<&'static str> {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

/// Time-ordered tabular view over a set of price records
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    timestamps: Vec<DateTime<Utc>>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl PriceSeries {
    /// Order records by time and split them into columns
    ///
    /// Records sharing a timestamp keep their input order.
    pub fn from_bars(bars: &[PriceBar]) -> Result<Self> {
        if bars.is_empty() {
            return Err(MarketError::MalformedSeries(
                "price series has no records".to_string(),
            ));
        }
        if let Some((index, column)) = bars
            .iter()
            .enumerate()
            .find_map(|(i, bar)| bar.first_non_finite().map(|c| (i, c)))
        {
            return Err(MarketError::MalformedSeries(format!(
                "non-finite {column} at record {index}"
            )));
        }

        let mut ordered: Vec<&PriceBar> = bars.iter().collect();
        ordered.sort_by_key(|bar| bar.timestamp);

        Ok(Self {
            timestamps: ordered.iter().map(|b| b.timestamp).collect(),
            open: ordered.iter().map(|b| b.open).collect(),
            high: ordered.iter().map(|b| b.high).collect(),
            low: ordered.iter().map(|b| b.low).collect(),
            close: ordered.iter().map(|b| b.close).collect(),
            volume: ordered.iter().map(|b| b.volume).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    /// Most recent close
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }

    /// Close-to-close fractional changes, skipping zero-priced bases
    pub fn pct_change(&self) -> Vec<f64> {
        self.close
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect()
    }
}

/// News text as supplied by callers: one string or many
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextData {
    Single(String),
    Many(Vec<String>),
}

impl TextData {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(text) => text.is_empty(),
            Self::Many(texts) => texts.is_empty(),
        }
    }

    /// Coerce into a list of texts regardless of the supplied shape
    pub fn into_texts(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Many(texts) => texts,
        }
    }
}

impl From<&str> for TextData {
    fn from(text: &str) -> Self {
        Self::Single(text.to_string())
    }
}

impl From<Vec<String>> for TextData {
    fn from(texts: Vec<String>) -> Self {
        Self::Many(texts)
    }
}

/// Uncompressed pixel buffer, row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    /// 1 for grayscale, 3 for RGB
    pub channels: u8,
    pub samples: Vec<u8>,
}

/// Rendered chart payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartImage {
    /// Image file on disk
    Path { path: PathBuf },
    /// Encoded image bytes
    Encoded { bytes: Vec<u8> },
    /// Already-decoded pixels
    Pixels(RawImage),
}

impl ChartImage {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Path { path } => path.as_os_str().is_empty(),
            Self::Encoded { bytes } => bytes.is_empty(),
            Self::Pixels(raw) => raw.samples.is_empty() || raw.width == 0 || raw.height == 0,
        }
    }
}

/// Two-dimensional grayscale sample grid (0 = black, 255 = white)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGrid {
    width: usize,
    height: usize,
    samples: Vec<u8>,
}

impl SampleGrid {
    pub fn new(width: usize, height: usize, samples: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MarketError::ImageDecode(format!(
                "image has zero extent ({width}x{height})"
            )));
        }
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| MarketError::ImageDecode("image dimensions overflow".to_string()))?;
        if samples.len() != expected {
            return Err(MarketError::ImageDecode(format!(
                "expected {expected} samples for {width}x{height}, got {}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.samples[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.samples[y * self.width..(y + 1) * self.width]
    }
}

/// Lower analysis stages fanned out by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Chart,
    Technical,
    Sentiment,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Technical => "technical",
            Self::Sentiment => "sentiment",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joint orchestrator input
///
/// Every field is optional so that a missing one surfaces as a validation
/// failure rather than a deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInputBundle {
    #[serde(default)]
    pub chart_data: Option<ChartImage>,
    #[serde(default)]
    pub price_data: Option<Vec<PriceBar>>,
    #[serde(default)]
    pub text_data: Option<TextData>,
}

impl AnalysisInputBundle {
    pub fn new(chart_data: ChartImage, price_data: Vec<PriceBar>, text_data: TextData) -> Self {
        Self {
            chart_data: Some(chart_data),
            price_data: Some(price_data),
            text_data: Some(text_data),
        }
    }

    /// Names of fields that are absent or empty, in declaration order
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.chart_data.as_ref().is_none_or(ChartImage::is_empty) {
            missing.push("chart_data");
        }
        if self.price_data.as_ref().is_none_or(Vec::is_empty) {
            missing.push("price_data");
        }
        if self.text_data.as_ref().is_none_or(TextData::is_empty) {
            missing.push("text_data");
        }
        missing
    }
}

/// A lower stage that failed during one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub error: String,
}

/// Merged lower-stage output handed to the report stage
///
/// A failed stage contributes an empty map, never an absent field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResultBundle {
    #[serde(default)]
    pub chart_analysis: Data,
    #[serde(default)]
    pub technical_analysis: Data,
    #[serde(default)]
    pub sentiment_analysis: Data,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_stages: Vec<StageFailure>,
}

impl AnalysisResultBundle {
    /// Record one stage's envelope; failures become an empty map plus a failure entry
    pub fn absorb(&mut self, stage: StageKind, envelope: ResultEnvelope) {
        let data = match envelope {
            ResultEnvelope::Success(data) => data,
            ResultEnvelope::Failure(error) => {
                self.failed_stages.push(StageFailure { stage, error });
                Data::new()
            }
        };
        match stage {
            StageKind::Chart => self.chart_analysis = data,
            StageKind::Technical => self.technical_analysis = data,
            StageKind::Sentiment => self.sentiment_analysis = data,
        }
    }

    pub fn section(&self, stage: StageKind) -> &Data {
        match stage {
            StageKind::Chart => &self.chart_analysis,
            StageKind::Technical => &self.technical_analysis,
            StageKind::Sentiment => &self.sentiment_analysis,
        }
    }

    pub fn has_failed(&self, stage: StageKind) -> bool {
        self.failed_stages.iter().any(|f| f.stage == stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn bar(day: u32, close: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn test_series_orders_by_time() {
        let series = PriceSeries::from_bars(&[bar(3, 12.0), bar(1, 10.0), bar(2, 11.0)]).unwrap();
        assert_eq!(series.close(), &[10.0, 11.0, 12.0]);
        assert_eq!(series.len(), 3);
        assert_eq!(series.last_close(), Some(12.0));
    }

    #[test]
    fn test_series_rejects_non_finite() {
        let mut bad = bar(2, 11.0);
        bad.high = f64::NAN;
        let err = PriceSeries::from_bars(&[bar(1, 10.0), bad]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed price series: non-finite high at record 1"
        );
    }

    #[test]
    fn test_pct_change() {
        let series = PriceSeries::from_bars(&[bar(1, 10.0), bar(2, 11.0), bar(3, 9.9)]).unwrap();
        let changes = series.pct_change();
        assert_eq!(changes.len(), 2);
        assert!((changes[0] - 0.1).abs() < 1e-12);
        assert!((changes[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_price_bar_accepts_capitalised_columns() {
        let bar: PriceBar = serde_json::from_value(json!({
            "Date": "2024-01-02T00:00:00Z",
            "Open": 1.0, "High": 2.0, "Low": 0.5, "Close": 1.5, "Volume": 100.0
        }))
        .unwrap();
        assert_eq!(bar.close, 1.5);
    }

    #[test]
    fn test_text_data_shapes() {
        let single: TextData = serde_json::from_value(json!("Fed holds rates")).unwrap();
        assert_eq!(single.clone().into_texts(), vec!["Fed holds rates".to_string()]);

        let many: TextData = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(many.into_texts().len(), 2);

        assert!(TextData::Many(vec![]).is_empty());
        assert!(TextData::from("").is_empty());
    }

    #[test]
    fn test_chart_image_emptiness() {
        assert!(ChartImage::Encoded { bytes: vec![] }.is_empty());
        assert!(ChartImage::Path { path: PathBuf::new() }.is_empty());
        assert!(!ChartImage::Encoded { bytes: vec![1] }.is_empty());

        let image: ChartImage =
            serde_json::from_value(json!({"kind": "path", "path": "chart.pgm"})).unwrap();
        assert!(!image.is_empty());
    }

    #[test]
    fn test_sample_grid_validation() {
        assert!(SampleGrid::new(2, 2, vec![0; 3]).is_err());
        assert!(SampleGrid::new(0, 2, vec![]).is_err());
        assert!(SampleGrid::new(usize::MAX, 2, vec![0, 0]).is_err());

        let grid = SampleGrid::new(2, 2, vec![0, 1, 2, 3]).unwrap();
        assert_eq!(grid.get(1, 1), 3);
        assert_eq!(grid.row(1), &[2, 3]);
    }

    #[test]
    fn test_bundle_missing_fields() {
        let bundle = AnalysisInputBundle::default();
        assert_eq!(
            bundle.missing_fields(),
            vec!["chart_data", "price_data", "text_data"]
        );

        let bundle = AnalysisInputBundle::new(
            ChartImage::Encoded { bytes: vec![1] },
            vec![],
            TextData::from("Fed holds rates"),
        );
        assert_eq!(bundle.missing_fields(), vec!["price_data"]);

        let bundle: AnalysisInputBundle = serde_json::from_value(json!({
            "chart_data": {"kind": "path", "path": "chart.pgm"},
            "price_data": [{
                "Date": "2024-01-02T00:00:00Z",
                "Open": 1.0, "High": 2.0, "Low": 0.5, "Close": 1.5, "Volume": 100.0
            }],
            "text_data": ""
        }))
        .unwrap();
        assert_eq!(bundle.missing_fields(), vec!["text_data"]);
    }

    #[test]
    fn test_result_bundle_absorb() {
        let mut data = Data::new();
        data.insert("trend".to_string(), json!("bullish"));

        let mut bundle = AnalysisResultBundle::default();
        bundle.absorb(StageKind::Technical, ResultEnvelope::success(data.clone()));
        bundle.absorb(StageKind::Chart, ResultEnvelope::failure("No image data provided"));

        assert_eq!(bundle.technical_analysis, data);
        assert!(bundle.chart_analysis.is_empty());
        assert!(bundle.has_failed(StageKind::Chart));
        assert!(!bundle.has_failed(StageKind::Technical));
        assert_eq!(bundle.failed_stages[0].error, "No image data provided");
    }

    #[test]
    fn test_result_bundle_wire_shape() {
        let bundle = AnalysisResultBundle::default();
        assert_eq!(
            serde_json::to_value(&bundle).unwrap(),
            json!({"chart_analysis": {}, "technical_analysis": {}, "sentiment_analysis": {}})
        );

        let mut bundle = AnalysisResultBundle::default();
        bundle.absorb(StageKind::Sentiment, ResultEnvelope::failure("boom"));
        let value = serde_json::to_value(&bundle).unwrap();
        assert_eq!(value["failed_stages"], json!([{"stage": "sentiment", "error": "boom"}]));
    }
}
