//! Staged market analysis
//!
//! This crate turns a joint bundle of a chart image, OHLCV price bars and news
//! text into one structured report. It includes:
//!
//! - Chart analysis (key levels, trend lines, double tops/bottoms, volume profile)
//! - Technical analysis with SMA, EMA, MACD, RSI and Bollinger Bands
//! - News sentiment with topic tagging and a market-impact score
//! - Report synthesis with pluggable trend, confidence, findings and risk policies
//! - Question answering over a chart with caller-supplied vision models
//!
//! # Architecture
//!
//! The [`Orchestrator`] validates the bundle, runs the chart, technical and
//! sentiment stages concurrently and feeds their merged results to the report
//! stage. Every stage implements [`agent_core::Stage`] and reports through a
//! [`ResultEnvelope`]; a failing stage degrades the report instead of aborting
//! the run.
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_market::{
//!     AnalysisConfig, AnalysisInputBundle, ChartImage, Orchestrator, PriceBar, TextData,
//! };
//!
//! # async fn run(chart: Vec<u8>, prices: Vec<PriceBar>) -> agent_market::Result<()> {
//! agent_market::init_tracing().ok();
//!
//! let config = AnalysisConfig::default().with_env_overrides()?;
//! let orchestrator = Orchestrator::new(config)?;
//!
//! let bundle = AnalysisInputBundle::new(
//!     ChartImage::Encoded { bytes: chart },
//!     prices,
//!     TextData::from("Chipmaker beats estimates on record data-center demand"),
//! );
//! let envelope = orchestrator.process(&bundle).await;
//! match envelope.data() {
//!     Some(report) => println!("{}", report["summary"]["overall_trend"]),
//!     None => eprintln!("analysis failed: {}", envelope.error().unwrap_or_default()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod engine;
pub mod error;
pub mod policies;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use agents::{
    ChartAnalysisStage, ChartQaStage, ReportGenerationStage, SentimentAnalysisStage,
    TechnicalAnalysisStage,
};
pub use config::{AnalysisConfig, ChartSettings, IndicatorSettings};
pub use engine::{Orchestrator, OrchestratorBuilder};
pub use error::{MarketError, Result};
pub use types::{
    AnalysisInputBundle, AnalysisResultBundle, ChartImage, PriceBar, RawImage, StageKind,
    TextData,
};

pub use agent_core::{ResultEnvelope, Stage};
pub use agent_utils::{LogConfig, init_tracing};
