//! Capability providers the analysis stages delegate to

pub mod captioning;
pub mod chart;
pub mod image;
pub mod sentiment;
pub mod technical;

pub use captioning::{Answer, ImageCaptioner, QuestionAnswerer};
pub use chart::{ChartFeatureExtractor, ChartFeatures, ProjectionExtractor};
pub use image::{ImageDecoder, RasterDecoder};
pub use sentiment::{LabelScore, LexiconClassifier, SentimentScores, TextClassifier};
pub use technical::{IndicatorCalculator, IndicatorSet, TaIndicatorCalculator};
