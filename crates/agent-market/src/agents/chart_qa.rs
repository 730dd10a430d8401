//! Question answering over a chart image

use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ChartSettings;
use crate::error::{MarketError, Result};
use crate::tools::{
    ChartFeatureExtractor, ChartFeatures, ImageCaptioner, ImageDecoder, RasterDecoder,
    ProjectionExtractor, QuestionAnswerer,
};
use crate::types::{ChartImage, SampleGrid};

/// Input for [`ChartQaStage`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartQaInput {
    #[serde(default)]
    pub chart_image: Option<ChartImage>,
    #[serde(default)]
    pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartAnswer {
    pub answer: String,
    pub chart_description: String,
    pub chart_elements: Value,
    pub numerical_data: Value,
    pub confidence: f64,
}

/// Describes a chart with a captioner, then answers a question about it
///
/// Runs on its own; the orchestrator does not invoke it.
pub struct ChartQaStage {
    decoder: Arc<dyn ImageDecoder>,
    extractor: Arc<dyn ChartFeatureExtractor>,
    captioner: Arc<dyn ImageCaptioner>,
    answerer: Arc<dyn QuestionAnswerer>,
    context: ContextHandle,
}

impl ChartQaStage {
    pub const NAME: &'static str = "chart_qa";

    /// Stage using the bundled decoder and extractor with caller-supplied models
    pub fn new(
        settings: ChartSettings,
        captioner: Arc<dyn ImageCaptioner>,
        answerer: Arc<dyn QuestionAnswerer>,
    ) -> Result<Self> {
        Ok(Self::with_providers(
            Arc::new(RasterDecoder::new()),
            Arc::new(ProjectionExtractor::new(settings)?),
            captioner,
            answerer,
        ))
    }

    pub fn with_providers(
        decoder: Arc<dyn ImageDecoder>,
        extractor: Arc<dyn ChartFeatureExtractor>,
        captioner: Arc<dyn ImageCaptioner>,
        answerer: Arc<dyn QuestionAnswerer>,
    ) -> Self {
        Self {
            decoder,
            extractor,
            captioner,
            answerer,
            context: ContextHandle::new(),
        }
    }

    async fn answer(&self, input: ChartQaInput) -> Result<Data> {
        let (Some(image), Some(question)) = (
            input.chart_image.filter(|image| !image.is_empty()),
            input.question.filter(|q| !q.trim().is_empty()),
        ) else {
            return Err(MarketError::MissingInput(
                "Missing chart image or question".to_string(),
            ));
        };

        let grid = self.decoder.decode(&image).await?;
        let features = self.extractor.extract(&grid)?;
        let chart_elements = elements(&grid, &features);
        let numerical_data = numerical(&features);
        let chart_description = self.captioner.caption(&grid).await?;

        let context = format!(
            "Chart Description: {chart_description}\n\
             Chart Elements: {chart_elements}\n\
             Numerical Data: {numerical_data}"
        );
        let answer = self.answerer.answer(&question, &context).await?;
        if !answer.score.is_finite() {
            return Err(MarketError::VisionError(format!(
                "non-finite answer score {}",
                answer.score
            )));
        }
        debug!(score = answer.score, "Answered chart question");

        super::to_data(&ChartAnswer {
            answer: answer.text,
            chart_description,
            chart_elements,
            numerical_data,
            confidence: answer.score.clamp(0.0, 1.0),
        })
    }
}

fn elements(grid: &SampleGrid, features: &ChartFeatures) -> Value {
    json!({
        "dimensions": {"width": grid.width(), "height": grid.height()},
        "trend_lines": features.trend_lines,
        "key_levels": features.key_levels,
        "patterns": features.patterns,
    })
}

fn numerical(features: &ChartFeatures) -> Value {
    let levels: Vec<f64> = features.key_levels.iter().map(|l| l.price_position).collect();
    json!({
        "level_positions": levels,
        "volume_bands": features.volume_profile.bands,
        "point_of_control": features.volume_profile.point_of_control,
    })
}

#[async_trait]
impl Stage for ChartQaStage {
    type Input = ChartQaInput;

    async fn process(&self, input: ChartQaInput) -> ResultEnvelope {
        super::log_context(Self::NAME, &self.context).await;
        let result = self.answer(input).await;
        if let Err(e) = &result {
            warn!(stage = Self::NAME, error = %e, "Chart question answering failed");
        }
        result.into()
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Understands financial charts and answers questions about them"
    }

    fn context(&self) -> &ContextHandle {
        &self.context
    }
}
