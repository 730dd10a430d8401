//! Chart image analysis stage

use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ChartSettings;
use crate::error::{MarketError, Result};
use crate::tools::{ChartFeatureExtractor, ImageDecoder, RasterDecoder, ProjectionExtractor};
use crate::types::ChartImage;

/// Input for [`ChartAnalysisStage`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartInput {
    #[serde(default)]
    pub image: Option<ChartImage>,
}

/// Detects patterns, levels, trend lines and a volume profile on a chart image
pub struct ChartAnalysisStage {
    decoder: Arc<dyn ImageDecoder>,
    extractor: Arc<dyn ChartFeatureExtractor>,
    context: ContextHandle,
}

impl ChartAnalysisStage {
    pub const NAME: &'static str = "chart_analysis";

    /// Stage with the bundled raster decoder and projection extractor
    pub fn new(settings: ChartSettings) -> Result<Self> {
        Ok(Self::with_providers(
            Arc::new(RasterDecoder::new()),
            Arc::new(ProjectionExtractor::new(settings)?),
        ))
    }

    pub fn with_providers(
        decoder: Arc<dyn ImageDecoder>,
        extractor: Arc<dyn ChartFeatureExtractor>,
    ) -> Self {
        Self {
            decoder,
            extractor,
            context: ContextHandle::new(),
        }
    }

    async fn analyze(&self, input: ChartInput) -> Result<Data> {
        let image = input
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| MarketError::MissingInput("No image data provided".to_string()))?;

        let grid = self.decoder.decode(&image).await?;
        debug!(width = grid.width(), height = grid.height(), "Decoded chart");

        let features = self.extractor.extract(&grid)?;
        debug!(
            patterns = features.patterns.len(),
            key_levels = features.key_levels.len(),
            "Extracted chart features"
        );

        super::to_data(&features)
    }
}

#[async_trait]
impl Stage for ChartAnalysisStage {
    type Input = ChartInput;

    async fn process(&self, input: ChartInput) -> ResultEnvelope {
        super::log_context(Self::NAME, &self.context).await;
        let result = self.analyze(input).await;
        if let Err(e) = &result {
            warn!(stage = Self::NAME, error = %e, "Chart analysis failed");
        }
        result.into()
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Analyzes chart patterns and visual features"
    }

    fn context(&self) -> &ContextHandle {
        &self.context
    }
}
