//! Concrete analysis stages

pub mod chart_analyzer;
pub mod chart_qa;
pub mod report_generator;
pub mod sentiment_analyzer;
pub mod technical_analyzer;

pub use chart_analyzer::{ChartAnalysisStage, ChartInput};
pub use chart_qa::{ChartQaInput, ChartQaStage};
pub use report_generator::{Report, ReportGenerationStage};
pub use sentiment_analyzer::{SentimentAnalysisStage, SentimentInput};
pub use technical_analyzer::{TechnicalAnalysisStage, TechnicalInput};

use agent_core::{ContextHandle, Data};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{MarketError, Result};

/// Serialize a stage output struct into an envelope payload
pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Data> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(MarketError::Other(format!(
            "stage output must be an object, got {other}"
        ))),
    }
}

/// Note which context a run starts from
///
/// Context only seeds later calls; it never changes a stage's output.
pub(crate) async fn log_context(stage: &str, context: &ContextHandle) {
    let keys = context.keys().await;
    if !keys.is_empty() {
        debug!(stage, context_keys = ?keys, "Stage has prior context");
    }
}
