//! Vision-language seams used by the chart question-answering stage
//!
//! No model ships with this crate; callers plug in their own provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::SampleGrid;

/// Produces a free-text description of a chart
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageCaptioner: Send + Sync {
    async fn caption(&self, image: &SampleGrid) -> Result<String>;
}

/// Extractive answer with the provider's own score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub score: f64,
}

/// Answers a question against a textual description of a chart
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionAnswerer: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> Result<Answer>;
}
