//! News sentiment analysis stage

use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MarketError, Result};
use crate::tools::sentiment::{MarketImpact, TopicMention, key_topics};
use crate::tools::{LabelScore, LexiconClassifier, SentimentScores, TextClassifier};
use crate::types::TextData;

/// Input for [`SentimentAnalysisStage`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentInput {
    #[serde(default)]
    pub text_data: Option<TextData>,
}

/// Classifier output for one text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSentiment {
    pub text: String,
    /// Highest-scoring label
    pub label: String,
    pub score: f64,
    pub scores: Vec<LabelScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReport {
    pub overall_sentiment: SentimentScores,
    pub sentiment_breakdown: Vec<TextSentiment>,
    pub key_topics: Vec<TopicMention>,
    pub market_impact: MarketImpact,
}

/// Aggregates per-text sentiment into a market view
pub struct SentimentAnalysisStage {
    classifier: Arc<dyn TextClassifier>,
    context: ContextHandle,
}

impl SentimentAnalysisStage {
    pub const NAME: &'static str = "sentiment_analysis";

    pub fn new() -> Self {
        Self::with_classifier(Arc::new(LexiconClassifier::new()))
    }

    pub fn with_classifier(classifier: Arc<dyn TextClassifier>) -> Self {
        Self {
            classifier,
            context: ContextHandle::new(),
        }
    }

    async fn analyze(&self, input: SentimentInput) -> Result<Data> {
        let texts = input
            .text_data
            .filter(|t| !t.is_empty())
            .map(TextData::into_texts)
            .ok_or_else(|| MarketError::MissingInput("No text data provided".to_string()))?;

        let classified = self.classifier.classify(&texts).await?;
        if classified.len() != texts.len() {
            return Err(MarketError::ClassifierError(format!(
                "expected {} classifications, got {}",
                texts.len(),
                classified.len()
            )));
        }

        let overall = SentimentScores::aggregate(&classified)?;
        debug!(
            texts = texts.len(),
            positive = overall.positive,
            negative = overall.negative,
            "Aggregated sentiment"
        );

        let report = SentimentReport {
            market_impact: MarketImpact::from(&overall),
            overall_sentiment: overall,
            key_topics: key_topics(&texts),
            sentiment_breakdown: texts
                .into_iter()
                .zip(classified)
                .map(|(text, scores)| breakdown(text, scores))
                .collect(),
        };

        super::to_data(&report)
    }
}

impl Default for SentimentAnalysisStage {
    fn default() -> Self {
        Self::new()
    }
}

fn breakdown(text: String, scores: Vec<LabelScore>) -> TextSentiment {
    let (label, score) = scores
        .iter()
        .fold(None, |best: Option<&LabelScore>, s| match best {
            Some(b) if b.score >= s.score => Some(b),
            _ => Some(s),
        })
        .map_or((String::new(), 0.0), |s| (s.label.to_lowercase(), s.score));
    TextSentiment {
        text,
        label,
        score,
        scores,
    }
}

#[async_trait]
impl Stage for SentimentAnalysisStage {
    type Input = SentimentInput;

    async fn process(&self, input: SentimentInput) -> ResultEnvelope {
        super::log_context(Self::NAME, &self.context).await;
        let result = self.analyze(input).await;
        if let Err(e) = &result {
            warn!(stage = Self::NAME, error = %e, "Sentiment analysis failed");
        }
        result.into()
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Analyzes market sentiment from news and social media"
    }

    fn context(&self) -> &ContextHandle {
        &self.context
    }
}
