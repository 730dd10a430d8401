//! Report assembly stage

use agent_core::{ContextHandle, Data, ResultEnvelope, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MarketError, Result};
use crate::policies::{
    ConfidenceScorer, CoverageConfidenceScorer, KeyFindingsExtractor, RecommendationGenerator,
    RiskAssessment, RiskScorer, RuleBasedFindings, RuleBasedRecommendations, ThresholdRiskScorer,
    Trend, TrendClassifier, VotingTrendClassifier,
};
use crate::types::AnalysisResultBundle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub overall_trend: Trend,
    /// The sentiment stage's overall distribution, `{}` when unavailable
    pub market_sentiment: Value,
    pub key_findings: Vec<String>,
    pub confidence_score: f64,
}

/// Final analysis report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub technical_analysis: Data,
    pub chart_patterns: Data,
    pub sentiment_analysis: Data,
    pub recommendations: Vec<String>,
    pub risk_assessment: RiskAssessment,
}

/// Combines the three analyses into a [`Report`]
pub struct ReportGenerationStage {
    trend: Arc<dyn TrendClassifier>,
    confidence: Arc<dyn ConfidenceScorer>,
    findings: Arc<dyn KeyFindingsExtractor>,
    recommendations: Arc<dyn RecommendationGenerator>,
    risk: Arc<dyn RiskScorer>,
    context: ContextHandle,
}

impl ReportGenerationStage {
    pub const NAME: &'static str = "report_generation";

    pub fn new() -> Self {
        Self {
            trend: Arc::new(VotingTrendClassifier),
            confidence: Arc::new(CoverageConfidenceScorer),
            findings: Arc::new(RuleBasedFindings),
            recommendations: Arc::new(RuleBasedRecommendations),
            risk: Arc::new(ThresholdRiskScorer),
            context: ContextHandle::new(),
        }
    }

    pub fn with_trend_classifier(mut self, policy: Arc<dyn TrendClassifier>) -> Self {
        self.trend = policy;
        self
    }

    pub fn with_confidence_scorer(mut self, policy: Arc<dyn ConfidenceScorer>) -> Self {
        self.confidence = policy;
        self
    }

    pub fn with_findings_extractor(mut self, policy: Arc<dyn KeyFindingsExtractor>) -> Self {
        self.findings = policy;
        self
    }

    pub fn with_recommendation_generator(
        mut self,
        policy: Arc<dyn RecommendationGenerator>,
    ) -> Self {
        self.recommendations = policy;
        self
    }

    pub fn with_risk_scorer(mut self, policy: Arc<dyn RiskScorer>) -> Self {
        self.risk = policy;
        self
    }

    fn generate(&self, results: &AnalysisResultBundle) -> Result<Report> {
        let overall_trend = self.trend.classify(results);
        let confidence_score = self.confidence.score(results);
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(MarketError::ReportSynthesis(format!(
                "confidence score {confidence_score} outside [0, 1]"
            )));
        }

        let sentiment = &results.sentiment_analysis;
        Ok(Report {
            summary: ReportSummary {
                overall_trend,
                market_sentiment: sentiment
                    .get("overall_sentiment")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
                key_findings: self.findings.extract(results),
                confidence_score,
            },
            technical_analysis: pick(
                &results.technical_analysis,
                &[
                    ("indicators", json!({})),
                    ("patterns", json!([])),
                    ("signals", json!([])),
                    ("summary", json!({})),
                ],
            ),
            chart_patterns: pick(
                &results.chart_analysis,
                &[
                    ("patterns", json!([])),
                    ("key_levels", json!([])),
                    ("trend_lines", json!([])),
                    ("volume_profile", json!({})),
                ],
            ),
            sentiment_analysis: pick(
                sentiment,
                &[
                    ("overall_sentiment", json!({})),
                    ("sentiment_breakdown", json!([])),
                    ("key_topics", json!([])),
                    ("market_impact", json!({})),
                ],
            ),
            recommendations: self.recommendations.recommend(results, overall_trend),
            risk_assessment: self.risk.assess(results),
        })
    }
}

impl Default for ReportGenerationStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy the documented keys of one analysis, filling absent ones with a default
fn pick(section: &Data, fields: &[(&str, Value)]) -> Data {
    fields
        .iter()
        .map(|(key, default)| {
            let value = section.get(*key).cloned().unwrap_or_else(|| default.clone());
            ((*key).to_string(), value)
        })
        .collect()
}

#[async_trait]
impl Stage for ReportGenerationStage {
    type Input = AnalysisResultBundle;

    async fn process(&self, input: AnalysisResultBundle) -> ResultEnvelope {
        super::log_context(Self::NAME, &self.context).await;
        let result = self
            .generate(&input)
            .and_then(|report| super::to_data(&report));
        match &result {
            Ok(_) => debug!(failed_stages = input.failed_stages.len(), "Report assembled"),
            Err(e) => warn!(stage = Self::NAME, error = %e, "Report generation failed"),
        }
        result.into()
    }

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Generates comprehensive analysis reports combining insights from all stages"
    }

    fn context(&self) -> &ContextHandle {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedConfidence(f64);

    impl ConfidenceScorer for FixedConfidence {
        fn score(&self, _: &AnalysisResultBundle) -> f64 {
            self.0
        }
    }

    struct AlwaysBearish;

    impl TrendClassifier for AlwaysBearish {
        fn classify(&self, _: &AnalysisResultBundle) -> Trend {
            Trend::Bearish
        }
    }

    #[tokio::test]
    async fn test_empty_bundle_still_reports() {
        let stage = ReportGenerationStage::new();
        let envelope = stage.process(AnalysisResultBundle::default()).await;
        let data = envelope.data().expect("report should succeed on empty input");

        assert_eq!(data["summary"]["overall_trend"], json!("neutral"));
        assert_eq!(data["summary"]["confidence_score"], json!(0.0));
        assert_eq!(data["summary"]["market_sentiment"], json!({}));
        assert_eq!(data["chart_patterns"]["volume_profile"], json!({}));
        assert_eq!(data["technical_analysis"]["signals"], json!([]));
        assert_eq!(data["sentiment_analysis"]["key_topics"], json!([]));
        assert_eq!(data["risk_assessment"]["overall_risk_level"], json!("low"));
        assert!(data["recommendations"].as_array().is_some());
    }

    #[tokio::test]
    async fn test_passes_sections_through() {
        let mut results = AnalysisResultBundle::default();
        results.sentiment_analysis.insert(
            "overall_sentiment".to_string(),
            json!({"positive": 0.6, "negative": 0.05, "neutral": 0.35}),
        );
        results
            .chart_analysis
            .insert("patterns".to_string(), json!([{"pattern": "double_top"}]));
        results
            .chart_analysis
            .insert("unrelated".to_string(), json!(true));

        let envelope = ReportGenerationStage::new().process(results).await;
        let data = envelope.data().unwrap();

        assert_eq!(
            data["summary"]["market_sentiment"],
            json!({"positive": 0.6, "negative": 0.05, "neutral": 0.35})
        );
        assert_eq!(data["chart_patterns"]["patterns"], json!([{"pattern": "double_top"}]));
        assert!(data["chart_patterns"].get("unrelated").is_none());
    }

    #[tokio::test]
    async fn test_injected_policies() {
        let stage = ReportGenerationStage::new()
            .with_trend_classifier(Arc::new(AlwaysBearish))
            .with_confidence_scorer(Arc::new(FixedConfidence(0.75)));

        let envelope = stage.process(AnalysisResultBundle::default()).await;
        let data = envelope.data().unwrap();
        assert_eq!(data["summary"]["overall_trend"], json!("bearish"));
        assert_eq!(data["summary"]["confidence_score"], json!(0.75));
        assert_eq!(
            data["recommendations"][0],
            json!("Consider reducing exposure or tightening stop-losses")
        );
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_fails() {
        for bad in [1.5, -0.1, f64::NAN] {
            let stage =
                ReportGenerationStage::new().with_confidence_scorer(Arc::new(FixedConfidence(bad)));
            let envelope = stage.process(AnalysisResultBundle::default()).await;
            let error = envelope.error().expect("report should fail");
            assert!(error.starts_with("Report synthesis error: confidence score"));
        }
    }
}
