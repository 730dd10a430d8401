//! Scoring policies used by the report stage
//!
//! Each policy reads the merged analysis maps, so any of them may be empty
//! when the corresponding stage failed. Defaults are simple vote counts over
//! the fields the bundled stages produce.

use agent_core::Data;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AnalysisResultBundle, StageKind};

/// Daily volatility above which price swings count as a risk
const ELEVATED_VOLATILITY: f64 = 0.03;
const HIGH_VOLATILITY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub level: RiskLevel,
}

impl Risk {
    fn new(description: impl Into<String>, level: RiskLevel) -> Self {
        Self {
            description: description.into(),
            level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub technical_risks: Vec<Risk>,
    pub sentiment_risks: Vec<Risk>,
    pub pattern_risks: Vec<Risk>,
    pub overall_risk_level: RiskLevel,
}

pub trait TrendClassifier: Send + Sync {
    fn classify(&self, results: &AnalysisResultBundle) -> Trend;
}

/// Must return a value within `[0, 1]`
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, results: &AnalysisResultBundle) -> f64;
}

pub trait KeyFindingsExtractor: Send + Sync {
    fn extract(&self, results: &AnalysisResultBundle) -> Vec<String>;
}

pub trait RecommendationGenerator: Send + Sync {
    fn recommend(&self, results: &AnalysisResultBundle, trend: Trend) -> Vec<String>;
}

pub trait RiskScorer: Send + Sync {
    fn assess(&self, results: &AnalysisResultBundle) -> RiskAssessment;
}

fn lookup<'a>(data: &'a Data, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter().try_fold(data.get(*first)?, |value, key| value.get(*key))
}

fn str_at<'a>(data: &'a Data, path: &[&str]) -> Option<&'a str> {
    lookup(data, path).and_then(Value::as_str)
}

fn f64_at(data: &Data, path: &[&str]) -> Option<f64> {
    lookup(data, path).and_then(Value::as_f64)
}

fn items<'a>(data: &'a Data, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Pattern names reported by the chart stage
fn chart_patterns(results: &AnalysisResultBundle) -> Vec<&str> {
    items(&results.chart_analysis, "patterns")
        .filter_map(|p| p.get("pattern").and_then(Value::as_str))
        .collect()
}

/// Signal names reported by the technical stage
fn technical_signals(results: &AnalysisResultBundle) -> Vec<(&str, &str)> {
    items(&results.technical_analysis, "signals")
        .filter_map(|s| {
            Some((
                s.get("indicator")?.as_str()?,
                s.get("signal")?.as_str()?,
            ))
        })
        .collect()
}

/// Technical trend, chart trend line and chart patterns each cast one vote
#[derive(Debug, Clone, Copy, Default)]
pub struct VotingTrendClassifier;

impl TrendClassifier for VotingTrendClassifier {
    fn classify(&self, results: &AnalysisResultBundle) -> Trend {
        let mut score = 0i32;

        match str_at(&results.technical_analysis, &["summary", "trend"]) {
            Some("bullish") => score += 1,
            Some("bearish") => score -= 1,
            _ => {}
        }

        let direction = items(&results.chart_analysis, "trend_lines")
            .next()
            .and_then(|line| line.get("direction"))
            .and_then(Value::as_str);
        match direction {
            Some("up") => score += 1,
            Some("down") => score -= 1,
            _ => {}
        }

        for pattern in chart_patterns(results) {
            match pattern {
                "double_bottom" => score += 1,
                "double_top" => score -= 1,
                _ => {}
            }
        }

        match score.signum() {
            1 => Trend::Bullish,
            -1 => Trend::Bearish,
            _ => Trend::Neutral,
        }
    }
}

/// Coverage of the three analyses weighted by how decisive they are
///
/// An empty bundle scores 0; three decisive analyses score 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageConfidenceScorer;

impl ConfidenceScorer for CoverageConfidenceScorer {
    fn score(&self, results: &AnalysisResultBundle) -> f64 {
        let present = [StageKind::Chart, StageKind::Technical, StageKind::Sentiment]
            .into_iter()
            .filter(|kind| !results.section(*kind).is_empty())
            .count();
        if present == 0 {
            return 0.0;
        }

        let coverage = present as f64 / 3.0;
        let strength = f64_at(&results.technical_analysis, &["summary", "strength"]).unwrap_or(0.0);
        let sentiment =
            f64_at(&results.sentiment_analysis, &["market_impact", "confidence"]).unwrap_or(0.0);
        let decisiveness = 0.5 + 0.25 * strength.clamp(0.0, 1.0) + 0.25 * sentiment.clamp(0.0, 1.0);

        (coverage * decisiveness).clamp(0.0, 1.0)
    }
}

/// One finding per notable field, plus one per failed stage
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedFindings;

impl KeyFindingsExtractor for RuleBasedFindings {
    fn extract(&self, results: &AnalysisResultBundle) -> Vec<String> {
        let mut findings = Vec::new();
        let technical = &results.technical_analysis;

        if let Some(trend) = str_at(technical, &["summary", "trend"]) {
            let strength = f64_at(technical, &["summary", "strength"]).unwrap_or(0.0);
            findings.push(format!("Technical trend is {trend} (strength {strength:.2})"));
        }
        for (indicator, signal) in technical_signals(results) {
            findings.push(format!(
                "{} signal: {}",
                indicator.to_uppercase(),
                signal.replace('_', " ")
            ));
        }
        for pattern in items(technical, "patterns").filter_map(|p| p.get("pattern")?.as_str()) {
            findings.push(format!("Moving-average pattern: {}", pattern.replace('_', " ")));
        }

        for pattern in items(&results.chart_analysis, "patterns") {
            if let (Some(name), Some(confidence)) = (
                pattern.get("pattern").and_then(Value::as_str),
                pattern.get("confidence").and_then(Value::as_f64),
            ) {
                findings.push(format!(
                    "Chart shows a {} (confidence {confidence:.2})",
                    name.replace('_', " ")
                ));
            }
        }

        let sentiment = &results.sentiment_analysis;
        if let Some(level) = str_at(sentiment, &["market_impact", "impact_level"]) {
            let score = f64_at(sentiment, &["market_impact", "impact_score"]).unwrap_or(0.0);
            findings.push(format!(
                "News sentiment is {} (impact {score:+.2})",
                level.replace('_', " ")
            ));
        }

        for failure in &results.failed_stages {
            findings.push(format!(
                "{} analysis unavailable: {}",
                capitalize(failure.stage.as_str()),
                failure.error
            ));
        }

        findings
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Trend-led recommendations, tempered by overbought/oversold signals
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedRecommendations;

impl RecommendationGenerator for RuleBasedRecommendations {
    fn recommend(&self, results: &AnalysisResultBundle, trend: Trend) -> Vec<String> {
        let mut recommendations = vec![match trend {
            Trend::Bullish => "Consider adding to positions on pullbacks toward support",
            Trend::Bearish => "Consider reducing exposure or tightening stop-losses",
            Trend::Neutral => "Hold current positions and wait for a confirmed breakout",
        }
        .to_string()];

        let signals = technical_signals(results);
        if signals.contains(&("rsi", "overbought")) {
            recommendations.push("Avoid chasing the move while RSI is overbought".to_string());
        }
        if signals.contains(&("rsi", "oversold")) {
            recommendations.push("Watch for a reversal setup while RSI is oversold".to_string());
        }

        let impact = str_at(&results.sentiment_analysis, &["market_impact", "impact_level"]);
        let conflicting = matches!(
            (trend, impact),
            (Trend::Bullish, Some("strongly_negative" | "moderately_negative"))
                | (Trend::Bearish, Some("strongly_positive" | "moderately_positive"))
        );
        if conflicting {
            recommendations.push(
                "News sentiment contradicts the price trend; size positions conservatively"
                    .to_string(),
            );
        }

        if !results.failed_stages.is_empty() {
            let stages: Vec<&str> = results
                .failed_stages
                .iter()
                .map(|f| f.stage.as_str())
                .collect();
            recommendations.push(format!(
                "Re-run the analysis once {} data is available",
                stages.join(" and ")
            ));
        }

        recommendations
    }
}

/// Threshold-based risks per category; the overall level is the worst one found
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdRiskScorer;

impl ThresholdRiskScorer {
    fn technical(results: &AnalysisResultBundle) -> Vec<Risk> {
        let mut risks = Vec::new();
        if let Some(vol) = f64_at(&results.technical_analysis, &["summary", "volatility"]) {
            if vol > HIGH_VOLATILITY {
                risks.push(Risk::new(format!("High price volatility ({vol:.3})"), RiskLevel::High));
            } else if vol > ELEVATED_VOLATILITY {
                risks.push(Risk::new(
                    format!("Elevated price volatility ({vol:.3})"),
                    RiskLevel::Medium,
                ));
            }
        }
        for (indicator, signal) in technical_signals(results) {
            if matches!(
                signal,
                "overbought" | "oversold" | "upper_band_breach" | "lower_band_breach"
            ) {
                risks.push(Risk::new(
                    format!("{} {} may revert", indicator.to_uppercase(), signal.replace('_', " ")),
                    RiskLevel::Medium,
                ));
            }
        }
        risks
    }

    fn sentiment(results: &AnalysisResultBundle) -> Vec<Risk> {
        let mut risks = Vec::new();
        match str_at(&results.sentiment_analysis, &["market_impact", "impact_level"]) {
            Some("strongly_negative") => {
                risks.push(Risk::new("Strongly negative news flow", RiskLevel::High));
            }
            Some("moderately_negative") => {
                risks.push(Risk::new("Moderately negative news flow", RiskLevel::Medium));
            }
            _ => {}
        }
        if f64_at(&results.sentiment_analysis, &["market_impact", "confidence"])
            .is_some_and(|c| c < 0.5)
        {
            risks.push(Risk::new("Mixed sentiment with low conviction", RiskLevel::Low));
        }
        risks
    }

    fn pattern(results: &AnalysisResultBundle) -> Vec<Risk> {
        chart_patterns(results)
            .into_iter()
            .filter(|p| *p == "double_top")
            .map(|_| Risk::new("Double top suggests a potential reversal", RiskLevel::Medium))
            .collect()
    }
}

impl RiskScorer for ThresholdRiskScorer {
    fn assess(&self, results: &AnalysisResultBundle) -> RiskAssessment {
        let technical_risks = Self::technical(results);
        let sentiment_risks = Self::sentiment(results);
        let pattern_risks = Self::pattern(results);

        let worst = technical_risks
            .iter()
            .chain(&sentiment_risks)
            .chain(&pattern_risks)
            .map(|r| r.level)
            .max()
            .unwrap_or(RiskLevel::Low);
        // missing analyses leave blind spots
        let coverage_floor = if results.failed_stages.len() >= 2 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        RiskAssessment {
            technical_risks,
            sentiment_risks,
            pattern_risks,
            overall_risk_level: worst.max(coverage_floor),
        }
    }
}
