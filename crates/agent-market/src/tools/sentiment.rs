//! News sentiment classification, aggregation and topic tagging

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use crate::error::{MarketError, Result};

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't", "wasn't", "weren't",
    "won't", "wouldn't", "couldn't", "shouldn't", "hardly", "barely", "neither", "nor", "without",
];

/// How many words after a negation flip polarity
const NEGATION_WINDOW: usize = 3;

const POSITIVE_WORDS: &[&str] = &[
    "bullish", "rally", "rallies", "surge", "surges", "gain", "gains", "profit", "growth",
    "beat", "beats", "upgrade", "upgraded", "outperform", "strong", "positive", "rise",
    "rises", "increase", "breakthrough", "success", "exceed", "exceeds", "momentum", "buy",
    "optimistic", "record", "advance", "dividend", "buyback", "repurchase", "accretive",
    "upside", "recovery", "rebound", "expansion", "robust", "accelerating", "overweight",
    "raised", "tailwind",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bearish", "decline", "declines", "loss", "losses", "fall", "falls", "plunge", "plunges",
    "crash", "miss", "misses", "downgrade", "downgraded", "underperform", "weak", "negative",
    "drop", "drops", "decrease", "concern", "concerns", "risk", "fail", "disappoint",
    "disappointing", "slump", "sell", "warning", "pessimistic", "retreat", "fear", "trouble",
    "dilution", "dilutive", "headwind", "lawsuit", "litigation", "recall", "investigation",
    "probe", "default", "bankruptcy", "layoff", "layoffs", "downside", "overvalued", "bubble",
    "underweight", "lowered", "suspended",
];

/// The three sentiment classes the aggregation understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl FromStr for SentimentLabel {
    type Err = MarketError;

    /// Case-insensitive, so `POSITIVE` from a model head is accepted
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            _ => Err(MarketError::ClassifierError(format!(
                "unknown sentiment label '{s}'"
            ))),
        }
    }
}

/// One `{label, score}` pair as returned by a classifier
///
/// The label is kept as free text; it is checked during aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Classifies each input text into one or more scored labels
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Returns one list of label scores per input text, in input order
    async fn classify(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>>;
}

/// Normalised label distribution over a batch of texts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentScores {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

impl SentimentScores {
    /// Sum each label's scores across all texts, then divide by the text count
    pub fn aggregate(classified: &[Vec<LabelScore>]) -> Result<Self> {
        if classified.is_empty() {
            return Err(MarketError::ClassifierError(
                "no classified texts to aggregate".to_string(),
            ));
        }

        let mut sums = Self::default();
        for LabelScore { label, score } in classified.iter().flatten() {
            if !score.is_finite() {
                return Err(MarketError::ClassifierError(format!(
                    "non-finite score for label '{label}'"
                )));
            }
            match label.parse::<SentimentLabel>()? {
                SentimentLabel::Positive => sums.positive += score,
                SentimentLabel::Negative => sums.negative += score,
                SentimentLabel::Neutral => sums.neutral += score,
            }
        }

        let n = classified.len() as f64;
        Ok(Self {
            positive: sums.positive / n,
            negative: sums.negative / n,
            neutral: sums.neutral / n,
        })
    }

    /// Largest of the three averages
    pub fn confidence(&self) -> f64 {
        self.positive.max(self.negative).max(self.neutral)
    }

    /// Positive average minus negative average
    pub fn impact_score(&self) -> f64 {
        self.positive - self.negative
    }

    /// Label with the highest average; ties favour neutral, then positive
    pub fn dominant(&self) -> SentimentLabel {
        if self.neutral >= self.positive && self.neutral >= self.negative {
            SentimentLabel::Neutral
        } else if self.positive >= self.negative {
            SentimentLabel::Positive
        } else {
            SentimentLabel::Negative
        }
    }
}

/// Five-step market impact scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    StronglyPositive,
    ModeratelyPositive,
    Neutral,
    ModeratelyNegative,
    StronglyNegative,
}

impl ImpactLevel {
    /// Bucket an impact score; every threshold is a strict lower bound
    pub fn from_score(score: f64) -> Self {
        if score > 0.5 {
            Self::StronglyPositive
        } else if score > 0.2 {
            Self::ModeratelyPositive
        } else if score > -0.2 {
            Self::Neutral
        } else if score > -0.5 {
            Self::ModeratelyNegative
        } else {
            Self::StronglyNegative
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketImpact {
    pub impact_score: f64,
    pub impact_level: ImpactLevel,
    pub confidence: f64,
}

impl From<&SentimentScores> for MarketImpact {
    fn from(scores: &SentimentScores) -> Self {
        let impact_score = scores.impact_score();
        Self {
            impact_score,
            impact_level: ImpactLevel::from_score(impact_score),
            confidence: scores.confidence(),
        }
    }
}

/// News event categories used to tag key topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Earnings,
    MergersAcquisitions,
    Regulatory,
    AnalystAction,
    Management,
    Product,
    Legal,
    Macro,
}

impl Topic {
    const ALL: [Topic; 8] = [
        Topic::Earnings,
        Topic::MergersAcquisitions,
        Topic::Regulatory,
        Topic::AnalystAction,
        Topic::Management,
        Topic::Product,
        Topic::Legal,
        Topic::Macro,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Topic::Earnings => &["earnings", "quarterly", "guidance", "revenue", "eps", "profit"],
            Topic::MergersAcquisitions => &[
                "acqui", "merger", "buyout", "takeover", "spinoff", "spin-off",
            ],
            Topic::Regulatory => &["fda", "sec ", "regulat", "approval", "antitrust", "compliance"],
            Topic::AnalystAction => &[
                "upgrade", "downgrade", "price target", "initiat", "analyst", "rating",
            ],
            Topic::Management => &["ceo", "cfo", "board", "executive", "resign", "appoint"],
            Topic::Product => &["launch", "product", "recall", "patent", "innovation"],
            Topic::Legal => &["lawsuit", "litigation", "settlement", "sued", "court", "indictment"],
            Topic::Macro => &[
                "fed ", "federal reserve", "interest rate", "inflation", "gdp", "unemployment",
            ],
        }
    }

    /// Every category a text touches
    pub fn tag(text: &str) -> Vec<Topic> {
        let text = format!("{} ", text.to_lowercase());
        Self::ALL
            .into_iter()
            .filter(|topic| topic.keywords().iter().any(|k| text.contains(k)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMention {
    pub topic: Topic,
    /// Number of texts mentioning the topic
    pub mentions: usize,
}

/// Topic counts across texts, most mentioned first
pub fn key_topics(texts: &[String]) -> Vec<TopicMention> {
    let mut counts: BTreeMap<Topic, usize> = BTreeMap::new();
    for text in texts {
        for topic in Topic::tag(text) {
            *counts.entry(topic).or_default() += 1;
        }
    }

    let mut mentions: Vec<TopicMention> = counts
        .into_iter()
        .map(|(topic, mentions)| TopicMention { topic, mentions })
        .collect();
    mentions.sort_by(|a, b| b.mentions.cmp(&a.mentions).then(a.topic.cmp(&b.topic)));
    mentions
}

/// Word-list classifier for financial headlines
///
/// Each polarity hit counts once, flipped when a negation word appears within
/// three words before it. The distribution keeps one unit of neutral mass so
/// that a single hit does not read as certainty.
pub struct LexiconClassifier {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
    negations: HashSet<&'static str>,
}

impl LexiconClassifier {
    pub fn new() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
            negations: NEGATION_WORDS.iter().copied().collect(),
        }
    }

    /// Positive and negative hit counts after negation
    fn polarity_hits(&self, text: &str) -> (usize, usize) {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '.' | '!' | '?' | ':'))
            .filter(|w| !w.is_empty())
            .collect();

        let mut last_negation: Option<usize> = None;
        let (mut pos, mut neg) = (0, 0);
        for (i, word) in words.iter().enumerate() {
            if self.negations.contains(word) {
                last_negation = Some(i);
                continue;
            }
            let negated = last_negation.is_some_and(|n| i - n <= NEGATION_WINDOW);
            let is_positive = self.positive.contains(word);
            let is_negative = self.negative.contains(word);
            match (is_positive, is_negative, negated) {
                (true, _, false) | (false, true, true) => pos += 1,
                (true, _, true) | (false, true, false) => neg += 1,
                _ => {}
            }
        }
        (pos, neg)
    }

    pub fn classify_text(&self, text: &str) -> Vec<LabelScore> {
        let (pos, neg) = self.polarity_hits(text);
        let total = (pos + neg + 1) as f64;
        vec![
            LabelScore::new(SentimentLabel::Positive.as_str(), pos as f64 / total),
            LabelScore::new(SentimentLabel::Negative.as_str(), neg as f64 / total),
            LabelScore::new(SentimentLabel::Neutral.as_str(), 1.0 / total),
        ]
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextClassifier for LexiconClassifier {
    async fn classify(&self, texts: &[String]) -> Result<Vec<Vec<LabelScore>>> {
        Ok(texts.iter().map(|t| self.classify_text(t)).collect())
    }
}
