//! Fan-out/fan-in coordination of the analysis stages

use agent_core::context::keys;
use agent_core::{Data, Error as CoreError, ResultEnvelope, Stage};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::agents::{
    ChartAnalysisStage, ChartInput, ReportGenerationStage, SentimentAnalysisStage,
    SentimentInput, TechnicalAnalysisStage, TechnicalInput,
};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::types::{AnalysisInputBundle, AnalysisResultBundle, StageKind};

pub type ChartStage = Arc<dyn Stage<Input = ChartInput>>;
pub type TechnicalStage = Arc<dyn Stage<Input = TechnicalInput>>;
pub type SentimentStage = Arc<dyn Stage<Input = SentimentInput>>;
pub type ReportStage = Arc<dyn Stage<Input = AnalysisResultBundle>>;

/// Coordinates the chart, technical and sentiment stages and the report stage
///
/// The three lower stages run concurrently on their own tasks; their results
/// are merged only after all of them finish. A failed lower stage contributes
/// an empty map. A failed report is returned as a successful envelope whose
/// data carries `error` and `partial_results`.
pub struct Orchestrator {
    config: AnalysisConfig,
    chart: ChartStage,
    technical: TechnicalStage,
    sentiment: SentimentStage,
    report: ReportStage,
}

impl Orchestrator {
    /// Orchestrator wired with the bundled stages
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run a full analysis
    pub async fn process(&self, bundle: &AnalysisInputBundle) -> ResultEnvelope {
        self.process_with_cancellation(bundle, CancellationToken::new())
            .await
    }

    /// Run a full analysis that stops early once `token` is cancelled
    ///
    /// Dropping the returned future also stops any stage still running.
    pub async fn process_with_cancellation(
        &self,
        bundle: &AnalysisInputBundle,
        token: CancellationToken,
    ) -> ResultEnvelope {
        let run_id = Uuid::new_v4();
        self.run(bundle, token)
            .instrument(info_span!("orchestration", %run_id))
            .await
    }

    /// Run a full analysis from an untyped JSON bundle
    pub async fn process_value(&self, value: Value) -> ResultEnvelope {
        match serde_json::from_value::<AnalysisInputBundle>(value) {
            Ok(bundle) => self.process(&bundle).await,
            Err(e) => {
                warn!(error = %e, "Rejected malformed input bundle");
                ResultEnvelope::failure(format!("Invalid input bundle: {e}"))
            }
        }
    }

    async fn run(&self, bundle: &AnalysisInputBundle, token: CancellationToken) -> ResultEnvelope {
        let missing = bundle.missing_fields();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Input validation failed");
            return ResultEnvelope::failure(format!(
                "Missing required input data: {}",
                missing.join(", ")
            ));
        }

        let start = Instant::now();
        info!("Starting analysis");

        let token = token.child_token();
        let _guard = token.clone().drop_guard();
        let timeout = self.config.stage_timeout;

        let chart_input = ChartInput {
            image: bundle.chart_data.clone(),
        };
        let technical_input = TechnicalInput {
            price_data: bundle.price_data.clone().unwrap_or_default(),
        };
        let sentiment_input = SentimentInput {
            text_data: bundle.text_data.clone(),
        };

        let (chart, technical, sentiment) = tokio::join!(
            spawn_stage(Arc::clone(&self.chart), chart_input, timeout, token.clone()),
            spawn_stage(Arc::clone(&self.technical), technical_input, timeout, token.clone()),
            spawn_stage(Arc::clone(&self.sentiment), sentiment_input, timeout, token.clone()),
        );

        if token.is_cancelled() {
            warn!("Analysis cancelled during lower stages");
            return ResultEnvelope::failure("Analysis cancelled");
        }

        let mut merged = AnalysisResultBundle::default();
        for (kind, envelope) in [
            (StageKind::Chart, chart),
            (StageKind::Technical, technical),
            (StageKind::Sentiment, sentiment),
        ] {
            if let Some(error) = envelope.error() {
                warn!(stage = %kind, error, "Stage failed; continuing with empty result");
            }
            merged.absorb(kind, envelope);
        }

        let report = spawn_stage(
            Arc::clone(&self.report),
            merged.clone(),
            timeout,
            token.clone(),
        )
        .await;
        if token.is_cancelled() {
            warn!("Analysis cancelled during report assembly");
            return ResultEnvelope::failure("Analysis cancelled");
        }

        if self.config.propagate_context {
            self.propagate_context(&merged).await;
        }

        let elapsed_ms = start.elapsed().as_millis();
        match report {
            ResultEnvelope::Success(data) => {
                info!(
                    elapsed_ms,
                    failed_stages = merged.failed_stages.len(),
                    "Analysis completed"
                );
                ResultEnvelope::success(data)
            }
            ResultEnvelope::Failure(error) => {
                warn!(
                    elapsed_ms,
                    error = %error,
                    "Report generation failed; returning partial results"
                );
                let mut data = Data::new();
                data.insert("error".to_string(), Value::String(error));
                data.insert("partial_results".to_string(), partial_results(&merged));
                ResultEnvelope::success(data)
            }
        }
    }

    /// Seed each stage's context with what the other stages found
    async fn propagate_context(&self, merged: &AnalysisResultBundle) {
        let chart = &merged.chart_analysis;
        let technical = &merged.technical_analysis;
        let sentiment = &merged.sentiment_analysis;

        self.chart
            .update_context(entries([
                (keys::TECHNICAL_INDICATORS, technical.get("indicators")),
                (keys::SENTIMENT_CONTEXT, sentiment.get("overall_sentiment")),
            ]))
            .await;
        self.technical
            .update_context(entries([
                (keys::CHART_PATTERNS, chart.get("patterns")),
                (keys::SENTIMENT_CONTEXT, sentiment.get("overall_sentiment")),
            ]))
            .await;
        self.sentiment
            .update_context(entries([
                (keys::TECHNICAL_CONTEXT, technical.get("summary")),
                (keys::CHART_CONTEXT, chart.get("patterns")),
            ]))
            .await;
        self.report
            .update_context(entries([(
                keys::ANALYSIS_RESULTS,
                Some(&partial_results(merged)),
            )]))
            .await;

        debug!("Propagated cross-stage context");
    }
}

/// Context entries for the values that are present
fn entries<const N: usize>(pairs: [(&str, Option<&Value>); N]) -> Data {
    pairs
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), value?.clone())))
        .collect()
}

fn partial_results(merged: &AnalysisResultBundle) -> Value {
    serde_json::to_value(merged).unwrap_or_else(|_| {
        json!({
            "chart_analysis": merged.chart_analysis,
            "technical_analysis": merged.technical_analysis,
            "sentiment_analysis": merged.sentiment_analysis,
        })
    })
}

/// Run one stage on its own task, bounded by an optional timeout and the run's token
///
/// Timeouts, cancellation and panics all come back as failure envelopes.
async fn spawn_stage<I: Send + 'static>(
    stage: Arc<dyn Stage<Input = I>>,
    input: I,
    timeout: Option<Duration>,
    token: CancellationToken,
) -> ResultEnvelope {
    let name = stage.name().to_string();
    let task_name = name.clone();

    let handle = tokio::spawn(async move {
        let work = async {
            match timeout {
                Some(after) => tokio::time::timeout(after, stage.process(input))
                    .await
                    .map_err(|_| CoreError::Timeout {
                        stage: stage.name().to_string(),
                        after,
                    }),
                None => Ok(stage.process(input).await),
            }
        };

        tokio::select! {
            biased;
            () = token.cancelled() => Err(CoreError::Cancelled(task_name)),
            result = work => result,
        }
    });

    match handle.await {
        Ok(Ok(envelope)) => envelope,
        Ok(Err(e)) => ResultEnvelope::failure(e.to_string()),
        Err(e) if e.is_panic() => ResultEnvelope::failure(format!("{name} stage panicked")),
        Err(e) => ResultEnvelope::failure(format!("{name} stage aborted: {e}")),
    }
}

/// Builder for [`Orchestrator`]
///
/// Any stage left unset is built from the configuration.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: Option<AnalysisConfig>,
    chart: Option<ChartStage>,
    technical: Option<TechnicalStage>,
    sentiment: Option<SentimentStage>,
    report: Option<ReportStage>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: AnalysisConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn chart_stage(mut self, stage: ChartStage) -> Self {
        self.chart = Some(stage);
        self
    }

    pub fn technical_stage(mut self, stage: TechnicalStage) -> Self {
        self.technical = Some(stage);
        self
    }

    pub fn sentiment_stage(mut self, stage: SentimentStage) -> Self {
        self.sentiment = Some(stage);
        self
    }

    pub fn report_stage(mut self, stage: ReportStage) -> Self {
        self.report = Some(stage);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let chart = match self.chart {
            Some(stage) => stage,
            None => Arc::new(ChartAnalysisStage::new(config.chart.clone())?),
        };
        let technical = self
            .technical
            .unwrap_or_else(|| Arc::new(TechnicalAnalysisStage::new(config.indicators.clone())));
        let sentiment = self
            .sentiment
            .unwrap_or_else(|| Arc::new(SentimentAnalysisStage::new()));
        let report = self
            .report
            .unwrap_or_else(|| Arc::new(ReportGenerationStage::new()));

        Ok(Orchestrator {
            config,
            chart,
            technical,
            sentiment,
            report,
        })
    }
}
