//! Report synthesis and presentation hand-off

use super::{ask, decode, upstream, Ctx};
use crate::output::{RenderManifest, StageOutput, Synthesis, VideoAnalysis};
use crate::pipeline::{BIAS, COMMUNICATION, CREDIBILITY, EMOTION, FACT_CHECK, REPORT};
use crate::prompts;
use crate::services::{ModelTask, ServiceRouter};
use async_trait::async_trait;
use got_kernel::executor::StageAgent;
use got_kernel::{AgentErrorKind, StageId};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    highlights: Vec<String>,
}

fn has(ctx: &Ctx, stage: &str) -> bool {
    ctx.output_of(&StageId::from(stage)).is_some()
}

/// Condensed view of the analysis stages for the synthesis prompt
///
/// Returns the digest and the section names it covers, in stage order.
fn digest(ctx: &Ctx) -> Result<(Value, Vec<String>), AgentErrorKind> {
    let mut digest = Map::new();
    let mut sections = Vec::new();

    if has(ctx, EMOTION) {
        let emotion = upstream(ctx, EMOTION, "emotion", StageOutput::emotion)?;
        let dominant: Map<String, Value> = emotion
            .profiles
            .iter()
            .map(|(speaker, profile)| (speaker.clone(), json!(profile.dominant)))
            .collect();
        digest.insert(
            "emotions".into(),
            json!({ "overallSentiment": emotion.overall_sentiment, "dominant": dominant }),
        );
        sections.push("emotions".to_string());
    }
    if has(ctx, FACT_CHECK) {
        let checks = upstream(ctx, FACT_CHECK, "fact check", StageOutput::fact_checks)?;
        let checks: Vec<Value> = checks
            .iter()
            .map(|c| json!({ "claim": c.claim, "verdict": c.verdict.to_string() }))
            .collect();
        digest.insert("factChecks".into(), Value::Array(checks));
        sections.push("fact_checks".to_string());
    }
    if has(ctx, BIAS) {
        let bias = upstream(ctx, BIAS, "bias", StageOutput::bias)?;
        let kinds: Vec<&str> = bias.findings.iter().map(|f| f.kind.as_str()).collect();
        digest.insert("biases".into(), json!(kinds));
        sections.push("biases".to_string());
    }
    if has(ctx, CREDIBILITY) {
        let metrics = upstream(ctx, CREDIBILITY, "credibility", StageOutput::credibility)?;
        digest.insert("credibility".into(), json!(metrics));
        sections.push("credibility".to_string());
    }
    if has(ctx, COMMUNICATION) {
        let metrics = upstream(ctx, COMMUNICATION, "communication", StageOutput::communication)?;
        digest.insert("communication".into(), json!(metrics));
        sections.push("communication".to_string());
    }

    if sections.is_empty() {
        return Err(AgentErrorKind::MalformedInput("no analysis outputs to summarize".to_string()));
    }
    Ok((Value::Object(digest), sections))
}

/// Writes the executive summary
pub struct ReporterAgent {
    router: Arc<ServiceRouter>,
}

impl ReporterAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for ReporterAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let (digest, sections) = digest(&ctx)?;
        let prompt = prompts::render(prompts::REPORT_SYNTHESIS, &[("analysis", &digest.to_string())]);
        ctx.report_progress(20);

        let value = ask(&self.router, &ctx, ModelTask::Report, prompt, vec![]).await?;
        let raw: RawSynthesis = decode(value, "report")?;
        let summary = raw.summary.trim().to_string();
        if summary.is_empty() {
            return Err(AgentErrorKind::Validation("report summary is empty".to_string()));
        }

        Ok(StageOutput::Report(Synthesis {
            summary,
            title: raw.title.filter(|t| !t.trim().is_empty()),
            highlights: raw.highlights,
            sections,
        }))
    }
}

/// Lists the sections a presentation layer should show
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderAgent;

#[async_trait]
impl StageAgent<VideoAnalysis> for RenderAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let synthesis = upstream(&ctx, REPORT, "report", StageOutput::report)?;
        let sections = std::iter::once("summary".to_string())
            .chain(synthesis.sections.iter().cloned())
            .collect();
        Ok(StageOutput::Render(RenderManifest { sections }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::config::{AnalysisConfig, Provider};
    use crate::output::{BiasReport, EmotionReport};
    use crate::services::MockModelService;
    use crate::types::{BiasMetrics, CommunicationMetrics, CredibilityMetrics};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn analysis_outputs() -> Vec<(&'static str, StageOutput)> {
        vec![
            (
                "N6",
                StageOutput::Emotion(EmotionReport {
                    profiles: BTreeMap::new(),
                    overall_sentiment: 0.4,
                    metrics: None,
                }),
            ),
            ("N7", StageOutput::FactChecks(vec![])),
            (
                "N8",
                StageOutput::Bias(BiasReport {
                    findings: vec![],
                    metrics: BiasMetrics::default(),
                }),
            ),
            ("N9", StageOutput::Credibility(CredibilityMetrics::default())),
            ("N10", StageOutput::Communication(CommunicationMetrics::default())),
        ]
    }

    #[tokio::test]
    async fn reporter_summarizes_offline() {
        let router = Arc::new(ServiceRouter::offline(&AnalysisConfig::default()));
        let output = ReporterAgent::new(router)
            .invoke(context("N11", analysis_outputs()))
            .await
            .unwrap();
        let synthesis = output.report().unwrap();
        assert!(synthesis.summary.starts_with("A three-person expert panel"));
        assert_eq!(
            synthesis.sections,
            vec!["emotions", "fact_checks", "biases", "credibility", "communication"]
        );
    }

    #[tokio::test]
    async fn blank_summary_is_rejected() {
        let mut mock = MockModelService::new();
        mock.expect_generate()
            .returning(|_| Ok(serde_json::json!({"summary": "  ", "highlights": []})));
        let router = Arc::new(
            ServiceRouter::new(&AnalysisConfig::default()).with_provider(Provider::OpenRouter, Arc::new(mock)),
        );
        let err = ReporterAgent::new(router)
            .invoke(context("N11", analysis_outputs()))
            .await
            .unwrap_err();
        assert_eq!(err, AgentErrorKind::Validation("report summary is empty".into()));
    }

    #[tokio::test]
    async fn render_lists_summary_first() {
        let synthesis = Synthesis {
            summary: "s".into(),
            title: None,
            highlights: vec![],
            sections: vec!["emotions".into(), "biases".into()],
        };
        let output = RenderAgent
            .invoke(context("N12", vec![("N11", StageOutput::Report(synthesis))]))
            .await
            .unwrap();
        assert_eq!(output.render().unwrap().sections, vec!["summary", "emotions", "biases"]);
    }

    #[tokio::test]
    async fn render_requires_report() {
        let err = RenderAgent.invoke(context("N12", vec![])).await.unwrap_err();
        assert!(matches!(err, AgentErrorKind::MalformedInput(_)));
    }
}
