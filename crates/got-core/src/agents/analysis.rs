//! Content analysis over the merged speech
//!
//! Every agent here depends only on the speech aggregation stage and runs
//! in parallel with the others.

use super::{ask, checkpoint, decode, unit, upstream, Ctx};
use crate::output::{BiasReport, EmotionReport, SpeakerSpeech, StageOutput, VideoAnalysis};
use crate::pipeline::SPEECH;
use crate::prompts;
use crate::services::{ModelTask, ServiceRouter};
use crate::types::{
    BiasFinding, BiasMetrics, CommunicationMetrics, CredibilityMetrics, EmotionProfile, EmotionScore,
    EmotionalMetrics, FactCheck, Severity, Verdict,
};
use async_trait::async_trait;
use got_kernel::executor::StageAgent;
use got_kernel::AgentErrorKind;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub(crate) const EMOTIONS: [&str; 7] = ["joy", "sadness", "anger", "fear", "surprise", "disgust", "neutral"];

fn speech(ctx: &Ctx) -> Result<&[SpeakerSpeech], AgentErrorKind> {
    upstream(ctx, SPEECH, "speech", StageOutput::speech)
}

/// Whole discussion in time order, one `speaker: text` line per segment
pub(crate) fn transcript_text(speech: &[SpeakerSpeech]) -> String {
    let mut lines: Vec<(f64, String)> = speech
        .iter()
        .flat_map(|s| {
            s.segments
                .iter()
                .map(move |seg| (seg.start, format!("{}: {}", s.speaker_id, seg.text)))
        })
        .collect();
    lines.sort_by(|a, b| a.0.total_cmp(&b.0));
    lines
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scores for the seven base emotions
fn emotion_scores(value: &Value) -> Result<Vec<EmotionScore>, AgentErrorKind> {
    let object = value
        .as_object()
        .ok_or_else(|| AgentErrorKind::Validation("emotion scores must be an object".to_string()))?;
    let mut scores = Vec::with_capacity(EMOTIONS.len());
    for emotion in EMOTIONS {
        if let Some(raw) = object.get(emotion).and_then(Value::as_f64) {
            scores.push(EmotionScore {
                emotion: emotion.to_string(),
                score: unit(raw, emotion)?,
            });
        }
    }
    if scores.is_empty() {
        return Err(AgentErrorKind::Validation("no emotion scores in response".to_string()));
    }
    Ok(scores)
}

/// Positive minus negative affect, -1.0 to 1.0
pub(crate) fn valence(scores: &[EmotionScore]) -> f64 {
    let value: f64 = scores
        .iter()
        .map(|s| match s.emotion.as_str() {
            "joy" => s.score,
            "surprise" => 0.3 * s.score,
            "sadness" | "anger" | "fear" | "disgust" => -s.score,
            _ => 0.0,
        })
        .sum();
    value.clamp(-1.0, 1.0)
}

/// Emotion profile per speaker, overall sentiment, optional EI metrics
pub struct EmotionAgent {
    router: Arc<ServiceRouter>,
}

impl EmotionAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }

    async fn emotional_metrics(&self, ctx: &Ctx, content: &str) -> Result<Option<EmotionalMetrics>, AgentErrorKind> {
        let prompt = prompts::render(prompts::EMOTIONAL_INTELLIGENCE, &[("content", content)]);
        let result = ask(&self.router, ctx, ModelTask::EmotionalIntelligence, prompt, vec![])
            .await
            .and_then(|value| EmotionalMetrics::from_json(&value).map_err(AgentErrorKind::Validation));
        match result {
            Ok(metrics) => Ok(Some(metrics)),
            Err(AgentErrorKind::Cancelled) => Err(AgentErrorKind::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, "emotional metrics unavailable");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for EmotionAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let speech = speech(&ctx)?;
        let mut profiles = BTreeMap::new();
        let mut weighted = 0.0;
        let mut words = 0usize;

        for (i, speaker) in speech.iter().enumerate() {
            let prompt = prompts::render(prompts::EMOTION_ANALYSIS, &[("text", &speaker.text())]);
            let value = ask(&self.router, &ctx, ModelTask::Emotion, prompt, vec![]).await?;
            let scores = emotion_scores(&value)?;

            #[allow(clippy::cast_precision_loss)]
            let weight = speaker.word_count.max(1) as f64;
            weighted += valence(&scores) * weight;
            words += speaker.word_count.max(1);
            profiles.insert(speaker.speaker_id.clone(), EmotionProfile::from_scores(scores));
            ctx.progress().report_fraction((i + 1) * 80, speech.len() * 100);
        }

        #[allow(clippy::cast_precision_loss)]
        let overall_sentiment = if words == 0 { 0.0 } else { (weighted / words as f64).clamp(-1.0, 1.0) };
        let metrics = self.emotional_metrics(&ctx, &transcript_text(speech)).await?;

        Ok(StageOutput::Emotion(EmotionReport {
            profiles,
            overall_sentiment,
            metrics,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct RawFactCheck {
    verdict: String,
    confidence: f64,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    sources: Vec<String>,
}

/// Extracts claims and checks each one
pub struct FactCheckAgent {
    router: Arc<ServiceRouter>,
}

impl FactCheckAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }

    async fn check(&self, ctx: &Ctx, claim: &str) -> Result<FactCheck, AgentErrorKind> {
        let prompt = prompts::render(prompts::FACT_CHECK, &[("claim", claim)]);
        let value = ask(&self.router, ctx, ModelTask::FactCheck, prompt, vec![]).await?;
        let raw: RawFactCheck = decode(value, "fact check")?;
        let verdict: Verdict = raw
            .verdict
            .parse()
            .map_err(|e: crate::types::ParseLabelError| AgentErrorKind::Validation(e.to_string()))?;
        Ok(FactCheck {
            claim: claim.to_string(),
            verdict,
            confidence: unit(raw.confidence, "fact check confidence")?,
            sources: raw.sources,
            explanation: raw.explanation,
        })
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for FactCheckAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let content = transcript_text(speech(&ctx)?);
        let prompt = prompts::render(prompts::CLAIM_EXTRACTION, &[("content", &content)]);
        let value = ask(&self.router, &ctx, ModelTask::ClaimExtraction, prompt, vec![]).await?;
        let extracted: Vec<String> = decode(value, "claims")?;

        let mut seen = BTreeSet::new();
        let claims: Vec<String> = extracted
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        ctx.report_progress(10);

        let mut checks = Vec::with_capacity(claims.len());
        for (i, claim) in claims.iter().enumerate() {
            checks.push(self.check(&ctx, claim).await?);
            ctx.progress().report_fraction(10 + (i + 1) * 90 / claims.len(), 100);
        }

        tracing::info!(claims = checks.len(), "fact checking complete");
        Ok(StageOutput::FactChecks(checks))
    }
}

#[derive(Debug, Deserialize)]
struct RawBias {
    #[serde(rename = "type")]
    kind: String,
    severity: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    examples: Vec<String>,
    confidence: f64,
}

/// Bias scores from findings: strongest severity-weighted confidence per family
pub(crate) fn bias_metrics(findings: &[BiasFinding]) -> BiasMetrics {
    let score = |family: &str| -> u8 {
        let best = findings
            .iter()
            .filter(|f| f.kind.to_ascii_lowercase().contains(family))
            .map(|f| f.severity.weight() * f.confidence * 100.0)
            .fold(0.0_f64, f64::max);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rounded = best.round().clamp(0.0, 100.0) as u8;
        rounded
    };
    BiasMetrics {
        confirmation_bias: score("confirmation"),
        selection_bias: score("selection"),
        authority_bias: score("authority"),
        anchoring_bias: score("anchoring"),
        availability_bias: score("availability"),
        framing_effect: score("framing"),
    }
}

/// Detects cognitive biases
pub struct BiasAgent {
    router: Arc<ServiceRouter>,
}

impl BiasAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for BiasAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let content = transcript_text(speech(&ctx)?);
        let prompt = prompts::render(prompts::BIAS_DETECTION, &[("text", &content)]);
        let value = ask(&self.router, &ctx, ModelTask::Bias, prompt, vec![]).await?;
        let raw: Vec<RawBias> = decode(value, "bias findings")?;

        let findings = raw
            .into_iter()
            .map(|b| {
                let severity: Severity = b
                    .severity
                    .parse()
                    .map_err(|e: crate::types::ParseLabelError| AgentErrorKind::Validation(e.to_string()))?;
                Ok(BiasFinding {
                    kind: b.kind,
                    severity,
                    description: b.description,
                    examples: b.examples,
                    confidence: unit(b.confidence, "bias confidence")?,
                })
            })
            .collect::<Result<Vec<_>, AgentErrorKind>>()?;
        checkpoint(&ctx)?;

        let metrics = bias_metrics(&findings);
        Ok(StageOutput::Bias(BiasReport { findings, metrics }))
    }
}

/// Scores source and evidence quality
pub struct CredibilityAgent {
    router: Arc<ServiceRouter>,
}

impl CredibilityAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for CredibilityAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let content = transcript_text(speech(&ctx)?);
        let prompt = prompts::render(prompts::CREDIBILITY_ANALYSIS, &[("content", &content)]);
        let value = ask(&self.router, &ctx, ModelTask::Credibility, prompt, vec![]).await?;
        let metrics = CredibilityMetrics::from_json(&value).map_err(AgentErrorKind::Validation)?;
        Ok(StageOutput::Credibility(metrics))
    }
}

/// Scores communication effectiveness
pub struct CommunicationAgent {
    router: Arc<ServiceRouter>,
}

impl CommunicationAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for CommunicationAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let content = transcript_text(speech(&ctx)?);
        let prompt = prompts::render(prompts::COMMUNICATION_ANALYSIS, &[("content", &content)]);
        let value = ask(&self.router, &ctx, ModelTask::Communication, prompt, vec![]).await?;
        let metrics = CommunicationMetrics::from_json(&value).map_err(AgentErrorKind::Validation)?;
        Ok(StageOutput::Communication(metrics))
    }
}
