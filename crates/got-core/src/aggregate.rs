//! Combines stage outputs into the final [`AnalysisResult`]

use crate::output::{StageOutput, VideoAnalysis};
use crate::pipeline::{BIAS, COMMUNICATION, CREDIBILITY, EMOTION, FACT_CHECK, FETCH, IDENTIFY, REPORT, SPEECH};
use crate::types::AnalysisResult;
use got_kernel::aggregation::{CompletedStages, ResultAggregator};
use got_kernel::{PipelineError, StageId};
use std::collections::BTreeSet;
use std::time::Instant;

/// Output of `stage` narrowed to one variant; `None` if the stage did not complete
fn pick<'a, T: ?Sized>(
    completed: &'a CompletedStages<StageOutput>,
    stage: &str,
    narrow: impl FnOnce(&'a StageOutput) -> Option<&'a T>,
) -> Result<Option<&'a T>, PipelineError> {
    let Some(output) = completed.get(&StageId::from(stage)) else {
        return Ok(None);
    };
    narrow(output).map(Some).ok_or_else(|| {
        PipelineError::Aggregation(format!("unexpected {} output from {stage}", output.kind()))
    })
}

/// Builds an [`AnalysisResult`] once every analysis stage completed
#[derive(Debug, Clone)]
pub struct AnalysisAggregator {
    required: BTreeSet<StageId>,
    started: Instant,
}

impl AnalysisAggregator {
    /// `required` is normally the report stage's dependencies
    #[must_use]
    pub fn new(required: BTreeSet<StageId>, started: Instant) -> Self {
        Self { required, started }
    }
}

impl ResultAggregator<VideoAnalysis> for AnalysisAggregator {
    type Report = AnalysisResult;

    fn required_stages(&self) -> &BTreeSet<StageId> {
        &self.required
    }

    fn aggregate(&self, completed: &CompletedStages<StageOutput>) -> Result<AnalysisResult, PipelineError> {
        let media = pick(completed, FETCH, StageOutput::media)?
            .ok_or_else(|| PipelineError::Aggregation("no media metadata".to_string()))?;
        let emotion = pick(completed, EMOTION, StageOutput::emotion)?;
        let speech = pick(completed, SPEECH, StageOutput::speech)?.unwrap_or_default();
        let bias = pick(completed, BIAS, StageOutput::bias)?;
        let synthesis = pick(completed, REPORT, StageOutput::report)?;

        let speakers = pick(completed, IDENTIFY, StageOutput::speakers)?
            .unwrap_or_default()
            .iter()
            .map(|speaker| {
                let mut speaker = speaker.clone();
                if let Some(profile) = emotion.and_then(|e| e.profiles.get(&speaker.id)) {
                    speaker.emotion_profile = profile.clone();
                }
                if let Some(merged) = speech.iter().find(|s| s.speaker_id == speaker.id) {
                    speaker.segments = merged.segments.clone();
                }
                speaker
            })
            .collect();

        let result = AnalysisResult {
            id: ulid::Ulid::new().to_string(),
            video_reference: media.asset.reference.clone(),
            title: synthesis
                .and_then(|s| s.title.clone())
                .unwrap_or_else(|| media.asset.title.clone()),
            duration_secs: media.asset.duration_secs,
            speakers,
            fact_checks: pick(completed, FACT_CHECK, StageOutput::fact_checks)?
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            biases: bias.map(|b| b.findings.clone()).unwrap_or_default(),
            overall_sentiment: emotion.map_or(0.0, |e| e.overall_sentiment),
            processing_time_secs: self.started.elapsed().as_secs_f64(),
            summary: synthesis.map(|s| s.summary.clone()),
            credibility_metrics: pick(completed, CREDIBILITY, StageOutput::credibility)?.copied(),
            communication_metrics: pick(completed, COMMUNICATION, StageOutput::communication)?.copied(),
            bias_metrics: bias.map(|b| b.metrics),
            emotional_metrics: emotion.and_then(|e| e.metrics),
        };

        tracing::info!(
            result = %result.id,
            speakers = result.speakers.len(),
            fact_checks = result.fact_checks.len(),
            summary = result.summary.is_some(),
            "analysis aggregated"
        );
        Ok(result)
    }
}
