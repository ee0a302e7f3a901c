//! Who spoke when, and what they said

use super::{ask, decode, unit, upstream, Ctx};
use crate::output::{SpeakerSpeech, SpeakerTurn, StageOutput, TranscriptSegment, VideoAnalysis};
use crate::pipeline::{DIARIZE, IDENTIFY, TRANSCRIBE};
use crate::prompts;
use crate::services::{Attachment, ModelTask, ServiceRouter};
use crate::types::SpeechSegment;
use async_trait::async_trait;
use got_kernel::executor::StageAgent;
use got_kernel::AgentErrorKind;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;

fn check_span(start: f64, end: f64, what: &str) -> Result<(), AgentErrorKind> {
    if start.is_finite() && end.is_finite() && start >= 0.0 && end > start {
        Ok(())
    } else {
        Err(AgentErrorKind::Validation(format!(
            "{what} has invalid span {start}..{end}"
        )))
    }
}

fn check_speaker(known: &BTreeSet<&str>, speaker_id: &str) -> Result<(), AgentErrorKind> {
    if known.contains(speaker_id) {
        Ok(())
    } else {
        Err(AgentErrorKind::Validation(format!("unknown speaker {speaker_id}")))
    }
}

/// Segments the timeline into speaker turns
pub struct DiarizerAgent {
    router: Arc<ServiceRouter>,
}

impl DiarizerAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for DiarizerAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let speakers = upstream(&ctx, IDENTIFY, "speakers", StageOutput::speakers)?;
        let roster: Vec<String> = speakers
            .iter()
            .map(|s| format!("{} ({})", s.id, s.name))
            .collect();
        let prompt = prompts::render(
            prompts::DIARIZATION,
            &[("title", &ctx.input().title), ("speakers", &roster.join(", "))],
        );

        let value = ask(
            &self.router,
            &ctx,
            ModelTask::Diarization,
            prompt,
            vec![Attachment::video(&ctx.input().locator)],
        )
        .await?;
        let mut turns: Vec<SpeakerTurn> = decode(value, "speaker turns")?;
        if turns.is_empty() {
            return Err(AgentErrorKind::Validation("no speaker turns".to_string()));
        }

        let known: BTreeSet<&str> = speakers.iter().map(|s| s.id.as_str()).collect();
        for turn in &mut turns {
            check_speaker(&known, &turn.speaker_id)?;
            check_span(turn.start, turn.end, "turn")?;
            turn.confidence = unit(turn.confidence, "turn confidence")?;
        }
        turns.sort_by(|a, b| a.start.total_cmp(&b.start));

        tracing::info!(turns = turns.len(), "diarization complete");
        Ok(StageOutput::Diarization(turns))
    }
}

/// Transcribes each speaker turn
pub struct TranscriberAgent {
    router: Arc<ServiceRouter>,
}

impl TranscriberAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for TranscriberAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let turns = upstream(&ctx, DIARIZE, "diarization", StageOutput::diarization)?;
        let listing: Vec<String> = turns
            .iter()
            .map(|t| format!("{} {:.0}-{:.0}s", t.speaker_id, t.start, t.end))
            .collect();
        let prompt = prompts::render(
            prompts::TRANSCRIPTION,
            &[("title", &ctx.input().title), ("turns", &listing.join("; "))],
        );

        let value = ask(
            &self.router,
            &ctx,
            ModelTask::Transcription,
            prompt,
            vec![Attachment::video(&ctx.input().locator)],
        )
        .await?;
        let segments: Vec<TranscriptSegment> = decode(value, "transcript")?;

        let known: BTreeSet<&str> = turns.iter().map(|t| t.speaker_id.as_str()).collect();
        let mut kept = Vec::with_capacity(segments.len());
        for mut segment in segments {
            check_speaker(&known, &segment.speaker_id)?;
            check_span(segment.start, segment.end, "transcript segment")?;
            segment.confidence = unit(segment.confidence, "segment confidence")?;
            let text = segment.text.trim();
            if text.is_empty() {
                continue;
            }
            segment.text = text.to_string();
            kept.push(segment);
        }
        if kept.is_empty() {
            return Err(AgentErrorKind::Validation("transcript is empty".to_string()));
        }
        kept.sort_by(|a, b| a.start.total_cmp(&b.start));

        tracing::info!(segments = kept.len(), "transcription complete");
        Ok(StageOutput::Transcript(kept))
    }
}

/// Groups transcript segments by speaker
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeechAggregatorAgent;

/// Speakers in order of first appearance, segments in time order
pub(crate) fn merge_by_speaker(segments: &[TranscriptSegment]) -> Vec<SpeakerSpeech> {
    let mut by_speaker: IndexMap<&str, Vec<SpeechSegment>> = IndexMap::new();
    for segment in segments {
        by_speaker
            .entry(segment.speaker_id.as_str())
            .or_default()
            .push(SpeechSegment {
                start: segment.start,
                end: segment.end,
                text: segment.text.clone(),
                confidence: segment.confidence,
                emotions: Vec::new(),
            });
    }

    by_speaker
        .into_iter()
        .map(|(speaker_id, mut segments)| {
            segments.sort_by(|a, b| a.start.total_cmp(&b.start));
            let word_count = segments.iter().map(|s| s.text.split_whitespace().count()).sum();
            SpeakerSpeech {
                speaker_id: speaker_id.to_string(),
                segments,
                word_count,
            }
        })
        .collect()
}

#[async_trait]
impl StageAgent<VideoAnalysis> for SpeechAggregatorAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let transcript = upstream(&ctx, TRANSCRIBE, "transcript", StageOutput::transcript)?;
        let speech = merge_by_speaker(transcript);
        tracing::debug!(speakers = speech.len(), "speech merged");
        Ok(StageOutput::Speech(speech))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::config::{AnalysisConfig, Provider};
    use crate::services::MockModelService;
    use crate::types::{
        AudioFeatures, ContextualClues, EmotionProfile, SpeakerProfile, SpeakerRole, SpeakingPattern,
        VisualFeatures,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn profile(id: &str) -> SpeakerProfile {
        SpeakerProfile {
            id: id.into(),
            name: id.into(),
            confidence: 0.9,
            role: SpeakerRole::Guest,
            time_spoken: 0,
            visual_features: VisualFeatures::default(),
            audio_features: AudioFeatures::default(),
            contextual_clues: ContextualClues {
                introduced_as: None,
                title_mentioned: None,
                expertise_area: None,
                speaking_pattern: SpeakingPattern::Occasional,
            },
            emotion_profile: EmotionProfile::neutral(),
            segments: vec![],
        }
    }

    fn segment(speaker: &str, start: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            speaker_id: speaker.into(),
            start,
            end: start + 5.0,
            text: text.into(),
            confidence: 0.9,
        }
    }

    fn router_returning(value: serde_json::Value) -> Arc<ServiceRouter> {
        let mut mock = MockModelService::new();
        mock.expect_generate().returning(move |_| Ok(value.clone()));
        Arc::new(ServiceRouter::new(&AnalysisConfig::default()).with_provider(Provider::Google, Arc::new(mock)))
    }

    #[test]
    fn merge_keeps_first_appearance_order() {
        let merged = merge_by_speaker(&[
            segment("speaker_1", 10.0, "second speaker"),
            segment("speaker_0", 20.0, "first words here"),
            segment("speaker_1", 0.0, "earlier"),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].speaker_id, "speaker_1");
        assert_eq!(merged[0].segments[0].text, "earlier");
        assert_eq!(merged[0].word_count, 3);
        assert_eq!(merged[1].word_count, 3);
    }

    #[tokio::test]
    async fn diarizer_sorts_turns() {
        let router = router_returning(json!([
            {"speakerId": "speaker_1", "start": 10.0, "end": 20.0, "confidence": 0.8},
            {"speakerId": "speaker_0", "start": 0.0, "end": 10.0, "confidence": 1.4}
        ]));
        let output = DiarizerAgent::new(router)
            .invoke(context("N3", vec![("N2", StageOutput::Speakers(vec![profile("speaker_0"), profile("speaker_1")]))]))
            .await
            .unwrap();
        let turns = output.diarization().unwrap();
        assert_eq!(turns[0].speaker_id, "speaker_0");
        assert_eq!(turns[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn diarizer_rejects_unknown_speaker() {
        let router = router_returning(json!([
            {"speakerId": "speaker_9", "start": 0.0, "end": 10.0, "confidence": 0.8}
        ]));
        let err = DiarizerAgent::new(router)
            .invoke(context("N3", vec![("N2", StageOutput::Speakers(vec![profile("speaker_0")]))]))
            .await
            .unwrap_err();
        assert_eq!(err, AgentErrorKind::Validation("unknown speaker speaker_9".into()));
    }

    #[tokio::test]
    async fn transcriber_drops_blank_segments_and_rejects_bad_spans() {
        let turns = StageOutput::Diarization(vec![SpeakerTurn {
            speaker_id: "speaker_0".into(),
            start: 0.0,
            end: 10.0,
            confidence: 0.9,
        }]);

        let router = router_returning(json!([
            {"speakerId": "speaker_0", "start": 0.0, "end": 5.0, "text": "  hello  ", "confidence": 0.9},
            {"speakerId": "speaker_0", "start": 5.0, "end": 9.0, "text": " ", "confidence": 0.9}
        ]));
        let output = TranscriberAgent::new(router)
            .invoke(context("N4", vec![("N3", turns.clone())]))
            .await
            .unwrap();
        assert_eq!(output.transcript().unwrap().len(), 1);
        assert_eq!(output.transcript().unwrap()[0].text, "hello");

        let router = router_returning(json!([
            {"speakerId": "speaker_0", "start": 8.0, "end": 2.0, "text": "backwards", "confidence": 0.9}
        ]));
        let err = TranscriberAgent::new(router)
            .invoke(context("N4", vec![("N3", turns)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentErrorKind::Validation(msg) if msg.contains("invalid span")));
    }
}
