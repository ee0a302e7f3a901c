//! Multimodal speaker identification
//!
//! Frame analysis, voice clustering and transcript clues are fused into one
//! profile per voice cluster. Clusters are numbered in order of first
//! appearance, and introductions are matched to clusters by that order.

use super::{ask, checkpoint, decode, unit, upstream, Ctx};
use crate::output::{StageOutput, VideoAnalysis};
use crate::pipeline::FETCH;
use crate::prompts;
use crate::services::{Attachment, ModelTask, ServiceRouter};
use crate::types::{
    AudioFeatures, BoundingBox, ContextualClues, EmotionProfile, SpeakerProfile, SpeakerRole,
    SpeakingPattern, SpeechSegment, VisualFeatures,
};
use async_trait::async_trait;
use got_kernel::executor::StageAgent;
use got_kernel::AgentErrorKind;
use serde::Deserialize;
use std::sync::Arc;

/// Frames sent to the vision model
const MAX_FRAMES: usize = 10;
/// Minimum cosine similarity for two voices to be the same speaker
pub const VOICE_SIMILARITY_THRESHOLD: f64 = 0.85;
/// Speaking time above which a speaker moderates
const MODERATOR_SECS: f64 = 300.0;
const MODERATE_SECS: f64 = 120.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Person {
    #[serde(default)]
    position: BoundingBox,
    #[serde(default)]
    face_embedding: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct FrameAnalysis {
    #[serde(default)]
    people: Vec<Person>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AudioSegment {
    pub(crate) start: f64,
    pub(crate) end: f64,
    pub(crate) text: String,
    pub(crate) confidence: f64,
    #[serde(default)]
    pub(crate) volume: Option<f64>,
    pub(crate) speaker_embedding: Vec<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct Introduction {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    expertise: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SpeakerContext {
    #[serde(default)]
    introductions: Vec<Introduction>,
}

/// Identifies who is speaking and in what role
pub struct SpeakerIdentificationAgent {
    router: Arc<ServiceRouter>,
}

impl SpeakerIdentificationAgent {
    #[must_use]
    pub fn new(router: Arc<ServiceRouter>) -> Self {
        Self { router }
    }

    async fn analyze_frames(&self, ctx: &Ctx, frames: &[u32], locator: &str) -> Result<Vec<FrameAnalysis>, AgentErrorKind> {
        let frames = &frames[..frames.len().min(MAX_FRAMES)];
        let mut analyses = Vec::with_capacity(frames.len());
        for (i, timestamp) in frames.iter().enumerate() {
            let prompt = prompts::render(prompts::FRAME_ANALYSIS, &[("timestamp", &timestamp.to_string())]);
            let result = ask(
                &self.router,
                ctx,
                ModelTask::FrameAnalysis,
                prompt,
                vec![Attachment::video(locator)],
            )
            .await
            .and_then(|value| decode::<FrameAnalysis>(value, "frame analysis"));
            match result {
                Ok(analysis) => analyses.push(analysis),
                Err(AgentErrorKind::Cancelled) => return Err(AgentErrorKind::Cancelled),
                Err(err) => tracing::warn!(timestamp, error = %err, "frame analysis failed"),
            }
            ctx.progress().report_fraction((i + 1) * 40, frames.len() * 100);
        }
        Ok(analyses)
    }

    async fn context_clues(&self, ctx: &Ctx, segments: &[AudioSegment]) -> Result<SpeakerContext, AgentErrorKind> {
        let transcript: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        let prompt = prompts::render(prompts::SPEAKER_CONTEXT, &[("transcript", &transcript.join(" "))]);
        let result = ask(&self.router, ctx, ModelTask::SpeakerContext, prompt, vec![])
            .await
            .and_then(|value| decode::<SpeakerContext>(value, "speaker context"));
        match result {
            Ok(context) => Ok(context),
            Err(AgentErrorKind::Cancelled) => Err(AgentErrorKind::Cancelled),
            Err(err) => {
                tracing::warn!(error = %err, "contextual analysis failed, continuing without introductions");
                Ok(SpeakerContext::default())
            }
        }
    }
}

#[async_trait]
impl StageAgent<VideoAnalysis> for SpeakerIdentificationAgent {
    async fn invoke(&self, ctx: Ctx) -> Result<StageOutput, AgentErrorKind> {
        let media = upstream(&ctx, FETCH, "media", StageOutput::media)?;

        let frames = self.analyze_frames(&ctx, &media.key_frames, &media.asset.locator).await?;

        let prompt = prompts::render(
            prompts::AUDIO_SEGMENTATION,
            &[
                ("title", &media.asset.title),
                ("duration", &media.asset.duration_secs.to_string()),
            ],
        );
        let value = ask(
            &self.router,
            &ctx,
            ModelTask::AudioSegmentation,
            prompt,
            vec![Attachment::video(&media.asset.locator)],
        )
        .await?;
        let segments: Vec<AudioSegment> = decode(value, "audio segments")?;
        if segments.is_empty() {
            return Err(AgentErrorKind::Validation("no speech segments found".to_string()));
        }
        ctx.report_progress(55);

        let clusters = cluster_segments(&segments, VOICE_SIMILARITY_THRESHOLD);
        ctx.report_progress(70);

        let context = self.context_clues(&ctx, &segments).await?;
        ctx.report_progress(90);
        checkpoint(&ctx)?;

        let speakers = clusters
            .iter()
            .enumerate()
            .map(|(index, members)| {
                let members: Vec<&AudioSegment> = members.iter().map(|&i| &segments[i]).collect();
                fuse(index, &members, &frames, context.introductions.get(index))
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(speakers = speakers.len(), segments = segments.len(), "speakers identified");
        Ok(StageOutput::Speakers(speakers))
    }
}

pub(crate) fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy clustering against running centroids
///
/// Returns segment indices per cluster, clusters in order of first
/// appearance.
pub(crate) fn cluster_segments(segments: &[AudioSegment], threshold: f64) -> Vec<Vec<usize>> {
    let mut centroids: Vec<Vec<f64>> = Vec::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for (i, segment) in segments.iter().enumerate() {
        let best = centroids
            .iter()
            .enumerate()
            .map(|(c, centroid)| (c, cosine_similarity(centroid, &segment.speaker_embedding)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((c, _)) => {
                clusters[c].push(i);
                #[allow(clippy::cast_precision_loss)]
                let n = clusters[c].len() as f64;
                for (value, x) in centroids[c].iter_mut().zip(&segment.speaker_embedding) {
                    *value += (x - *value) / n;
                }
            }
            None => {
                centroids.push(segment.speaker_embedding.clone());
                clusters.push(vec![i]);
            }
        }
    }
    clusters
}

pub(crate) fn role_for(speaking_secs: f64, title: Option<&str>) -> SpeakerRole {
    if speaking_secs > MODERATOR_SECS {
        SpeakerRole::Moderator
    } else if title.is_some_and(|t| t.contains("Dr.") || t.contains("Prof.")) {
        SpeakerRole::Panelist
    } else {
        SpeakerRole::Guest
    }
}

pub(crate) fn pattern_for(speaking_secs: f64) -> SpeakingPattern {
    if speaking_secs > MODERATOR_SECS {
        SpeakingPattern::Frequent
    } else if speaking_secs > MODERATE_SECS {
        SpeakingPattern::Moderate
    } else {
        SpeakingPattern::Occasional
    }
}

/// Words per minute
pub(crate) fn speech_rate(words: usize, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let words = words as f64;
    words / (secs / 60.0)
}

/// Honorific at the start of a name, normalized
fn honorific(name: &str) -> Option<&'static str> {
    let first = name.split_whitespace().next()?;
    match first.trim_end_matches('.').to_ascii_lowercase().as_str() {
        "dr" | "doctor" => Some("Dr."),
        "prof" | "professor" => Some("Prof."),
        _ => None,
    }
}

fn fallback_name(index: usize) -> String {
    let letter = u8::try_from(index % 26).map_or('?', |i| char::from(b'A' + i));
    format!("Speaker {letter}")
}

fn fuse(
    index: usize,
    members: &[&AudioSegment],
    frames: &[FrameAnalysis],
    intro: Option<&Introduction>,
) -> Result<SpeakerProfile, AgentErrorKind> {
    let speaking_secs: f64 = members.iter().map(|s| (s.end - s.start).max(0.0)).sum();
    #[allow(clippy::cast_precision_loss)]
    let count = members.len().max(1) as f64;
    let mut confidence = 0.0;
    for segment in members {
        confidence += unit(segment.confidence, "segment confidence")?;
    }
    confidence /= count;
    let volumes: Vec<f64> = members.iter().filter_map(|s| s.volume).collect();
    #[allow(clippy::cast_precision_loss)]
    let average_volume = if volumes.is_empty() {
        0.0
    } else {
        volumes.iter().sum::<f64>() / volumes.len() as f64
    };
    let words: usize = members.iter().map(|s| s.text.split_whitespace().count()).sum();

    let sightings: Vec<&Person> = frames.iter().filter_map(|f| f.people.get(index)).collect();
    let position = average_position(&sightings);
    #[allow(clippy::cast_precision_loss)]
    let screen_time = sightings.len() as f64 * f64::from(super::fetcher::KEY_FRAME_INTERVAL_SECS);
    let face_embedding = sightings
        .iter()
        .find(|p| !p.face_embedding.is_empty())
        .map(|p| p.face_embedding.clone())
        .unwrap_or_default();

    let name = intro.map_or_else(|| fallback_name(index), |i| i.name.clone());
    let title_mentioned = honorific(&name).map(str::to_string);
    let introduced_as = intro.map(|i| match &i.title {
        Some(title) => format!("{}, {title}", i.name),
        None => i.name.clone(),
    });

    let mut segments: Vec<SpeechSegment> = members
        .iter()
        .map(|s| SpeechSegment {
            start: s.start,
            end: s.end,
            text: s.text.clone(),
            confidence: s.confidence.clamp(0.0, 1.0),
            emotions: Vec::new(),
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let time_spoken = speaking_secs.floor() as u32;

    Ok(SpeakerProfile {
        id: format!("speaker_{index}"),
        role: role_for(speaking_secs, title_mentioned.as_deref()),
        name,
        confidence,
        time_spoken,
        visual_features: VisualFeatures {
            face_embedding,
            position,
            screen_time,
        },
        audio_features: AudioFeatures {
            voice_embedding: members
                .first()
                .map(|s| s.speaker_embedding.clone())
                .unwrap_or_default(),
            speaking_time: speaking_secs,
            average_volume,
            speech_rate: speech_rate(words, speaking_secs),
        },
        contextual_clues: ContextualClues {
            introduced_as,
            title_mentioned,
            expertise_area: intro.and_then(|i| i.expertise.clone()),
            speaking_pattern: pattern_for(speaking_secs),
        },
        emotion_profile: EmotionProfile::neutral(),
        segments,
    })
}

fn average_position(sightings: &[&Person]) -> BoundingBox {
    if sightings.is_empty() {
        return BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
        };
    }
    #[allow(clippy::cast_precision_loss)]
    let n = sightings.len() as f64;
    let sum = sightings.iter().fold(BoundingBox::default(), |acc, p| BoundingBox {
        x: acc.x + p.position.x,
        y: acc.y + p.position.y,
        width: acc.width + p.position.width,
        height: acc.height + p.position.height,
    });
    BoundingBox {
        x: sum.x / n,
        y: sum.y / n,
        width: sum.width / n,
        height: sum.height / n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::context;
    use crate::agents::FetcherAgent;
    use crate::config::{AnalysisConfig, Provider};
    use crate::services::MockModelService;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn segment(start: f64, end: f64, embedding: Vec<f64>) -> AudioSegment {
        AudioSegment {
            start,
            end,
            text: "one two three".into(),
            confidence: 0.9,
            volume: None,
            speaker_embedding: embedding,
        }
    }

    #[test]
    fn similar_voices_share_a_cluster() {
        let segments = vec![
            segment(0.0, 10.0, vec![1.0, 0.0]),
            segment(10.0, 20.0, vec![0.0, 1.0]),
            segment(20.0, 30.0, vec![0.95, 0.1]),
            segment(30.0, 40.0, vec![0.7, 0.7]),
        ];
        let clusters = cluster_segments(&segments, VOICE_SIMILARITY_THRESHOLD);
        assert_eq!(clusters, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn roles_and_patterns_follow_speaking_time() {
        assert_eq!(role_for(420.0, Some("Dr.")), SpeakerRole::Moderator);
        assert_eq!(role_for(285.0, Some("Prof.")), SpeakerRole::Panelist);
        assert_eq!(role_for(285.0, None), SpeakerRole::Guest);
        assert_eq!(pattern_for(420.0), SpeakingPattern::Frequent);
        assert_eq!(pattern_for(198.0), SpeakingPattern::Moderate);
        assert_eq!(pattern_for(60.0), SpeakingPattern::Occasional);
        assert_eq!(speech_rate(150, 60.0), 150.0);
        assert_eq!(speech_rate(10, 0.0), 0.0);
    }

    #[test]
    fn honorifics_are_normalized() {
        assert_eq!(honorific("Professor Marcus Johnson"), Some("Prof."));
        assert_eq!(honorific("Dr. Elena Rodriguez"), Some("Dr."));
        assert_eq!(honorific("Sam Altman"), None);
        assert_eq!(fallback_name(1), "Speaker B");
    }

    async fn media_output() -> StageOutput {
        FetcherAgent::new(1800).invoke(context("N1", vec![])).await.unwrap()
    }

    #[tokio::test]
    async fn identifies_panel_offline() {
        let router = Arc::new(ServiceRouter::offline(&AnalysisConfig::default()));
        let output = SpeakerIdentificationAgent::new(router)
            .invoke(context("N2", vec![("N1", media_output().await)]))
            .await
            .unwrap();
        let speakers = output.speakers().unwrap();

        let names: Vec<&str> = speakers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Dr. Sarah Chen", "Prof. Marcus Johnson", "Dr. Elena Rodriguez"]);
        let roles: Vec<SpeakerRole> = speakers.iter().map(|s| s.role).collect();
        assert_eq!(roles, vec![SpeakerRole::Moderator, SpeakerRole::Panelist, SpeakerRole::Panelist]);
        assert_eq!(speakers[0].time_spoken, 420);
        assert_eq!(speakers[0].segments.len(), 7);
        assert_eq!(speakers[1].contextual_clues.speaking_pattern, SpeakingPattern::Moderate);
        assert_eq!(speakers[2].visual_features.screen_time, 50.0);
        assert_eq!(speakers[0].visual_features.position.x, 320.0);
        assert!((speakers[0].audio_features.average_volume - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn frame_and_context_failures_are_tolerated() {
        let mut mock = MockModelService::new();
        mock.expect_generate().returning(|req| match req.task {
            ModelTask::AudioSegmentation => Ok(json!([
                {"start": 0.0, "end": 30.0, "text": "hello there", "confidence": 0.8, "speakerEmbedding": [1.0, 0.0]},
                {"start": 31.0, "end": 50.0, "text": "hi", "confidence": 0.6, "speakerEmbedding": [0.0, 1.0]}
            ])),
            _ => Err(crate::error::ServiceError::status(503, "overloaded")),
        });
        let router = Arc::new(
            ServiceRouter::new(&AnalysisConfig::default()).with_provider(Provider::Google, Arc::new(mock)),
        );

        let output = SpeakerIdentificationAgent::new(router)
            .invoke(context("N2", vec![("N1", media_output().await)]))
            .await
            .unwrap();
        let speakers = output.speakers().unwrap();
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0].name, "Speaker A");
        assert_eq!(speakers[1].role, SpeakerRole::Guest);
        assert_eq!(speakers[0].visual_features.screen_time, 0.0);
    }

    #[tokio::test]
    async fn empty_segmentation_fails() {
        let mut mock = MockModelService::new();
        mock.expect_generate().returning(|req| match req.task {
            ModelTask::AudioSegmentation => Ok(json!([])),
            _ => Ok(json!({"people": []})),
        });
        let router = Arc::new(
            ServiceRouter::new(&AnalysisConfig::default()).with_provider(Provider::Google, Arc::new(mock)),
        );
        let err = SpeakerIdentificationAgent::new(router)
            .invoke(context("N2", vec![("N1", media_output().await)]))
            .await
            .unwrap_err();
        assert_eq!(err, AgentErrorKind::Validation("no speech segments found".into()));
    }

    #[tokio::test]
    async fn wrong_upstream_shape_is_malformed_input() {
        let router = Arc::new(ServiceRouter::offline(&AnalysisConfig::default()));
        let err = SpeakerIdentificationAgent::new(router)
            .invoke(context("N2", vec![("N1", StageOutput::FactChecks(vec![]))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentErrorKind::MalformedInput(msg) if msg.contains("expected media")));
    }
}
