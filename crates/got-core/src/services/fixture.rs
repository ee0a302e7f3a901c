//! Offline fixtures
//!
//! A scripted three-person panel discussion. Every model task is answered
//! from the same script so that stage outputs agree with each other.

use super::{MediaSource, ModelRequest, ModelService, ModelTask};
use crate::error::ServiceError;
use crate::types::MediaAsset;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

pub const DEMO_TITLE: &str = "The Future of Artificial Intelligence - Expert Panel Discussion";
pub const DEMO_DURATION_SECS: u32 = 1247;

struct Panelist {
    name: &'static str,
    title: &'static str,
    expertise: &'static str,
    /// Seconds per turn
    turn_secs: f64,
    volume: f64,
    position: (f64, f64, f64, f64),
}

const PANEL: [Panelist; 3] = [
    Panelist {
        name: "Dr. Sarah Chen",
        title: "AI Research Director",
        expertise: "Artificial Intelligence",
        turn_secs: 60.0,
        volume: 0.75,
        position: (320.0, 100.0, 180.0, 240.0),
    },
    Panelist {
        name: "Prof. Marcus Johnson",
        title: "Ethics in Technology",
        expertise: "Technology Ethics",
        turn_secs: 57.0,
        volume: 0.68,
        position: (120.0, 100.0, 170.0, 230.0),
    },
    Panelist {
        name: "Dr. Elena Rodriguez",
        title: "Machine Learning Specialist",
        expertise: "Machine Learning",
        turn_secs: 66.0,
        volume: 0.72,
        position: (520.0, 100.0, 175.0, 235.0),
    },
];

const GAP_SECS: f64 = 5.0;
const EMBEDDING_DIM: usize = 12;

/// Speaker index and line, in speaking order
const SCRIPT: [(usize, &str); 15] = [
    (0, "Welcome everyone. I'm Dr. Sarah Chen, AI Research Director, and joining me today are Professor Marcus Johnson from Ethics in Technology and Dr. Elena Rodriguez, a Machine Learning Specialist."),
    (1, "Thank you Sarah. I want to start with a claim we hear constantly: AI will replace 50% of jobs by 2030. The research is far less certain than the headlines."),
    (2, "From the engineering side, people often assume machine learning algorithms are completely objective, but every model inherits the biases in its training data."),
    (0, "That is a great point. Elena, how do your teams detect those biases before deployment?"),
    (1, "And we should be careful about authority here. Institutional backing does not guarantee that a system is fair or accurate."),
    (0, "Let me push on the capability question. Some argue current AI systems have achieved human-level reasoning. Marcus, do you agree?"),
    (2, "Benchmarks can be misleading. Models excel in narrow domains but lack the contextual understanding that people bring to new situations."),
    (1, "I do not agree. The evidence shows impressive pattern matching, not general reasoning, and we should say so plainly."),
    (0, "So the picture is mixed: real progress, real limits. What should policymakers focus on first?"),
    (1, "Transparency. If citizens cannot see how automated decisions are made, they cannot contest them."),
    (0, "Elena, from a practitioner's perspective, is transparency achievable with today's models?"),
    (2, "Partly. We can document data sources and evaluation methods, and that alone would raise the bar considerably."),
    (0, "We have a few minutes left. One sentence each on where we will be in five years."),
    (1, "More regulation, better audits, and hopefully fewer exaggerated claims in both directions."),
    (0, "Thank you both. This has been a thoughtful discussion, and I'm optimistic about the work ahead."),
];

const CLAIMS: [(&str, &str, f64, [&str; 2], &str); 3] = [
    (
        "AI will replace 50% of jobs by 2030",
        "MIXED",
        0.75,
        ["MIT Technology Review", "World Economic Forum"],
        "While AI will significantly impact employment, studies show varying estimates ranging from 25% to 50% job displacement, with new job categories also emerging.",
    ),
    (
        "Machine learning algorithms are completely objective",
        "FALSE",
        0.92,
        ["Nature Machine Intelligence", "IEEE Spectrum"],
        "AI systems inherit biases from training data and can perpetuate or amplify existing societal biases.",
    ),
    (
        "Current AI systems have achieved human-level reasoning",
        "FALSE",
        0.88,
        ["Science", "Nature AI"],
        "While AI excels in specific domains, it lacks the general reasoning capabilities and contextual understanding of humans.",
    ),
];

/// Start and end of each script line
fn timeline() -> Vec<(f64, f64)> {
    let mut clock = 0.0;
    SCRIPT
        .iter()
        .map(|(speaker, _)| {
            let start = clock;
            let end = start + PANEL[*speaker].turn_secs;
            clock = end + GAP_SECS;
            (start, end)
        })
        .collect()
}

/// Speaker whose first script line appears in `text`
fn speaker_in(text: &str) -> Option<usize> {
    SCRIPT
        .iter()
        .find(|(_, line)| text.contains(line))
        .map(|(speaker, _)| *speaker)
}

fn speaker_id(index: usize) -> String {
    format!("speaker_{index}")
}

/// Model service answering from the demo script
#[derive(Debug, Clone)]
pub struct FixtureModelService {
    seed: u64,
}

impl Default for FixtureModelService {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureModelService {
    #[must_use]
    pub fn new() -> Self {
        Self { seed: 0x5eed }
    }

    /// Voice embeddings: one block of ones per speaker plus small noise
    fn embeddings(&self) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        SCRIPT
            .iter()
            .map(|(speaker, _)| {
                (0..EMBEDDING_DIM)
                    .map(|dim| {
                        let base = if dim / 4 == *speaker { 1.0 } else { 0.0 };
                        base + rng.random_range(-0.05..0.05)
                    })
                    .collect()
            })
            .collect()
    }

    fn audio_segments(&self) -> Value {
        let embeddings = self.embeddings();
        let segments: Vec<Value> = SCRIPT
            .iter()
            .zip(timeline())
            .zip(embeddings)
            .map(|(((speaker, text), (start, end)), embedding)| {
                json!({
                    "start": start,
                    "end": end,
                    "text": text,
                    "confidence": 0.9,
                    "volume": PANEL[*speaker].volume,
                    "speakerEmbedding": embedding,
                })
            })
            .collect();
        Value::Array(segments)
    }

    fn frame_analysis() -> Value {
        let people: Vec<Value> = PANEL
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let (x, y, width, height) = p.position;
                let clues = if i == 0 {
                    vec!["center_position", "formal_attire"]
                } else {
                    vec!["formal_attire"]
                };
                json!({
                    "id": format!("person_{}", i + 1),
                    "position": {"x": x, "y": y, "width": width, "height": height},
                    "isSpeaking": i == 0,
                    "roleClues": clues,
                })
            })
            .collect();
        json!({ "people": people, "sceneContext": "panel_discussion" })
    }

    fn speaker_context() -> Value {
        let introductions: Vec<Value> = PANEL
            .iter()
            .map(|p| json!({"name": p.name, "title": p.title, "expertise": p.expertise}))
            .collect();
        json!({ "introductions": introductions })
    }

    fn turns() -> Value {
        let turns: Vec<Value> = SCRIPT
            .iter()
            .zip(timeline())
            .map(|((speaker, _), (start, end))| {
                json!({"speakerId": speaker_id(*speaker), "start": start, "end": end, "confidence": 0.92})
            })
            .collect();
        Value::Array(turns)
    }

    fn transcript() -> Value {
        let segments: Vec<Value> = SCRIPT
            .iter()
            .zip(timeline())
            .map(|((speaker, text), (start, end))| {
                json!({
                    "speakerId": speaker_id(*speaker),
                    "start": start,
                    "end": end,
                    "text": text,
                    "confidence": 0.94,
                })
            })
            .collect();
        Value::Array(segments)
    }

    fn emotion(prompt: &str) -> Value {
        #[allow(clippy::cast_precision_loss)]
        let index = speaker_in(prompt).unwrap_or(1) as f64;
        json!({
            "joy": 0.7 - index * 0.2,
            "sadness": 0.0,
            "anger": 0.0,
            "fear": 0.0,
            "surprise": 0.1 + index * 0.1,
            "disgust": 0.0,
            "neutral": 0.2 + index * 0.1,
        })
    }

    fn fact_check(prompt: &str) -> Value {
        CLAIMS
            .iter()
            .find(|(claim, ..)| prompt.contains(claim))
            .map_or_else(
                || {
                    json!({
                        "verdict": "UNVERIFIED",
                        "confidence": 0.3,
                        "explanation": "No reliable sources address this claim.",
                        "sources": [],
                    })
                },
                |(_, verdict, confidence, sources, explanation)| {
                    json!({
                        "verdict": verdict,
                        "confidence": confidence,
                        "explanation": explanation,
                        "sources": sources,
                    })
                },
            )
    }

    fn biases() -> Value {
        json!([
            {
                "type": "Confirmation Bias",
                "severity": "MEDIUM",
                "description": "Tendency to search for, interpret, and recall information that confirms pre-existing beliefs.",
                "examples": [
                    "Selective citation of studies that support initial position",
                    "Dismissing contradictory evidence without proper consideration"
                ],
                "confidence": 0.78
            },
            {
                "type": "Authority Bias",
                "severity": "LOW",
                "description": "Attributing greater accuracy to the opinion of an authority figure.",
                "examples": [
                    "Excessive reliance on expert opinions without critical analysis",
                    "Assumption that institutional backing guarantees accuracy"
                ],
                "confidence": 0.65
            },
            {
                "type": "Anchoring Bias",
                "severity": "MEDIUM",
                "description": "Heavy reliance on the first piece of information encountered.",
                "examples": [
                    "Overemphasis on initial statistics presented",
                    "Difficulty adjusting estimates after initial anchor"
                ],
                "confidence": 0.72
            }
        ])
    }

    fn respond(&self, request: &ModelRequest) -> Value {
        match request.task {
            ModelTask::FrameAnalysis => Self::frame_analysis(),
            ModelTask::AudioSegmentation => self.audio_segments(),
            ModelTask::SpeakerContext => Self::speaker_context(),
            ModelTask::Diarization => Self::turns(),
            ModelTask::Transcription => Self::transcript(),
            ModelTask::Emotion => Self::emotion(&request.prompt),
            ModelTask::EmotionalIntelligence => json!({
                "selfAwareness": 74, "empathy": 82, "emotionalRegulation": 69,
                "socialSkills": 88, "motivation": 91, "adaptability": 77
            }),
            ModelTask::ClaimExtraction => json!(CLAIMS.iter().map(|c| c.0).collect::<Vec<_>>()),
            ModelTask::FactCheck => Self::fact_check(&request.prompt),
            ModelTask::Bias => Self::biases(),
            ModelTask::Credibility => json!({
                "sourceReliability": 85, "factAccuracy": 78, "citationQuality": 72,
                "expertConsensus": 68, "dataTransparency": 75, "methodologyClarity": 82
            }),
            ModelTask::Communication => json!({
                "clarity": 88, "engagement": 92, "persuasiveness": 76,
                "emotionalAppeal": 84, "logicalStructure": 79, "audienceAdaptation": 86
            }),
            ModelTask::Report => json!({
                "title": DEMO_TITLE,
                "summary": "A three-person expert panel weighs AI's economic impact, objectivity and reasoning ability. Headline claims about job loss and human-level reasoning are contested, and the panel converges on transparency and auditing as near-term priorities.",
                "highlights": [
                    "Job displacement estimates vary widely",
                    "Training data bias undermines claims of objectivity",
                    "Transparency named as the first policy priority"
                ]
            }),
        }
    }
}

#[async_trait]
impl ModelService for FixtureModelService {
    async fn generate(&self, request: ModelRequest) -> Result<Value, ServiceError> {
        tracing::trace!(task = ?request.task, agent = %request.agent, "fixture response");
        Ok(self.respond(&request))
    }
}

/// Media source resolving every reference to the demo panel
#[derive(Debug, Clone, Default)]
pub struct FixtureMediaSource;

#[async_trait]
impl MediaSource for FixtureMediaSource {
    async fn resolve(&self, reference: &str) -> Result<MediaAsset, ServiceError> {
        if reference.trim().is_empty() {
            return Err(ServiceError::NotFound("empty reference".to_string()));
        }
        Ok(MediaAsset::new(reference, DEMO_TITLE, DEMO_DURATION_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use got_kernel::AgentKind;

    fn request(task: ModelTask, prompt: &str) -> ModelRequest {
        ModelRequest {
            agent: AgentKind::Emotion,
            task,
            model: "fixture".into(),
            prompt: prompt.into(),
            attachments: vec![],
        }
    }

    #[test]
    fn script_timing_matches_panel_totals() {
        let mut spoken = [0.0_f64; 3];
        for ((speaker, _), (start, end)) in SCRIPT.iter().zip(timeline()) {
            spoken[*speaker] += end - start;
        }
        assert_eq!(spoken, [420.0, 285.0, 198.0]);
        let (_, last_end) = timeline()[SCRIPT.len() - 1];
        assert!(last_end < f64::from(DEMO_DURATION_SECS));
    }

    #[tokio::test]
    async fn fact_check_matches_claim_in_prompt() {
        let service = FixtureModelService::new();
        let value = service
            .generate(request(ModelTask::FactCheck, "Claim: \"Machine learning algorithms are completely objective\""))
            .await
            .unwrap();
        assert_eq!(value["verdict"], "FALSE");

        let value = service
            .generate(request(ModelTask::FactCheck, "Claim: \"Water is wet\""))
            .await
            .unwrap();
        assert_eq!(value["verdict"], "UNVERIFIED");
    }

    #[tokio::test]
    async fn emotion_depends_on_speaker() {
        let service = FixtureModelService::new();
        let chen = service.generate(request(ModelTask::Emotion, SCRIPT[0].1)).await.unwrap();
        let rodriguez = service.generate(request(ModelTask::Emotion, SCRIPT[2].1)).await.unwrap();
        assert!(chen["joy"].as_f64().unwrap() > rodriguez["joy"].as_f64().unwrap());
    }

    #[test]
    fn embeddings_are_deterministic() {
        let service = FixtureModelService::new();
        assert_eq!(service.embeddings(), service.embeddings());
    }
}
