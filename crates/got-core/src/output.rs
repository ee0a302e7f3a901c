//! Stage outputs
//!
//! Every agent produces one [`StageOutput`] variant. Downstream agents read
//! upstream variants through the typed accessors, which return `None` when
//! a dependency produced something unexpected.

use crate::types::{
    BiasFinding, BiasMetrics, CommunicationMetrics, CredibilityMetrics, EmotionProfile,
    EmotionalMetrics, FactCheck, MediaAsset, SpeakerProfile, SpeechSegment,
};
use got_kernel::PipelineTypes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Binds the video-analysis pipeline's input and output types
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoAnalysis;

impl PipelineTypes for VideoAnalysis {
    type Input = MediaAsset;
    type Output = StageOutput;
}

/// Fetched media with its sampled key frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaReport {
    pub asset: MediaAsset,
    /// Key-frame timestamps in seconds
    pub key_frames: Vec<u32>,
}

/// One uninterrupted stretch attributed to a speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerTurn {
    pub speaker_id: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub speaker_id: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
}

/// All speech of one speaker, in time order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerSpeech {
    pub speaker_id: String,
    pub segments: Vec<SpeechSegment>,
    pub word_count: usize,
}

impl SpeakerSpeech {
    /// Concatenated text of every segment
    #[must_use]
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionReport {
    /// Keyed by speaker id
    pub profiles: BTreeMap<String, EmotionProfile>,
    /// -1.0 to 1.0
    pub overall_sentiment: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<EmotionalMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasReport {
    pub findings: Vec<BiasFinding>,
    pub metrics: BiasMetrics,
}

/// Narrative synthesis over every analysis stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Analysis sections the summary was written from
    #[serde(default)]
    pub sections: Vec<String>,
}

/// Sections the presentation layer can display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderManifest {
    pub sections: Vec<String>,
}

/// Output of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Media(MediaReport),
    Speakers(Vec<SpeakerProfile>),
    Diarization(Vec<SpeakerTurn>),
    Transcript(Vec<TranscriptSegment>),
    Speech(Vec<SpeakerSpeech>),
    Emotion(EmotionReport),
    FactChecks(Vec<FactCheck>),
    Bias(BiasReport),
    Credibility(CredibilityMetrics),
    Communication(CommunicationMetrics),
    Report(Synthesis),
    Render(RenderManifest),
}

impl StageOutput {
    /// Variant name, for error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Media(_) => "media",
            Self::Speakers(_) => "speakers",
            Self::Diarization(_) => "diarization",
            Self::Transcript(_) => "transcript",
            Self::Speech(_) => "speech",
            Self::Emotion(_) => "emotion",
            Self::FactChecks(_) => "fact_checks",
            Self::Bias(_) => "bias",
            Self::Credibility(_) => "credibility",
            Self::Communication(_) => "communication",
            Self::Report(_) => "report",
            Self::Render(_) => "render",
        }
    }

    #[must_use]
    pub fn media(&self) -> Option<&MediaReport> {
        match self {
            Self::Media(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn speakers(&self) -> Option<&[SpeakerProfile]> {
        match self {
            Self::Speakers(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn diarization(&self) -> Option<&[SpeakerTurn]> {
        match self {
            Self::Diarization(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn transcript(&self) -> Option<&[TranscriptSegment]> {
        match self {
            Self::Transcript(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn speech(&self) -> Option<&[SpeakerSpeech]> {
        match self {
            Self::Speech(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn emotion(&self) -> Option<&EmotionReport> {
        match self {
            Self::Emotion(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn fact_checks(&self) -> Option<&[FactCheck]> {
        match self {
            Self::FactChecks(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn bias(&self) -> Option<&BiasReport> {
        match self {
            Self::Bias(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn credibility(&self) -> Option<&CredibilityMetrics> {
        match self {
            Self::Credibility(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn communication(&self) -> Option<&CommunicationMetrics> {
        match self {
            Self::Communication(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub fn report(&self) -> Option<&Synthesis> {
        match self {
            Self::Report(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn render(&self) -> Option<&RenderManifest> {
        match self {
            Self::Render(r) => Some(r),
            _ => None,
        }
    }
}
