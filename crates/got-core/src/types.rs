//! Domain types for video analysis
//!
//! Everything here is serialized camelCase for the presentation layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A resolved input video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAsset {
    /// Reference the caller supplied (URL or path)
    pub reference: String,
    /// Video title
    pub title: String,
    /// Duration in seconds; 0 when unknown
    pub duration_secs: u32,
    /// Where agents can reach the media
    pub locator: String,
}

impl MediaAsset {
    /// Create an asset
    #[must_use]
    pub fn new(reference: impl Into<String>, title: impl Into<String>, duration_secs: u32) -> Self {
        let reference = reference.into();
        Self {
            locator: reference.clone(),
            reference,
            title: title.into(),
            duration_secs,
        }
    }

    /// With locator
    #[must_use]
    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = locator.into();
        self
    }
}

/// Role a speaker plays in the discussion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Moderator,
    Panelist,
    Guest,
    Audience,
    #[default]
    Unknown,
}

/// How often a speaker holds the floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakingPattern {
    Frequent,
    Moderate,
    Occasional,
}

/// Face position within a frame, in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualFeatures {
    pub face_embedding: Vec<f64>,
    pub position: BoundingBox,
    /// Seconds on screen
    pub screen_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFeatures {
    pub voice_embedding: Vec<f64>,
    /// Seconds spoken
    pub speaking_time: f64,
    pub average_volume: f64,
    /// Words per minute
    pub speech_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextualClues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_mentioned: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expertise_area: Option<String>,
    pub speaking_pattern: SpeakingPattern,
}

/// Score for one named emotion, 0.0-1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub emotion: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionProfile {
    pub dominant: String,
    pub scores: Vec<EmotionScore>,
}

impl EmotionProfile {
    /// Build from scores, picking the highest as dominant
    ///
    /// Scores are sorted by descending score; ties keep input order.
    #[must_use]
    pub fn from_scores(mut scores: Vec<EmotionScore>) -> Self {
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        let dominant = scores
            .first()
            .map_or_else(|| "neutral".to_string(), |s| s.emotion.clone());
        Self { dominant, scores }
    }

    /// Profile with only `neutral`
    #[must_use]
    pub fn neutral() -> Self {
        Self::from_scores(vec![EmotionScore {
            emotion: "neutral".to_string(),
            score: 1.0,
        }])
    }
}

/// A timed stretch of speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub emotions: Vec<EmotionScore>,
}

impl SpeechSegment {
    /// Length in seconds, never negative
    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Everything known about one speaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerProfile {
    pub id: String,
    pub name: String,
    /// Identification confidence, 0.0-1.0
    pub confidence: f64,
    pub role: SpeakerRole,
    /// Whole seconds spoken
    pub time_spoken: u32,
    pub visual_features: VisualFeatures,
    pub audio_features: AudioFeatures,
    pub contextual_clues: ContextualClues,
    pub emotion_profile: EmotionProfile,
    /// Ordered by `start`
    pub segments: Vec<SpeechSegment>,
}

/// Parse error for the uppercase verdict/severity enums
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

/// Outcome of checking one claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    True,
    False,
    Mixed,
    Unverified,
}

impl FromStr for Verdict {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" => Ok(Self::True),
            "FALSE" => Ok(Self::False),
            "MIXED" => Ok(Self::Mixed),
            "UNVERIFIED" => Ok(Self::Unverified),
            _ => Err(ParseLabelError {
                kind: "verdict",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::True => "TRUE",
            Self::False => "FALSE",
            Self::Mixed => "MIXED",
            Self::Unverified => "UNVERIFIED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheck {
    pub claim: String,
    pub verdict: Verdict,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Weight used when turning findings into bias scores
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 0.4,
            Self::Medium => 0.7,
            Self::High => 1.0,
        }
    }
}

impl FromStr for Severity {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(ParseLabelError {
                kind: "severity",
                value: s.to_string(),
            }),
        }
    }
}

/// A detected cognitive bias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasFinding {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub description: String,
    pub examples: Vec<String>,
    pub confidence: f64,
}

/// Declares a group of six 0-100 scores with its camelCase field names
macro_rules! metric_group {
    ($(#[$meta:meta])* $name:ident { $($field:ident => $key:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct $name {
            $(pub $field: u8,)+
        }

        impl $name {
            /// Wire names of the scores, in display order
            pub const FIELDS: &'static [&'static str] = &[$($key),+];

            /// Scores paired with their wire names
            #[must_use]
            pub fn scores(&self) -> Vec<(&'static str, u8)> {
                vec![$(($key, self.$field)),+]
            }

            /// Read every score from a JSON object, clamping to 0-100
            ///
            /// # Errors
            /// Names the first field that is missing or not a number.
            pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
                Ok(Self {
                    $($field: crate::types::read_score(value, $key)?,)+
                })
            }
        }
    };
}

pub(crate) fn read_score(value: &serde_json::Value, key: &str) -> Result<u8, String> {
    let raw = value
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| format!("missing numeric score `{key}`"))?;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = raw.round().clamp(0.0, 100.0) as u8;
    Ok(score)
}

metric_group!(
    /// Source and evidence quality
    CredibilityMetrics {
        source_reliability => "sourceReliability",
        fact_accuracy => "factAccuracy",
        citation_quality => "citationQuality",
        expert_consensus => "expertConsensus",
        data_transparency => "dataTransparency",
        methodology_clarity => "methodologyClarity",
    }
);

metric_group!(
    /// Communication effectiveness
    CommunicationMetrics {
        clarity => "clarity",
        engagement => "engagement",
        persuasiveness => "persuasiveness",
        emotional_appeal => "emotionalAppeal",
        logical_structure => "logicalStructure",
        audience_adaptation => "audienceAdaptation",
    }
);

metric_group!(
    /// Strength of each bias family
    BiasMetrics {
        confirmation_bias => "confirmationBias",
        selection_bias => "selectionBias",
        authority_bias => "authorityBias",
        anchoring_bias => "anchoringBias",
        availability_bias => "availabilityBias",
        framing_effect => "framingEffect",
    }
);

metric_group!(
    /// Emotional intelligence
    EmotionalMetrics {
        self_awareness => "selfAwareness",
        empathy => "empathy",
        emotional_regulation => "emotionalRegulation",
        social_skills => "socialSkills",
        motivation => "motivation",
        adaptability => "adaptability",
    }
);

/// Final structured result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: String,
    pub video_reference: String,
    pub title: String,
    pub duration_secs: u32,
    pub speakers: Vec<SpeakerProfile>,
    pub fact_checks: Vec<FactCheck>,
    pub biases: Vec<BiasFinding>,
    /// -1.0 (negative) to 1.0 (positive)
    pub overall_sentiment: f64,
    pub processing_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credibility_metrics: Option<CredibilityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub communication_metrics: Option<CommunicationMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias_metrics: Option<BiasMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_metrics: Option<EmotionalMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn verdict_parses_case_insensitively() {
        assert_eq!("mixed".parse::<Verdict>().unwrap(), Verdict::Mixed);
        assert_eq!(" False ".parse::<Verdict>().unwrap(), Verdict::False);
        assert!("maybe".parse::<Verdict>().is_err());
        assert_eq!(serde_json::to_string(&Verdict::Unverified).unwrap(), "\"UNVERIFIED\"");
    }

    #[test]
    fn metric_group_reads_and_clamps() {
        let value = json!({
            "sourceReliability": 85,
            "factAccuracy": 78.4,
            "citationQuality": 140,
            "expertConsensus": -3,
            "dataTransparency": 75,
            "methodologyClarity": 82
        });
        let metrics = CredibilityMetrics::from_json(&value).unwrap();

        assert_eq!(metrics.fact_accuracy, 78);
        assert_eq!(metrics.citation_quality, 100);
        assert_eq!(metrics.expert_consensus, 0);
        assert_eq!(metrics.scores()[0], ("sourceReliability", 85));
    }

    #[test]
    fn metric_group_names_missing_field() {
        let err = CommunicationMetrics::from_json(&json!({"clarity": 1})).unwrap_err();
        assert_eq!(err, "missing numeric score `engagement`");
    }

    #[test]
    fn emotion_profile_picks_dominant() {
        let profile = EmotionProfile::from_scores(vec![
            EmotionScore { emotion: "neutral".into(), score: 0.2 },
            EmotionScore { emotion: "joy".into(), score: 0.7 },
        ]);
        assert_eq!(profile.dominant, "joy");
        assert_eq!(profile.scores[1].emotion, "neutral");
    }

    #[test]
    fn result_serializes_camel_case_and_omits_missing_metrics() {
        let result = AnalysisResult {
            id: "analysis-1".into(),
            video_reference: "talk.mp4".into(),
            title: "Talk".into(),
            duration_secs: 60,
            speakers: vec![],
            fact_checks: vec![],
            biases: vec![],
            overall_sentiment: 0.2,
            processing_time_secs: 1.5,
            summary: None,
            credibility_metrics: None,
            communication_metrics: Some(CommunicationMetrics::default()),
            bias_metrics: None,
            emotional_metrics: None,
        };
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["videoReference"], "talk.mp4");
        assert!(value.get("credibilityMetrics").is_none());
        assert_eq!(value["communicationMetrics"]["emotionalAppeal"], 0);
    }
}
