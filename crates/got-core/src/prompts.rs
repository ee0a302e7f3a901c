//! Prompt templates
//!
//! Placeholders are `{name}` and are filled by [`render`].

pub const EMOTION_ANALYSIS: &str = r#"Analyze the emotional content of this text and return a JSON object with emotion scores (0-1) for: joy, sadness, anger, fear, surprise, disgust, neutral. Text: "{text}""#;

pub const FACT_CHECK: &str = r#"Fact-check this claim and return JSON with: verdict (TRUE/FALSE/MIXED/UNVERIFIED), confidence (0-1), explanation, sources. Claim: "{claim}""#;

pub const BIAS_DETECTION: &str = r#"Identify cognitive biases in this text. Return JSON array with: type, severity (LOW/MEDIUM/HIGH), description, examples, confidence (0-1). Text: "{text}""#;

pub const CREDIBILITY_ANALYSIS: &str = r#"Analyze credibility metrics (0-100) for: sourceReliability, factAccuracy, citationQuality, expertConsensus, dataTransparency, methodologyClarity. Content: "{content}""#;

pub const COMMUNICATION_ANALYSIS: &str = r#"Evaluate communication effectiveness (0-100) for: clarity, engagement, persuasiveness, emotionalAppeal, logicalStructure, audienceAdaptation. Content: "{content}""#;

pub const EMOTIONAL_INTELLIGENCE: &str = r#"Rate the emotional intelligence shown in this discussion (0-100) for: selfAwareness, empathy, emotionalRegulation, socialSkills, motivation, adaptability. Return a JSON object. Content: "{content}""#;

pub const FRAME_ANALYSIS: &str = r#"Analyze this video frame at {timestamp}s and identify:
1. Number of people visible
2. Who appears to be speaking (lip movement, gestures)
3. Seating arrangement and roles (moderator position, panel setup)
4. Professional context clues (clothing, setting, name plates)
5. Face positions for tracking

Return JSON:
{"people": [{"id": "person_1", "position": {"x": 0, "y": 0, "width": 100, "height": 100}, "isSpeaking": true, "roleClues": ["center_position"]}], "sceneContext": "panel_discussion"}"#;

pub const AUDIO_SEGMENTATION: &str = r#"Segment the audio of "{title}" ({duration} seconds) into speech turns. Return a JSON array of {"start": seconds, "end": seconds, "text": "...", "confidence": 0-1, "speakerEmbedding": [numbers]}."#;

pub const SPEAKER_CONTEXT: &str = r#"Analyze this discussion transcript and extract speaker identification clues:

"{transcript}"

Identify introductions and name mentions, professional titles and expertise areas, and moderator versus panelist roles.

Return JSON:
{"introductions": [{"name": "Dr. Smith", "title": "AI Researcher", "expertise": "Artificial Intelligence"}]}"#;

pub const DIARIZATION: &str = r#"Perform speaker diarization for "{title}". Known speakers: {speakers}. Return a JSON array of {"speakerId": "...", "start": seconds, "end": seconds, "confidence": 0-1}, ordered by start."#;

pub const TRANSCRIPTION: &str = r#"Transcribe the speech in "{title}" for these speaker turns: {turns}. Return a JSON array of {"speakerId": "...", "start": seconds, "end": seconds, "text": "...", "confidence": 0-1}."#;

pub const CLAIM_EXTRACTION: &str = r#"List the verifiable factual claims made in this discussion. Return a JSON array of strings. Content: "{content}""#;

pub const REPORT_SYNTHESIS: &str = r#"Write an executive summary of this video analysis. Return JSON with: summary, title, highlights (array of strings). Analysis: {analysis}"#;

/// Substitute `{key}` placeholders
///
/// Unknown placeholders are left as they are.
#[must_use]
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}
