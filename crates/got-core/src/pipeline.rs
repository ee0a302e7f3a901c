//! The video-analysis stage graph
//!
//! Twelve stages: a linear ingestion chain (N1-N5), five analyses that fan
//! out from the merged speech (N6-N10), then synthesis and rendering.

use crate::config::{AnalysisConfig, Provider};
use got_kernel::construction::{validate, ValidatedRegistry};
use got_kernel::registry::StageRegistry;
use got_kernel::{AgentKind, PipelineError, StageDefinition, StageId};

pub const FETCH: &str = "N1";
pub const IDENTIFY: &str = "N2";
pub const DIARIZE: &str = "N3";
pub const TRANSCRIBE: &str = "N4";
pub const SPEECH: &str = "N5";
pub const EMOTION: &str = "N6";
pub const FACT_CHECK: &str = "N7";
pub const BIAS: &str = "N8";
pub const CREDIBILITY: &str = "N9";
pub const COMMUNICATION: &str = "N10";
pub const REPORT: &str = "N11";
pub const RENDER: &str = "N12";

/// The analyses the report is written from
pub const ANALYSES: [&str; 5] = [EMOTION, FACT_CHECK, BIAS, CREDIBILITY, COMMUNICATION];

/// Id of the stage whose dependencies must complete for a report
#[must_use]
pub fn report_stage() -> StageId {
    StageId::from(REPORT)
}

fn service_label(config: &AnalysisConfig, kind: AgentKind) -> String {
    match config.model_for(kind) {
        Some(binding) if binding.provider == Provider::YouTube => binding.provider.label().to_string(),
        Some(binding) if binding.provider == Provider::Local => format!("local {}", binding.model),
        Some(binding) => format!("{} ({})", binding.provider.label(), binding.model),
        None => "unbound".to_string(),
    }
}

/// Stage definitions in pipeline order
#[must_use]
pub fn stage_definitions(config: &AnalysisConfig) -> Vec<StageDefinition> {
    let stage = |id: &str, name: &str, kind: AgentKind, deps: &[&str]| {
        StageDefinition::new(id, name, kind)
            .with_service(service_label(config, kind))
            .depends_on(deps.iter().copied())
    };

    vec![
        stage(FETCH, "Video Fetcher", AgentKind::Fetcher, &[]),
        stage(IDENTIFY, "Speaker Identification", AgentKind::SpeakerIdentification, &[FETCH]),
        stage(DIARIZE, "Speaker Diarization", AgentKind::Diarizer, &[IDENTIFY]),
        stage(TRANSCRIBE, "Audio Transcription", AgentKind::Transcriber, &[DIARIZE]),
        stage(SPEECH, "Speech Aggregation", AgentKind::SpeechAggregator, &[TRANSCRIBE]),
        stage(EMOTION, "Emotion Analysis", AgentKind::Emotion, &[SPEECH]),
        stage(FACT_CHECK, "Fact Checking", AgentKind::FactCheck, &[SPEECH]),
        stage(BIAS, "Bias Detection", AgentKind::Bias, &[SPEECH]),
        stage(CREDIBILITY, "Credibility Analysis", AgentKind::Credibility, &[SPEECH]),
        stage(COMMUNICATION, "Communication Analysis", AgentKind::Communication, &[SPEECH]),
        stage(REPORT, "Report Generation", AgentKind::Reporter, &ANALYSES),
        stage(RENDER, "UI Rendering", AgentKind::Renderer, &[REPORT]),
    ]
}

/// Register and validate the stage graph
///
/// # Errors
/// Returns a startup `PipelineError` if the graph is malformed.
pub fn build_registry(config: &AnalysisConfig) -> Result<ValidatedRegistry, PipelineError> {
    let registry = StageRegistry::register(stage_definitions(config))?;
    Ok(validate(registry)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use got_kernel::aggregation::required_for_report;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[test]
    fn graph_is_valid() {
        let validated = build_registry(&AnalysisConfig::default()).unwrap();
        assert_eq!(validated.len(), 12);
        assert_eq!(validated.roots(), vec![StageId::from(FETCH)]);
        assert_eq!(validated.topological_order().last(), Some(&StageId::from(RENDER)));
        assert_eq!(validated.dependents(&SPEECH.into()).len(), 5);
    }

    #[test]
    fn report_requires_every_analysis() {
        let validated = build_registry(&AnalysisConfig::default()).unwrap();
        let required = required_for_report(&validated, &report_stage());
        let expected: BTreeSet<StageId> = ANALYSES.iter().copied().map(StageId::from).collect();
        assert_eq!(required, expected);
    }

    #[test]
    fn service_labels_follow_model_bindings() {
        let defs = stage_definitions(&AnalysisConfig::default());
        assert_eq!(defs[0].service_label, "YouTube Data API");
        assert_eq!(defs[1].service_label, "Google AI Studio (gemini-1.5-pro)");
        assert_eq!(defs[8].service_label, "OpenRouter (anthropic/claude-3.5-sonnet)");
        assert_eq!(defs[11].service_label, "local react_renderer");
    }

    #[test]
    fn every_stage_has_a_distinct_kind() {
        let kinds: BTreeSet<AgentKind> = stage_definitions(&AnalysisConfig::default())
            .iter()
            .map(|d| d.agent_kind)
            .collect();
        assert_eq!(kinds.len(), AgentKind::ALL.len());
    }
}
