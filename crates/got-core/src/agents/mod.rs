//! Video-analysis agents
//!
//! One agent per [`AgentKind`]. Agents are stateless; everything a stage
//! needs arrives through its context and everything it talks to is behind
//! the [`ServiceRouter`].

mod analysis;
mod fetcher;
mod report;
mod speaker;
mod transcription;

pub use analysis::{BiasAgent, CommunicationAgent, CredibilityAgent, EmotionAgent, FactCheckAgent};
pub use fetcher::FetcherAgent;
pub use report::{RenderAgent, ReporterAgent};
pub use speaker::SpeakerIdentificationAgent;
pub use transcription::{DiarizerAgent, SpeechAggregatorAgent, TranscriberAgent};

use crate::config::AnalysisConfig;
use crate::output::{StageOutput, VideoAnalysis};
use crate::services::{Attachment, ModelTask, ServiceRouter};
use got_kernel::executor::{AgentSet, StageContext};
use got_kernel::{AgentErrorKind, AgentKind};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

pub(crate) type Ctx = StageContext<VideoAnalysis>;

/// Bind every agent kind
#[must_use]
pub fn build_agents(router: Arc<ServiceRouter>, config: &AnalysisConfig) -> AgentSet<VideoAnalysis> {
    AgentSet::new()
        .with(
            AgentKind::Fetcher,
            Arc::new(FetcherAgent::new(config.limits.max_video_length_secs)),
        )
        .with(
            AgentKind::SpeakerIdentification,
            Arc::new(SpeakerIdentificationAgent::new(Arc::clone(&router))),
        )
        .with(AgentKind::Diarizer, Arc::new(DiarizerAgent::new(Arc::clone(&router))))
        .with(AgentKind::Transcriber, Arc::new(TranscriberAgent::new(Arc::clone(&router))))
        .with(AgentKind::SpeechAggregator, Arc::new(SpeechAggregatorAgent))
        .with(AgentKind::Emotion, Arc::new(EmotionAgent::new(Arc::clone(&router))))
        .with(AgentKind::FactCheck, Arc::new(FactCheckAgent::new(Arc::clone(&router))))
        .with(AgentKind::Bias, Arc::new(BiasAgent::new(Arc::clone(&router))))
        .with(AgentKind::Credibility, Arc::new(CredibilityAgent::new(Arc::clone(&router))))
        .with(
            AgentKind::Communication,
            Arc::new(CommunicationAgent::new(Arc::clone(&router))),
        )
        .with(AgentKind::Reporter, Arc::new(ReporterAgent::new(router)))
        .with(AgentKind::Renderer, Arc::new(RenderAgent))
}

/// Typed output of a direct dependency
pub(crate) fn upstream<'a, T: ?Sized>(
    ctx: &'a Ctx,
    stage: &str,
    expected: &str,
    pick: impl FnOnce(&'a StageOutput) -> Option<&'a T>,
) -> Result<&'a T, AgentErrorKind> {
    let output = ctx.require(stage)?;
    pick(output).ok_or_else(|| {
        AgentErrorKind::MalformedInput(format!(
            "expected {expected} output from {stage}, got {}",
            output.kind()
        ))
    })
}

/// Deserialize a model response
pub(crate) fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, AgentErrorKind> {
    serde_json::from_value(value).map_err(|e| AgentErrorKind::Validation(format!("{what}: {e}")))
}

/// Stop early once the run is cancelled
pub(crate) fn checkpoint(ctx: &Ctx) -> Result<(), AgentErrorKind> {
    if ctx.is_cancelled() {
        return Err(AgentErrorKind::Cancelled);
    }
    Ok(())
}

/// Send a prompt for the context's agent kind
pub(crate) async fn ask(
    router: &ServiceRouter,
    ctx: &Ctx,
    task: ModelTask,
    prompt: String,
    attachments: Vec<Attachment>,
) -> Result<Value, AgentErrorKind> {
    checkpoint(ctx)?;
    router
        .generate(ctx.definition().agent_kind, task, prompt, attachments)
        .await
        .map_err(AgentErrorKind::from)
}

/// Clamp to 0.0-1.0, rejecting non-numbers
pub(crate) fn unit(value: f64, what: &str) -> Result<f64, AgentErrorKind> {
    if value.is_finite() {
        Ok(value.clamp(0.0, 1.0))
    } else {
        Err(AgentErrorKind::Validation(format!("{what} is not a number")))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context builders for calling agents directly

    use super::Ctx;
    use crate::output::StageOutput;
    use crate::pipeline::stage_definitions;
    use crate::config::AnalysisConfig;
    use crate::types::MediaAsset;
    use got_kernel::executor::ProgressReporter;
    use got_kernel::{RunId, StageId};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use got_kernel::executor::CancellationToken;

    pub(crate) fn asset() -> MediaAsset {
        MediaAsset::new("panel.mp4", crate::services::DEMO_TITLE, crate::services::DEMO_DURATION_SECS)
    }

    pub(crate) fn context(stage: &str, upstream: Vec<(&str, StageOutput)>) -> Ctx {
        let definition = stage_definitions(&AnalysisConfig::default())
            .into_iter()
            .find(|d| d.id.as_str() == stage)
            .expect("known stage");
        let upstream: BTreeMap<StageId, Arc<StageOutput>> = upstream
            .into_iter()
            .map(|(id, output)| (StageId::from(id), Arc::new(output)))
            .collect();
        Ctx::new(
            RunId::new(),
            Arc::new(definition.clone()),
            Arc::new(asset()),
            upstream,
            ProgressReporter::detached(definition.id),
            CancellationToken::new(),
        )
    }
}
