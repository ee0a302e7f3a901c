//! Core kernel types
//!
//! Identifiers, stage declarations and the per-run execution state that the
//! scheduler mutates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use ulid::Ulid;

/// Binds the input and output types a pipeline's agents exchange.
///
/// The scheduler, agents and aggregators are all generic over one
/// `PipelineTypes` implementation so a registry can only ever be driven by
/// agents that agree on what flows along its edges.
pub trait PipelineTypes: Send + Sync + 'static {
    /// Run-level input handed to every stage (e.g. a resolved media asset)
    type Input: Send + Sync + fmt::Debug + 'static;
    /// Output produced by a single stage
    type Output: Send + Sync + fmt::Debug + 'static;
}

/// Unique stage identifier within a registry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    /// Create a stage id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of agent owning a stage
///
/// The scheduler never inspects the kind beyond using it to look up the
/// bound agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Fetches the input media and its metadata
    Fetcher,
    /// Multimodal speaker identification
    SpeakerIdentification,
    /// Who-spoke-when segmentation
    Diarizer,
    /// Speech to text
    Transcriber,
    /// Merges transcript segments per speaker
    SpeechAggregator,
    /// Emotion analysis
    Emotion,
    /// Claim verification
    FactCheck,
    /// Cognitive bias detection
    Bias,
    /// Credibility scoring
    Credibility,
    /// Communication effectiveness scoring
    Communication,
    /// Report synthesis
    Reporter,
    /// Presentation hand-off
    Renderer,
}

impl AgentKind {
    /// Every kind, in pipeline order
    pub const ALL: [AgentKind; 12] = [
        AgentKind::Fetcher,
        AgentKind::SpeakerIdentification,
        AgentKind::Diarizer,
        AgentKind::Transcriber,
        AgentKind::SpeechAggregator,
        AgentKind::Emotion,
        AgentKind::FactCheck,
        AgentKind::Bias,
        AgentKind::Credibility,
        AgentKind::Communication,
        AgentKind::Reporter,
        AgentKind::Renderer,
    ];

    /// Stable snake_case name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fetcher => "fetcher",
            Self::SpeakerIdentification => "speaker_identification",
            Self::Diarizer => "diarizer",
            Self::Transcriber => "transcriber",
            Self::SpeechAggregator => "speech_aggregator",
            Self::Emotion => "emotion",
            Self::FactCheck => "fact_check",
            Self::Bias => "bias",
            Self::Credibility => "credibility",
            Self::Communication => "communication",
            Self::Reporter => "reporter",
            Self::Renderer => "renderer",
        }
    }

    /// Agent label as shown to users
    #[must_use]
    pub fn agent_label(&self) -> &'static str {
        match self {
            Self::Fetcher => "FetcherAgent",
            Self::SpeakerIdentification => "SpeakerIdentificationAgent",
            Self::Diarizer => "DiarizerAgent",
            Self::Transcriber => "TranscriberAgent",
            Self::SpeechAggregator => "AggregatorAgent",
            Self::Emotion => "EmotionAgent",
            Self::FactCheck => "FactCheckAgent",
            Self::Bias => "BiasAgent",
            Self::Credibility => "CredibilityAgent",
            Self::Communication => "CommunicationAgent",
            Self::Reporter => "ReporterAgent",
            Self::Renderer => "UIAgent",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static declaration of one processing stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDefinition {
    /// Unique id
    pub id: StageId,
    /// Human readable name
    pub name: String,
    /// Agent owning the stage
    pub agent_kind: AgentKind,
    /// Backing service label (display only)
    pub service_label: String,
    /// Stages that must complete before this one starts
    pub depends_on: BTreeSet<StageId>,
}

impl StageDefinition {
    /// Create a stage with no dependencies
    #[must_use]
    pub fn new(id: impl Into<StageId>, name: impl Into<String>, agent_kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_kind,
            service_label: String::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// With service label
    #[inline]
    #[must_use]
    pub fn with_service(mut self, label: impl Into<String>) -> Self {
        self.service_label = label.into();
        self
    }

    /// With dependencies
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// True if the stage has no dependencies
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.depends_on.is_empty()
    }
}

/// Lifecycle status of a stage within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting for dependencies
    Pending,
    /// Agent invocation in flight
    Running,
    /// Agent returned an output
    Completed,
    /// Agent returned an error (or timed out)
    Failed,
    /// A dependency failed; never scheduled
    Blocked,
    /// Run cancelled before the stage reached another terminal state
    Cancelled,
}

impl StageStatus {
    /// Terminal statuses never change again
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Blocked | Self::Cancelled
        )
    }

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run state of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageExecutionState {
    /// Stage this state belongs to
    pub stage_id: StageId,
    /// Current status
    pub status: StageStatus,
    /// Agent-reported progress, 0-100
    pub progress: u8,
    /// Number of agent invocations so far
    pub attempts: u32,
    /// Failure cause, for `Failed` and `Blocked`
    pub error: Option<String>,
    /// When the stage entered `Running`
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageExecutionState {
    /// Fresh `Pending` state
    #[must_use]
    pub fn pending(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            progress: 0,
            attempts: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Wall-clock time spent running, if the stage started and finished
    #[must_use]
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}
