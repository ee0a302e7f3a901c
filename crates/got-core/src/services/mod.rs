//! External services
//!
//! Agents reach models only through [`ModelService`] and the run input only
//! through [`MediaSource`]. Both have HTTP implementations for production
//! and fixture implementations for offline runs.

mod fixture;
mod http;
mod json;
mod media;
mod router;
mod throttle;

pub use fixture::{FixtureMediaSource, FixtureModelService, DEMO_DURATION_SECS, DEMO_TITLE};
pub use http::{GoogleAiStudioClient, OpenRouterClient};
pub use json::extract_json;
pub use media::{FileMediaSource, MediaResolver, YouTubeMediaSource};
pub use router::ServiceRouter;
pub use throttle::Throttle;

use crate::error::ServiceError;
use crate::types::MediaAsset;
use async_trait::async_trait;
use got_kernel::AgentKind;
use serde_json::Value;

/// What a model request is for
///
/// Real models only see the prompt; fixtures dispatch on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTask {
    FrameAnalysis,
    AudioSegmentation,
    SpeakerContext,
    Diarization,
    Transcription,
    Emotion,
    EmotionalIntelligence,
    ClaimExtraction,
    FactCheck,
    Bias,
    Credibility,
    Communication,
    Report,
}

/// Media handed to a multimodal model alongside the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    /// URI the provider can fetch
    pub uri: String,
}

impl Attachment {
    #[must_use]
    pub fn video(uri: impl Into<String>) -> Self {
        Self {
            mime_type: "video/mp4".to_string(),
            uri: uri.into(),
        }
    }
}

/// One generation call
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub agent: AgentKind,
    pub task: ModelTask,
    pub model: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
}

/// A model that answers prompts with JSON
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generate a JSON response
    ///
    /// # Errors
    /// Returns `ServiceError` on transport, status or decoding failure.
    async fn generate(&self, request: ModelRequest) -> Result<Value, ServiceError>;
}

/// Resolves a user-supplied reference to a media asset
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Resolve a reference (URL or path)
    ///
    /// # Errors
    /// Returns `ServiceError::NotFound` if nothing exists at the reference.
    async fn resolve(&self, reference: &str) -> Result<MediaAsset, ServiceError>;
}
