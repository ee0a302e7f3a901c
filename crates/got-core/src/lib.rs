//! GoT Core - video analysis on the GoT kernel
//!
//! Binds the twelve analysis stages to agents and services:
//! - [`pipeline`] declares the stage graph
//! - [`agents`] implement one stage each, talking to models through
//!   [`services`]
//! - [`aggregate`] turns completed stage outputs into an [`AnalysisResult`]
//! - [`orchestrator`] starts, tracks and cancels runs
//!
//! # Example
//!
//! ```rust,ignore
//! use got_core::{AnalysisConfig, AnalysisOrchestrator};
//!
//! # async fn example() -> got_core::Result<()> {
//! let orchestrator = AnalysisOrchestrator::offline(&AnalysisConfig::default())?;
//! let run = orchestrator.start_run("panel.mp4").await?;
//! let mut events = run.subscribe();
//! while let Some(event) = events.next().await {
//!     println!("{} -> {}", event.stage_id, event.status);
//! }
//! let result = run.wait().await.into_result()?;
//! println!("{} speakers", result.speakers.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod agents;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod services;
pub mod types;

pub use aggregate::AnalysisAggregator;
pub use config::{
    AnalysisConfig, Credentials, Endpoints, Limits, ModelBinding, Provider, RequestRates, RetryConfig,
    RetrySettings,
};
pub use error::{AnalysisError, ConfigError, Result, ServiceError};
pub use orchestrator::{AnalysisOrchestrator, AnalysisRun};
pub use output::{StageOutput, VideoAnalysis};
pub use types::{
    AnalysisResult, BiasFinding, BiasMetrics, CommunicationMetrics, CredibilityMetrics, EmotionProfile,
    EmotionalMetrics, FactCheck, MediaAsset, Severity, SpeakerProfile, SpeakerRole, Verdict,
};
