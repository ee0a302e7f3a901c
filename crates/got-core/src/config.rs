//! Analysis configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then `GOT_*`
//! environment overrides. The scheduler policy (timeouts, retry, worker
//! limit) is derived from the loaded values.

use crate::error::ConfigError;
use got_kernel::executor::{RetryPolicy, StagePolicy};
use got_kernel::scheduler::SchedulerConfig;
use got_kernel::AgentKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Backend an agent talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    OpenRouter,
    YouTube,
    Local,
}

impl Provider {
    /// Display name used in stage service labels
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Google => "Google AI Studio",
            Self::OpenRouter => "OpenRouter",
            Self::YouTube => "YouTube Data API",
            Self::Local => "local",
        }
    }
}

/// Provider and model used by one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBinding {
    pub provider: Provider,
    pub model: String,
}

impl ModelBinding {
    #[must_use]
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// API keys
///
/// `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub google_ai_studio_key: String,
    pub openrouter_api_key: String,
    pub youtube_api_key: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            google_ai_studio_key: "your_google_ai_studio_key_here".to_string(),
            openrouter_api_key: "your_openrouter_key_here".to_string(),
            youtube_api_key: "your_youtube_api_key_here".to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |key: &str| if is_placeholder(key) { "<missing>" } else { "<redacted>" };
        f.debug_struct("Credentials")
            .field("google_ai_studio_key", &shown(&self.google_ai_studio_key))
            .field("openrouter_api_key", &shown(&self.openrouter_api_key))
            .field("youtube_api_key", &shown(&self.youtube_api_key))
            .finish()
    }
}

impl Credentials {
    /// Key for a provider; `None` for providers that need none
    #[must_use]
    pub fn key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Google => Some(&self.google_ai_studio_key),
            Provider::OpenRouter => Some(&self.openrouter_api_key),
            Provider::YouTube => Some(&self.youtube_api_key),
            Provider::Local => None,
        }
    }

    /// Names of keys that are empty or still placeholders
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("GOOGLE_AI_STUDIO_KEY", &self.google_ai_studio_key),
            ("OPENROUTER_API_KEY", &self.openrouter_api_key),
            ("YOUTUBE_API_KEY", &self.youtube_api_key),
        ]
        .into_iter()
        .filter(|(_, key)| is_placeholder(key))
        .map(|(name, _)| name)
        .collect()
    }
}

/// Empty, or of the shape `your_..._here`
pub(crate) fn is_placeholder(key: &str) -> bool {
    let key = key.trim();
    key.is_empty() || (key.starts_with("your_") && key.ends_with("_here"))
}

/// Service base URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub google_ai_studio: String,
    pub openrouter: String,
    pub youtube: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            google_ai_studio: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            openrouter: "https://openrouter.ai/api/v1".to_string(),
            youtube: "https://www.googleapis.com/youtube/v3".to_string(),
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Longest video accepted by the fetcher
    pub max_video_length_secs: u32,
    /// Concurrent agents per run; 0 means unbounded
    pub worker_threads: usize,
    /// Per-attempt stage timeout; 0 disables it
    pub stage_timeout_secs: u64,
    /// HTTP request timeout
    pub request_timeout_secs: u64,
    pub requests_per_minute: RequestRates,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_video_length_secs: 1800,
            worker_threads: 4,
            stage_timeout_secs: 300,
            request_timeout_secs: 60,
            requests_per_minute: RequestRates::default(),
        }
    }
}

/// Requests per minute for each remote provider; 0 disables throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestRates {
    pub google_ai_studio: u32,
    pub openrouter: u32,
    pub youtube: u32,
}

impl Default for RequestRates {
    fn default() -> Self {
        Self {
            google_ai_studio: 60,
            openrouter: 100,
            youtube: 100,
        }
    }
}

impl RequestRates {
    /// Limit for a provider; local services are never throttled
    #[must_use]
    pub fn for_provider(&self, provider: Provider) -> u32 {
        match provider {
            Provider::Google => self.google_ai_studio,
            Provider::OpenRouter => self.openrouter,
            Provider::YouTube => self.youtube,
            Provider::Local => 0,
        }
    }
}

/// Retry settings for one stage or the default
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetrySettings {
    /// Kernel retry policy
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        if self.max_attempts <= 1 {
            return RetryPolicy::none();
        }
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default: RetrySettings,
    /// Overrides keyed by stage id
    pub stages: BTreeMap<String, RetrySettings>,
}

/// Complete analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub credentials: Credentials,
    pub endpoints: Endpoints,
    /// Keyed by agent kind name (`fact_check`, `reporter`, ...)
    pub models: BTreeMap<String, ModelBinding>,
    pub limits: Limits,
    pub retry: RetryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            endpoints: Endpoints::default(),
            models: default_models(),
            limits: Limits::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_models() -> BTreeMap<String, ModelBinding> {
    use AgentKind as K;
    use Provider as P;

    [
        (K::Fetcher, ModelBinding::new(P::YouTube, "data_api")),
        (K::SpeakerIdentification, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::Diarizer, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::Transcriber, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::SpeechAggregator, ModelBinding::new(P::Google, "gemini-1.5-flash")),
        (K::Emotion, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::FactCheck, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::Bias, ModelBinding::new(P::Google, "gemini-1.5-pro")),
        (K::Credibility, ModelBinding::new(P::OpenRouter, "anthropic/claude-3.5-sonnet")),
        (K::Communication, ModelBinding::new(P::OpenRouter, "openai/gpt-4o")),
        (K::Reporter, ModelBinding::new(P::OpenRouter, "openai/gpt-4o")),
        (K::Renderer, ModelBinding::new(P::Local, "react_renderer")),
    ]
    .into_iter()
    .map(|(kind, binding)| (kind.name().to_string(), binding))
    .collect()
}

impl AnalysisConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With worker limit
    #[inline]
    #[must_use]
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.limits.worker_threads = workers;
        self
    }

    /// With maximum video length
    #[inline]
    #[must_use]
    pub fn with_max_video_length(mut self, secs: u32) -> Self {
        self.limits.max_video_length_secs = secs;
        self
    }

    /// With a model binding for one agent
    #[must_use]
    pub fn with_model(mut self, kind: AgentKind, binding: ModelBinding) -> Self {
        self.models.insert(kind.name().to_string(), binding);
        self
    }

    /// Load a TOML file over the defaults, then apply the environment
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed, or an
    /// environment override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        tracing::debug!(
            models = config.models.len(),
            workers = config.limits.worker_threads,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse TOML; absent keys keep their defaults
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on malformed TOML and
    /// `ConfigError::Invalid` if validation fails.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text)?;
        for (kind, binding) in default_models() {
            config.models.entry(kind).or_insert(binding);
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply `GOT_*` overrides through a lookup function
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if a numeric override does not parse.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("GOT_GOOGLE_AI_STUDIO_KEY") {
            self.credentials.google_ai_studio_key = key;
        }
        if let Some(key) = lookup("GOT_OPENROUTER_API_KEY") {
            self.credentials.openrouter_api_key = key;
        }
        if let Some(key) = lookup("GOT_YOUTUBE_API_KEY") {
            self.credentials.youtube_api_key = key;
        }
        if let Some(v) = lookup("GOT_MAX_VIDEO_LENGTH") {
            self.limits.max_video_length_secs = parse_env("GOT_MAX_VIDEO_LENGTH", &v)?;
        }
        if let Some(v) = lookup("GOT_WORKER_THREADS") {
            self.limits.worker_threads = parse_env("GOT_WORKER_THREADS", &v)?;
        }
        if let Some(v) = lookup("GOT_STAGE_TIMEOUT_SECS") {
            self.limits.stage_timeout_secs = parse_env("GOT_STAGE_TIMEOUT_SECS", &v)?;
        }
        let rates = &mut self.limits.requests_per_minute;
        for (key, slot) in [
            ("GOT_GOOGLE_AI_STUDIO_RPM", &mut rates.google_ai_studio),
            ("GOT_OPENROUTER_RPM", &mut rates.openrouter),
            ("GOT_YOUTUBE_RPM", &mut rates.youtube),
        ] {
            if let Some(v) = lookup(key) {
                *slot = parse_env(key, &v)?;
            }
        }
        self.validate()
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let settings = std::iter::once(("retry.default".to_string(), &self.retry.default)).chain(
            self.retry
                .stages
                .iter()
                .map(|(stage, s)| (format!("retry.stages.{stage}"), s)),
        );
        for (key, s) in settings {
            if s.max_attempts == 0 {
                return Err(ConfigError::Invalid {
                    key: format!("{key}.max_attempts"),
                    reason: "must be at least 1".to_string(),
                });
            }
            if !(s.multiplier.is_finite() && s.multiplier >= 1.0) {
                return Err(ConfigError::Invalid {
                    key: format!("{key}.multiplier"),
                    reason: "must be a finite number >= 1".to_string(),
                });
            }
        }
        if let Some(unknown) = self
            .models
            .keys()
            .find(|key| !AgentKind::ALL.iter().any(|kind| kind.name() == key.as_str()))
        {
            return Err(ConfigError::Invalid {
                key: format!("models.{unknown}"),
                reason: "not an agent kind".to_string(),
            });
        }
        if self.limits.max_video_length_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "limits.max_video_length_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Credentials the configured providers need but do not have
    #[must_use]
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        self.credentials.missing()
    }

    /// Binding for an agent
    #[must_use]
    pub fn model_for(&self, kind: AgentKind) -> Option<&ModelBinding> {
        self.models.get(kind.name())
    }

    /// Scheduler policy derived from limits and retry settings
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let timeout = (self.limits.stage_timeout_secs > 0)
            .then(|| Duration::from_secs(self.limits.stage_timeout_secs));
        let policy = |settings: &RetrySettings| {
            let base = StagePolicy::default().with_retry(settings.policy());
            match timeout {
                Some(limit) => base.with_timeout(limit),
                None => base,
            }
        };

        let mut config = SchedulerConfig::default().with_default_policy(policy(&self.retry.default));
        for (stage, settings) in &self.retry.stages {
            config = config.with_stage_policy(stage.as_str(), policy(settings));
        }
        if self.limits.worker_threads > 0 {
            config = config.with_max_concurrency(self.limits.worker_threads);
        }
        config
    }

    /// HTTP request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.request_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("not a number: {value}"),
    })
}
