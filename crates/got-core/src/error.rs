//! Error types for the analysis layer
//!
//! `ServiceError` covers every external call an agent makes and decides
//! how a failure is classified at the kernel boundary. `AnalysisError` is
//! what the orchestrator and binary surface.

use got_kernel::{AgentErrorKind, PipelineError, RunId};
use std::path::PathBuf;

/// Failure talking to an external service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Transport failure (connect, TLS, body read)
    #[error("http error: {0}")]
    Http(String),

    /// Non-success HTTP status
    #[error("service returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// Response did not have the expected shape
    #[error("could not decode response: {0}")]
    Decode(String),

    /// API key absent or still a placeholder
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Referenced media does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider asked us to slow down
    #[error("rate limited by {0}")]
    RateLimited(String),
}

impl ServiceError {
    /// Build a status error, keeping at most 512 bytes of body
    #[must_use]
    pub fn status(status: u16, body: &str) -> Self {
        let mut end = body.len().min(512);
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        Self::Status {
            status,
            body: body[..end].to_string(),
        }
    }

    /// Check if a later attempt might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        AgentErrorKind::from(self.clone()).is_retryable()
    }
}

impl From<ServiceError> for AgentErrorKind {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Status { status, .. } if status >= 500 => Self::Service(err.to_string()),
            ServiceError::Http(_) | ServiceError::RateLimited(_) => Self::Service(err.to_string()),
            ServiceError::Status { .. }
            | ServiceError::MissingCredential(_)
            | ServiceError::NotFound(_) => Self::Rejected(err.to_string()),
            ServiceError::Decode(msg) => Self::Validation(msg),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the schema
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value for {key}: {reason}")]
    Invalid {
        /// Offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Top-level error for analysis runs
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// External service problem outside any stage
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Pipeline construction or run failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// No active run with this id
    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// Errors the user fixes by editing configuration
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Pipeline(err) => err.is_startup(),
            Self::Service(ServiceError::MissingCredential(_)) => true,
            _ => false,
        }
    }
}

/// Result alias for the analysis layer
pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        assert!(ServiceError::status(503, "unavailable").is_retryable());
        assert!(ServiceError::RateLimited("openrouter".into()).is_retryable());
        assert!(ServiceError::Http("connection reset".into()).is_retryable());
    }

    #[test]
    fn client_errors_are_rejections() {
        let kind = AgentErrorKind::from(ServiceError::status(401, "bad key"));
        assert_eq!(kind, AgentErrorKind::Rejected("service returned 401: bad key".into()));
        assert!(!ServiceError::MissingCredential("GOOGLE_AI_STUDIO_KEY".into()).is_retryable());
    }

    #[test]
    fn decode_errors_fail_validation() {
        let kind = AgentErrorKind::from(ServiceError::Decode("no candidates".into()));
        assert_eq!(kind, AgentErrorKind::Validation("no candidates".into()));
    }

    #[test]
    fn status_body_is_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let ServiceError::Status { body, .. } = ServiceError::status(500, &body) else {
            panic!("expected status error");
        };
        assert_eq!(body.len(), 512);
    }

    #[test]
    fn configuration_errors_are_classified() {
        let err = AnalysisError::from(PipelineError::incomplete(["N9".into()]));
        assert!(!err.is_configuration());
        let err = AnalysisError::from(ServiceError::MissingCredential("YOUTUBE_API_KEY".into()));
        assert!(err.is_configuration());
    }
}
