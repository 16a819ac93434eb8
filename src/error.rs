//! Error types for inbox triage.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Capability error: {0}")]
    Port(#[from] PortError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Mailbox transport errors (IMAP, SMTP, message parsing).
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("IMAP {command} failed: {reason}")]
    Imap { command: String, reason: String },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability-port failures, scoped to one node and one email.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Inbox source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Classification failed: {0}")]
    ClassificationFailed(String),

    #[error("Query construction failed: {0}")]
    QueryConstructionFailed(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Draft failed: {0}")]
    DraftFailed(String),

    #[error("Proofread failed: {0}")]
    ProofreadFailed(String),

    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),
}

impl PortError {
    /// Stable name of the failure kind, recorded on escalated outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::ClassificationFailed(_) => "classification_failed",
            Self::QueryConstructionFailed(_) => "query_construction_failed",
            Self::RetrievalFailed(_) => "retrieval_failed",
            Self::DraftFailed(_) => "draft_failed",
            Self::ProofreadFailed(_) => "proofread_failed",
            Self::DispatchFailed(_) => "dispatch_failed",
        }
    }

    /// Failure detail without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::SourceUnavailable(r)
            | Self::ClassificationFailed(r)
            | Self::QueryConstructionFailed(r)
            | Self::RetrievalFailed(r)
            | Self::DraftFailed(r)
            | Self::ProofreadFailed(r)
            | Self::DispatchFailed(r) => r,
        }
    }
}

/// Run-level failures. Anything scoped to a single email escalates that
/// email instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Run {run_id} aborted, inbox source unavailable: {reason}")]
    SourceUnavailable { run_id: uuid::Uuid, reason: String },

    #[error("Invalid run state at {node}: {reason}")]
    InvalidState { node: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_error_kind_names() {
        assert_eq!(
            PortError::RetrievalFailed("x".into()).kind(),
            "retrieval_failed"
        );
        assert_eq!(
            PortError::SourceUnavailable("x".into()).kind(),
            "source_unavailable"
        );
        assert_eq!(PortError::DispatchFailed("x".into()).kind(), "dispatch_failed");
    }

    #[test]
    fn port_error_reason_strips_prefix() {
        let err = PortError::DraftFailed("timed out after 5s".into());
        assert_eq!(err.reason(), "timed out after 5s");
        assert_eq!(err.to_string(), "Draft failed: timed out after 5s");
    }

    #[test]
    fn port_error_converts_into_top_level() {
        let err: Error = PortError::ProofreadFailed("bad json".into()).into();
        assert!(matches!(err, Error::Port(PortError::ProofreadFailed(_))));
    }
}
