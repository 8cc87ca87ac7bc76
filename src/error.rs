//! Error taxonomy for the generation pipeline.
//!
//! Each stage has its own error type so the orchestrator can decide, per
//! variant, whether the failure is local to one file or fatal for the queue.

use std::path::PathBuf;

use thiserror::Error;

use crate::detectors::framework::TestFramework;
use crate::detectors::language::Language;

/// Malformed or unsupported source. The file is skipped and reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("unsupported source file: {0}")]
    UnsupportedFile(String),

    #[error("no type declaration found")]
    NoTypeDeclaration,

    #[error("unterminated {what} starting at line {line}")]
    Unterminated { what: &'static str, line: usize },

    #[error("unbalanced '{delimiter}' at line {line}")]
    Unbalanced { delimiter: char, line: usize },
}

/// Misconfiguration of the prompt template. Fatal for the file only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("{framework} tests cannot be generated in {language}")]
    UnsupportedCombination {
        framework: TestFramework,
        language: Language,
    },
}

/// One failed provider in a terminal [`ProviderError::Exhausted`] chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Transport, auth or availability failure at the provider boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider '{0}' is not configured: missing credentials")]
    NotConfigured(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<u64>,
        message: String,
    },

    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no provider available: {0}")]
    Unavailable(String),

    #[error("all providers exhausted: {}", format_chain(.chain))]
    Exhausted { chain: Vec<ProviderAttempt> },

    #[error("cancelled while waiting to retry {0}")]
    Cancelled(String),
}

impl ProviderError {
    /// Whether a retry against the same provider can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Transport(_)
                | ProviderError::ServiceUnavailable(_)
        )
    }

    /// Terminal errors after which no backend is left for the rest of the run.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            ProviderError::Exhausted { .. } | ProviderError::Unavailable(_)
        )
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            ProviderError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(std::time::Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

fn format_chain(chain: &[ProviderAttempt]) -> String {
    chain
        .iter()
        .map(|a| format!("{} ({} attempts: {})", a.provider, a.attempts, a.last_error))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Content rejected after the corrective retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("generated test rejected: {}", .reasons.join("; "))]
pub struct ValidationError {
    pub reasons: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Crate-level error for the outer surfaces (CLI, output writing).
#[derive(Debug, Error)]
pub enum GenError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = GenError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Timeout { seconds: 5 }.is_transient());
        assert!(ProviderError::Transport("reset".into()).is_transient());
        assert!(!ProviderError::Authentication("401".into()).is_transient());
        assert!(!ProviderError::NotConfigured("azure".into()).is_transient());
    }

    #[test]
    fn exhausted_chain_lists_every_provider() {
        let err = ProviderError::Exhausted {
            chain: vec![
                ProviderAttempt {
                    provider: "azure".into(),
                    attempts: 4,
                    last_error: "timeout".into(),
                },
                ProviderAttempt {
                    provider: "ollama".into(),
                    attempts: 1,
                    last_error: "connection refused".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("azure (4 attempts: timeout)"));
        assert!(msg.contains("-> ollama"));
        assert!(err.is_fatal_for_run());
    }

    #[test]
    fn rate_limit_exposes_retry_after() {
        let err = ProviderError::RateLimited {
            retry_after: Some(3),
            message: "slow down".into(),
        };
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));
    }
}
