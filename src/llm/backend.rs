// src/llm/backend.rs
//
// Provider boundary. Every LLM backend implements `LlmBackend`; the factory
// picks the adapter for a configured provider.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GenConfig;
use crate::error::ProviderError;
use crate::llm::client::{AzureOpenAi, Gemini};
use crate::llm::ollama::Ollama;
use crate::llm::prompt::LlmPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    pub timeout: Duration,
    pub max_tokens: u32,
}

pub trait LlmBackend: Send + Sync {
    /// Stable identifier used in health records and reports.
    fn id(&self) -> &str;

    /// Read-only probe. Never mutates shared state.
    fn health(&self) -> HealthStatus;

    fn generate(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "azure", alias = "azure_openai")]
    Azure,
    #[serde(rename = "google", alias = "gemini")]
    Google,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderKind {
    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Azure => "azure",
            ProviderKind::Google => "google",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "azure" | "azure_openai" | "azure-openai" => Some(ProviderKind::Azure),
            "google" | "gemini" => Some(ProviderKind::Google),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Build the adapter for `kind`.
///
/// Missing credentials still produce an adapter; it reports `Unreachable`
/// and fails every `generate` with `ProviderError::NotConfigured`.
pub fn create_backend(
    kind: ProviderKind,
    cfg: &GenConfig,
) -> Result<Arc<dyn LlmBackend>, ProviderError> {
    let backend: Arc<dyn LlmBackend> = match kind {
        ProviderKind::Azure => Arc::new(AzureOpenAi::new(&cfg.azure, cfg.temperature)?),
        ProviderKind::Google => Arc::new(Gemini::new(&cfg.google, cfg.temperature)?),
        ProviderKind::Ollama => Arc::new(Ollama::new(&cfg.ollama, cfg.temperature)?),
    };
    Ok(backend)
}

/// Adapters for the configured chain, primary first.
pub fn create_chain(cfg: &GenConfig) -> Result<Vec<Arc<dyn LlmBackend>>, ProviderError> {
    cfg.provider_chain()
        .into_iter()
        .map(|kind| create_backend(kind, cfg))
        .collect()
}
