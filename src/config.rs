// src/config.rs
//
// Run configuration. Loaded from TOML; the core never reads the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detectors::framework::TestFramework;
use crate::detectors::language::Language;
use crate::error::ConfigError;
use crate::llm::backend::ProviderKind;
use crate::testgen::validate::AcceptancePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenConfig {
    pub provider: ProviderKind,
    pub fallback_provider: Option<ProviderKind>,

    pub azure: AzureSettings,
    pub google: GoogleSettings,
    pub ollama: OllamaSettings,

    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub retry_backoff_cap_seconds: u64,
    /// Consecutive failures before a provider is marked unreachable.
    /// Defaults to `max_retries`.
    pub failover_threshold: Option<u32>,
    pub request_timeout_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f32,

    pub workers: usize,
    pub health_interval_seconds: u64,

    pub target_language: Option<Language>,
    pub target_framework: Option<TestFramework>,

    pub include_private_methods: bool,
    pub extra_instructions: Option<String>,
    pub max_source_chars: usize,
    /// Keep existing tests: target only uncovered methods and write the
    /// next numbered file (`CalculatorTest2`) instead of replacing.
    pub incremental: bool,

    pub acceptance: AcceptancePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub deployment: Option<String>,
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub host: String,
    pub model: String,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Azure,
            fallback_provider: None,
            azure: AzureSettings::default(),
            google: GoogleSettings::default(),
            ollama: OllamaSettings::default(),
            max_retries: 3,
            retry_delay_seconds: 2,
            retry_backoff_cap_seconds: 30,
            failover_threshold: None,
            request_timeout_seconds: 60,
            max_tokens: 4096,
            temperature: 0.3,
            workers: 4,
            health_interval_seconds: 30,
            target_language: None,
            target_framework: None,
            include_private_methods: true,
            extra_instructions: None,
            max_source_chars: 12_000,
            incremental: false,
            acceptance: AcceptancePolicy::default(),
        }
    }
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: None,
            api_version: "2024-02-01".into(),
        }
    }
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-pro".into(),
            base_url: "https://generativelanguage.googleapis.com".into(),
        }
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "llama2".into(),
        }
    }
}

/* ============================================================
   Public API
   ============================================================ */

impl GenConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let cfg: GenConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Load the default config file if it exists, else built-in defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = config_path();
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be at least 1".into(),
            ));
        }
        if self.fallback_provider == Some(self.provider) {
            return Err(ConfigError::Invalid(format!(
                "fallback_provider must differ from provider ({})",
                self.provider
            )));
        }
        if let (Some(framework), Some(language)) = (self.target_framework, self.target_language) {
            framework
                .ensure_supports(language)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn failover_threshold(&self) -> u32 {
        self.failover_threshold.unwrap_or(self.max_retries)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_seconds)
    }

    /// Providers in configured order: primary, then fallback.
    pub fn provider_chain(&self) -> Vec<ProviderKind> {
        let mut chain = vec![self.provider];
        if let Some(fb) = self.fallback_provider {
            chain.push(fb);
        }
        chain
    }

    /// Test language for a source file; the source language unless overridden.
    pub fn language_for(&self, source: Language) -> Language {
        self.target_language.unwrap_or(source)
    }

    pub fn framework_for(&self, target: Language) -> TestFramework {
        self.target_framework
            .unwrap_or_else(|| TestFramework::default_for(target))
    }
}

/// `<config_dir>/javagen/config.toml`
pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("javagen");
    dir.push("config.toml");
    dir
}
