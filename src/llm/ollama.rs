// src/llm/ollama.rs
//
// Local Ollama server over its HTTP API.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use url::Url;

use crate::config::OllamaSettings;
use crate::error::ProviderError;
use crate::llm::backend::{GenerateOptions, HealthStatus, LlmBackend};
use crate::llm::client::{http_client, parse_base, send_json};
use crate::llm::prompt::LlmPrompt;

const TAGS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Ollama {
    http: Client,
    base: Url,
    model: String,
    temperature: f32,
}

impl Ollama {
    pub fn new(settings: &OllamaSettings, temperature: f32) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client()?,
            base: parse_base(&settings.host)?,
            model: settings.model.clone(),
            temperature,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))
    }

    /// Names of locally pulled models.
    fn tags(&self) -> Result<Vec<String>, ProviderError> {
        let url = self.endpoint("api/tags")?;
        let json = send_json(self.http.get(url), TAGS_TIMEOUT)?;
        Ok(model_names(&json))
    }
}

fn model_names(v: &Value) -> Vec<String> {
    v.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name")?.as_str())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

/// `llama2` matches `llama2:latest`.
fn has_model(names: &[String], model: &str) -> bool {
    names
        .iter()
        .any(|n| n == model || n.split(':').next() == Some(model))
}

impl LlmBackend for Ollama {
    fn id(&self) -> &str {
        "ollama"
    }

    fn health(&self) -> HealthStatus {
        match self.tags() {
            Ok(names) if has_model(&names, &self.model) => HealthStatus::Healthy,
            // Server is up but the model still has to be pulled.
            Ok(_) => HealthStatus::Degraded,
            Err(_) => HealthStatus::Unreachable,
        }
    }

    fn generate(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError> {
        let url = self.endpoint("api/generate")?;
        let body = json!({
            "model": self.model,
            "system": prompt.system,
            "prompt": prompt.user,
            "stream": false,
            "options": {
                "num_predict": opts.max_tokens,
                "temperature": self.temperature,
            }
        });

        let json = send_json(self.http.post(url).json(&body), opts.timeout)?;

        if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
            return Err(ProviderError::InvalidResponse(err.to_string()));
        }

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ProviderError::InvalidResponse("Ollama response has no text".into()))
    }
}
