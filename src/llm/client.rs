// src/llm/client.rs
//
// Hosted chat backends (Azure OpenAI, Google Gemini) over the blocking
// reqwest client, plus the HTTP error mapping shared with the Ollama adapter.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::{AzureSettings, GoogleSettings};
use crate::error::ProviderError;
use crate::llm::backend::{GenerateOptions, HealthStatus, LlmBackend};
use crate::llm::prompt::LlmPrompt;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/* ============================================================
   Azure OpenAI
   ============================================================ */

#[derive(Debug, Clone)]
struct AzureTarget {
    url: Url,
    /// Read-only models listing used by health checks.
    health_url: Url,
    api_key: String,
}

pub struct AzureOpenAi {
    http: Client,
    target: Option<AzureTarget>,
    temperature: f32,
}

impl AzureOpenAi {
    pub fn new(settings: &AzureSettings, temperature: f32) -> Result<Self, ProviderError> {
        Ok(Self {
            http: http_client()?,
            target: azure_target(settings)?,
            temperature,
        })
    }

    fn send(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured(self.id().into()))?;

        let body = json!({
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user }
            ],
            "max_tokens": opts.max_tokens,
            "temperature": self.temperature,
        });

        let req = self
            .http
            .post(target.url.clone())
            .header("api-key", &target.api_key)
            .json(&body);

        let json = send_json(req, opts.timeout)?;

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ProviderError::InvalidResponse("Azure response has no message content".into()))
    }
}

/// `None` when any required setting is missing.
fn azure_target(settings: &AzureSettings) -> Result<Option<AzureTarget>, ProviderError> {
    let (Some(endpoint), Some(api_key), Some(deployment)) = (
        non_empty(&settings.endpoint),
        non_empty(&settings.api_key),
        non_empty(&settings.deployment),
    ) else {
        return Ok(None);
    };

    let base = parse_base(endpoint)?;
    let versioned = |path: &str| -> Result<Url, ProviderError> {
        let mut url = base
            .join(path)
            .map_err(|e| ProviderError::InvalidRequest(format!("bad Azure endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api-version", &settings.api_version);
        Ok(url)
    };

    Ok(Some(AzureTarget {
        url: versioned(&format!("openai/deployments/{deployment}/chat/completions"))?,
        health_url: versioned("openai/models")?,
        api_key: api_key.to_string(),
    }))
}

impl LlmBackend for AzureOpenAi {
    fn id(&self) -> &str {
        "azure"
    }

    fn health(&self) -> HealthStatus {
        let Some(target) = &self.target else {
            return HealthStatus::Unreachable;
        };
        let req = self
            .http
            .get(target.health_url.clone())
            .header("api-key", &target.api_key);
        probe_status(send_json(req, PROBE_TIMEOUT))
    }

    fn generate(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError> {
        self.send(prompt, opts)
    }
}

/* ============================================================
   Google Gemini
   ============================================================ */

pub struct Gemini {
    http: Client,
    url: Option<Url>,
    /// Model metadata; read-only.
    health_url: Option<Url>,
    temperature: f32,
}

impl Gemini {
    pub fn new(settings: &GoogleSettings, temperature: f32) -> Result<Self, ProviderError> {
        let (url, health_url) = match non_empty(&settings.api_key) {
            None => (None, None),
            Some(key) => {
                let base = parse_base(&settings.base_url)?;
                let keyed = |path: String| -> Result<Url, ProviderError> {
                    let mut url = base
                        .join(&path)
                        .map_err(|e| ProviderError::InvalidRequest(format!("bad Google base url: {e}")))?;
                    url.query_pairs_mut().append_pair("key", key);
                    Ok(url)
                };
                (
                    Some(keyed(format!("v1beta/models/{}:generateContent", settings.model))?),
                    Some(keyed(format!("v1beta/models/{}", settings.model))?),
                )
            }
        };

        Ok(Self {
            http: http_client()?,
            url,
            health_url,
            temperature,
        })
    }

    fn send(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured(self.id().into()))?;

        let body = json!({
            "systemInstruction": { "parts": [ { "text": prompt.system } ] },
            "contents": [
                { "role": "user", "parts": [ { "text": prompt.user } ] }
            ],
            "generationConfig": {
                "maxOutputTokens": opts.max_tokens,
                "temperature": self.temperature,
            }
        });

        let json = send_json(self.http.post(url.clone()).json(&body), opts.timeout)?;
        gemini_text(&json)
    }
}

fn gemini_text(v: &Value) -> Result<String, ProviderError> {
    let parts = v
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("Gemini response has no candidates".into()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text")?.as_str())
        .collect();

    if text.is_empty() {
        return Err(ProviderError::InvalidResponse("Gemini response has no text".into()));
    }
    Ok(text)
}

impl LlmBackend for Gemini {
    fn id(&self) -> &str {
        "google"
    }

    fn health(&self) -> HealthStatus {
        let Some(url) = &self.health_url else {
            return HealthStatus::Unreachable;
        };
        probe_status(send_json(self.http.get(url.clone()), PROBE_TIMEOUT))
    }

    fn generate(&self, prompt: &LlmPrompt, opts: &GenerateOptions) -> Result<String, ProviderError> {
        self.send(prompt, opts)
    }
}

/* ============================================================
   Shared HTTP helpers
   ============================================================ */

pub(crate) fn http_client() -> Result<Client, ProviderError> {
    Client::builder()
        .build()
        .map_err(|e| ProviderError::Transport(e.to_string()))
}

/// Send with a per-attempt timeout and decode a JSON body, mapping failures.
pub(crate) fn send_json(req: RequestBuilder, timeout: Duration) -> Result<Value, ProviderError> {
    let resp = req
        .timeout(timeout)
        .send()
        .map_err(|e| map_transport(e, timeout))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(error_for_status(resp));
    }

    resp.json::<Value>()
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn map_transport(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        ProviderError::Transport(e.to_string())
    }
}

fn error_for_status(resp: Response) -> ProviderError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = resp.text().unwrap_or_default();
    debug!(%status, body = %truncate(&body, 300), "provider returned error status");

    classify_status(status, retry_after, &body)
}

pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> ProviderError {
    let message = format!("{}: {}", status, truncate(body, 200));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after,
            message,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout { seconds: 0 },
        s if s.is_server_error() => ProviderError::ServiceUnavailable(message),
        _ => ProviderError::InvalidRequest(message),
    }
}

/// Map a probe outcome to a health status.
pub(crate) fn probe_status<T>(result: Result<T, ProviderError>) -> HealthStatus {
    match result {
        Ok(_) => HealthStatus::Healthy,
        Err(ProviderError::RateLimited { .. })
        | Err(ProviderError::ServiceUnavailable(_))
        | Err(ProviderError::Timeout { .. })
        | Err(ProviderError::InvalidResponse(_)) => HealthStatus::Degraded,
        Err(_) => HealthStatus::Unreachable,
    }
}

/// Base URL with a trailing slash so `join` appends instead of replacing.
pub(crate) fn parse_base(raw: &str) -> Result<Url, ProviderError> {
    let with_slash = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&with_slash).map_err(|e| ProviderError::InvalidRequest(format!("bad url '{raw}': {e}")))
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
