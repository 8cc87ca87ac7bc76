// src/llm/gateway.rs
//
// Provider gateway: selection, bounded retry with backoff, and a single
// failover per call, written as an explicit state machine.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GenConfig;
use crate::error::{ProviderAttempt, ProviderError};
use crate::llm::backend::{GenerateOptions, HealthStatus, LlmBackend};
use crate::llm::health::{HealthRegistry, ProviderEventKind};
use crate::llm::orchestrator::CancelToken;
use crate::llm::prompt::LlmPrompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive failures a provider may accumulate before it is
    /// marked unreachable.
    pub failover_threshold: u32,
}

impl RetryPolicy {
    pub fn from_config(cfg: &GenConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs(cfg.retry_delay_seconds),
            max_delay: Duration::from_secs(cfg.retry_backoff_cap_seconds),
            failover_threshold: cfg.failover_threshold(),
        }
    }

    /// Attempts per provider per call.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based): base × 2^(retry-1), capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Whether a provider with `failures` consecutive failures must be failed over.
    pub fn exceeds_threshold(&self, failures: u32) -> bool {
        failures > self.failover_threshold
    }
}

/// Successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub provider_id: String,
    pub attempts: u32,
}

/// Per-call state. One transition per loop iteration.
#[derive(Debug)]
enum CallState {
    Select,
    Invoke {
        idx: usize,
        attempt: u32,
    },
    Retry {
        idx: usize,
        attempt: u32,
        error: ProviderError,
    },
    Failover {
        idx: usize,
        attempts: u32,
        error: ProviderError,
    },
    Terminal(Result<Generation, ProviderError>),
}

pub struct Gateway {
    backends: Vec<Arc<dyn LlmBackend>>,
    registry: Arc<HealthRegistry>,
    policy: RetryPolicy,
    options: GenerateOptions,
    preferred: Option<String>,
    cancel: CancelToken,
}

/* ============================================================
   Public API
   ============================================================ */

impl Gateway {
    /// `backends` are in configured order: primary first.
    pub fn new(
        backends: Vec<Arc<dyn LlmBackend>>,
        registry: Arc<HealthRegistry>,
        policy: RetryPolicy,
        options: GenerateOptions,
    ) -> Self {
        Self {
            backends,
            registry,
            policy,
            options,
            preferred: None,
            cancel: CancelToken::new(),
        }
    }

    /// Abandon backoff waits once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Try this provider first whenever it is not unreachable.
    pub fn with_preferred(mut self, provider_id: impl Into<String>) -> Self {
        self.preferred = Some(provider_id.into());
        self
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn backends(&self) -> &[Arc<dyn LlmBackend>] {
        &self.backends
    }

    /// Run one call to completion. `subject` labels events (usually the file).
    pub fn generate(&self, prompt: &LlmPrompt, subject: &str) -> Result<Generation, ProviderError> {
        let mut tried: Vec<usize> = Vec::new();
        let mut chain: Vec<ProviderAttempt> = Vec::new();
        let mut state = CallState::Select;

        loop {
            state = match state {
                CallState::Select => match self.select(&tried) {
                    Some(idx) => {
                        tried.push(idx);
                        CallState::Invoke { idx, attempt: 1 }
                    }
                    None => CallState::Terminal(Err(ProviderError::Unavailable(
                        "every configured provider is unreachable".into(),
                    ))),
                },

                CallState::Invoke { idx, attempt } => self.invoke(idx, attempt, prompt, subject),

                CallState::Retry {
                    idx,
                    attempt,
                    error,
                } => {
                    let delay = self
                        .policy
                        .backoff_for(attempt)
                        .max(error.retry_after().unwrap_or(Duration::ZERO))
                        .min(self.policy.max_delay);
                    self.registry.record_event(
                        self.id(idx),
                        ProviderEventKind::Retry,
                        format!("{subject}: attempt {} after {:?}: {error}", attempt + 1, delay),
                    );
                    if self.cancel.sleep(delay) {
                        CallState::Invoke {
                            idx,
                            attempt: attempt + 1,
                        }
                    } else {
                        debug!(provider = self.id(idx), subject, "retry abandoned");
                        CallState::Terminal(Err(ProviderError::Cancelled(self.id(idx).to_string())))
                    }
                }

                CallState::Failover {
                    idx,
                    attempts,
                    error,
                } => {
                    chain.push(ProviderAttempt {
                        provider: self.id(idx).to_string(),
                        attempts,
                        last_error: error.to_string(),
                    });

                    // At most one switch per call.
                    let next = if tried.len() < 2 && !self.cancel.is_cancelled() {
                        self.select(&tried)
                    } else {
                        None
                    };
                    match next {
                        Some(next) => {
                            tried.push(next);
                            self.registry.record_event(
                                self.id(idx),
                                ProviderEventKind::Failover,
                                format!("{subject}: switching to {}", self.id(next)),
                            );
                            CallState::Invoke {
                                idx: next,
                                attempt: 1,
                            }
                        }
                        None => {
                            let err = ProviderError::Exhausted {
                                chain: std::mem::take(&mut chain),
                            };
                            self.registry.record_event(
                                self.id(idx),
                                ProviderEventKind::Exhausted,
                                format!("{subject}: {err}"),
                            );
                            CallState::Terminal(Err(err))
                        }
                    }
                }

                CallState::Terminal(result) => return result,
            };
        }
    }
}

/* ============================================================
   Transitions
   ============================================================ */

impl Gateway {
    fn id(&self, idx: usize) -> &str {
        self.backends[idx].id()
    }

    /// Preferred provider, then healthy, then degraded; unreachable skipped.
    fn select(&self, tried: &[usize]) -> Option<usize> {
        let open: Vec<(usize, HealthStatus)> = (0..self.backends.len())
            .filter(|i| !tried.contains(i))
            .map(|i| (i, self.registry.status(self.id(i))))
            .filter(|(_, status)| *status != HealthStatus::Unreachable)
            .collect();

        if let Some(pref) = &self.preferred {
            if let Some((i, _)) = open.iter().find(|(i, _)| self.id(*i) == pref) {
                return Some(*i);
            }
        }

        open.iter()
            .find(|(_, s)| *s == HealthStatus::Healthy)
            .or_else(|| open.first())
            .map(|(i, _)| *i)
    }

    fn invoke(&self, idx: usize, attempt: u32, prompt: &LlmPrompt, subject: &str) -> CallState {
        let backend = &self.backends[idx];
        let id = backend.id();
        debug!(provider = id, attempt, subject, "invoking provider");

        match backend.generate(prompt, &self.options) {
            Ok(text) => {
                self.registry.record_success(id);
                info!(provider = id, attempt, subject, "generation succeeded");
                CallState::Terminal(Ok(Generation {
                    text,
                    provider_id: id.to_string(),
                    attempts: attempt,
                }))
            }

            Err(error) if error.is_transient() => {
                let status = self.registry.record_failure(
                    id,
                    self.policy.failover_threshold,
                    &error.to_string(),
                );
                warn!(provider = id, attempt, subject, %error, "transient provider failure");

                if status == HealthStatus::Unreachable || attempt >= self.policy.max_attempts() {
                    CallState::Failover {
                        idx,
                        attempts: attempt,
                        error,
                    }
                } else {
                    CallState::Retry {
                        idx,
                        attempt,
                        error,
                    }
                }
            }

            Err(error @ (ProviderError::Authentication(_) | ProviderError::NotConfigured(_))) => {
                self.registry.mark_unreachable(id, &error.to_string());
                warn!(provider = id, subject, %error, "provider rejected credentials");
                CallState::Failover {
                    idx,
                    attempts: attempt,
                    error,
                }
            }

            // Request-specific failure; the provider itself is fine.
            Err(error) => {
                warn!(provider = id, subject, %error, "provider refused request");
                CallState::Terminal(Err(error))
            }
        }
    }
}
