// src/llm/health.rs
//
// Process-wide provider health and the provider event log.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::llm::backend::{HealthStatus, LlmBackend};
use crate::llm::orchestrator::CancelToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
}

impl ProviderHealth {
    fn new(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            last_checked_at: None,
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEventKind {
    Retry,
    Unreachable,
    Failover,
    Recovered,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderEvent {
    pub at: DateTime<Utc>,
    pub provider: String,
    pub kind: ProviderEventKind,
    pub detail: String,
}

#[derive(Debug, Default)]
struct RegistryState {
    health: BTreeMap<String, ProviderHealth>,
    events: Vec<ProviderEvent>,
}

/// Shared by the gateway, the health monitor and the orchestrator.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    state: Mutex<RegistryState>,
}

/* ============================================================
   Public API
   ============================================================ */

impl HealthRegistry {
    pub fn new<'a>(provider_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let health = provider_ids
            .into_iter()
            .map(|id| (id.to_string(), ProviderHealth::new(id)))
            .collect();
        Self {
            state: Mutex::new(RegistryState {
                health,
                events: Vec::new(),
            }),
        }
    }

    pub fn status(&self, provider_id: &str) -> HealthStatus {
        self.lock()
            .health
            .get(provider_id)
            .map(|h| h.status)
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn get(&self, provider_id: &str) -> Option<ProviderHealth> {
        self.lock().health.get(provider_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        self.lock().health.values().cloned().collect()
    }

    /// Successful call: reset failures and mark healthy.
    pub fn record_success(&self, provider_id: &str) {
        let mut state = self.lock();
        let health = entry(&mut state, provider_id);
        let was = health.status;
        health.status = HealthStatus::Healthy;
        health.consecutive_failures = 0;
        health.last_checked_at = Some(Utc::now());

        if was != HealthStatus::Healthy {
            push(&mut state, provider_id, ProviderEventKind::Recovered, "call succeeded");
        }
    }

    /// Failed call. The provider becomes unreachable once its consecutive
    /// failures exceed `threshold`, degraded otherwise.
    pub fn record_failure(&self, provider_id: &str, threshold: u32, error: &str) -> HealthStatus {
        let mut state = self.lock();
        let health = entry(&mut state, provider_id);
        health.consecutive_failures += 1;
        health.last_checked_at = Some(Utc::now());

        let failures = health.consecutive_failures;
        let was = health.status;
        health.status = if failures > threshold {
            HealthStatus::Unreachable
        } else {
            HealthStatus::Degraded
        };
        let now = health.status;

        if now == HealthStatus::Unreachable && was != HealthStatus::Unreachable {
            let detail = format!("{failures} consecutive failures: {error}");
            push(&mut state, provider_id, ProviderEventKind::Unreachable, &detail);
        }
        now
    }

    /// Non-transient failure (bad credentials, missing configuration).
    pub fn mark_unreachable(&self, provider_id: &str, error: &str) {
        let mut state = self.lock();
        let health = entry(&mut state, provider_id);
        health.consecutive_failures += 1;
        health.last_checked_at = Some(Utc::now());
        let was = std::mem::replace(&mut health.status, HealthStatus::Unreachable);

        if was != HealthStatus::Unreachable {
            push(&mut state, provider_id, ProviderEventKind::Unreachable, error);
        }
    }

    /// Result of a periodic probe. A healthy probe clears the failure count.
    pub fn record_probe(&self, provider_id: &str, status: HealthStatus) {
        let mut state = self.lock();
        let health = entry(&mut state, provider_id);
        let was = health.status;
        health.status = status;
        health.last_checked_at = Some(Utc::now());
        if status == HealthStatus::Healthy {
            health.consecutive_failures = 0;
        }

        match (was, status) {
            (HealthStatus::Unreachable, HealthStatus::Healthy | HealthStatus::Degraded) => {
                push(&mut state, provider_id, ProviderEventKind::Recovered, "health probe succeeded");
            }
            (HealthStatus::Healthy | HealthStatus::Degraded, HealthStatus::Unreachable) => {
                push(&mut state, provider_id, ProviderEventKind::Unreachable, "health probe failed");
            }
            _ => {}
        }
    }

    pub fn record_event(&self, provider_id: &str, kind: ProviderEventKind, detail: impl Into<String>) {
        let mut state = self.lock();
        push(&mut state, provider_id, kind, &detail.into());
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Poisoned by a panicking worker; the state is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn entry<'a>(state: &'a mut RegistryState, provider_id: &str) -> &'a mut ProviderHealth {
    state
        .health
        .entry(provider_id.to_string())
        .or_insert_with(|| ProviderHealth::new(provider_id))
}

fn push(state: &mut RegistryState, provider_id: &str, kind: ProviderEventKind, detail: &str) {
    match kind {
        ProviderEventKind::Unreachable | ProviderEventKind::Exhausted => {
            warn!(provider = provider_id, ?kind, detail, "provider event")
        }
        _ => info!(provider = provider_id, ?kind, detail, "provider event"),
    }
    state.events.push(ProviderEvent {
        at: Utc::now(),
        provider: provider_id.to_string(),
        kind,
        detail: detail.to_string(),
    });
}

/* ============================================================
   Probes
   ============================================================ */

/// Probe every backend once and record the results.
pub fn probe_all(backends: &[Arc<dyn LlmBackend>], registry: &HealthRegistry) -> Vec<ProviderHealth> {
    for backend in backends {
        let status = backend.health();
        debug!(provider = backend.id(), ?status, "health probe");
        registry.record_probe(backend.id(), status);
    }
    backends
        .iter()
        .filter_map(|b| registry.get(b.id()))
        .collect()
}

/// Background thread probing providers on a fixed interval.
pub struct HealthMonitor {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    pub fn spawn(
        backends: Vec<Arc<dyn LlmBackend>>,
        registry: Arc<HealthRegistry>,
        interval: Duration,
    ) -> Self {
        let cancel = CancelToken::new();
        let cancel_worker = cancel.clone();

        let handle = thread::spawn(move || {
            while !cancel_worker.is_cancelled() {
                probe_all(&backends, &registry);
                if !cancel_worker.sleep(interval) {
                    break;
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("health monitor thread panicked");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::llm::backend::GenerateOptions;
    use crate::llm::prompt::LlmPrompt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn failures_degrade_then_exceed_threshold() {
        let reg = HealthRegistry::new(["azure"]);
        assert_eq!(reg.record_failure("azure", 2, "timeout"), HealthStatus::Degraded);
        assert_eq!(reg.record_failure("azure", 2, "timeout"), HealthStatus::Degraded);
        assert_eq!(reg.record_failure("azure", 2, "timeout"), HealthStatus::Unreachable);
        assert_eq!(reg.get("azure").unwrap().consecutive_failures, 3);

        let kinds: Vec<_> = reg.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ProviderEventKind::Unreachable]);
    }

    #[test]
    fn success_resets_and_reports_recovery() {
        let reg = HealthRegistry::new(["ollama"]);
        reg.record_failure("ollama", 3, "reset");
        reg.record_success("ollama");

        let h = reg.get("ollama").unwrap();
        assert_eq!(h.status, HealthStatus::Healthy);
        assert_eq!(h.consecutive_failures, 0);
        assert!(h.last_checked_at.is_some());
        assert_eq!(reg.events().last().unwrap().kind, ProviderEventKind::Recovered);
    }

    #[test]
    fn probe_can_revive_unreachable_provider() {
        let reg = HealthRegistry::new(["google"]);
        reg.mark_unreachable("google", "401");
        assert_eq!(reg.status("google"), HealthStatus::Unreachable);

        reg.record_probe("google", HealthStatus::Healthy);
        assert_eq!(reg.status("google"), HealthStatus::Healthy);
        assert_eq!(reg.get("google").unwrap().consecutive_failures, 0);
    }

    struct CountingProbe {
        probes: AtomicUsize,
    }

    impl LlmBackend for CountingProbe {
        fn id(&self) -> &str {
            "stub"
        }

        fn health(&self) -> HealthStatus {
            self.probes.fetch_add(1, Ordering::SeqCst);
            HealthStatus::Degraded
        }

        fn generate(&self, _: &LlmPrompt, _: &GenerateOptions) -> Result<String, ProviderError> {
            Err(ProviderError::Unavailable("probe only".into()))
        }
    }

    #[test]
    fn monitor_probes_until_stopped() {
        let backend = Arc::new(CountingProbe {
            probes: AtomicUsize::new(0),
        });
        let registry = Arc::new(HealthRegistry::new(["stub"]));
        let monitor = HealthMonitor::spawn(
            vec![backend.clone() as Arc<dyn LlmBackend>],
            registry.clone(),
            Duration::from_millis(10),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while backend.probes.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        monitor.stop();

        let seen = backend.probes.load(Ordering::SeqCst);
        assert!(seen >= 2);
        assert_eq!(registry.status("stub"), HealthStatus::Degraded);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(backend.probes.load(Ordering::SeqCst), seen);
    }
}
