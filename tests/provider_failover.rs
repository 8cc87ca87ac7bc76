mod common;

use std::fs;
use std::sync::Arc;

use common::{calculator_file, config, gateway, policy, StubBackend, CALCULATOR_TEST};
use javagen::config::GenConfig;
use javagen::error::ProviderError;
use javagen::llm::health::{probe_all, HealthRegistry, ProviderEventKind};
use javagen::llm::prompt::LlmPrompt;
use javagen::llm::{create_backend, HealthStatus, LlmBackend, Orchestrator, ProviderKind, Selection};
use javagen::testgen::report::Stage;

fn azure_without_credentials() -> Arc<dyn LlmBackend> {
    create_backend(ProviderKind::Azure, &GenConfig::default()).unwrap()
}

#[test]
fn unconfigured_azure_probes_unreachable() {
    let chain = vec![azure_without_credentials()];
    let registry = HealthRegistry::new(chain.iter().map(|b| b.id()));

    let health = probe_all(&chain, &registry);
    assert_eq!(health.len(), 1);
    assert_eq!(health[0].provider_id, "azure");
    assert_eq!(health[0].status, HealthStatus::Unreachable);
    assert_eq!(registry.status("azure"), HealthStatus::Unreachable);
}

#[test]
fn unconfigured_azure_alone_rejects_the_file() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![azure_without_credentials()], policy(2)),
        out.path(),
    );
    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    let rejection = report.rejection(&file.path).unwrap();
    assert_eq!(rejection.stage, Stage::Provider);
    assert!(
        rejection.reason.starts_with("provider unavailable"),
        "{}",
        rejection.reason
    );
    assert!(!out.path().join("math/CalculatorTest.java").exists());
}

#[test]
fn unconfigured_azure_fails_over_to_healthy_stub() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::answering("ollama", CALCULATOR_TEST);

    let gw = gateway(
        vec![azure_without_credentials(), stub.clone() as Arc<dyn LlmBackend>],
        policy(2),
    )
    .with_preferred("azure");
    let orchestrator = Orchestrator::new(config(), gw, out.path());

    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    assert!(report.is_accepted(&file.path), "{:?}", report.rejected);
    assert_eq!(report.accepted[0].provider_id, "ollama");
    assert_eq!(stub.calls(), 1);
    assert!(fs::read_to_string(out.path().join("math/CalculatorTest.java"))
        .unwrap()
        .contains("assertEquals"));

    let kinds: Vec<_> = report
        .provider_events
        .iter()
        .filter(|e| e.provider == "azure")
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&ProviderEventKind::Unreachable), "{kinds:?}");
    let azure = report
        .provider_health
        .iter()
        .find(|h| h.provider_id == "azure")
        .unwrap();
    assert_eq!(azure.status, HealthStatus::Unreachable);
}

#[test]
fn attempts_are_bounded_by_max_retries() {
    for max_retries in 0..4 {
        let stub = StubBackend::new("stub", vec![Err(ProviderError::Timeout { seconds: 1 })]);
        let gw = gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(max_retries));

        let prompt = LlmPrompt {
            system: "s".into(),
            user: "u".into(),
        };
        let err = gw.generate(&prompt, "Calculator.java").unwrap_err();

        assert!(err.is_fatal_for_run(), "{err}");
        assert_eq!(stub.calls(), max_retries + 1);
    }
}

#[test]
fn exhausted_provider_halts_the_rest_of_the_queue() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::new("stub", vec![Err(ProviderError::Timeout { seconds: 1 })]);

    let second = javagen::project::SourceFile::new(
        src.path().join("src/main/java/math/Scaler.java"),
        "package math;\npublic class Scaler { public int twice(int x) { return 2 * x; } }\n",
    )
    .unwrap();
    let files = vec![calculator_file(src.path()), second];

    let mut cfg = config();
    cfg.workers = 1;
    let orchestrator = Orchestrator::new(
        cfg,
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(1)),
        out.path(),
    );
    let report = orchestrator.run(&files, &Selection::All).unwrap();

    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 2);
    assert!(report
        .rejected
        .iter()
        .all(|r| r.stage == Stage::Provider && r.reason.starts_with("provider unavailable")));
    // Only the first file reached the provider.
    assert_eq!(stub.calls(), 2);
    assert!(report
        .provider_events
        .iter()
        .any(|e| e.kind == ProviderEventKind::Exhausted));
}
