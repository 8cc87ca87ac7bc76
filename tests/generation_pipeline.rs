mod common;

use std::fs;
use std::sync::Arc;

use common::{
    adder_source, calculator_file, config, gateway, policy, EchoBackend, StubBackend, CALCULATOR_TEST,
};
use javagen::llm::{LlmBackend, Orchestrator, Selection};
use javagen::project::SourceFile;
use javagen::testgen::report::{Stage, ValidationStatus};
use javagen::testgen::REPORT_FILE;

#[test]
fn calculator_test_is_written_under_package_path() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::answering("stub", CALCULATOR_TEST);

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    assert!(report.is_accepted(&file.path), "{:?}", report.rejected);
    assert_eq!(stub.calls(), 1);

    let written = out.path().join("math/CalculatorTest.java");
    let code = fs::read_to_string(&written).unwrap();
    assert!(code.contains("@Test"));
    assert!(code.contains("assertEquals"));
    assert!(code.contains("add("));
    assert!(!code.contains("```"));

    let prompt = &stub.prompts()[0];
    assert!(prompt.user.contains("Calculator"));
    assert!(prompt.user.contains("add"));

    assert_eq!(written_tests(out.path()), vec!["math/CalculatorTest.java"]);

    let json = fs::read_to_string(out.path().join(REPORT_FILE)).unwrap();
    assert!(json.contains("\"accepted\""));
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, ValidationStatus::Accepted);
    assert_eq!(report.results[0].provider_id, "stub");
}

#[test]
fn unbalanced_answers_are_rejected_after_one_corrective_retry() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let broken = CALCULATOR_TEST.replace("    }\n}\n```", "    }\n```");
    let stub = StubBackend::answering("stub", &broken);

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    assert_eq!(stub.calls(), 2);
    let rejection = report.rejection(&file.path).unwrap();
    assert_eq!(rejection.stage, Stage::Validation);
    assert!(rejection.reason.contains("unbalanced"), "{}", rejection.reason);

    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ValidationStatus::Retried, ValidationStatus::Rejected]);

    // The corrective prompt carries the rejection reasons.
    assert!(stub.prompts()[1].user.contains("unbalanced"));
    assert!(!out.path().join("math/CalculatorTest.java").exists());
}

#[test]
fn corrective_retry_can_recover() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::new(
        "stub",
        vec![Ok("I cannot help with that.".into()), Ok(CALCULATOR_TEST.into())],
    );

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    assert!(report.is_accepted(&file.path));
    assert!(report.accepted[0].corrective_retry);
    assert!(out.path().join("math/CalculatorTest.java").exists());
}

#[test]
fn malformed_sources_are_reported_and_tests_are_not_selected() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::answering("stub", CALCULATOR_TEST);

    let broken = SourceFile::new(
        src.path().join("src/main/java/math/Broken.java"),
        "package math;\npublic class Broken { void f() { ",
    )
    .unwrap();
    let existing_test = SourceFile::new(
        src.path().join("src/test/java/math/OldTest.java"),
        "package math;\nclass OldTest {}",
    )
    .unwrap();
    let files = vec![calculator_file(src.path()), broken.clone(), existing_test.clone()];

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let report = orchestrator.run(&files, &Selection::All).unwrap();

    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejection(&broken.path).unwrap().stage, Stage::Extraction);
    assert!(report.rejection(&existing_test.path).is_none());
    assert_eq!(stub.calls(), 1);
}

#[test]
fn cancelled_run_rejects_queued_files() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let stub = StubBackend::answering("stub", CALCULATOR_TEST);

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![stub.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    orchestrator.cancel_token().cancel();

    let file = calculator_file(src.path());
    let report = orchestrator.run(&[file.clone()], &Selection::All).unwrap();

    assert_eq!(report.rejection(&file.path).unwrap().stage, Stage::Cancelled);
    assert_eq!(stub.calls(), 0);
    assert!(out.path().join(REPORT_FILE).exists());
}

/// Test files under `root`, relative and sorted; the report is left out.
fn written_tests(root: &std::path::Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
        .filter(|p| p != REPORT_FILE)
        .collect();
    files.sort();
    files
}

#[test]
fn four_workers_write_one_test_per_source() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let echo = EchoBackend::new();

    let files: Vec<SourceFile> = (0..8)
        .map(|i| {
            let class = format!("Adder{i}");
            SourceFile::new(
                src.path().join(format!("src/main/java/math/{class}.java")),
                adder_source("math", &class),
            )
            .unwrap()
        })
        .collect();

    let mut cfg = config();
    cfg.workers = 4;
    let orchestrator = Orchestrator::new(
        cfg,
        gateway(vec![echo.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let report = orchestrator.run(&files, &Selection::All).unwrap();

    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    assert_eq!(report.accepted.len(), 8);
    assert_eq!(report.results.len(), 8);
    assert_eq!(echo.calls(), 8);
    for f in &files {
        assert!(report.is_accepted(&f.path), "{} not accepted", f.path.display());
    }

    let expected: Vec<String> = (0..8).map(|i| format!("math/Adder{i}Test.java")).collect();
    assert_eq!(written_tests(out.path()), expected);
    assert!(out.path().join(REPORT_FILE).exists());

    let code = fs::read_to_string(out.path().join("math/Adder5Test.java")).unwrap();
    assert!(code.contains("class Adder5Test"));
    assert!(code.contains("new Adder5()"));
}

#[test]
fn sources_sharing_a_class_name_do_not_share_an_output() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let echo = EchoBackend::new();

    let first = SourceFile::new(
        src.path().join("core/src/main/java/util/Helper.java"),
        adder_source("util", "Helper"),
    )
    .unwrap();
    let second = SourceFile::new(
        src.path().join("web/src/main/java/util/Helper.java"),
        adder_source("util", "Helper"),
    )
    .unwrap();

    let orchestrator = Orchestrator::new(
        config(),
        gateway(vec![echo.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let report = orchestrator
        .run(&[first.clone(), second.clone()], &Selection::All)
        .unwrap();

    assert!(report.is_accepted(&first.path));
    let rejection = report.rejection(&second.path).unwrap();
    assert_eq!(rejection.stage, Stage::Output);
    assert!(rejection.reason.contains("already claimed"), "{}", rejection.reason);
    assert!(rejection.reason.contains("core"), "{}", rejection.reason);

    assert_eq!(echo.calls(), 1);
    assert_eq!(written_tests(out.path()), vec!["util/HelperTest.java"]);
}

const CALCULATOR_TWO_OPS: &str = "package math;\n\npublic class Calculator {\n    public int add(int a, int b) { return a + b; }\n    public int subtract(int a, int b) { return a - b; }\n}\n";

fn existing_calculator_test(root: &std::path::Path, methods: &[&str]) -> SourceFile {
    let body: String = methods
        .iter()
        .map(|m| format!("    @Test\n    void {m}() {{ assertTrue(true); }}\n"))
        .collect();
    SourceFile::new(
        root.join("src/test/java/math/CalculatorTest.java"),
        format!("package math;\n\nimport org.junit.jupiter.api.Test;\n\nclass CalculatorTest {{\n{body}}}\n"),
    )
    .unwrap()
}

#[test]
fn incremental_run_targets_uncovered_methods_in_next_class() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let echo = EchoBackend::new();

    let calculator = SourceFile::new(
        src.path().join("src/main/java/math/Calculator.java"),
        CALCULATOR_TWO_OPS,
    )
    .unwrap();
    let existing = existing_calculator_test(src.path(), &["testAdd"]);

    let mut cfg = config();
    cfg.incremental = true;
    let orchestrator = Orchestrator::new(
        cfg,
        gateway(vec![echo.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let report = orchestrator
        .run(&[calculator.clone(), existing], &Selection::All)
        .unwrap();

    assert!(report.is_accepted(&calculator.path), "{:?}", report.rejected);
    assert_eq!(report.accepted[0].output, out.path().join("math/CalculatorTest2.java"));
    assert_eq!(written_tests(out.path()), vec!["math/CalculatorTest2.java"]);

    let prompt = &echo.prompts()[0];
    assert!(prompt.user.contains("Test class: CalculatorTest2"));
    assert!(prompt.user.contains("EXISTING TESTS\nAlready tested by: CalculatorTest\n- testAdd\n"));
    assert!(prompt.user.contains("\"name\": \"subtract\""));
    assert!(!prompt.user.contains("\"name\": \"add\""));

    let code = fs::read_to_string(out.path().join("math/CalculatorTest2.java")).unwrap();
    assert!(code.contains("class CalculatorTest2"));
}

#[test]
fn incremental_run_skips_fully_covered_classes() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let echo = EchoBackend::new();

    let calculator = SourceFile::new(
        src.path().join("src/main/java/math/Calculator.java"),
        CALCULATOR_TWO_OPS,
    )
    .unwrap();
    let existing = existing_calculator_test(src.path(), &["testAdd", "subtract_test"]);

    let mut cfg = config();
    cfg.incremental = true;
    let orchestrator = Orchestrator::new(
        cfg,
        gateway(vec![echo.clone() as Arc<dyn LlmBackend>], policy(0)),
        out.path(),
    );
    let report = orchestrator
        .run(&[calculator.clone(), existing], &Selection::All)
        .unwrap();

    let rejection = report.rejection(&calculator.path).unwrap();
    assert_eq!(rejection.stage, Stage::Skipped);
    assert!(rejection.reason.contains("CalculatorTest"), "{}", rejection.reason);
    assert_eq!(echo.calls(), 0);
    assert!(written_tests(out.path()).is_empty());
}
