#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use javagen::config::GenConfig;
use javagen::error::ProviderError;
use javagen::llm::gateway::{Gateway, RetryPolicy};
use javagen::llm::health::HealthRegistry;
use javagen::llm::prompt::LlmPrompt;
use javagen::llm::{GenerateOptions, HealthStatus, LlmBackend};
use javagen::project::SourceFile;

pub const CALCULATOR: &str = "package math;\n\npublic class Calculator {\n    public int add(int a, int b) {\n        return a + b;\n    }\n}\n";

pub const CALCULATOR_TEST: &str = "```java\npackage math;\n\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass CalculatorTest {\n    @Test\n    void addsTwoNumbers() {\n        assertEquals(5, new Calculator().add(2, 3));\n    }\n}\n```\n";

/// Backend that replays a script, repeating the last entry.
pub struct StubBackend {
    id: &'static str,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicU32,
    prompts: Mutex<Vec<LlmPrompt>>,
}

impl StubBackend {
    pub fn new(id: &'static str, script: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(id: &'static str, text: &str) -> Arc<Self> {
        Self::new(id, vec![Ok(text.to_string())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<LlmPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmBackend for StubBackend {
    fn id(&self) -> &str {
        self.id
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn generate(&self, prompt: &LlmPrompt, _: &GenerateOptions) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

/// Answers every prompt with a passing JUnit test for the class it names.
#[derive(Default)]
pub struct EchoBackend {
    calls: AtomicU32,
    prompts: Mutex<Vec<LlmPrompt>>,
}

impl EchoBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<LlmPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmBackend for EchoBackend {
    fn id(&self) -> &str {
        "echo"
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Healthy
    }

    fn generate(&self, prompt: &LlmPrompt, _: &GenerateOptions) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());

        let line = |prefix: &str| {
            prompt
                .user
                .lines()
                .find_map(|l| l.strip_prefix(prefix))
                .unwrap()
                .to_string()
        };
        let qualified = line("Class under test: ");
        let (package, class) = qualified.rsplit_once('.').unwrap();
        let test_class = line("Test class: ");

        Ok(format!(
            "```java\npackage {package};\n\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass {test_class} {{\n    @Test\n    void addsTwoNumbers() {{\n        assertEquals(5, new {class}().add(2, 3));\n    }}\n}}\n```\n"
        ))
    }
}

/// `package {package}; public class {class}` with an `add` method.
pub fn adder_source(package: &str, class: &str) -> String {
    format!(
        "package {package};\n\npublic class {class} {{\n    public int add(int a, int b) {{\n        return a + b;\n    }}\n}}\n"
    )
}

pub fn config() -> GenConfig {
    GenConfig {
        health_interval_seconds: 0,
        workers: 2,
        ..GenConfig::default()
    }
}

pub fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        failover_threshold: max_retries,
    }
}

pub fn gateway(backends: Vec<Arc<dyn LlmBackend>>, policy: RetryPolicy) -> Gateway {
    let registry = Arc::new(HealthRegistry::new(backends.iter().map(|b| b.id())));
    Gateway::new(
        backends,
        registry,
        policy,
        GenerateOptions {
            timeout: Duration::from_secs(1),
            max_tokens: 256,
        },
    )
}

pub fn calculator_file(root: &Path) -> SourceFile {
    SourceFile::new(root.join("src/main/java/math/Calculator.java"), CALCULATOR).unwrap()
}
