// src/llm/orchestrator.rs
//
// Drives a run: extract every source, resolve imports against the whole
// project, then a pool of workers generates, validates and writes tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::config::GenConfig;
use crate::context::extract::extract;
use crate::context::imports::ImportResolver;
use crate::context::types::SourceUnit;
use crate::error::{ConfigError, GenError, ProviderError};
use crate::llm::backend::{create_chain, GenerateOptions};
use crate::llm::gateway::{Gateway, Generation, RetryPolicy};
use crate::llm::health::{HealthMonitor, HealthRegistry};
use crate::llm::prompt::{build_corrective_prompt, build_prompt, LlmPrompt, PromptContext};
use crate::project::SourceFile;
use crate::testgen::coverage::{existing_tests, ExistingTests};
use crate::testgen::file::{numbered_test_path, test_path, write_atomic};
use crate::testgen::report::{
    AcceptedFile, GenerationResult, ReportAccumulator, RunReport, Stage, ValidationStatus,
};
use crate::testgen::validate::validate;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short ticks. `false` when cancelled first.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(CANCEL_TICK));
        }
    }
}

const CANCEL_TICK: Duration = Duration::from_millis(50);

/// Which source files a run generates tests for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    File(PathBuf),
    /// A package and its subpackages.
    Package(String),
    Patterns(Vec<glob::Pattern>),
}

impl Selection {
    pub fn patterns<S: AsRef<str>>(raw: &[S]) -> Result<Self, ConfigError> {
        raw.iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref())
                    .map_err(|e| ConfigError::Invalid(format!("bad pattern '{}': {e}", p.as_ref())))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Selection::Patterns)
    }

    /// `package` is `None` when the file could not be extracted.
    pub fn matches(&self, file: &SourceFile, package: Option<&str>) -> bool {
        match self {
            Selection::All => true,
            Selection::File(p) => file.path == *p || file.rel_path == *p || file.path.ends_with(p),
            Selection::Package(pkg) => package.is_some_and(|actual| {
                actual == pkg
                    || actual
                        .strip_prefix(pkg.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            }),
            Selection::Patterns(patterns) => patterns.iter().any(|p| {
                p.matches_path(&file.rel_path)
                    || file
                        .rel_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| p.matches(n))
            }),
        }
    }
}

pub struct Orchestrator {
    config: GenConfig,
    gateway: Gateway,
    output_root: PathBuf,
    cancel: CancelToken,
}

/* ============================================================
   Public API
   ============================================================ */

impl Orchestrator {
    pub fn new(config: GenConfig, gateway: Gateway, output_root: impl Into<PathBuf>) -> Self {
        let cancel = CancelToken::new();
        Self {
            config,
            gateway: gateway.with_cancel(cancel.clone()),
            output_root: output_root.into(),
            cancel,
        }
    }

    /// Build the provider chain and gateway the configuration names.
    pub fn from_config(config: GenConfig, output_root: impl Into<PathBuf>) -> Result<Self, GenError> {
        config.validate()?;
        let gateway = build_gateway(&config)?;
        Ok(Self::new(config, gateway, output_root))
    }

    /// Share `token` with the gateway so cancelling also cuts retry waits short.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.gateway = self.gateway.with_cancel(token.clone());
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Run the pipeline over `files` and write the report into the output root.
    ///
    /// Per-file failures end up in the report; only report writing fails the run.
    pub fn run(&self, files: &[SourceFile], selection: &Selection) -> Result<RunReport, GenError> {
        let report = ReportAccumulator::new();

        /* ---------- EXTRACT ---------- */
        let mut units: Vec<SourceUnit> = Vec::new();
        let mut selected: Vec<(usize, &SourceFile)> = Vec::new();
        let mut test_units: Vec<usize> = Vec::new();

        for file in files {
            match extract(&file.path, &file.text) {
                Ok(unit) => {
                    if file.is_test {
                        test_units.push(units.len());
                    } else if selection.matches(file, Some(&unit.package_name)) {
                        selected.push((units.len(), file));
                    }
                    units.push(unit);
                }
                Err(e) => {
                    if !file.is_test && selection.matches(file, None) {
                        warn!(file = %file.path.display(), error = %e, "extraction failed");
                        report.reject(&file.path, Stage::Extraction, e.to_string());
                    } else {
                        debug!(file = %file.path.display(), error = %e, "skipping unparsable source");
                    }
                }
            }
        }

        let resolver = ImportResolver::new(&units);
        let test_units: Vec<&SourceUnit> = test_units.iter().map(|i| &units[*i]).collect();
        let jobs = self.plan(&units, &selected, &test_units, &report);
        info!(
            sources = files.len(),
            units = units.len(),
            selected = selected.len(),
            jobs = jobs.len(),
            "starting generation run"
        );

        /* ---------- GENERATE ---------- */
        let monitor = (self.config.health_interval_seconds > 0).then(|| {
            HealthMonitor::spawn(
                self.gateway.backends().to_vec(),
                self.gateway.registry().clone(),
                self.config.health_interval(),
            )
        });

        let (tx, rx) = crossbeam_channel::unbounded();
        for job in &jobs {
            // Receiver is alive until the scope below ends.
            let _ = tx.send(job);
        }
        drop(tx);

        let worker = Worker {
            config: &self.config,
            gateway: &self.gateway,
            resolver: &resolver,
            report: &report,
            cancel: &self.cancel,
            in_flight: Mutex::new(HashSet::new()),
            halted: Mutex::new(None),
        };

        let workers = self.config.workers.clamp(1, jobs.len().max(1));
        thread::scope(|s| {
            for _ in 0..workers {
                let rx = rx.clone();
                let worker = &worker;
                s.spawn(move || worker.drain(rx));
            }
        });

        if let Some(monitor) = monitor {
            monitor.stop();
        }

        /* ---------- REPORT ---------- */
        let registry = self.gateway.registry();
        let report = report.finish(registry.events(), registry.snapshot());
        let path = report.write_to(&self.output_root)?;
        info!(
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            report = %path.display(),
            "generation run finished"
        );
        Ok(report)
    }

    /// One job per selected unit, each with its own output file. A unit whose
    /// output another unit already claimed is rejected rather than overwriting it.
    fn plan<'u>(
        &self,
        units: &'u [SourceUnit],
        selected: &[(usize, &'u SourceFile)],
        test_units: &[&SourceUnit],
        report: &ReportAccumulator,
    ) -> Vec<Job<'u>> {
        let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
        let mut jobs = Vec::new();

        for &(idx, file) in selected {
            let unit = &units[idx];
            let language = self.config.language_for(unit.language);

            let existing = if self.config.incremental {
                existing_tests(unit, test_units, &self.output_root, language)
            } else {
                None
            };

            let output = match &existing {
                Some(existing) => {
                    if !self.has_targets(unit, existing) {
                        let classes: Vec<&str> = existing.classes.iter().map(String::as_str).collect();
                        info!(file = %file.path.display(), "already covered; skipping");
                        report.reject(
                            &file.path,
                            Stage::Skipped,
                            format!("every method is already covered by {}", classes.join(", ")),
                        );
                        continue;
                    }
                    numbered_test_path(&self.output_root, unit, language, existing.next_number)
                }
                None => test_path(&self.output_root, unit, language),
            };

            if let Some(first) = claimed.get(&output) {
                warn!(file = %file.path.display(), output = %output.display(), "test output already claimed");
                report.reject(
                    &file.path,
                    Stage::Output,
                    format!(
                        "test output {} is already claimed by {}",
                        output.display(),
                        first.display()
                    ),
                );
                continue;
            }
            claimed.insert(output.clone(), file.path.as_path());

            jobs.push(Job {
                unit,
                file,
                output,
                existing,
            });
        }
        jobs
    }

    fn has_targets(&self, unit: &SourceUnit, existing: &ExistingTests) -> bool {
        unit.methods.iter().any(|m| {
            existing.uncovered.contains(&m.name)
                && (self.config.include_private_methods || !m.is_private())
        })
    }
}

/// One unit of work: a source file and where its test goes.
struct Job<'u> {
    unit: &'u SourceUnit,
    file: &'u SourceFile,
    output: PathBuf,
    existing: Option<ExistingTests>,
}

pub fn build_gateway(config: &GenConfig) -> Result<Gateway, GenError> {
    let chain = create_chain(config)?;
    let registry = Arc::new(HealthRegistry::new(chain.iter().map(|b| b.id())));
    let options = GenerateOptions {
        timeout: config.request_timeout(),
        max_tokens: config.max_tokens,
    };
    Ok(Gateway::new(chain, registry, RetryPolicy::from_config(config), options)
        .with_preferred(config.provider.id()))
}

/* ============================================================
   Worker
   ============================================================ */

/// State shared by every worker thread of one run.
struct Worker<'a> {
    config: &'a GenConfig,
    gateway: &'a Gateway,
    resolver: &'a ImportResolver,
    report: &'a ReportAccumulator,
    cancel: &'a CancelToken,
    in_flight: Mutex<HashSet<PathBuf>>,
    /// Set once no provider is left; the rest of the queue is rejected.
    halted: Mutex<Option<String>>,
}

impl Worker<'_> {
    fn drain(&self, rx: Receiver<&Job<'_>>) {
        while let Ok(job) = rx.recv() {
            let file = job.file;
            if self.cancel.is_cancelled() {
                self.report.reject(&file.path, Stage::Cancelled, "run cancelled");
                continue;
            }
            if let Some(reason) = self.halt_reason() {
                self.report
                    .reject(&file.path, Stage::Provider, format!("provider unavailable: {reason}"));
                continue;
            }

            if !self.claim(&file.path) {
                debug!(file = %file.path.display(), "already in flight");
                continue;
            }
            self.process(job);
            self.release(&file.path);
        }
    }

    fn process(&self, job: &Job<'_>) {
        let (unit, file) = (job.unit, job.file);
        let path = &file.path;
        let language = self.config.language_for(unit.language);
        let framework = self.config.framework_for(language);

        let imports = self.resolver.resolve(unit, framework, language);
        for w in &imports.warnings {
            debug!(file = %path.display(), warning = %w, "import resolution");
        }

        let ctx = PromptContext {
            unit,
            imports: &imports,
            framework,
            language,
            max_tokens_hint: self.config.max_tokens,
            source_text: Some(&file.text),
            max_source_chars: self.config.max_source_chars,
            include_private_methods: self.config.include_private_methods,
            extra_instructions: self.config.extra_instructions.as_deref(),
            existing: job.existing.as_ref(),
        };

        let prompt = match build_prompt(&ctx) {
            Ok(p) => p,
            Err(e) => {
                self.report.reject(path, Stage::Template, e.to_string());
                return;
            }
        };

        /* ---------- FIRST PASS ---------- */
        let Some((generation, hash)) = self.call(&prompt, path) else {
            return;
        };

        let first = validate(&generation.text, &ctx, &self.config.acceptance);
        let (code, generation, hash, corrective) = match first {
            Ok(code) => (code, generation, hash, false),
            Err(rejection) => {
                info!(file = %path.display(), reasons = ?rejection.reasons, "first answer rejected; retrying once");
                self.report.record_result(result(
                    unit,
                    &generation,
                    &hash,
                    ValidationStatus::Retried,
                    Some(rejection.to_string()),
                ));

                if self.cancel.is_cancelled() {
                    self.report.reject(path, Stage::Cancelled, "run cancelled");
                    return;
                }

                /* ---------- CORRECTIVE PASS ---------- */
                let corrective = match build_corrective_prompt(&ctx, &generation.text, &rejection.reasons) {
                    Ok(p) => p,
                    Err(e) => {
                        self.report.reject(path, Stage::Template, e.to_string());
                        return;
                    }
                };
                let Some((retry, retry_hash)) = self.call(&corrective, path) else {
                    return;
                };

                match validate(&retry.text, &ctx, &self.config.acceptance) {
                    Ok(code) => (code, retry, retry_hash, true),
                    Err(final_rejection) => {
                        warn!(file = %path.display(), reasons = ?final_rejection.reasons, "generated test rejected");
                        self.report.record_result(result(
                            unit,
                            &retry,
                            &retry_hash,
                            ValidationStatus::Rejected,
                            Some(final_rejection.to_string()),
                        ));
                        self.report
                            .reject(path, Stage::Validation, final_rejection.reasons.join("; "));
                        return;
                    }
                }
            }
        };

        /* ---------- OUTPUT ---------- */
        if self.cancel.is_cancelled() {
            self.report.reject(path, Stage::Cancelled, "run cancelled");
            return;
        }

        let out = job.output.clone();
        if let Err(e) = write_atomic(&out, &code) {
            warn!(file = %path.display(), output = %out.display(), error = %e, "failed to write test");
            self.report.reject(path, Stage::Output, e.to_string());
            return;
        }

        info!(file = %path.display(), output = %out.display(), provider = %generation.provider_id, "test accepted");
        let mut accepted = result(unit, &generation, &hash, ValidationStatus::Accepted, None);
        accepted.code = Some(code);
        self.report.record_result(accepted);
        self.report.accept(AcceptedFile {
            file: path.clone(),
            output: out,
            provider_id: generation.provider_id,
            prompt_hash: hash,
            corrective_retry: corrective,
        });
    }

    /// Gateway call; on failure the file is rejected and `None` returned.
    fn call(&self, prompt: &LlmPrompt, path: &Path) -> Option<(Generation, String)> {
        let subject = path.display().to_string();
        match self.gateway.generate(prompt, &subject) {
            Ok(g) => Some((g, prompt.hash())),
            Err(e) => {
                self.on_provider_error(path, &e);
                None
            }
        }
    }

    fn on_provider_error(&self, path: &Path, error: &ProviderError) {
        if matches!(error, ProviderError::Cancelled(_)) {
            self.report.reject(path, Stage::Cancelled, "run cancelled");
        } else if error.is_fatal_for_run() {
            let mut halted = self.halted.lock().unwrap_or_else(|e| e.into_inner());
            if halted.is_none() {
                warn!(error = %error, "no provider left; halting remaining queue");
                *halted = Some(error.to_string());
            }
            self.report
                .reject(path, Stage::Provider, format!("provider unavailable: {error}"));
        } else {
            self.report.reject(path, Stage::Provider, error.to_string());
        }
    }

    fn halt_reason(&self) -> Option<String> {
        self.halted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn claim(&self, path: &Path) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf())
    }

    fn release(&self, path: &Path) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }
}

fn result(
    unit: &SourceUnit,
    generation: &Generation,
    hash: &str,
    status: ValidationStatus,
    error_detail: Option<String>,
) -> GenerationResult {
    GenerationResult {
        file: unit.file_path.clone(),
        class_name: unit.class_name.clone(),
        provider_id: generation.provider_id.clone(),
        prompt_hash: hash.to_string(),
        status,
        raw_response_text: generation.text.clone(),
        error_detail,
        code: None,
    }
}
