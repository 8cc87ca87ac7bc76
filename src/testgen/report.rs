// src/testgen/report.rs
//
// Per-run report: accepted files, rejected files with reasons, every
// generation attempt and the provider events of the run.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::GenError;
use crate::llm::health::{ProviderEvent, ProviderHealth};
use crate::testgen::file::write_atomic;

pub const REPORT_FILE: &str = "javagen-report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Accepted,
    Rejected,
    /// Rejected on the first pass and superseded by a corrective attempt.
    Retried,
}

/// One generation attempt for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub file: PathBuf,
    pub class_name: String,
    pub provider_id: String,
    pub prompt_hash: String,
    pub status: ValidationStatus,
    pub raw_response_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Template,
    Provider,
    Validation,
    Output,
    Cancelled,
    /// Incremental run with nothing left to cover.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedFile {
    pub file: PathBuf,
    pub output: PathBuf,
    pub provider_id: String,
    pub prompt_hash: String,
    pub corrective_retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub file: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub accepted: Vec<AcceptedFile>,
    pub rejected: Vec<RejectedFile>,
    pub results: Vec<GenerationResult>,
    pub provider_events: Vec<ProviderEvent>,
    pub provider_health: Vec<ProviderHealth>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            accepted: Vec::new(),
            rejected: Vec::new(),
            results: Vec::new(),
            provider_events: Vec::new(),
            provider_health: Vec::new(),
        }
    }

    pub fn is_accepted(&self, file: &Path) -> bool {
        self.accepted.iter().any(|a| a.file == file)
    }

    pub fn rejection(&self, file: &Path) -> Option<&RejectedFile> {
        self.rejected.iter().find(|r| r.file == file)
    }

    pub fn to_json(&self) -> Result<String, GenError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `javagen-report.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, GenError> {
        let path = dir.join(REPORT_FILE);
        write_atomic(&path, &self.to_json()?)?;
        Ok(path)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Report shared between workers.
#[derive(Debug, Default)]
pub struct ReportAccumulator {
    inner: Mutex<RunReport>,
}

impl ReportAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_result(&self, result: GenerationResult) {
        self.lock().results.push(result);
    }

    pub fn accept(&self, entry: AcceptedFile) {
        self.lock().accepted.push(entry);
    }

    pub fn reject(&self, file: &Path, stage: Stage, reason: impl Into<String>) {
        self.lock().rejected.push(RejectedFile {
            file: file.to_path_buf(),
            stage,
            reason: reason.into(),
        });
    }

    /// Close the report. Entries are sorted by file so output is stable
    /// regardless of worker scheduling.
    pub fn finish(self, events: Vec<ProviderEvent>, health: Vec<ProviderHealth>) -> RunReport {
        let mut report = self.inner.into_inner().unwrap_or_else(|e| e.into_inner());
        report.accepted.sort_by(|a, b| a.file.cmp(&b.file));
        report.rejected.sort_by(|a, b| a.file.cmp(&b.file));
        report.results.sort_by(|a, b| a.file.cmp(&b.file));
        report.provider_events = events;
        report.provider_health = health;
        report.finished_at = Some(Utc::now());
        report
    }

    fn lock(&self) -> MutexGuard<'_, RunReport> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
