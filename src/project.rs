// src/project.rs
//
// Project scanning: every `.java` / `.kt` file under a root, in path order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::detectors::language::Language;

const SKIP_DIRS: &[&str] = &[
    ".git",
    ".gradle",
    ".idea",
    ".mvn",
    "build",
    "target",
    "out",
    "node_modules",
    ".kotlin",
    "generated-tests",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the scanned root.
    pub rel_path: PathBuf,
    pub language: Language,
    pub text: String,
    /// Existing tests are used for type resolution but never selected.
    pub is_test: bool,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Option<Self> {
        let path = path.into();
        let language = Language::from_path(&path)?;
        let is_test = is_test_source(&path);
        Some(Self {
            rel_path: path.clone(),
            path,
            language,
            text: text.into(),
            is_test,
        })
    }
}

pub fn scan_project(root: &Path) -> Vec<SourceFile> {
    scan_project_excluding(root, None)
}

/// Like [`scan_project`], also leaving out `output` (a generated-test root
/// inside the project) so earlier output is never picked up as source.
pub fn scan_project_excluding(root: &Path, output: Option<&Path>) -> Vec<SourceFile> {
    let output = output.and_then(|p| fs::canonicalize(p).ok());
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e) && !is_output_dir(e, output.as_deref()))
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(language) = Language::from_path(path) else {
            continue;
        };

        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable source");
                continue;
            }
        };

        let rel_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        files.push(SourceFile {
            path: path.to_path_buf(),
            is_test: is_test_source(&rel_path),
            rel_path,
            language,
            text,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), files = files.len(), "scanned project");
    files
}

/// Under `src/test/` (or any `test`/`androidTest` source set), or named
/// `*Test`, `*Tests`, `*Spec` or `*IT`.
pub fn is_test_source(path: &Path) -> bool {
    let in_test_tree = path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("test" | "androidTest" | "testFixtures" | "integrationTest")
        )
    });

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let test_name = ["Test", "Tests", "Spec", "IT"]
        .iter()
        .any(|suffix| stem.len() > suffix.len() && stem.ends_with(suffix));

    in_test_tree || test_name
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn is_output_dir(entry: &DirEntry, output: Option<&Path>) -> bool {
    let Some(output) = output else {
        return false;
    };
    entry.file_type().is_dir()
        && fs::canonicalize(entry.path()).is_ok_and(|p| p == output)
}
