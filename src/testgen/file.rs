// src/testgen/file.rs

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::context::types::SourceUnit;
use crate::detectors::language::Language;

/* ============================================================
   Public API
   ============================================================ */

/// `<output_root>/<package path>/<Class>Test.<ext>`
pub fn test_path(output_root: &Path, unit: &SourceUnit, language: Language) -> PathBuf {
    numbered_test_path(output_root, unit, language, 1)
}

/// Like [`test_path`]; numbers above 1 give `<Class>Test<n>.<ext>`.
pub fn numbered_test_path(output_root: &Path, unit: &SourceUnit, language: Language, n: u32) -> PathBuf {
    let mut path = package_dir(output_root, unit);
    path.push(format!("{}.{}", test_class_name(&unit.class_name, n), language.extension()));
    path
}

/// Directory the tests of `unit` are written to.
pub fn package_dir(output_root: &Path, unit: &SourceUnit) -> PathBuf {
    let mut path = output_root.to_path_buf();
    for segment in unit.package_name.split('.').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path
}

/// `CalculatorTest`, `CalculatorTest2`, ...
pub fn test_class_name(class: &str, n: u32) -> String {
    if n <= 1 {
        format!("{class}Test")
    } else {
        format!("{class}Test{n}")
    }
}

/// Inverse of [`test_class_name`]: `Some(n)` when `name` is a test class of `class`.
pub fn test_class_number(name: &str, class: &str) -> Option<u32> {
    let rest = name.strip_prefix(class)?.strip_prefix("Test")?;
    if rest.is_empty() {
        return Some(1);
    }
    if !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse::<u32>().ok().filter(|n| *n >= 2)
}

/// Write `code` next to its final location, then rename it into place.
///
/// Readers never observe a partially written file.
pub fn write_atomic(path: &Path, code: &str) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(code.as_bytes())?;
    if !code.ends_with('\n') {
        tmp.write_all(b"\n")?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/* ============================================================
   Helpers
   ============================================================ */

fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract::extract;

    #[test]
    fn path_follows_package_and_language() {
        let unit = extract(
            Path::new("src/main/java/com/acme/Calculator.java"),
            "package com.acme;\npublic class Calculator {}",
        )
        .unwrap();

        assert_eq!(
            test_path(Path::new("out"), &unit, Language::Java),
            Path::new("out/com/acme/CalculatorTest.java")
        );
        assert_eq!(
            test_path(Path::new("out"), &unit, Language::Kotlin),
            Path::new("out/com/acme/CalculatorTest.kt")
        );
    }

    #[test]
    fn numbered_names_round_trip() {
        let unit = extract(Path::new("Calculator.java"), "package math;\nclass Calculator {}").unwrap();
        assert_eq!(
            numbered_test_path(Path::new("out"), &unit, Language::Java, 3),
            Path::new("out/math/CalculatorTest3.java")
        );
        assert_eq!(test_class_number("CalculatorTest", "Calculator"), Some(1));
        assert_eq!(test_class_number("CalculatorTest12", "Calculator"), Some(12));
        assert_eq!(test_class_number("CalculatorTests", "Calculator"), None);
        assert_eq!(test_class_number("CalculatorTest1", "Calculator"), None);
        assert_eq!(test_class_number("ScientificCalculatorTest", "Calculator"), None);
    }

    #[test]
    fn default_package_lands_in_root() {
        let unit = extract(Path::new("Main.java"), "class Main {}").unwrap();
        assert_eq!(
            test_path(Path::new("out"), &unit, Language::Java),
            Path::new("out/MainTest.java")
        );
    }

    #[test]
    fn atomic_write_creates_dirs_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/ATest.java");

        write_atomic(&path, "class ATest {}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "class ATest {}\n");

        write_atomic(&path, "class ATest { }\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "class ATest { }\n");

        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
