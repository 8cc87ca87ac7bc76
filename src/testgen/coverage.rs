// src/testgen/coverage.rs
//
// Incremental generation: find the tests a class already has, work out which
// of its methods they do not seem to exercise, and pick the next free
// numbered test class.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::context::extract::extract;
use crate::context::types::{MethodSignature, SourceUnit, TypeKind};
use crate::detectors::language::Language;
use crate::testgen::file::{package_dir, test_class_name, test_class_number};

const TEST_ANNOTATIONS: &[&str] = &["Test", "ParameterizedTest", "RepeatedTest"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingTests {
    /// `CalculatorTest`, `CalculatorTest2`, ...
    pub classes: BTreeSet<String>,
    pub test_methods: BTreeSet<String>,
    /// Methods of the class under test no existing test name points at.
    pub uncovered: BTreeSet<String>,
    pub next_number: u32,
}

impl ExistingTests {
    pub fn test_class_name(&self, class: &str) -> String {
        test_class_name(class, self.next_number)
    }
}

/// Existing tests of `unit`, from the project's test sources and from
/// earlier output under `output_root`. `None` when there are none.
pub fn existing_tests(
    unit: &SourceUnit,
    project_tests: &[&SourceUnit],
    output_root: &Path,
    language: Language,
) -> Option<ExistingTests> {
    let mut found: Vec<(u32, SourceUnit)> = project_tests
        .iter()
        .filter(|t| t.package_name == unit.package_name)
        .filter_map(|t| Some((test_class_number(&t.class_name, &unit.class_name)?, (*t).clone())))
        .collect();
    found.extend(previous_output(unit, output_root, language));

    if found.is_empty() {
        return None;
    }

    let next_number = found.iter().map(|(n, _)| *n).max().unwrap_or(1) + 1;
    let classes = found.iter().map(|(_, t)| t.class_name.clone()).collect();
    let test_methods: BTreeSet<String> = found
        .iter()
        .flat_map(|(_, t)| t.methods.iter().filter(|m| is_test_method(m)))
        .map(|m| m.name.clone())
        .collect();

    let uncovered = unit
        .methods
        .iter()
        .map(|m| m.name.clone())
        .filter(|name| !is_covered(name, &test_methods))
        .collect();

    Some(ExistingTests {
        classes,
        test_methods,
        uncovered,
        next_number,
    })
}

/// Numbered test files already written for `unit`.
fn previous_output(unit: &SourceUnit, output_root: &Path, language: Language) -> Vec<(u32, SourceUnit)> {
    let dir = package_dir(output_root, unit);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(language.extension()) {
            continue;
        }
        let Some(n) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|stem| test_class_number(stem, &unit.class_name))
        else {
            continue;
        };

        match fs::read_to_string(&path).map(|text| extract(&path, &text)) {
            Ok(Ok(test)) => out.push((n, test)),
            Ok(Err(e)) => {
                debug!(file = %path.display(), error = %e, "unparsable earlier test; counted, not read");
                out.push((n, placeholder_unit(&path, n, unit, language)));
            }
            Err(e) => debug!(file = %path.display(), error = %e, "unreadable earlier test"),
        }
    }
    out
}

/// Stand-in for an earlier test file that no longer parses: it still takes
/// its number.
fn placeholder_unit(path: &Path, n: u32, unit: &SourceUnit, language: Language) -> SourceUnit {
    SourceUnit {
        file_path: path.to_path_buf(),
        language,
        package_name: unit.package_name.clone(),
        class_name: test_class_name(&unit.class_name, n),
        kind: TypeKind::Class,
        imports: Vec::new(),
        annotations: BTreeSet::new(),
        constructors: Vec::new(),
        methods: Vec::new(),
        fields: Vec::new(),
    }
}

fn is_test_method(m: &MethodSignature) -> bool {
    m.annotations.iter().any(|a| {
        let simple = a.rsplit('.').next().unwrap_or(a);
        TEST_ANNOTATIONS.contains(&simple)
    })
}

/// Name heuristics: `cancel` is covered by `testCancel`, `cancel_test` or
/// `cancelTwice`, not by `cancelRejectsUnknownId`.
fn is_covered(method: &str, test_methods: &BTreeSet<String>) -> bool {
    let method = method.to_lowercase();
    if method.len() < 3 {
        return false;
    }

    test_methods.iter().flat_map(|t| variations(t)).any(|v| {
        if v.len() < 3 {
            return false;
        }
        if v == method {
            return true;
        }
        if overlaps(&method, &v, 4, 0.4) {
            return true;
        }
        let (m, v) = (method.replace(['_', '-'], ""), v.replace(['_', '-'], ""));
        overlaps(&m, &v, 4, 0.5)
    })
}

fn variations(test: &str) -> Vec<String> {
    let lower = test.to_lowercase();
    let mut out = vec![lower.clone()];
    if let Some(rest) = lower.strip_prefix("test") {
        out.push(rest.trim_start_matches('_').to_string());
    }
    if let Some(rest) = lower.strip_suffix("test") {
        out.push(rest.trim_end_matches('_').to_string());
    }
    out
}

/// One name contains the other and makes up at least `ratio` of it.
fn overlaps(a: &str, b: &str, min_len: usize, ratio: f64) -> bool {
    let contains = |inner: &str, outer: &str| {
        inner.len() >= min_len
            && outer.contains(inner)
            && inner.len() as f64 / outer.len() as f64 >= ratio
    };
    contains(a, b) || contains(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SERVICE: &str = "package shop;\npublic class OrderService {\n    public void placeOrder(String id) {}\n    public int total() { return 0; }\n    public void cancel(String id) {}\n}\n";

    const EXISTING: &str = "package shop;\nimport org.junit.jupiter.api.Test;\nclass OrderServiceTest {\n    @Test\n    void testPlaceOrder() {}\n    @org.junit.jupiter.api.Test\n    void cancel_test() {}\n    void helper() {}\n}\n";

    fn service() -> SourceUnit {
        extract(Path::new("src/main/java/shop/OrderService.java"), SERVICE).unwrap()
    }

    fn existing() -> SourceUnit {
        extract(Path::new("src/test/java/shop/OrderServiceTest.java"), EXISTING).unwrap()
    }

    #[test]
    fn no_existing_tests_means_normal_generation() {
        let dir = tempfile::tempdir().unwrap();
        assert!(existing_tests(&service(), &[], dir.path(), Language::Java).is_none());
    }

    #[test]
    fn project_tests_mark_methods_covered() {
        let dir = tempfile::tempdir().unwrap();
        let test = existing();
        let found = existing_tests(&service(), &[&test], dir.path(), Language::Java).unwrap();

        assert_eq!(found.next_number, 2);
        assert_eq!(found.test_class_name("OrderService"), "OrderServiceTest2");
        assert!(found.test_methods.contains("testPlaceOrder"));
        assert!(!found.test_methods.contains("helper"));
        assert_eq!(found.uncovered, BTreeSet::from(["total".to_string()]));
    }

    #[test]
    fn earlier_output_advances_the_number() {
        let dir = tempfile::tempdir().unwrap();
        let pkg: PathBuf = dir.path().join("shop");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("OrderServiceTest.java"), EXISTING).unwrap();
        fs::write(
            pkg.join("OrderServiceTest2.java"),
            "package shop;\nclass OrderServiceTest2 {\n    @Test\n    void totalIsZero() {}\n}\n",
        )
        .unwrap();
        fs::write(pkg.join("OrderServiceTests.java"), "class OrderServiceTests {}").unwrap();

        let found = existing_tests(&service(), &[], dir.path(), Language::Java).unwrap();
        assert_eq!(found.next_number, 3);
        assert_eq!(found.classes.len(), 2);
        assert!(found.uncovered.is_empty());
    }

    #[test]
    fn other_packages_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let test = extract(
            Path::new("OrderServiceTest.java"),
            "package legacy;\nclass OrderServiceTest { @Test void testTotal() {} }",
        )
        .unwrap();
        assert!(existing_tests(&service(), &[&test], dir.path(), Language::Java).is_none());
    }

    #[test]
    fn short_or_unrelated_names_are_not_coverage() {
        let tests = BTreeSet::from([
            "addsTwoNumbers".to_string(),
            "test_total".to_string(),
            "cancelRejectsUnknownId".to_string(),
        ]);
        assert!(!is_covered("add", &tests));
        assert!(!is_covered("cancel", &tests));
        assert!(is_covered("total", &tests));
        assert!(!is_covered("subtract", &tests));
    }
}
