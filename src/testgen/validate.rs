// src/testgen/validate.rs
//
// Acceptance checks for generated test code. The validator only reads the
// candidate; it never repairs it.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::lexer;
use crate::detectors::framework::TestFramework;
use crate::error::ValidationError;
use crate::llm::prompt::{PromptContext, PLACEHOLDER_TOKENS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptancePolicy {
    pub min_test_methods: usize,
    pub min_assertions: usize,
    /// Reject answers that are not wrapped in a fenced code block.
    pub require_fence: bool,
    pub require_class_reference: bool,
    pub check_imports: bool,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            min_test_methods: 1,
            min_assertions: 1,
            require_fence: false,
            require_class_reference: true,
            check_imports: true,
        }
    }
}

/* ============================================================
   Public API
   ============================================================ */

/// Validate `candidate` and return the code to write.
///
/// Code is the body of the first fenced block, or the whole answer when it
/// has none and the policy allows that.
pub fn validate(
    candidate: &str,
    ctx: &PromptContext<'_>,
    policy: &AcceptancePolicy,
) -> Result<String, ValidationError> {
    let mut reasons = Vec::new();

    let code = match fenced_code(candidate) {
        Some(code) => code.to_string(),
        None => {
            if policy.require_fence {
                reasons.push("response has no fenced code block".to_string());
            }
            candidate.trim().to_string()
        }
    };

    if code.trim().is_empty() {
        reasons.push("response contains no code".to_string());
        return Err(ValidationError { reasons });
    }

    let (masked, comments) = match lexer::lex(&code, ctx.language) {
        Ok(lexed) => (lexed.masked, lexed.comments),
        Err(e) => {
            reasons.push(e.to_string());
            return Err(ValidationError { reasons });
        }
    };

    if let Err(e) = lexer::check_balance(&masked) {
        reasons.push(e.to_string());
    }

    let tests = count_tests(&masked, ctx.framework);
    if tests < policy.min_test_methods {
        reasons.push(format!(
            "found {tests} test methods, need at least {}",
            policy.min_test_methods
        ));
    }

    let assertions = assertion_re().find_iter(&masked).count();
    if assertions < policy.min_assertions {
        reasons.push(format!(
            "found {assertions} assertions or verifications, need at least {}",
            policy.min_assertions
        ));
    }

    for token in leftover_placeholders(&code, &masked, &comments) {
        reasons.push(format!("leftover placeholder '{token}'"));
    }

    let class = &ctx.unit.class_name;
    if policy.require_class_reference && !contains_word(&masked, class) {
        reasons.push(format!("class under test '{class}' is never referenced"));
    }
    if redeclares(&masked, class) {
        reasons.push(format!("redeclares the class under test '{class}'"));
    }

    if policy.check_imports {
        let imports = declared_imports(&masked);
        for missing in missing_imports(&masked, &imports) {
            reasons.push(format!("missing import for {missing}"));
        }
    }

    if reasons.is_empty() {
        Ok(code)
    } else {
        Err(ValidationError { reasons })
    }
}

/// Body of the first fenced code block.
pub fn fenced_code(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end())
}

/* ============================================================
   Checks
   ============================================================ */

fn count_tests(masked: &str, framework: TestFramework) -> usize {
    if framework.uses_junit() {
        junit_test_re().find_iter(masked).count()
    } else {
        kotest_test_re().find_iter(masked).count()
    }
}

/// `TODO`/`FIXME` count in comments or as a Kotlin `TODO()` call; the other
/// markers count anywhere as whole words. Identifiers that merely contain a
/// marker (`Status.TODO`, `DEFAULT_PLACEHOLDER`) are fine.
fn leftover_placeholders(code: &str, masked: &str, comments: &str) -> Vec<String> {
    let mut found: Vec<String> = PLACEHOLDER_TOKENS
        .iter()
        .filter(|t| match **t {
            "TODO" | "FIXME" => contains_word(comments, t) || todo_call_re().is_match(masked),
            _ => contains_word(code, t),
        })
        .map(|t| t.to_string())
        .collect();
    if let Some(m) = template_var_re().find(code) {
        found.push(m.as_str().to_string());
    }
    found.dedup();
    found
}

fn contains_word(masked: &str, word: &str) -> bool {
    masked.match_indices(word).any(|(idx, _)| {
        let before = masked[..idx].chars().next_back();
        let after = masked[idx + word.len()..].chars().next();
        !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char)
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn redeclares(masked: &str, class: &str) -> bool {
    let pattern = format!(
        r"\b(?:class|interface|enum|record|object)\s+{}\b",
        regex::escape(class)
    );
    Regex::new(&pattern).is_ok_and(|re| re.is_match(masked))
}

/// Imports declared by the candidate, `static ` dropped.
fn declared_imports(masked: &str) -> BTreeSet<String> {
    import_re()
        .captures_iter(masked)
        .map(|c| c[1].to_string())
        .collect()
}

/// Well-known test symbols used without an import that provides them.
fn missing_imports(masked: &str, imports: &BTreeSet<String>) -> Vec<&'static str> {
    import_rules()
        .iter()
        .filter(|(usage, _, _)| usage.is_match(masked))
        .filter(|(_, _, provides)| !provides.iter().any(|p| is_imported(p, imports)))
        .map(|(_, symbol, _)| *symbol)
        .collect()
}

/// `a.b.C` is provided by `a.b.C` or `a.b.*`.
fn is_imported(path: &str, imports: &BTreeSet<String>) -> bool {
    if imports.contains(path) {
        return true;
    }
    path.rsplit_once('.')
        .is_some_and(|(parent, _)| imports.contains(&format!("{parent}.*")))
}

/* ============================================================
   Patterns
   ============================================================ */

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("static pattern"))
        }
    };
}

pattern!(junit_test_re, r"@(?:Test|ParameterizedTest|RepeatedTest)\b");
pattern!(kotest_test_re, r#"\b(?:test|should|it|scenario)\s*\(\s*""#);
pattern!(
    assertion_re,
    r"\b(?:assert\w*|verify\w*|coVerify\w*|expect\w*)\s*[({]|\bshould[A-Z]\w*\b"
);
pattern!(template_var_re, r"\{\{\s*[\w.]+\s*\}\}");
pattern!(todo_call_re, r"(?:^|[^.\w])TODO\s*\(");
pattern!(import_re, r"(?m)^\s*import\s+(?:static\s+)?(\w+(?:\.\w+)*(?:\.\*)?)");

/// (usage, symbol shown in reasons, any-of providing imports)
type ImportRule = (Regex, &'static str, &'static [&'static str]);

const IMPORT_RULES: &[(&str, &str, &[&str])] = &[
    (r"@Test\b", "@Test", &["org.junit.jupiter.api.Test", "org.junit.Test"]),
    (r"@BeforeEach\b", "@BeforeEach", &["org.junit.jupiter.api.BeforeEach"]),
    (r"@ExtendWith\b", "@ExtendWith", &["org.junit.jupiter.api.extension.ExtendWith"]),
    (r"\bMockitoExtension\b", "MockitoExtension", &["org.mockito.junit.jupiter.MockitoExtension"]),
    (r"@Mock\b", "@Mock", &["org.mockito.Mock"]),
    (r"@InjectMocks\b", "@InjectMocks", &["org.mockito.InjectMocks"]),
    (r"@MockK\b", "@MockK", &["io.mockk.impl.annotations.MockK"]),
    (r"@InjectMockKs\b", "@InjectMockKs", &["io.mockk.impl.annotations.InjectMockKs"]),
    (r"\bMockKExtension\b", "MockKExtension", &["io.mockk.junit5.MockKExtension"]),
    (
        r"(?:^|[^.\w])assertEquals\s*\(",
        "assertEquals",
        &["org.junit.jupiter.api.Assertions.assertEquals", "kotlin.test.assertEquals"],
    ),
    (
        r"(?:^|[^.\w])assertTrue\s*\(",
        "assertTrue",
        &["org.junit.jupiter.api.Assertions.assertTrue", "kotlin.test.assertTrue"],
    ),
    (
        r"(?:^|[^.\w])assertThrows\s*[(<]",
        "assertThrows",
        &["org.junit.jupiter.api.Assertions.assertThrows", "org.junit.jupiter.api.assertThrows"],
    ),
    (
        r"(?:^|[^.\w])assertThat\s*\(",
        "assertThat",
        &["org.assertj.core.api.Assertions.assertThat", "org.hamcrest.MatcherAssert.assertThat"],
    ),
    (r"(?:^|[^.\w])mockk\s*[(<]", "mockk", &["io.mockk.mockk"]),
    (r"(?:^|[^.\w])every\s*\{", "every", &["io.mockk.every"]),
    (r"\bshouldBe\b", "shouldBe", &["io.kotest.matchers.shouldBe"]),
    (r"\bFunSpec\b", "FunSpec", &["io.kotest.core.spec.style.FunSpec"]),
    (r"(?:^|[^.\w])runTest\s*\{", "runTest", &["kotlinx.coroutines.test.runTest"]),
];

fn import_rules() -> &'static [ImportRule] {
    static RULES: OnceLock<Vec<ImportRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        IMPORT_RULES
            .iter()
            .map(|(usage, symbol, provides)| {
                (Regex::new(usage).expect("static pattern"), *symbol, *provides)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract::extract;
    use crate::context::types::{ImportSet, SourceUnit};
    use crate::detectors::language::Language;
    use std::path::Path;

    fn calculator() -> SourceUnit {
        extract(
            Path::new("Calculator.java"),
            "package math;\npublic class Calculator { public int add(int a, int b) { return a + b; } }",
        )
        .unwrap()
    }

    fn ctx<'a>(unit: &'a SourceUnit, imports: &'a ImportSet) -> PromptContext<'a> {
        PromptContext {
            unit,
            imports,
            framework: TestFramework::Junit5Mockito,
            language: Language::Java,
            max_tokens_hint: 1024,
            source_text: None,
            max_source_chars: 0,
            include_private_methods: true,
            extra_instructions: None,
            existing: None,
        }
    }

    const GOOD: &str = "Here you go:\n```java\npackage math;\n\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass CalculatorTest {\n    @Test\n    void addsTwoNumbers() {\n        assertEquals(5, new Calculator().add(2, 3));\n    }\n}\n```\n";

    #[test]
    fn accepts_well_formed_junit_test() {
        let unit = calculator();
        let imports = ImportSet::default();
        let code = validate(GOOD, &ctx(&unit, &imports), &AcceptancePolicy::default()).unwrap();
        assert!(code.starts_with("package math;"));
        assert!(code.ends_with('}'));
    }

    #[test]
    fn rejects_unbalanced_braces() {
        let unit = calculator();
        let imports = ImportSet::default();
        let broken = GOOD.replace("    }\n}\n```", "    }\n```");
        let err = validate(&broken, &ctx(&unit, &imports), &AcceptancePolicy::default()).unwrap_err();
        assert!(err.reasons.iter().any(|r| r.starts_with("unbalanced '{'")), "{:?}", err.reasons);
    }

    #[test]
    fn reports_every_failed_check() {
        let unit = calculator();
        let imports = ImportSet::default();
        let answer = "```java\nclass Calculator {}\nclass Other { void t() { /* TODO */ } }\n```";
        let err = validate(answer, &ctx(&unit, &imports), &AcceptancePolicy::default()).unwrap_err();
        let joined = err.reasons.join("\n");
        assert!(joined.contains("found 0 test methods"));
        assert!(joined.contains("found 0 assertions"));
        assert!(joined.contains("leftover placeholder 'TODO'"));
        assert!(joined.contains("redeclares the class under test"));
    }

    #[test]
    fn missing_imports_are_named() {
        let unit = calculator();
        let imports = ImportSet::default();
        let answer = GOOD.replace("import org.junit.jupiter.api.Test;\n", "");
        let err = validate(&answer, &ctx(&unit, &imports), &AcceptancePolicy::default()).unwrap_err();
        assert_eq!(err.reasons, vec!["missing import for @Test".to_string()]);

        let lenient = AcceptancePolicy {
            check_imports: false,
            ..AcceptancePolicy::default()
        };
        assert!(validate(&answer, &ctx(&unit, &imports), &lenient).is_ok());
    }

    #[test]
    fn fence_requirement_is_configurable() {
        let unit = calculator();
        let imports = ImportSet::default();
        let bare = fenced_code(GOOD).unwrap().to_string();

        assert!(validate(&bare, &ctx(&unit, &imports), &AcceptancePolicy::default()).is_ok());

        let strict = AcceptancePolicy {
            require_fence: true,
            ..AcceptancePolicy::default()
        };
        let err = validate(&bare, &ctx(&unit, &imports), &strict).unwrap_err();
        assert_eq!(err.reasons, vec!["response has no fenced code block".to_string()]);
    }

    #[test]
    fn kotest_specs_count_test_blocks() {
        let unit = extract(Path::new("Greeter.kt"), "package hi\nclass Greeter { fun greet(n: String) = \"hi $n\" }").unwrap();
        let imports = ImportSet::default();
        let mut c = ctx(&unit, &imports);
        c.framework = TestFramework::Kotest;
        c.language = Language::Kotlin;

        let answer = "```kotlin\npackage hi\n\nimport io.kotest.core.spec.style.FunSpec\nimport io.kotest.matchers.shouldBe\n\nclass GreeterTest : FunSpec({\n    test(\"greets by name\") {\n        Greeter().greet(\"Ann\") shouldBe \"hi Ann\"\n    }\n})\n```";
        assert!(validate(answer, &c, &AcceptancePolicy::default()).is_ok());
    }

    fn placeholders(code: &str, language: Language) -> Vec<String> {
        let lexed = lexer::lex(code, language).unwrap();
        leftover_placeholders(code, &lexed.masked, &lexed.comments)
    }

    #[test]
    fn placeholders_in_templates_are_caught() {
        assert_eq!(placeholders("int x = {{ value }};", Language::Java), vec!["{{ value }}".to_string()]);
        assert!(placeholders("int x = 1;", Language::Java).is_empty());
    }

    #[test]
    fn marker_words_inside_identifiers_are_not_placeholders() {
        let unit = extract(
            Path::new("Task.java"),
            "package work;\npublic class Task { public Status status() { return Status.TODO; } }",
        )
        .unwrap();
        let imports = ImportSet::default();
        let answer = "```java\npackage work;\n\nimport org.junit.jupiter.api.Test;\nimport static org.junit.jupiter.api.Assertions.*;\n\nclass TaskTest {\n    @Test\n    void startsAsTodo() {\n        assertEquals(Status.TODO, new Task().status());\n        assertNotEquals(Status.DEFAULT_PLACEHOLDER, new Task().status());\n    }\n}\n```";

        assert!(validate(answer, &ctx(&unit, &imports), &AcceptancePolicy::default()).is_ok());
    }

    #[test]
    fn todo_comments_and_calls_are_placeholders() {
        assert_eq!(
            placeholders("void t() { // TODO: edge cases\n}", Language::Java),
            vec!["TODO".to_string()]
        );
        assert_eq!(
            placeholders("fun t() { TODO(\"later\") }", Language::Kotlin),
            vec!["TODO".to_string()]
        );
        assert!(placeholders("val s = Status.TODO", Language::Kotlin).is_empty());
        assert_eq!(
            placeholders("int x = YOUR_CODE_HERE;", Language::Java),
            vec!["YOUR_CODE_HERE".to_string()]
        );
    }
}
