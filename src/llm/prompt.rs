// src/llm/prompt.rs

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::context::types::{ImportSet, MethodSignature, SourceUnit};
use crate::detectors::framework::TestFramework;
use crate::detectors::language::Language;
use crate::error::TemplateError;
use crate::testgen::coverage::ExistingTests;

const PROMPT_ABI_VERSION: &str = "v1-javagen-unit";

/// Markers that must never survive into an accepted test.
pub const PLACEHOLDER_TOKENS: &[&str] = &[
    "TODO",
    "FIXME",
    "<insert",
    "<INSERT",
    "YOUR_CODE_HERE",
    "PLACEHOLDER",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

impl LlmPrompt {
    /// Stable SHA-256 over the prompt ABI version and both parts.
    pub fn hash(&self) -> String {
        let mut h = Sha256::new();
        h.update(PROMPT_ABI_VERSION.as_bytes());
        h.update(self.system.as_bytes());
        h.update([0u8]);
        h.update(self.user.as_bytes());
        hex::encode(h.finalize())
    }
}

/// Everything the builder needs for one source unit.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub unit: &'a SourceUnit,
    pub imports: &'a ImportSet,
    pub framework: TestFramework,
    pub language: Language,
    pub max_tokens_hint: u32,
    pub source_text: Option<&'a str>,
    /// Upper bound on the source listing; longer sources are cut.
    pub max_source_chars: usize,
    pub include_private_methods: bool,
    pub extra_instructions: Option<&'a str>,
    /// Tests the class already has; only its uncovered methods are targeted.
    pub existing: Option<&'a ExistingTests>,
}

impl PromptContext<'_> {
    /// `CalculatorTest`, or `CalculatorTest2` next to existing tests.
    pub fn test_class_name(&self) -> String {
        match self.existing {
            Some(existing) => existing.test_class_name(&self.unit.class_name),
            None => format!("{}Test", self.unit.class_name),
        }
    }

    /// Methods the model is asked to cover.
    pub fn target_methods<'s>(&'s self) -> impl Iterator<Item = &'s MethodSignature> + 's {
        let include_private = self.include_private_methods;
        let existing: Option<&'s ExistingTests> = self.existing;
        self.unit
            .methods
            .iter()
            .filter(move |m| include_private || !m.is_private())
            .filter(move |m| existing.map_or(true, |e| e.uncovered.contains(&m.name)))
    }
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> Result<LlmPrompt, TemplateError> {
    ctx.framework.ensure_supports(ctx.language)?;

    Ok(LlmPrompt {
        system: system_prompt(ctx.framework, ctx.language),
        user: user_prompt(ctx),
    })
}

/// Same prompt plus the reasons the previous answer was rejected.
pub fn build_corrective_prompt(
    ctx: &PromptContext<'_>,
    previous: &str,
    reasons: &[String],
) -> Result<LlmPrompt, TemplateError> {
    let mut prompt = build_prompt(ctx)?;

    prompt.user.push_str("\nPREVIOUS ATTEMPT REJECTED\n");
    for r in reasons {
        prompt.user.push_str(&format!("- {}\n", r));
    }
    prompt.user.push_str("\nRejected answer:\n```\n");
    prompt.user.push_str(previous.trim());
    prompt.user.push_str("\n```\n\nReturn a corrected, complete test file that fixes every problem above.\n");

    Ok(prompt)
}

/* ============================================================
   System prompt
   ============================================================ */

fn system_prompt(framework: TestFramework, language: Language) -> String {
    let mut out = format!(
        "You are an expert {} testing engineer. You write correct, deterministic, \
         compilable unit tests.\n\nRules:\n",
        display_language(language)
    );

    out.push_str(
        "- Test only the class under test; never redeclare or copy it\n\
         - Use the exact constructor and method signatures given\n\
         - Every test method must contain at least one assertion or verification\n\
         - Do not test private methods directly\n\
         - Void methods: assert side effects or verify interactions, never stub a return value\n\
         - No placeholder text, no TODO markers\n",
    );

    out.push_str(&framework_rules(framework, language));
    out
}

fn framework_rules(framework: TestFramework, language: Language) -> String {
    match (framework, language) {
        (TestFramework::Junit5Mockito, Language::Java) => {
            "\nFramework: JUnit 5 with Mockito\n\
             - Annotate every test method with @Test\n\
             - Use `import static org.junit.jupiter.api.Assertions.*;`\n\
             - Mock collaborators with @Mock and inject them with @InjectMocks under \
               @ExtendWith(MockitoExtension.class)\n\
             - Stub void methods with doNothing()/doThrow(), never when(...).thenReturn(...)\n"
                .into()
        }
        (TestFramework::Junit5Mockito, Language::Kotlin) => {
            "\nFramework: JUnit 5 with Mockito, written in Kotlin\n\
             - Annotate every test method with @Test\n\
             - Use `org.junit.jupiter.api.Assertions.*`\n\
             - Use backtick test names only if they describe behaviour\n"
                .into()
        }
        (TestFramework::Junit5Mockk, _) => {
            "\nFramework: JUnit 5 with MockK\n\
             - Annotate every test method with @Test\n\
             - Create mocks with mockk() or @MockK; stub with every { } and check with verify { }\n\
             - Wrap calls to suspend functions in runTest { }\n"
                .into()
        }
        (TestFramework::Kotest, _) => {
            "\nFramework: Kotest FunSpec\n\
             - Extend FunSpec and declare each case with test(\"...\") { }\n\
             - Assert with shouldBe / shouldThrow\n\
             - Use MockK for collaborators\n"
                .into()
        }
    }
}

/* ============================================================
   User prompt
   ============================================================ */

fn user_prompt(ctx: &PromptContext<'_>) -> String {
    let mut out = String::new();

    /* ---------- TARGET ---------- */
    out.push_str("TARGET\n");
    out.push_str(&format!("Class under test: {}\n", ctx.unit.qualified_name()));
    out.push_str(&format!("Test class: {}\n", ctx.test_class_name()));
    if !ctx.unit.package_name.is_empty() {
        out.push_str(&format!("Package: {}\n", ctx.unit.package_name));
    }
    out.push_str(&format!(
        "Language: {}\nFramework: {}\nResponse budget: {} tokens\n\n",
        display_language(ctx.language),
        ctx.framework,
        ctx.max_tokens_hint
    ));

    /* ---------- STRUCTURE ---------- */
    out.push_str("STRUCTURE\n```json\n");
    out.push_str(&format!("{:#}", structural_summary(ctx)));
    out.push_str("\n```\n\n");

    if !ctx.unit.constructors.is_empty() {
        out.push_str("Constructors (use these exact signatures):\n");
        for c in &ctx.unit.constructors {
            out.push_str(&format!("- {}({})\n", ctx.unit.class_name, c.parameter_types.join(", ")));
        }
        out.push('\n');
    }

    /* ---------- IMPORTS ---------- */
    out.push_str("IMPORTS\n");
    if ctx.imports.is_empty() {
        out.push_str("(none detected)\n");
    }
    for import in ctx.imports.iter() {
        out.push_str(&format!("{}\n", import_line(import, ctx.language)));
    }
    if !ctx.imports.unqualified.is_empty() {
        let names: Vec<&str> = ctx.imports.unqualified.iter().map(String::as_str).collect();
        out.push_str(&format!(
            "Unresolved types (qualify only if you are certain): {}\n",
            names.join(", ")
        ));
    }
    out.push('\n');

    /* ---------- SOURCE ---------- */
    if let Some(src) = ctx.source_text {
        if ctx.max_source_chars > 0 {
            out.push_str("SOURCE\n```");
            out.push_str(ctx.language.fence_tag());
            out.push('\n');
            out.push_str(&bounded(src, ctx.max_source_chars));
            out.push_str("\n```\n\n");
        }
    }

    /* ---------- EXISTING TESTS ---------- */
    if let Some(existing) = ctx.existing {
        out.push_str("EXISTING TESTS
");
        let classes: Vec<&str> = existing.classes.iter().map(String::as_str).collect();
        out.push_str(&format!("Already tested by: {}
", classes.join(", ")));
        for name in &existing.test_methods {
            out.push_str(&format!("- {}
", name));
        }
        out.push_str(
            "Do not repeat these tests. Cover only the methods listed in STRUCTURE, \
             in a new class that does not depend on the existing ones.\n\n",
        );
    }

    /* ---------- SCOPE ---------- */
    if !ctx.include_private_methods {
        out.push_str("Do not write tests for private methods.\n\n");
    }

    /* ---------- OUTPUT CONTRACT ---------- */
    out.push_str("OUTPUT\n");
    out.push_str(&format!(
        "- Return exactly one compilable {} file declaring `{}`\n\
         - Put the whole file in a single ```{} fenced code block\n\
         - Include the package declaration and every import the file uses\n\
         - No prose before or after the code block\n",
        display_language(ctx.language),
        ctx.test_class_name(),
        ctx.language.fence_tag()
    ));

    if let Some(extra) = ctx.extra_instructions.map(str::trim).filter(|s| !s.is_empty()) {
        out.push_str("\nADDITIONAL INSTRUCTIONS\n");
        out.push_str(extra);
        out.push('\n');
    }

    out
}

/* ============================================================
   Helpers
   ============================================================ */

/// Deterministic JSON view of the unit. Object keys are sorted by serde_json.
fn structural_summary(ctx: &PromptContext<'_>) -> Value {
    let unit = ctx.unit;
    let methods: Vec<&MethodSignature> = ctx.target_methods().collect();

    json!({
        "package": unit.package_name,
        "class": unit.class_name,
        "kind": unit.kind,
        "language": unit.language,
        "annotations": unit.annotations,
        "constructors": unit.constructors,
        "methods": methods,
        "fields": unit.fields,
    })
}

fn import_line(import: &str, language: Language) -> String {
    match language {
        Language::Java => format!("import {};", import),
        Language::Kotlin => format!("import {}", import),
    }
}

fn display_language(language: Language) -> &'static str {
    match language {
        Language::Java => "Java",
        Language::Kotlin => "Kotlin",
    }
}

/// Cut `src` to at most `max` chars, on a char boundary.
fn bounded(src: &str, max: usize) -> String {
    match src.char_indices().nth(max) {
        None => src.to_string(),
        Some((idx, _)) => format!("{}\n// [truncated]", &src[..idx]),
    }
}
