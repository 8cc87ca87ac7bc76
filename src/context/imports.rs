// src/context/imports.rs
//
// Import resolution for generated tests.
//
// Order of resolution for every referenced simple type name:
//   1. explicit import in the source file
//   2. a class declared elsewhere in the project
//   3. known standard library types
//   4. left unqualified, with a warning
// Framework test-support imports are added from a static rule table.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use super::types::{ImportCategory, ImportSet, SourceUnit};
use crate::detectors::framework::TestFramework;
use crate::detectors::language::Language;

/* ============================================================
   Project index
   ============================================================ */

/// Simple name → fully-qualified names of every type declared in the project.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    by_simple: BTreeMap<String, BTreeSet<String>>,
}

impl ProjectIndex {
    pub fn build<'a>(units: impl IntoIterator<Item = &'a SourceUnit>) -> Self {
        let mut by_simple: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for unit in units {
            by_simple
                .entry(unit.class_name.clone())
                .or_default()
                .insert(unit.qualified_name());
        }
        Self { by_simple }
    }

    pub fn candidates(&self, simple: &str) -> Option<&BTreeSet<String>> {
        self.by_simple.get(simple)
    }

    pub fn contains_qualified(&self, qualified: &str) -> bool {
        let simple = qualified.rsplit('.').next().unwrap_or(qualified);
        self.by_simple
            .get(simple)
            .is_some_and(|set| set.contains(qualified))
    }
}

/* ============================================================
   Public API
   ============================================================ */

/// Resolves the imports a test for `unit` needs, against a fixed project snapshot.
pub struct ImportResolver {
    index: ProjectIndex,
}

impl ImportResolver {
    pub fn new<'a>(units: impl IntoIterator<Item = &'a SourceUnit>) -> Self {
        Self {
            index: ProjectIndex::build(units),
        }
    }

    pub fn index(&self) -> &ProjectIndex {
        &self.index
    }

    pub fn resolve(
        &self,
        unit: &SourceUnit,
        framework: TestFramework,
        target: Language,
    ) -> ImportSet {
        let mut set = ImportSet::default();

        let mut seen = BTreeSet::new();
        for ty in unit.referenced_types() {
            for name in type_names(ty) {
                if seen.insert(name.to_string()) {
                    self.resolve_name(unit, name, &mut set);
                }
            }
        }

        for import in support_imports(unit, framework, target, self.has_collaborators(unit)) {
            let category = classify(&import);
            set.insert(category, import);
        }

        set
    }

    fn resolve_name(&self, unit: &SourceUnit, name: &str, set: &mut ImportSet) {
        // Already qualified in the signature.
        if name.contains('.') {
            let category = if self.index.contains_qualified(name) {
                ImportCategory::Project
            } else {
                classify(name)
            };
            set.insert(category, name);
            return;
        }

        if name == unit.class_name || unit.language.is_builtin_type(name) {
            return;
        }

        let suffix = format!(".{name}");
        if let Some(explicit) = unit
            .imports
            .iter()
            .find(|i| !i.starts_with("static ") && i.ends_with(&suffix))
        {
            let category = if self.index.contains_qualified(explicit) {
                ImportCategory::Project
            } else {
                classify(explicit)
            };
            set.insert(category, explicit.clone());
            return;
        }

        if let Some(candidates) = self.index.candidates(name) {
            let own = unit.qualified_name();
            let mut options = candidates.iter().filter(|q| **q != own);

            let same_package = format!("{}.{name}", unit.package_name);
            let wildcard = candidates.iter().find(|q| {
                unit.imports
                    .iter()
                    .any(|i| i.strip_suffix(".*").is_some_and(|pkg| **q == format!("{pkg}.{name}")))
            });

            let chosen = wildcard
                .or_else(|| candidates.get(&same_package))
                .or_else(|| options.next());

            if let Some(chosen) = chosen {
                if candidates.len() > 1 {
                    let others: Vec<&str> = candidates
                        .iter()
                        .filter(|q| *q != chosen)
                        .map(String::as_str)
                        .collect();
                    set.warnings.push(format!(
                        "ambiguous type '{name}': chose {chosen} over {}",
                        others.join(", ")
                    ));
                }
                set.insert(ImportCategory::Project, chosen.clone());
                return;
            }
        }

        if let Some(qualified) = stdlib_type(name) {
            set.insert(ImportCategory::StdLib, qualified);
            return;
        }

        if set.unqualified.insert(name.to_string()) {
            set.warnings
                .push(format!("unresolved type '{name}' left unqualified"));
        }
    }

    /// Whether the unit takes project types through its constructors or
    /// fields, i.e. has something worth mocking.
    fn has_collaborators(&self, unit: &SourceUnit) -> bool {
        let ctor_types = unit.constructors.iter().flat_map(|c| c.parameter_types.iter());
        let field_types = unit.fields.iter().map(|f| &f.field_type);
        ctor_types
            .chain(field_types)
            .flat_map(|t| type_names(t))
            .any(|n| n != unit.class_name && self.index.candidates(n).is_some())
    }
}

/// Convenience wrapper over a one-off resolver.
pub fn resolve_imports(
    unit: &SourceUnit,
    project: &[SourceUnit],
    framework: TestFramework,
    target: Language,
) -> ImportSet {
    ImportResolver::new(project).resolve(unit, framework, target)
}

/* ============================================================
   Framework support rules
   ============================================================ */

struct SupportRule {
    /// Annotation names that trigger the rule; empty means "always".
    triggers: &'static [&'static str],
    framework: TestFramework,
    imports: &'static [&'static str],
}

const DI_MARKERS: &[&str] = &[
    "Service",
    "Component",
    "Repository",
    "Controller",
    "RestController",
    "Autowired",
    "Inject",
    "Named",
    "Singleton",
    "Configuration",
];

const ENTITY_MARKERS: &[&str] = &["Entity", "Table", "Document", "Embeddable", "MappedSuperclass"];

const WEB_MARKERS: &[&str] = &[
    "RestController",
    "Controller",
    "RequestMapping",
    "GetMapping",
    "PostMapping",
    "PutMapping",
    "DeleteMapping",
];

// Imports are written in Java form; `static ` is dropped for Kotlin targets.
const SUPPORT_RULES: &[SupportRule] = &[
    SupportRule {
        triggers: &[],
        framework: TestFramework::Junit5Mockito,
        imports: &[
            "org.junit.jupiter.api.Test",
            "static org.junit.jupiter.api.Assertions.*",
        ],
    },
    SupportRule {
        triggers: DI_MARKERS,
        framework: TestFramework::Junit5Mockito,
        imports: &[
            "org.junit.jupiter.api.extension.ExtendWith",
            "org.mockito.InjectMocks",
            "org.mockito.Mock",
            "org.mockito.junit.jupiter.MockitoExtension",
            "static org.mockito.Mockito.*",
        ],
    },
    SupportRule {
        triggers: &[],
        framework: TestFramework::Junit5Mockk,
        imports: &[
            "org.junit.jupiter.api.Test",
            "static org.junit.jupiter.api.Assertions.*",
            "io.mockk.every",
            "io.mockk.mockk",
            "io.mockk.verify",
        ],
    },
    SupportRule {
        triggers: DI_MARKERS,
        framework: TestFramework::Junit5Mockk,
        imports: &[
            "org.junit.jupiter.api.extension.ExtendWith",
            "io.mockk.impl.annotations.InjectMockKs",
            "io.mockk.impl.annotations.MockK",
            "io.mockk.junit5.MockKExtension",
        ],
    },
    SupportRule {
        triggers: &[],
        framework: TestFramework::Kotest,
        imports: &[
            "io.kotest.core.spec.style.FunSpec",
            "io.kotest.matchers.shouldBe",
        ],
    },
    SupportRule {
        triggers: DI_MARKERS,
        framework: TestFramework::Kotest,
        imports: &["io.mockk.every", "io.mockk.mockk", "io.mockk.verify"],
    },
    SupportRule {
        triggers: ENTITY_MARKERS,
        framework: TestFramework::Junit5Mockito,
        imports: &["org.junit.jupiter.api.BeforeEach"],
    },
    SupportRule {
        triggers: ENTITY_MARKERS,
        framework: TestFramework::Junit5Mockk,
        imports: &["org.junit.jupiter.api.BeforeEach"],
    },
    SupportRule {
        triggers: ENTITY_MARKERS,
        framework: TestFramework::Kotest,
        imports: &["io.kotest.matchers.nulls.shouldNotBeNull"],
    },
    SupportRule {
        triggers: WEB_MARKERS,
        framework: TestFramework::Junit5Mockito,
        imports: &[
            "org.springframework.http.HttpStatus",
            "org.springframework.http.ResponseEntity",
        ],
    },
    SupportRule {
        triggers: WEB_MARKERS,
        framework: TestFramework::Junit5Mockk,
        imports: &[
            "org.springframework.http.HttpStatus",
            "org.springframework.http.ResponseEntity",
        ],
    },
];

fn support_imports(
    unit: &SourceUnit,
    framework: TestFramework,
    target: Language,
    has_collaborators: bool,
) -> Vec<String> {
    let annotations = unit.all_annotations();
    let mut out: Vec<&str> = Vec::new();

    for rule in SUPPORT_RULES.iter().filter(|r| r.framework == framework) {
        let triggered = rule.triggers.is_empty()
            || rule.triggers.iter().any(|t| annotations.contains(t))
            // Constructor-injected collaborators get the mocking setup too.
            || (has_collaborators && rule.triggers == DI_MARKERS);
        if triggered {
            out.extend(rule.imports);
        }
    }

    let throws = unit.methods.iter().any(|m| !m.throws_types.is_empty());
    if throws && framework == TestFramework::Kotest {
        out.push("io.kotest.assertions.throwables.shouldThrow");
    }
    if unit.has_suspend_methods() && target == Language::Kotlin {
        out.push("kotlinx.coroutines.test.runTest");
    }

    out.into_iter()
        .map(|i| match (target, i.strip_prefix("static ")) {
            (Language::Kotlin, Some(member)) => member.to_string(),
            _ => i.to_string(),
        })
        .collect()
}

/* ============================================================
   Helpers
   ============================================================ */

/// Category for an import that is not part of the project.
pub fn classify(import: &str) -> ImportCategory {
    let name = import.strip_prefix("static ").unwrap_or(import);
    if ["java.", "javax.", "kotlin."]
        .iter()
        .any(|p| name.starts_with(p))
    {
        ImportCategory::StdLib
    } else {
        ImportCategory::Framework
    }
}

/// Candidate type names inside a type string (`Map<String, List<Foo>>`).
///
/// Lower-case words are keywords, primitives or packages and are skipped.
fn type_names(ty: &str) -> impl Iterator<Item = &str> {
    type_token_re()
        .find_iter(ty)
        .map(|m| m.as_str())
        .filter(|t| {
            let last = t.rsplit('.').next().unwrap_or(t);
            last.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        })
}

fn stdlib_type(name: &str) -> Option<&'static str> {
    STDLIB_TYPES
        .iter()
        .find(|(simple, _)| *simple == name)
        .map(|(_, q)| *q)
}

fn type_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*").expect("static pattern")
    })
}

const STDLIB_TYPES: &[(&str, &str)] = &[
    ("ArrayList", "java.util.ArrayList"),
    ("Arrays", "java.util.Arrays"),
    ("BigDecimal", "java.math.BigDecimal"),
    ("BigInteger", "java.math.BigInteger"),
    ("BiFunction", "java.util.function.BiFunction"),
    ("Clock", "java.time.Clock"),
    ("Collection", "java.util.Collection"),
    ("Collections", "java.util.Collections"),
    ("Collectors", "java.util.stream.Collectors"),
    ("CompletableFuture", "java.util.concurrent.CompletableFuture"),
    ("ConcurrentHashMap", "java.util.concurrent.ConcurrentHashMap"),
    ("Consumer", "java.util.function.Consumer"),
    ("Date", "java.util.Date"),
    ("Deque", "java.util.Deque"),
    ("Duration", "java.time.Duration"),
    ("ExecutorService", "java.util.concurrent.ExecutorService"),
    ("File", "java.io.File"),
    ("Files", "java.nio.file.Files"),
    ("Function", "java.util.function.Function"),
    ("Future", "java.util.concurrent.Future"),
    ("HashMap", "java.util.HashMap"),
    ("HashSet", "java.util.HashSet"),
    ("IOException", "java.io.IOException"),
    ("InputStream", "java.io.InputStream"),
    ("Instant", "java.time.Instant"),
    ("Iterator", "java.util.Iterator"),
    ("LinkedList", "java.util.LinkedList"),
    ("List", "java.util.List"),
    ("LocalDate", "java.time.LocalDate"),
    ("LocalDateTime", "java.time.LocalDateTime"),
    ("Map", "java.util.Map"),
    ("Objects", "java.util.Objects"),
    ("Optional", "java.util.Optional"),
    ("OutputStream", "java.io.OutputStream"),
    ("Path", "java.nio.file.Path"),
    ("Pattern", "java.util.regex.Pattern"),
    ("Predicate", "java.util.function.Predicate"),
    ("Queue", "java.util.Queue"),
    ("Set", "java.util.Set"),
    ("Stream", "java.util.stream.Stream"),
    ("Supplier", "java.util.function.Supplier"),
    ("TimeUnit", "java.util.concurrent.TimeUnit"),
    ("TimeoutException", "java.util.concurrent.TimeoutException"),
    ("UUID", "java.util.UUID"),
    ("ZonedDateTime", "java.time.ZonedDateTime"),
    ("AtomicInteger", "java.util.concurrent.atomic.AtomicInteger"),
    ("AtomicLong", "java.util.concurrent.atomic.AtomicLong"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::extract::extract;
    use std::path::Path;

    fn unit(path: &str, src: &str) -> SourceUnit {
        extract(Path::new(path), src).unwrap()
    }

    fn project() -> Vec<SourceUnit> {
        vec![
            unit(
                "OrderService.java",
                "package com.shop.orders;\nimport java.util.*;\n@Service\npublic class OrderService {\n private final OrderRepository repo;\n public OrderService(OrderRepository repo) { this.repo = repo; }\n public Optional<Order> find(UUID id, Money total) throws IOException { return null; }\n public List<Order> all() { return null; }\n}",
            ),
            unit("OrderRepository.java", "package com.shop.orders.db;\npublic interface OrderRepository {}"),
            unit("Order.java", "package com.shop.orders;\n@Entity\npublic class Order {}"),
            unit("Order2.java", "package com.shop.legacy;\npublic class Order {}"),
        ]
    }

    #[test]
    fn resolves_project_framework_and_stdlib_in_order() {
        let units = project();
        let resolver = ImportResolver::new(&units);
        let set = resolver.resolve(&units[0], TestFramework::Junit5Mockito, Language::Java);

        let ordered: Vec<&str> = set.iter().collect();
        assert_eq!(ordered, expected_order());

        assert!(set.unqualified.contains("Money"));
        assert!(set.warnings.iter().any(|w| w.contains("'Money'")));
        assert!(set.warnings.iter().any(|w| w.contains("ambiguous type 'Order'")));
    }

    fn expected_order() -> Vec<&'static str> {
        vec![
            "com.shop.orders.Order",
            "com.shop.orders.db.OrderRepository",
            "org.junit.jupiter.api.Test",
            "org.junit.jupiter.api.extension.ExtendWith",
            "org.mockito.InjectMocks",
            "org.mockito.Mock",
            "org.mockito.junit.jupiter.MockitoExtension",
            "static org.junit.jupiter.api.Assertions.*",
            "static org.mockito.Mockito.*",
            "java.io.IOException",
            "java.util.List",
            "java.util.Optional",
            "java.util.UUID",
        ]
    }

    #[test]
    fn ordering_is_stable_across_runs_and_input_order() {
        let units = project();
        let mut reversed = units.clone();
        reversed.reverse();

        let a = ImportResolver::new(&units).resolve(&units[0], TestFramework::Junit5Mockito, Language::Java);
        let b = ImportResolver::new(&reversed).resolve(&units[0], TestFramework::Junit5Mockito, Language::Java);
        assert_eq!(a, b);
        assert_eq!(a.iter().collect::<Vec<_>>(), b.iter().collect::<Vec<_>>());
    }

    #[test]
    fn kotlin_targets_drop_static_and_add_coroutines() {
        let units = vec![unit(
            "Poller.kt",
            "package jobs\nclass Poller { suspend fun poll(): Int = 1 }",
        )];
        let set = resolve_imports(&units[0], &units, TestFramework::Junit5Mockk, Language::Kotlin);
        assert!(set.contains("org.junit.jupiter.api.Assertions.*"));
        assert!(set.contains("kotlinx.coroutines.test.runTest"));
        assert!(set.iter().all(|i| !i.starts_with("static ")));
    }

    #[test]
    fn plain_class_gets_only_base_imports() {
        let units = vec![unit(
            "Calculator.java",
            "package math;\npublic class Calculator { public int add(int a, int b) { return a + b; } }",
        )];
        let set = resolve_imports(&units[0], &units, TestFramework::Junit5Mockito, Language::Java);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec!["org.junit.jupiter.api.Test", "static org.junit.jupiter.api.Assertions.*"]
        );
        assert!(set.warnings.is_empty());
    }
}
