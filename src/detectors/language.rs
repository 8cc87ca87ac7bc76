//! detectors/language.rs
//!
//! Source language detection and the keyword tables the extractor matches
//! declarations against.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Kotlin,
}

/* ============================================================
   Public API
   ============================================================ */

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("java") => Some(Language::Java),
            Some("kt") => Some(Language::Kotlin),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Kotlin => "kt",
        }
    }

    /// Fence tag used in markdown code blocks.
    pub fn fence_tag(self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Kotlin => "kotlin",
        }
    }

    /// Keywords that open a type declaration.
    pub fn type_keywords(self) -> &'static [&'static str] {
        match self {
            Language::Java => JAVA_TYPE_KEYWORDS,
            Language::Kotlin => KOTLIN_TYPE_KEYWORDS,
        }
    }

    /// Declaration modifiers that carry no type information.
    pub fn modifiers(self) -> &'static [&'static str] {
        match self {
            Language::Java => JAVA_MODIFIERS,
            Language::Kotlin => KOTLIN_MODIFIERS,
        }
    }

    pub fn is_modifier(self, word: &str) -> bool {
        self.modifiers().contains(&word)
    }

    /// Visibility when a member declares none.
    pub fn default_visibility(self) -> &'static str {
        match self {
            Language::Java => "package-private",
            Language::Kotlin => "public",
        }
    }

    /// Simple type names that never need an import.
    pub fn is_builtin_type(self, name: &str) -> bool {
        match self {
            Language::Java => JAVA_BUILTINS.contains(&name),
            Language::Kotlin => KOTLIN_BUILTINS.contains(&name) || JAVA_BUILTINS.contains(&name),
        }
    }
}

/* ============================================================
   Keyword tables
   ============================================================ */

const JAVA_TYPE_KEYWORDS: &[&str] = &["class", "interface", "enum", "record", "@interface"];

const KOTLIN_TYPE_KEYWORDS: &[&str] = &["class", "interface", "object"];

pub const VISIBILITIES: &[&str] = &["public", "protected", "private", "internal"];

const JAVA_MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "static",
    "final",
    "abstract",
    "synchronized",
    "native",
    "transient",
    "volatile",
    "strictfp",
    "default",
    "sealed",
    "non-sealed",
];

const KOTLIN_MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "internal",
    "open",
    "final",
    "abstract",
    "override",
    "suspend",
    "inline",
    "operator",
    "infix",
    "tailrec",
    "external",
    "lateinit",
    "const",
    "data",
    "sealed",
    "enum",
    "annotation",
    "inner",
    "value",
    "companion",
    "expect",
    "actual",
];

const JAVA_BUILTINS: &[&str] = &[
    "void", "boolean", "byte", "char", "short", "int", "long", "float", "double", "var",
    "String", "Object", "Integer", "Long", "Short", "Byte", "Character", "Boolean", "Double",
    "Float", "Void", "Number", "Math", "Class", "Enum", "Record", "Iterable", "Comparable",
    "CharSequence", "Runnable", "Thread", "StringBuilder", "System", "Exception",
    "RuntimeException", "Throwable", "Error", "IllegalArgumentException",
    "IllegalStateException", "NullPointerException", "UnsupportedOperationException",
    "ArithmeticException", "IndexOutOfBoundsException", "InterruptedException",
    "CloneNotSupportedException", "Override", "Deprecated", "SuppressWarnings",
    "FunctionalInterface", "SafeVarargs", "T", "E", "K", "V", "R",
];

const KOTLIN_BUILTINS: &[&str] = &[
    "Int", "Long", "Short", "Byte", "Char", "Float", "Double", "Boolean", "String", "Unit",
    "Any", "Nothing", "Array", "IntArray", "LongArray", "ByteArray", "CharArray",
    "DoubleArray", "FloatArray", "BooleanArray", "List", "MutableList", "Map", "MutableMap",
    "Set", "MutableSet", "Collection", "MutableCollection", "Iterable", "Sequence", "Pair",
    "Triple", "Result", "Lazy", "Comparable", "Throwable", "Exception", "Regex",
    "IllegalArgumentException", "IllegalStateException", "NoSuchElementException",
    "Suppress", "JvmStatic", "JvmField", "JvmOverloads", "Throws", "Deprecated",
];

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Java => "java",
            Language::Kotlin => "kotlin",
        };
        f.write_str(s)
    }
}
