// src/context/types.rs
//
// Structural summary of one source file and the import set derived from it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::detectors::language::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Object,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodSignature {
    pub name: String,
    pub parameter_types: Vec<String>,
    pub return_type: String,
    pub visibility: String,
    pub annotations: BTreeSet<String>,
    pub throws_types: BTreeSet<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_suspend: bool,
}

impl MethodSignature {
    pub fn is_private(&self) -> bool {
        self.visibility == "private"
    }

    /// `name(int, int): int`
    pub fn display(&self) -> String {
        format!(
            "{}({}): {}",
            self.name,
            self.parameter_types.join(", "),
            self.return_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDecl {
    pub name: String,
    pub field_type: String,
    pub visibility: String,
    pub annotations: BTreeSet<String>,
}

/// Lightweight structural summary of one source file.
///
/// Built once by the extractor and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceUnit {
    pub file_path: PathBuf,
    pub language: Language,
    pub package_name: String,
    pub class_name: String,
    pub kind: TypeKind,
    pub imports: Vec<String>,
    pub annotations: BTreeSet<String>,
    pub constructors: Vec<MethodSignature>,
    pub methods: Vec<MethodSignature>,
    pub fields: Vec<FieldDecl>,
}

impl SourceUnit {
    pub fn qualified_name(&self) -> String {
        if self.package_name.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.package_name, self.class_name)
        }
    }

    /// Every type string mentioned by a signature or field, in declaration order.
    pub fn referenced_types(&self) -> impl Iterator<Item = &str> {
        let methods = self.constructors.iter().chain(self.methods.iter());
        let from_methods = methods.flat_map(|m| {
            m.parameter_types
                .iter()
                .chain(std::iter::once(&m.return_type))
                .chain(m.throws_types.iter())
        });
        from_methods
            .chain(self.fields.iter().map(|f| &f.field_type))
            .map(String::as_str)
    }

    /// Annotations on the type and on any member.
    pub fn all_annotations(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self.annotations.iter().map(String::as_str).collect();
        for m in self.constructors.iter().chain(self.methods.iter()) {
            out.extend(m.annotations.iter().map(String::as_str));
        }
        for f in &self.fields {
            out.extend(f.annotations.iter().map(String::as_str));
        }
        out
    }

    pub fn has_suspend_methods(&self) -> bool {
        self.methods.iter().any(|m| m.is_suspend)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportCategory {
    Project,
    Framework,
    StdLib,
}

/// Imports a generated test needs.
///
/// Buckets are ordered project, framework, standard library; each bucket is
/// sorted, so iteration order only depends on content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSet {
    pub project: BTreeSet<String>,
    pub framework: BTreeSet<String>,
    pub stdlib: BTreeSet<String>,
    /// Simple names nothing could qualify. Left as-is for the model.
    pub unqualified: BTreeSet<String>,
    pub warnings: Vec<String>,
}

impl ImportSet {
    pub fn insert(&mut self, category: ImportCategory, name: impl Into<String>) {
        let name = name.into();
        // One name lives in one bucket; the first classification wins.
        if self.contains(&name) {
            return;
        }
        match category {
            ImportCategory::Project => self.project.insert(name),
            ImportCategory::Framework => self.framework.insert(name),
            ImportCategory::StdLib => self.stdlib.insert(name),
        };
    }

    pub fn contains(&self, name: &str) -> bool {
        self.project.contains(name) || self.framework.contains(name) || self.stdlib.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.project
            .iter()
            .chain(self.framework.iter())
            .chain(self.stdlib.iter())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.project.len() + self.framework.len() + self.stdlib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_set_orders_buckets_then_names() {
        let mut set = ImportSet::default();
        set.insert(ImportCategory::StdLib, "java.util.List");
        set.insert(ImportCategory::Framework, "org.mockito.Mock");
        set.insert(ImportCategory::Project, "com.acme.b.Beta");
        set.insert(ImportCategory::Project, "com.acme.a.Alpha");
        set.insert(ImportCategory::Framework, "com.acme.a.Alpha");

        let ordered: Vec<&str> = set.iter().collect();
        assert_eq!(
            ordered,
            vec![
                "com.acme.a.Alpha",
                "com.acme.b.Beta",
                "org.mockito.Mock",
                "java.util.List"
            ]
        );
    }
}
