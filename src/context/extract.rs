// src/context/extract.rs
//
// Source unit extraction.
//
// Structural only: declarations are located in masked text by brace depth
// and keyword tables. Types are recorded as written, never resolved.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use super::lexer::{check_balance, collapse_ws, mask, matching_close, split_top_level};
use super::types::{FieldDecl, MethodSignature, SourceUnit, TypeKind};
use crate::detectors::language::{Language, VISIBILITIES};
use crate::error::ExtractionError;

const INFERRED: &str = "<inferred>";

/* ============================================================
   Public entry
   ============================================================ */

pub fn extract(path: &Path, src: &str) -> Result<SourceUnit, ExtractionError> {
    let language = Language::from_path(path)
        .ok_or_else(|| ExtractionError::UnsupportedFile(path.display().to_string()))?;

    let masked = mask(src, language)?;
    check_balance(&masked)?;

    let depths = brace_depths(&masked);
    let package_name = package_re()
        .captures(&masked)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let (imports, header_end) = collect_imports(&masked);

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let decl = find_primary_decl(&masked, &depths, language, stem)
        .ok_or(ExtractionError::NoTypeDeclaration)?;

    let prefix_start = decl_prefix_start(&masked, &depths, decl.start).max(header_end);
    let prefix = &masked[prefix_start.min(decl.start)..decl.start];
    let (annotations, prefix_rest) = strip_annotations(prefix.trim());
    let kind = decl_kind(language, decl.keyword, prefix_rest);

    let mut unit = SourceUnit {
        file_path: path.to_path_buf(),
        language,
        package_name,
        class_name: decl.name.clone(),
        kind,
        imports,
        annotations,
        constructors: Vec::new(),
        methods: Vec::new(),
        fields: Vec::new(),
    };

    let after_name = decl.name_end;
    let mut cursor = skip_type_params(&masked, after_name);

    // Kotlin primary constructors and Java record components.
    let ctor_parens = primary_params_start(&masked, cursor, language, kind);
    if let Some(open) = ctor_parens {
        if let Some(close) = matching_close(&masked, open) {
            read_primary_params(&mut unit, &masked[open + 1..close]);
            cursor = close + 1;
        }
    }

    if let Some((open, close)) = find_body(&masked, &depths, cursor, language) {
        let body = flatten_block(&masked[open + 1..close]);
        read_members(&mut unit, &body);
    }

    Ok(unit)
}

/* ============================================================
   Top-level declaration
   ============================================================ */

struct Decl {
    start: usize,
    keyword: &'static str,
    name: String,
    name_end: usize,
}

fn find_primary_decl(masked: &str, depths: &[usize], language: Language, stem: &str) -> Option<Decl> {
    let re = match language {
        Language::Java => java_decl_re(),
        Language::Kotlin => kotlin_decl_re(),
    };

    let mut found: Vec<Decl> = Vec::new();
    for caps in re.captures_iter(masked) {
        let (Some(kw), Some(name)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if depths[kw.start()] != 0 {
            continue;
        }
        let Some(keyword) = language
            .type_keywords()
            .iter()
            .copied()
            .find(|k| *k == kw.as_str())
        else {
            continue;
        };
        found.push(Decl {
            start: kw.start(),
            keyword,
            name: name.as_str().to_string(),
            name_end: name.end(),
        });
    }

    let idx = found.iter().position(|d| d.name == stem).unwrap_or(0);
    if found.is_empty() {
        None
    } else {
        Some(found.swap_remove(idx))
    }
}

fn decl_kind(language: Language, keyword: &str, prefix: &str) -> TypeKind {
    let words: Vec<&str> = prefix.split_whitespace().collect();
    match (language, keyword) {
        (_, "interface") => TypeKind::Interface,
        (_, "enum") => TypeKind::Enum,
        (_, "record") => TypeKind::Record,
        (_, "@interface") => TypeKind::Annotation,
        (Language::Kotlin, "object") => TypeKind::Object,
        (Language::Kotlin, _) if words.contains(&"enum") => TypeKind::Enum,
        (Language::Kotlin, _) if words.contains(&"annotation") => TypeKind::Annotation,
        _ => TypeKind::Class,
    }
}

/// Where the annotations/modifiers of a top-level declaration begin.
fn decl_prefix_start(masked: &str, depths: &[usize], decl_start: usize) -> usize {
    masked.as_bytes()[..decl_start]
        .iter()
        .enumerate()
        .rev()
        .find(|(i, b)| (**b == b';' || **b == b'}') && depths[*i + 1] == 0)
        .map(|(i, _)| i + 1)
        .unwrap_or(0)
}

fn collect_imports(masked: &str) -> (Vec<String>, usize) {
    let mut imports: Vec<String> = Vec::new();
    let mut end = package_re().find(masked).map(|m| m.end()).unwrap_or(0);

    for caps in import_re().captures_iter(masked) {
        let name = match caps.get(1) {
            Some(_) => format!("static {}", &caps[2]),
            None => caps[2].to_string(),
        };
        if !imports.contains(&name) {
            imports.push(name);
        }
        if let Some(m) = caps.get(0) {
            end = end.max(m.end());
        }
    }
    (imports, end)
}

/// Offset of the `(` opening a Kotlin primary constructor or record header.
fn primary_params_start(masked: &str, from: usize, language: Language, kind: TypeKind) -> Option<usize> {
    let rest = &masked[from..];
    let trimmed = rest.trim_start();
    let offset = from + (rest.len() - trimmed.len());

    match language {
        Language::Java if kind == TypeKind::Record => trimmed.starts_with('(').then_some(offset),
        Language::Kotlin => {
            if trimmed.starts_with('(') {
                return Some(offset);
            }
            // `class Foo @Inject constructor(...)`
            let caps = kotlin_ctor_keyword_re().captures(trimmed)?;
            let m = caps.get(0)?;
            Some(offset + m.end() - 1)
        }
        Language::Java => None,
    }
}

/// Body braces of the declaration, if it has one.
fn find_body(masked: &str, depths: &[usize], from: usize, language: Language) -> Option<(usize, usize)> {
    let bytes = masked.as_bytes();
    let open = (from..bytes.len()).find(|&i| bytes[i] == b'{' && depths[i] == 0)?;

    // Kotlin classes may have no body; the next `{` would then belong to a
    // later declaration.
    if language == Language::Kotlin && next_decl_re().is_match(&masked[from..open]) {
        return None;
    }

    let close = matching_close(masked, open)?;
    Some((open, close))
}

/* ============================================================
   Members
   ============================================================ */

fn read_members(unit: &mut SourceUnit, body: &str) {
    let language = unit.language;
    let mut segments = split_members(body, language == Language::Kotlin);

    // Enum constants come before the first `;`.
    if unit.kind == TypeKind::Enum {
        match segments.iter().position(|s| s.terminator == ';') {
            Some(i) if language == Language::Java => {
                segments.drain(..=i);
            }
            None if language == Language::Java => segments.clear(),
            _ => {}
        }
    }

    let mut pending: BTreeSet<String> = BTreeSet::new();
    for seg in segments {
        let text = collapse_ws(&seg.text);
        let (mut annotations, rest) = strip_annotations(&text);
        annotations.append(&mut pending);

        if rest.is_empty() {
            // Annotation-only lines annotate the next Kotlin member.
            if language == Language::Kotlin {
                pending = annotations;
            }
            continue;
        }

        match language {
            Language::Java => read_java_member(unit, rest, annotations, seg.has_block),
            Language::Kotlin => read_kotlin_member(unit, rest, annotations),
        }
    }
}

fn read_java_member(unit: &mut SourceUnit, rest: &str, annotations: BTreeSet<String>, has_block: bool) {
    let header = rest.trim_end_matches("{}").trim();
    if header.is_empty() || header == "static" {
        return;
    }

    let before_paren = header.split('(').next().unwrap_or(header);
    if java_nested_type_re().is_match(before_paren) {
        return;
    }

    let default_visibility = if matches!(unit.kind, TypeKind::Interface | TypeKind::Annotation) {
        "public"
    } else {
        Language::Java.default_visibility()
    };

    if let Some(eq) = top_level_eq(header) {
        if let Some(field) = java_field(&header[..eq], annotations, default_visibility) {
            unit.fields.push(field);
        }
        return;
    }

    let Some(paren) = header.find('(') else {
        if !has_block {
            if let Some(field) = java_field(header, annotations, default_visibility) {
                unit.fields.push(field);
            }
        }
        return;
    };

    let Some(close) = matching_close(header, paren) else {
        return;
    };
    let name_part = header[..paren].trim_end();
    let name = last_identifier(name_part);
    if name.is_empty() {
        return;
    }

    let lead = name_part[..name_part.len() - name.len()].trim();
    let (modifiers, lead) = take_modifiers(lead, Language::Java);
    let lead = strip_leading_type_params(lead);

    let parameter_types = split_top_level(&header[paren + 1..close])
        .iter()
        .filter_map(|p| java_param_type(p))
        .collect();

    let tail = header[close + 1..].trim();
    let throws_types = java_throws_re()
        .captures(tail)
        .map(|c| {
            c[1].split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let sig = MethodSignature {
        name: name.to_string(),
        parameter_types,
        return_type: lead.to_string(),
        visibility: visibility_of(&modifiers, default_visibility),
        annotations,
        throws_types,
        is_suspend: false,
    };

    if lead.is_empty() {
        if name == unit.class_name {
            unit.constructors.push(sig);
        }
    } else {
        unit.methods.push(sig);
    }
}

fn read_kotlin_member(unit: &mut SourceUnit, rest: &str, annotations: BTreeSet<String>) {
    let (modifiers, rest) = take_modifiers(rest, Language::Kotlin);
    let visibility = visibility_of(&modifiers, Language::Kotlin.default_visibility());

    let (keyword, tail) = match rest.split_once(' ') {
        Some((k, t)) => (k, t.trim()),
        None => (rest, ""),
    };
    let keyword = keyword.split('(').next().unwrap_or(keyword);

    match keyword {
        "fun" => {
            if let Some(mut sig) = kotlin_fun(tail, &visibility, annotations) {
                sig.is_suspend = modifiers.iter().any(|m| m == "suspend");
                unit.methods.push(sig);
            }
        }
        "val" | "var" => {
            if let Some(field) = kotlin_property(tail, &visibility, annotations) {
                unit.fields.push(field);
            }
        }
        "constructor" => {
            let Some(open) = rest.find('(') else {
                return;
            };
            let Some(close) = matching_close(rest, open) else {
                return;
            };
            let parameter_types = split_top_level(&rest[open + 1..close])
                .iter()
                .filter_map(|p| kotlin_param(p).map(|(_, ty, _)| ty))
                .collect();
            unit.constructors.push(MethodSignature {
                name: unit.class_name.clone(),
                parameter_types,
                return_type: String::new(),
                visibility,
                annotations,
                throws_types: BTreeSet::new(),
                is_suspend: false,
            });
        }
        _ => {}
    }
}

fn read_primary_params(unit: &mut SourceUnit, params: &str) {
    let language = unit.language;
    let mut parameter_types = Vec::new();

    for raw in split_top_level(params) {
        let text = collapse_ws(&raw);
        match language {
            Language::Kotlin => {
                let Some((name, ty, decl)) = kotlin_param(&text) else {
                    continue;
                };
                parameter_types.push(ty.clone());
                if let Some((visibility, annotations)) = decl {
                    unit.fields.push(FieldDecl {
                        name,
                        field_type: ty,
                        visibility,
                        annotations,
                    });
                }
            }
            Language::Java => {
                let (annotations, rest) = strip_annotations(&text);
                let Some(ty) = java_param_type(rest) else {
                    continue;
                };
                parameter_types.push(ty.clone());
                unit.fields.push(FieldDecl {
                    name: last_identifier(rest).to_string(),
                    field_type: ty,
                    visibility: "private".into(),
                    annotations,
                });
            }
        }
    }

    unit.constructors.push(MethodSignature {
        name: unit.class_name.clone(),
        parameter_types,
        return_type: String::new(),
        visibility: "public".into(),
        annotations: BTreeSet::new(),
        throws_types: BTreeSet::new(),
        is_suspend: false,
    });
}

/* ============================================================
   Java helpers
   ============================================================ */

fn java_field(decl: &str, annotations: BTreeSet<String>, default_visibility: &str) -> Option<FieldDecl> {
    // `int a, b` declares several fields; the first is enough for a summary.
    let first = split_top_level(decl).into_iter().next()?;
    let (modifiers, rest) = take_modifiers(first.trim(), Language::Java);
    let name = last_identifier(rest);
    if name.is_empty() {
        return None;
    }
    let field_type = rest[..rest.len() - name.len()].trim();
    if field_type.is_empty() {
        return None;
    }
    Some(FieldDecl {
        name: name.to_string(),
        field_type: field_type.to_string(),
        visibility: visibility_of(&modifiers, default_visibility),
        annotations,
    })
}

fn java_param_type(param: &str) -> Option<String> {
    let (_, rest) = strip_annotations(param.trim());
    let rest = rest.trim_start_matches("final ").trim();
    let name = last_identifier(rest);
    if name.is_empty() || rest.len() == name.len() {
        return None;
    }
    Some(collapse_ws(rest[..rest.len() - name.len()].trim()))
}

/* ============================================================
   Kotlin helpers
   ============================================================ */

fn kotlin_fun(tail: &str, visibility: &str, annotations: BTreeSet<String>) -> Option<MethodSignature> {
    let tail = strip_leading_type_params(tail);
    let open = tail.find('(')?;
    let close = matching_close(tail, open)?;
    let name = last_identifier(tail[..open].trim_end());
    if name.is_empty() {
        return None;
    }

    let parameter_types = split_top_level(&tail[open + 1..close])
        .iter()
        .filter_map(|p| kotlin_param(p).map(|(_, ty, _)| ty))
        .collect();

    let after = tail[close + 1..].trim();
    let return_type = if let Some(ret) = after.strip_prefix(':') {
        let end = ret
            .find(" where ")
            .or_else(|| top_level_eq(ret))
            .or_else(|| ret.find('{'))
            .unwrap_or(ret.len());
        ret[..end].trim().to_string()
    } else if after.starts_with('=') {
        INFERRED.to_string()
    } else {
        "Unit".to_string()
    };

    Some(MethodSignature {
        name: name.to_string(),
        parameter_types,
        return_type,
        visibility: visibility.to_string(),
        annotations,
        throws_types: BTreeSet::new(),
        is_suspend: false,
    })
}

fn kotlin_property(tail: &str, visibility: &str, annotations: BTreeSet<String>) -> Option<FieldDecl> {
    let end = top_level_eq(tail)
        .or_else(|| tail.find(" by "))
        .or_else(|| tail.find('{'))
        .unwrap_or(tail.len());
    let decl = tail[..end].trim();

    let (name, ty) = match decl.split_once(':') {
        Some((n, t)) => (n.trim(), t.trim()),
        None => (decl, INFERRED),
    };
    // Extension properties (`val Foo.bar`) keep the receiver in the name.
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return None;
    }

    Some(FieldDecl {
        name: name.to_string(),
        field_type: ty.to_string(),
        visibility: visibility.to_string(),
        annotations,
    })
}

/// `(name, type, Some((visibility, annotations)))` when the parameter also
/// declares a property.
fn kotlin_param(raw: &str) -> Option<(String, String, Option<(String, BTreeSet<String>)>)> {
    let text = collapse_ws(raw);
    let (annotations, rest) = strip_annotations(&text);
    let (modifiers, rest) = take_modifiers(rest, Language::Kotlin);

    let (declares, rest) = if let Some(r) = rest.strip_prefix("val ") {
        (true, r)
    } else if let Some(r) = rest.strip_prefix("var ") {
        (true, r)
    } else {
        (false, rest)
    };
    let (vararg, rest) = match rest.strip_prefix("vararg ") {
        Some(r) => (true, r),
        None => (false, rest),
    };

    let (name, ty) = rest.split_once(':')?;
    let ty = match top_level_eq(ty) {
        Some(eq) => &ty[..eq],
        None => ty,
    }
    .trim();
    let ty = if vararg { format!("vararg {ty}") } else { ty.to_string() };

    let decl = declares.then(|| {
        (
            visibility_of(&modifiers, Language::Kotlin.default_visibility()),
            annotations,
        )
    });
    Some((name.trim().to_string(), ty, decl))
}

/* ============================================================
   Shared helpers
   ============================================================ */

struct Segment {
    text: String,
    terminator: char,
    has_block: bool,
}

/// Split a flattened class body into member declarations.
///
/// Java members end at `;` or a block; Kotlin members additionally end at a
/// newline outside parentheses.
fn split_members(body: &str, newline_ends: bool) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut parens = 0i32;
    let mut has_block = false;

    let mut flush = |cur: &mut String, terminator: char, has_block: &mut bool| {
        if !cur.trim().is_empty() {
            out.push(Segment {
                text: cur.trim().to_string(),
                terminator,
                has_block: *has_block,
            });
        }
        cur.clear();
        *has_block = false;
    };

    for c in body.chars() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => {}
        }
        if parens > 0 {
            cur.push(if c == '\n' { ' ' } else { c });
            continue;
        }
        match c {
            ';' => flush(&mut cur, ';', &mut has_block),
            '}' => {
                cur.push('}');
                has_block = true;
                if !newline_ends {
                    flush(&mut cur, '}', &mut has_block);
                }
            }
            '\n' if newline_ends => {
                // A trailing `=`, `:` or `,` continues onto the next line.
                let t = cur.trim_end();
                if t.ends_with('=') || t.ends_with(':') || t.ends_with(',') {
                    cur.push(' ');
                } else {
                    flush(&mut cur, '\n', &mut has_block);
                }
            }
            _ => cur.push(c),
        }
    }
    flush(&mut cur, '\n', &mut has_block);
    out
}

/// Replace the contents of every nested block with `{}`.
fn flatten_block(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut depth = 0usize;
    for c in body.chars() {
        match c {
            '{' => {
                if depth == 0 {
                    out.push('{');
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push('}');
                }
            }
            // Keep line structure so Kotlin members stay separated.
            '\n' if depth > 0 => {}
            _ if depth > 0 => {}
            _ => out.push(c),
        }
    }
    out
}

fn brace_depths(masked: &str) -> Vec<usize> {
    let mut depths = Vec::with_capacity(masked.len() + 1);
    let mut depth = 0usize;
    for b in masked.bytes() {
        depths.push(depth);
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depths.push(depth);
    depths
}

/// Leading annotations (`@Foo`, `@a.b.Bar(...)`) and the text after them.
fn strip_annotations(s: &str) -> (BTreeSet<String>, &str) {
    let mut names = BTreeSet::new();
    let mut rest = s.trim_start();

    while let Some(caps) = annotation_re().captures(rest) {
        let Some(whole) = caps.get(0) else { break };
        if &caps[1] == "interface" {
            break;
        }
        names.insert(caps[1].to_string());
        let mut next = &rest[whole.end()..];
        let trimmed = next.trim_start();
        if trimmed.starts_with('(') {
            let offset = next.len() - trimmed.len();
            match matching_close(trimmed, 0) {
                Some(close) => next = &next[offset + close + 1..],
                None => break,
            }
        }
        rest = next.trim_start();
    }
    (names, rest)
}

fn take_modifiers(s: &str, language: Language) -> (Vec<String>, &str) {
    let mut modifiers = Vec::new();
    let mut rest = s.trim_start();
    loop {
        let word_end = rest.find(|c: char| c.is_whitespace()).unwrap_or(rest.len());
        let word = &rest[..word_end];
        if word.is_empty() || !language.is_modifier(word) {
            break;
        }
        modifiers.push(word.to_string());
        rest = rest[word_end..].trim_start();
    }
    (modifiers, rest)
}

fn visibility_of(modifiers: &[String], default: &str) -> String {
    modifiers
        .iter()
        .find(|m| VISIBILITIES.contains(&m.as_str()))
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn skip_type_params(masked: &str, from: usize) -> usize {
    let rest = &masked[from..];
    let trimmed = rest.trim_start();
    if trimmed.starts_with('<') {
        let offset = from + (rest.len() - trimmed.len());
        if let Some(close) = matching_close(masked, offset) {
            return close + 1;
        }
    }
    from
}

fn strip_leading_type_params(s: &str) -> &str {
    let s = s.trim_start();
    if s.starts_with('<') {
        if let Some(close) = matching_close(s, 0) {
            return s[close + 1..].trim_start();
        }
    }
    s
}

/// Trailing identifier of `s` (`String... args` → `args`).
fn last_identifier(s: &str) -> &str {
    let s = s.trim_end();
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
        .last()
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    &s[start..]
}

/// Offset of an assignment `=` outside brackets.
fn top_level_eq(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'<' | b'[' | b'{' => depth += 1,
            b')' | b'>' | b']' | b'}' => depth -= 1,
            b'=' if depth <= 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                if next != b'=' && !matches!(prev, b'=' | b'!' | b'<' | b'>') {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
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

pattern!(package_re, r"(?m)^\s*package\s+([\w.]+)");
pattern!(
    import_re,
    r"(?m)^\s*import\s+(static\s+)?([A-Za-z_][\w.]*(?:\.\*)?)"
);
pattern!(
    java_decl_re,
    r"(?:^|[^\w.@])(class|interface|enum|record|@interface)\s+([A-Za-z_$][\w$]*)"
);
pattern!(
    kotlin_decl_re,
    r"(?:^|[^\w.])(class|interface|object)\s+([A-Za-z_][\w]*)"
);
pattern!(
    java_nested_type_re,
    r"(?:^|\s)(?:class|interface|enum|record|@interface)\s"
);
pattern!(java_throws_re, r"^throws\s+(.+)$");
pattern!(annotation_re, r"^@([A-Za-z_][\w.]*)");
pattern!(
    kotlin_ctor_keyword_re,
    r"^(?:@[\w.]+(?:\([^)]*\))?\s+)*(?:(?:private|protected|internal|public)\s+)?constructor\s*\("
);
pattern!(
    next_decl_re,
    r"(?m)^\s*(?:@|(?:\w+\s+)*(?:class|interface|object|fun|val|var|typealias)\b)"
);
