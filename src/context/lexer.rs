// src/context/lexer.rs
//
// Masking lexer shared by the extractor and the response validator.
//
// Comments and the contents of string/char literals are replaced by spaces so
// later passes can match braces and declarations with plain regexes. Newlines
// are preserved, which keeps line numbers stable.

use crate::detectors::language::Language;
use crate::error::ExtractionError;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Code,
    LineComment,
    BlockComment { depth: usize, line: usize },
    Str { line: usize },
    RawStr { line: usize },
    Char { line: usize },
    /// Kotlin `${ ... }` inside a string literal.
    Template { braces: usize },
}

/// Masked source plus the text of its comments, one comment per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexed {
    pub masked: String,
    pub comments: String,
}

/* ============================================================
   Public API
   ============================================================ */

/// Blank out comments and literal contents.
///
/// Fails on an unterminated comment, string or char literal.
pub fn mask(src: &str, language: Language) -> Result<String, ExtractionError> {
    lex(src, language).map(|l| l.masked)
}

/// Like [`mask`], also collecting comment text.
pub fn lex(src: &str, language: Language) -> Result<Lexed, ExtractionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut comments = String::new();
    let mut stack = vec![Mode::Code];
    let mut line = 1usize;
    let mut i = 0usize;

    let at = |i: usize, pat: &str| -> bool {
        pat.chars()
            .enumerate()
            .all(|(k, p)| chars.get(i + k) == Some(&p))
    };

    while i < chars.len() {
        let c = chars[i];
        let nested = stack.len() > 1;
        // Literal/comment modes are never at the bottom of the stack.
        let mode = *stack.last().unwrap_or(&Mode::Code);

        match mode {
            Mode::Code | Mode::Template { .. } => {
                if let Mode::Template { braces } = mode {
                    if c == '{' {
                        replace_top(&mut stack, Mode::Template { braces: braces + 1 });
                    } else if c == '}' {
                        if braces == 0 {
                            stack.pop();
                        } else {
                            replace_top(&mut stack, Mode::Template { braces: braces - 1 });
                        }
                        out.push(' ');
                        i += 1;
                        continue;
                    }
                }

                if at(i, "//") {
                    stack.push(Mode::LineComment);
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if at(i, "/*") {
                    stack.push(Mode::BlockComment { depth: 1, line });
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if at(i, "\"\"\"") {
                    stack.push(Mode::RawStr { line });
                    out.push_str(if nested { "   " } else { "\"\"\"" });
                    i += 3;
                    continue;
                }
                if c == '"' {
                    stack.push(Mode::Str { line });
                    out.push(if nested { ' ' } else { '"' });
                    i += 1;
                    continue;
                }
                if c == '\'' && is_char_literal_start(&chars, i) {
                    stack.push(Mode::Char { line });
                    out.push(if nested { ' ' } else { '\'' });
                    i += 1;
                    continue;
                }

                if c == '\n' {
                    line += 1;
                    out.push('\n');
                } else {
                    out.push(if nested { ' ' } else { c });
                }
                i += 1;
            }

            Mode::LineComment => {
                comments.push(c);
                if c == '\n' {
                    stack.pop();
                    line += 1;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
                i += 1;
            }

            Mode::BlockComment { depth, line: start } => {
                if at(i, "*/") {
                    if depth == 1 {
                        stack.pop();
                        comments.push('\n');
                    } else {
                        replace_top(&mut stack, Mode::BlockComment { depth: depth - 1, line: start });
                    }
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                // Kotlin block comments nest, Java ones do not.
                if language == Language::Kotlin && at(i, "/*") {
                    replace_top(&mut stack, Mode::BlockComment { depth: depth + 1, line: start });
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                comments.push(c);
                push_blank(&mut out, c, &mut line);
                i += 1;
            }

            Mode::Str { line: start } => {
                if c == '\\' {
                    out.push(' ');
                    if let Some(&next) = chars.get(i + 1) {
                        push_blank(&mut out, next, &mut line);
                    }
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    return Err(ExtractionError::Unterminated {
                        what: "string literal",
                        line: start,
                    });
                }
                if c == '"' {
                    stack.pop();
                    out.push(if stack.len() > 1 { ' ' } else { '"' });
                    i += 1;
                    continue;
                }
                if language == Language::Kotlin && at(i, "${") {
                    stack.push(Mode::Template { braces: 0 });
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                out.push(' ');
                i += 1;
            }

            Mode::RawStr { .. } => {
                if language == Language::Java && c == '\\' {
                    out.push(' ');
                    if let Some(&next) = chars.get(i + 1) {
                        push_blank(&mut out, next, &mut line);
                    }
                    i += 2;
                    continue;
                }
                // Kotlin: quotes before the closing `"""` belong to the content.
                if language == Language::Kotlin && at(i, "\"\"\"\"") {
                    out.push(' ');
                    i += 1;
                    continue;
                }
                if at(i, "\"\"\"") {
                    stack.pop();
                    out.push_str(if stack.len() > 1 { "   " } else { "\"\"\"" });
                    i += 3;
                    continue;
                }
                if language == Language::Kotlin && at(i, "${") {
                    stack.push(Mode::Template { braces: 0 });
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                push_blank(&mut out, c, &mut line);
                i += 1;
            }

            Mode::Char { line: start } => {
                if c == '\\' {
                    out.push(' ');
                    if chars.get(i + 1).is_some() {
                        out.push(' ');
                    }
                    i += 2;
                    continue;
                }
                if c == '\n' {
                    return Err(ExtractionError::Unterminated {
                        what: "char literal",
                        line: start,
                    });
                }
                if c == '\'' {
                    stack.pop();
                    out.push(if stack.len() > 1 { ' ' } else { '\'' });
                } else {
                    out.push(' ');
                }
                i += 1;
            }
        }
    }

    match stack.last() {
        None | Some(Mode::Code) | Some(Mode::LineComment) => Ok(Lexed {
            masked: out,
            comments,
        }),
        Some(Mode::BlockComment { line, .. }) => Err(ExtractionError::Unterminated {
            what: "block comment",
            line: *line,
        }),
        Some(Mode::Str { line }) | Some(Mode::RawStr { line }) => {
            Err(ExtractionError::Unterminated {
                what: "string literal",
                line: *line,
            })
        }
        Some(Mode::Char { line }) => Err(ExtractionError::Unterminated {
            what: "char literal",
            line: *line,
        }),
        Some(Mode::Template { .. }) => Err(ExtractionError::Unterminated {
            what: "string template",
            line,
        }),
    }
}

/// Check that `{}`, `()` and `[]` nest correctly in masked text.
pub fn check_balance(masked: &str) -> Result<(), ExtractionError> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;

    for c in masked.chars() {
        match c {
            '\n' => line += 1,
            '{' | '(' | '[' => stack.push((c, line)),
            '}' | ')' | ']' => {
                let expected = match c {
                    '}' => '{',
                    ')' => '(',
                    _ => '[',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(ExtractionError::Unbalanced {
                            delimiter: open,
                            line: open_line,
                        })
                    }
                    None => return Err(ExtractionError::Unbalanced { delimiter: c, line }),
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, open_line)) => Err(ExtractionError::Unbalanced {
            delimiter: open,
            line: open_line,
        }),
        None => Ok(()),
    }
}

/// Byte index of the delimiter closing the one at `open`.
pub fn matching_close(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let (o, c) = match bytes.get(open)? {
        b'{' => (b'{', b'}'),
        b'(' => (b'(', b')'),
        b'[' => (b'[', b']'),
        b'<' => (b'<', b'>'),
        _ => return None,
    };

    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        if b == o {
            depth += 1;
        } else if b == c {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// Split on commas that are not nested inside `<>`, `()` or `[]`.
pub fn split_top_level(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();

    for c in s.chars() {
        match c {
            '<' | '(' | '[' | '{' => depth += 1,
            '>' | ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                out.push(cur.trim().to_string());
                cur.clear();
                continue;
            }
            _ => {}
        }
        cur.push(c);
    }
    if !cur.trim().is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

pub fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/* ============================================================
   Helpers
   ============================================================ */

fn replace_top(stack: &mut [Mode], mode: Mode) {
    if let Some(top) = stack.last_mut() {
        *top = mode;
    }
}

fn push_blank(out: &mut String, c: char, line: &mut usize) {
    if c == '\n' {
        *line += 1;
        out.push('\n');
    } else {
        out.push(' ');
    }
}

/// Kotlin and Java both use `'` only for char literals, but a stray `'` in
/// generated prose should not swallow the rest of a line.
fn is_char_literal_start(chars: &[char], i: usize) -> bool {
    match (chars.get(i + 1), chars.get(i + 2), chars.get(i + 3)) {
        (Some('\\'), _, _) => true,
        (Some(_), Some('\''), _) => true,
        _ => false,
    }
}
