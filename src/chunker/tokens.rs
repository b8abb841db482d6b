//! Language-blind lexical token scan.
//!
//! Produces the deterministic token facts attached to symbol and chunk rows
//! (identifiers, subword parts, called names, string literals) and the
//! positioned occurrences consumed by the reference scanner. The scan is
//! regex-based and intentionally approximate: it runs on every supported
//! language, including files the AST parsers cannot handle.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::model::TokenFacts;

/// A positioned token occurrence within one file or chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub start: usize,
    pub end: usize,
    pub token: String,
    pub kind: OccurrenceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceKind {
    Identifier,
    Call,
    StringLiteral,
}

/// Keywords and control-flow words excluded from identifier and call facts.
/// Union across the supported languages; a few false negatives are fine.
const KEYWORDS: &[&str] = &[
    "abstract", "as", "assert", "async", "await", "break", "case", "catch", "class", "const",
    "continue", "def", "default", "defer", "del", "do", "elif", "else", "enum", "except",
    "export", "extends", "false", "final", "finally", "fn", "for", "from", "func", "function",
    "go", "if", "impl", "implements", "import", "in", "interface", "internal", "is", "lambda",
    "let", "loop", "match", "mod", "mut", "new", "none", "not", "null", "or", "and", "override",
    "package", "pass", "private", "protected", "pub", "public", "raise", "return", "self",
    "static", "struct", "super", "switch", "this", "throw", "trait", "true", "try", "type",
    "typeof", "use", "val", "var", "void", "when", "while", "with", "yield", "None", "True",
    "False", "Self", "String", "int", "float", "bool", "str",
];

/// Definition keywords: a call-looking token preceded by one of these is a
/// definition site, not a call.
const DEF_PREFIXES: &[&str] = &["function", "def", "fn", "func"];

fn keyword_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| KEYWORDS.iter().copied().collect())
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap())
}

/// Qualified or plain name directly followed by `(`: `foo(`, `a.b(`, `A::b(`.
fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*(?:(?:\.|::)[A-Za-z_][A-Za-z0-9_]*)*)\s*\(").unwrap()
    })
}

fn string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Double, single, and backtick-quoted literals, single line, with escapes.
    RE.get_or_init(|| {
        Regex::new(r#""((?:[^"\\\n]|\\.)*)"|'((?:[^'\\\n]|\\.)*)'|`([^`\n]*)`"#).unwrap()
    })
}

/// Scan text into positioned occurrences: string literals, call callees, and
/// identifiers. String regions suppress identifier/call matches inside them.
pub fn scan_occurrences(text: &str) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    let mut string_spans: Vec<(usize, usize)> = Vec::new();

    for caps in string_re().captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        string_spans.push((whole.start(), whole.end()));
        if !inner.is_empty() {
            occurrences.push(Occurrence {
                start: whole.start(),
                end: whole.end(),
                token: inner.to_string(),
                kind: OccurrenceKind::StringLiteral,
            });
        }
    }

    let in_string =
        |pos: usize| string_spans.iter().any(|&(s, e)| pos >= s && pos < e);

    for caps in call_re().captures_iter(text) {
        let name = caps.get(1).unwrap();
        if in_string(name.start()) {
            continue;
        }
        // Trailing segment of the qualified name is the callee token.
        let callee = name
            .as_str()
            .rsplit(['.', ':'])
            .next()
            .unwrap_or(name.as_str());
        if keyword_set().contains(callee) {
            continue;
        }
        if preceded_by_def_keyword(text, name.start()) {
            continue;
        }
        occurrences.push(Occurrence {
            start: name.start(),
            end: name.end(),
            token: callee.to_string(),
            kind: OccurrenceKind::Call,
        });
    }

    for m in identifier_re().find_iter(text) {
        if in_string(m.start()) || keyword_set().contains(m.as_str()) {
            continue;
        }
        occurrences.push(Occurrence {
            start: m.start(),
            end: m.end(),
            token: m.as_str().to_string(),
            kind: OccurrenceKind::Identifier,
        });
    }

    occurrences
}

/// True when the word immediately before `pos` is a definition keyword
/// (`function add(` is a definition of `add`, not a call).
fn preceded_by_def_keyword(text: &str, pos: usize) -> bool {
    let before = &text[..pos];
    let trimmed = before.trim_end();
    DEF_PREFIXES
        .iter()
        .any(|kw| trimmed.ends_with(kw) && is_word_boundary(trimmed, kw))
}

fn is_word_boundary(text: &str, suffix: &str) -> bool {
    let prefix_len = text.len() - suffix.len();
    prefix_len == 0
        || text[..prefix_len]
            .chars()
            .next_back()
            .is_some_and(|c| !c.is_alphanumeric() && c != '_')
}

/// Build the deduplicated, order-preserving token facts for a chunk.
pub fn token_facts(text: &str) -> TokenFacts {
    let occurrences = scan_occurrences(text);

    let mut facts = TokenFacts::default();
    let mut seen_ident = HashSet::new();
    let mut seen_part = HashSet::new();
    let mut seen_call = HashSet::new();
    let mut seen_str = HashSet::new();

    for occ in &occurrences {
        match occ.kind {
            OccurrenceKind::Identifier => {
                if seen_ident.insert(occ.token.clone()) {
                    for part in split_subwords(&occ.token) {
                        if part.len() > 1 && seen_part.insert(part.clone()) {
                            facts.identifier_parts.push(part);
                        }
                    }
                    facts.identifiers.push(occ.token.clone());
                }
            }
            OccurrenceKind::Call => {
                if seen_call.insert(occ.token.clone()) {
                    facts.called_names.push(occ.token.clone());
                }
            }
            OccurrenceKind::StringLiteral => {
                if seen_str.insert(occ.token.clone()) {
                    facts.string_literals.push(occ.token.clone());
                }
            }
        }
    }

    facts
}

/// Split an identifier into lowercase subwords along camelCase and
/// snake_case boundaries: `getHttpClient` → `get`, `http`, `client`;
/// `HTTPServer` → `http`, `server`.
pub fn split_subwords(ident: &str) -> Vec<String> {
    let chars: Vec<char> = ident.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }

        let boundary = i > 0
            && c.is_uppercase()
            && (chars[i - 1].is_lowercase()
                || (chars[i - 1].is_uppercase()
                    && chars.get(i + 1).is_some_and(|n| n.is_lowercase())));
        if boundary && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}
