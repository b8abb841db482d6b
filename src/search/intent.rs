//! Query intent classification.
//!
//! When the caller passes `intent = auto`, the router applies a fixed rule
//! list in order and the first match wins. The rules are lexical on purpose:
//! they must be fast, deterministic, and explainable.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Definition,
    Usage,
    Concept,
    ExactText,
    SimilarCode,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Definition => "definition",
            Intent::Usage => "usage",
            Intent::Concept => "concept",
            Intent::ExactText => "exact_text",
            Intent::SimilarCode => "similar_code",
        }
    }

    /// Parse a wire value; `auto` maps to `None` (router decides).
    pub fn parse(value: &str) -> Option<Option<Intent>> {
        match value {
            "auto" => Some(None),
            "definition" => Some(Some(Intent::Definition)),
            "usage" => Some(Some(Intent::Usage)),
            "concept" => Some(Some(Intent::Concept)),
            "exact_text" => Some(Some(Intent::ExactText)),
            "similar_code" => Some(Some(Intent::SimilarCode)),
            _ => None,
        }
    }
}

fn usage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)where is .+ used").unwrap())
}

fn error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)error:|exception|traceback").unwrap())
}

fn call_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\(").unwrap())
}

fn qualified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(\.|::)[A-Za-z_][A-Za-z0-9_]*").unwrap()
    })
}

fn camel_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z][a-z0-9]+[A-Z][A-Za-z0-9]*\b|\b[a-z]+[A-Z][A-Za-z0-9]*\b").unwrap())
}

const CODE_TOKENS: &[&str] = &["class", "function", "def", "import", "export", "return"];

/// Route a query to an intent. First matching rule wins.
pub fn route(query: &str) -> Intent {
    let lower = query.to_lowercase();

    // Usage phrasing.
    if lower.contains("where used") || lower.contains("find usages") || usage_re().is_match(query)
    {
        return Intent::Usage;
    }

    // Quoted fragments or error-report vocabulary.
    if query.contains('"')
        || query.contains('\'')
        || query.contains('`')
        || error_re().is_match(query)
    {
        return Intent::ExactText;
    }

    // Pasted-code shape.
    if query.contains('\n')
        || query.contains('{')
        || query.contains(';')
        || query.contains('}')
        || query.contains("=>")
        || lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .any(|w| CODE_TOKENS.contains(&w))
    {
        return Intent::SimilarCode;
    }

    // Identifier-shaped queries.
    if call_like_re().is_match(query)
        || qualified_re().is_match(query)
        || camel_case_re().is_match(query)
        || lower.contains("defined")
        || lower.contains("definition")
    {
        return Intent::Definition;
    }

    Intent::Concept
}

/// Token extraction for the usage intent: prefer backtick-quoted, then
/// quoted, then the last non-stopword token; normalize a qualified name to
/// its trailing identifier segment.
pub fn usage_token(query: &str) -> Option<String> {
    if let Some(token) = between(query, '`') {
        return Some(trailing_segment(&token));
    }
    if let Some(token) = between(query, '"').or_else(|| between(query, '\'')) {
        return Some(trailing_segment(&token));
    }

    const STOPWORDS: &[&str] = &[
        "where", "is", "are", "the", "a", "an", "of", "in", "used", "usages", "usage", "find",
        "for", "to", "show", "me", "all", "references",
    ];
    query
        .split(|c: char| c.is_whitespace() || c == '?' || c == ',')
        .filter(|w| !w.is_empty())
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .next_back()
        .map(trailing_segment)
}

fn between(query: &str, quote: char) -> Option<String> {
    let start = query.find(quote)?;
    let rest = &query[start + quote.len_utf8()..];
    let end = rest.find(quote)?;
    let inner = rest[..end].trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

/// `a.b.C` / `a::b::C` → `C`; strips a trailing call parenthesis.
fn trailing_segment<S: AsRef<str>>(token: S) -> String {
    let token = token.as_ref().trim().trim_end_matches("()").trim_end_matches('(');
    token
        .rsplit(['.', ':'])
        .next()
        .unwrap_or(token)
        .to_string()
}
