//! Scope filters: path and extension constraints compiled to one SQL
//! predicate.
//!
//! Quoting is defensive: string literals double embedded single quotes, and
//! LIKE patterns backslash-escape `%` and `_` so user-supplied fragments
//! only ever match literally.

use serde::{Deserialize, Serialize};

/// Caller-supplied result constraints. Every returned hit's `file_path` and
/// `extension` satisfy all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Scope {
    /// OR of prefix matches.
    pub path_prefix: Vec<String>,
    /// AND of substring matches.
    pub path_contains: Vec<String>,
    /// AND of substring exclusions.
    pub path_not_contains: Vec<String>,
    /// IN set of extensions (lowercase, no dot).
    pub extension: Vec<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_empty()
            && self.path_contains.is_empty()
            && self.path_not_contains.is_empty()
            && self.extension.is_empty()
    }

    /// Compile to a predicate over the entity alias `e`, or an empty string
    /// when unconstrained.
    pub fn to_sql(&self) -> String {
        let mut clauses = Vec::new();

        if !self.path_prefix.is_empty() {
            let ors: Vec<String> = self
                .path_prefix
                .iter()
                .map(|p| format!("e.file_path LIKE {} ESCAPE '\\'", like_prefix(p)))
                .collect();
            clauses.push(format!("({})", ors.join(" OR ")));
        }
        for fragment in &self.path_contains {
            clauses.push(format!(
                "e.file_path LIKE {} ESCAPE '\\'",
                like_contains(fragment)
            ));
        }
        for fragment in &self.path_not_contains {
            clauses.push(format!(
                "e.file_path NOT LIKE {} ESCAPE '\\'",
                like_contains(fragment)
            ));
        }
        if !self.extension.is_empty() {
            let items: Vec<String> = self.extension.iter().map(|e| quote_literal(e)).collect();
            clauses.push(format!("e.extension IN ({})", items.join(", ")));
        }

        clauses.join(" AND ")
    }

    /// The same predicate evaluated in Rust; used by tests and by
    /// post-retrieval assertions.
    pub fn matches(&self, file_path: &str, extension: &str) -> bool {
        if !self.path_prefix.is_empty()
            && !self.path_prefix.iter().any(|p| file_path.starts_with(p.as_str()))
        {
            return false;
        }
        if !self.path_contains.iter().all(|f| file_path.contains(f.as_str())) {
            return false;
        }
        if self
            .path_not_contains
            .iter()
            .any(|f| file_path.contains(f.as_str()))
        {
            return false;
        }
        if !self.extension.is_empty() && !self.extension.iter().any(|e| e == extension) {
            return false;
        }
        true
    }

    /// Human-readable filter list for `filters_applied`.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        for p in &self.path_prefix {
            out.push(format!("path_prefix:{}", p));
        }
        for p in &self.path_contains {
            out.push(format!("path_contains:{}", p));
        }
        for p in &self.path_not_contains {
            out.push(format!("path_not_contains:{}", p));
        }
        for e in &self.extension {
            out.push(format!("extension:{}", e));
        }
        out
    }
}

/// `'...'` literal with embedded single quotes doubled.
fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Escape LIKE metacharacters so the fragment matches literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn like_prefix(s: &str) -> String {
    quote_literal(&format!("{}%", escape_like(s)))
}

fn like_contains(s: &str) -> String {
    quote_literal(&format!("%{}%", escape_like(s)))
}
