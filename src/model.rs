//! Entity rows, search response types, and content hashing.
//!
//! Four entity tables flow through the pipeline: `symbols` (named
//! definitions), `chunks` (oversized bodies and markdown sections), `files`
//! (one summary row per indexed file), and `refs` (token occurrences used
//! for usage navigation). Every row carries the `file_hash` that produced it
//! so delete-by-path stays exact across re-indexing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compile-time schema version. A persisted manifest with a different value
/// makes the index incompatible until a forced rebuild.
pub const SCHEMA_VERSION: u32 = 2;

/// Hex SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable identifier: hex SHA-256 of `|`-joined key parts, truncated to
/// 32 hex chars. Deterministic across runs for identical content.
pub fn stable_id(parts: &[&str]) -> String {
    let joined = parts.join("|");
    let mut id = sha256_hex(joined.as_bytes());
    id.truncate(32);
    id
}

// ═══════════════════════════════════════════════════════════════════════
// Kinds
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    StatementGroup,
    MarkdownSection,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::StatementGroup => "statement_group",
            ChunkKind::MarkdownSection => "markdown_section",
            ChunkKind::Block => "block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Import,
    Call,
    Identifier,
    StringLiteral,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Import => "import",
            RefKind::Call => "call",
            RefKind::Identifier => "identifier",
            RefKind::StringLiteral => "string_literal",
        }
    }

    /// Dedup priority when the same span is claimed by several scanners.
    pub fn priority(&self) -> u8 {
        match self {
            RefKind::Import => 3,
            RefKind::Call => 2,
            RefKind::Identifier => 1,
            RefKind::StringLiteral => 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Entity rows
// ═══════════════════════════════════════════════════════════════════════

/// Deterministic token facts shared by symbol and chunk rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenFacts {
    pub identifiers: Vec<String>,
    /// Subword parts of identifiers (camelCase / snake_case segments).
    pub identifier_parts: Vec<String>,
    pub called_names: Vec<String>,
    pub string_literals: Vec<String>,
}

/// One row per named definition (function, method, class).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRow {
    pub symbol_id: String,
    pub repo_id: String,
    pub revision: String,
    pub file_path: String,
    pub extension: String,
    pub language_hint: String,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub symbol_kind: SymbolKind,
    pub symbol_name: String,
    /// `Class.method` for methods, otherwise the plain name.
    pub qualname: String,
    pub parent_symbol_id: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub is_exported: bool,
    pub decorator_names: Vec<String>,
    pub context_header: String,
    pub code_text: String,
    /// Concatenated name/qualname/signature/docstring/identifiers for FTS.
    pub search_text: String,
    pub facts: TokenFacts,
    pub content_hash: String,
    pub file_hash: String,
    /// SHA-256 of the exact string fed to the embedding provider.
    pub embed_hash: String,
    pub vec_summary: Vec<f32>,
}

/// One row per oversized body or markdown section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub repo_id: String,
    pub revision: String,
    pub file_path: String,
    pub extension: String,
    pub language_hint: String,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub owner_symbol_id: Option<String>,
    pub chunk_kind: ChunkKind,
    pub context_header: String,
    pub code_text: String,
    pub search_text: String,
    pub facts: TokenFacts,
    pub content_hash: String,
    pub file_hash: String,
    pub embed_hash: String,
    pub vec_code: Vec<f32>,
}

/// One row per indexed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub file_id: String,
    pub file_path: String,
    pub extension: String,
    pub file_hash: String,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub top_level_doc: Option<String>,
    /// Pretty-printed composite of path, exports, imports, and top-level doc.
    pub file_summary_text: String,
    pub embed_hash: String,
    pub vec_file: Vec<f32>,
}

/// One row per retained token occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefRow {
    pub ref_id: String,
    pub file_path: String,
    pub extension: String,
    pub file_hash: String,
    pub start_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub ref_kind: RefKind,
    pub token_text: String,
    /// ±80 chars around the occurrence, whitespace-normalized.
    pub context_snippet: String,
    pub module_name: Option<String>,
    pub imported_name: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Search response
// ═══════════════════════════════════════════════════════════════════════

/// One ranked channel contribution to a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHit {
    /// `fts` or `vector`.
    pub channel: String,
    /// The column the channel searched, e.g. `symbols.symbol_name`.
    pub source: String,
    /// 0-based rank within the channel.
    pub rank: usize,
    #[serde(rename = "rawScore")]
    pub raw_score: f64,
}

/// One multiplicative prior applied after fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorApplied {
    pub name: String,
    pub value: f64,
    pub note: String,
}

/// Explainable scoring record attached to a hit when `explain=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explain {
    pub channels: Vec<ChannelHit>,
    pub priors: Vec<PriorApplied>,
}

/// A single search hit in any response group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub table: String,
    pub id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why: Option<Explain>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchGroups {
    pub definitions: Vec<SearchHit>,
    pub usages: Vec<SearchHit>,
    pub files: Vec<SearchHit>,
    pub blocks: Vec<SearchHit>,
}

/// A deterministic follow-up recommendation derived from the top hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAction {
    pub tool: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub intent_used: String,
    pub filters_applied: Vec<String>,
    pub groups: SearchGroups,
    pub suggested_next_actions: Vec<NextAction>,
}

/// Usage hits grouped by file, ordered by start line within each file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsagesByFile {
    pub file_path: String,
    pub refs: Vec<RefRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindUsagesResponse {
    pub symbol_name: String,
    pub by_file: Vec<UsagesByFile>,
    pub total_refs: usize,
}

// ═══════════════════════════════════════════════════════════════════════
// Indexing stats
// ═══════════════════════════════════════════════════════════════════════

/// Aggregate counts for one indexing run, persisted into the manifest and
/// returned to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files_scanned: u64,
    pub file_count: u64,
    pub files_new: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    pub symbols_added: u64,
    pub chunks_added: u64,
    pub refs_added: u64,
    pub rows_deleted: u64,
    pub embeddings_cached: u64,
    pub embeddings_computed: u64,
    pub duration_ms: u64,
}
