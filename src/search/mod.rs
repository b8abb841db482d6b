//! Hybrid intent-routed retrieval.
//!
//! A query is routed to one of five intents (or the caller pins one), each
//! intent queries its own set of FTS and vector channels, and the channel
//! lists are fused with reciprocal-rank fusion plus explainable priors.
//! Besides `search`, the engine answers `get_symbol`, `find_usages`, and
//! `expand_context`.

pub mod fuse;
pub mod intent;
pub mod scope;

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetrievalTuning;
use crate::embed::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::model::{
    ChunkRow, Explain, FileRow, FindUsagesResponse, NextAction, RefKind, RefRow, SearchGroups,
    SearchHit, SearchResponse, SymbolRow, UsagesByFile,
};
use crate::store::{ChannelCandidate, Store};
use fuse::{apply_prior, apply_test_demotion, rrf_fuse, select_with_diversity, ChannelResult, Fused};
use intent::Intent;
use scope::Scope;

/// Search request after parameter validation.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    /// `None` = auto-route.
    pub intent: Option<Intent>,
    pub scope: Scope,
    pub k: usize,
    pub explain: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            intent: None,
            scope: Scope::default(),
            k: 10,
            explain: false,
        }
    }
}

/// Borrowed retrieval dependencies.
pub struct Searcher<'a> {
    pub store: &'a Store,
    pub provider: &'a Arc<dyn EmbeddingProvider>,
    pub tuning: &'a RetrievalTuning,
}

impl<'a> Searcher<'a> {
    pub fn new(
        store: &'a Store,
        provider: &'a Arc<dyn EmbeddingProvider>,
        tuning: &'a RetrievalTuning,
    ) -> Self {
        Self {
            store,
            provider,
            tuning,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // search
    // ═══════════════════════════════════════════════════════════════════

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        let intent = req.intent.unwrap_or_else(|| intent::route(&req.query));
        let scope_sql = req.scope.to_sql();

        let channels = match intent {
            Intent::Definition => {
                self.definition_channels(&req.query, req.k, &scope_sql, false)
                    .await?
            }
            Intent::Concept => self.concept_channels(&req.query, req.k, &scope_sql).await?,
            Intent::ExactText => self.exact_text_channels(&req.query, req.k, &scope_sql).await?,
            Intent::SimilarCode => {
                self.similar_code_channels(&req.query, req.k, &scope_sql).await?
            }
            Intent::Usage => self.usage_channels(&req.query, req.k, &scope_sql).await?,
        };

        let fused = rrf_fuse(channels, self.tuning);
        let (rows, ranked) = self.rerank(fused, intent, req.k).await?;
        let groups = build_groups(&ranked, &rows, req.explain, &req.query);
        let suggested_next_actions = next_actions(&groups);

        Ok(SearchResponse {
            intent_used: intent.as_str().to_string(),
            filters_applied: req.scope.describe(),
            groups,
            suggested_next_actions,
        })
    }

    /// Definition intent: four channels over the symbols table.
    async fn definition_channels(
        &self,
        query: &str,
        k: usize,
        scope_sql: &str,
        smaller: bool,
    ) -> Result<Vec<ChannelResult>> {
        let t = self.tuning;
        // The concept intent reuses this plan at half the oversampling.
        let (factor, floor) = if smaller {
            (
                (t.definition_oversample_factor / 2).max(1),
                t.definition_oversample_floor / 2,
            )
        } else {
            (t.definition_oversample_factor, t.definition_oversample_floor)
        };
        let k_eff = (factor * k.max(1))
            .max(floor)
            .min(t.definition_oversample_cap);

        let name_expr = trigram_expr(query);
        let words_expr = words_expr(query);

        let (names, quals, idents, vectors) = tokio::join!(
            self.store
                .fts_search("symbols", "symbol_name", &name_expr, k_eff, scope_sql),
            self.store
                .fts_search("symbols", "qualname", &name_expr, k_eff, scope_sql),
            self.store
                .fts_search("symbols", "identifiers_text", &words_expr, k_eff, scope_sql),
            self.vector_channel("symbols", "vec_summary", query, k_eff, scope_sql),
        );

        Ok(vec![
            fts_channel("symbols", "symbols.symbol_name", names?),
            fts_channel("symbols", "symbols.qualname", quals?),
            fts_channel("symbols", "symbols.identifiers_text", idents?),
            vector_channel_result("symbols", "symbols.vec_summary", vectors),
        ])
    }

    /// Concept intent: files, definitions, and chunks subqueries in parallel.
    async fn concept_channels(
        &self,
        query: &str,
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelResult>> {
        let k_eff = (self.tuning.definition_oversample_factor * k.max(1))
            .max(self.tuning.definition_oversample_floor)
            .min(self.tuning.definition_oversample_cap);
        let words = words_expr(query);

        let (file_fts, file_vec, definitions, chunk_idents, chunk_search, chunk_vec) = tokio::join!(
            self.store
                .fts_search("files", "file_summary_text", &words, k_eff, scope_sql),
            self.vector_channel("files", "vec_file", query, k_eff, scope_sql),
            self.definition_channels(query, k, scope_sql, true),
            self.store
                .fts_search("chunks", "identifiers_text", &words, k_eff, scope_sql),
            self.store
                .fts_search("chunks", "search_text", &words, k_eff, scope_sql),
            self.vector_channel("chunks", "vec_code", query, k_eff, scope_sql),
        );

        let mut channels = vec![
            fts_channel("files", "files.file_summary_text", file_fts?),
            vector_channel_result("files", "files.vec_file", file_vec),
            fts_channel("chunks", "chunks.identifiers_text", chunk_idents?),
            fts_channel("chunks", "chunks.search_text", chunk_search?),
            vector_channel_result("chunks", "chunks.vec_code", chunk_vec),
        ];
        channels.extend(definitions?);
        Ok(channels)
    }

    /// Exact-text intent: positional FTS over chunk bodies; no vector
    /// channel.
    async fn exact_text_channels(
        &self,
        query: &str,
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelResult>> {
        let k_eff = (self.tuning.definition_oversample_factor * k.max(1))
            .max(self.tuning.definition_oversample_floor)
            .min(self.tuning.definition_oversample_cap);
        let literal = exact_literal(query);
        let expr = phrase_expr(&literal);
        let hits = self
            .store
            .fts_search("chunks", "code_text", &expr, k_eff, scope_sql)
            .await?;
        Ok(vec![fts_channel("chunks", "chunks.code_text", hits)])
    }

    /// Similar-code intent: vector-only over chunk bodies.
    async fn similar_code_channels(
        &self,
        query: &str,
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelResult>> {
        let k_eff = (self.tuning.definition_oversample_factor * k.max(1))
            .max(self.tuning.definition_oversample_floor)
            .min(self.tuning.definition_oversample_cap);
        let hits = self
            .vector_channel("chunks", "vec_code", query, k_eff, scope_sql)
            .await;
        Ok(vec![vector_channel_result("chunks", "chunks.vec_code", hits)])
    }

    /// Usage intent: token-level FTS over refs.
    async fn usage_channels(
        &self,
        query: &str,
        k: usize,
        scope_sql: &str,
    ) -> Result<Vec<ChannelResult>> {
        let Some(token) = intent::usage_token(query) else {
            return Ok(Vec::new());
        };
        let k_eff =
            (self.tuning.usage_oversample_factor * k.max(1)).max(self.tuning.usage_oversample_floor);
        let hits = self
            .store
            .fts_search("refs", "token_text", &phrase_expr(&token), k_eff, scope_sql)
            .await?;
        Ok(vec![fts_channel("refs", "refs.token_text", hits)])
    }

    /// Vector channel helper; a failed query embedding degrades to an empty
    /// channel with a warning instead of failing the search.
    async fn vector_channel(
        &self,
        table: &'static str,
        column: &str,
        query: &str,
        k: usize,
        scope_sql: &str,
    ) -> Vec<ChannelCandidate> {
        let cancel = CancellationToken::new();
        let query_vec = match self.provider.embed_single(query, &cancel).await {
            Ok(vec) => vec,
            Err(e) => {
                warn!(error = %e, "query embedding failed; vector channel skipped");
                return Vec::new();
            }
        };
        match self
            .store
            .vector_search(table, column, &query_vec, k, scope_sql)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector search failed; channel skipped");
                Vec::new()
            }
        }
    }

    /// Hydrate fused candidates, apply metadata priors, and run diversity
    /// selection.
    async fn rerank(
        &self,
        fused: Vec<Fused>,
        intent: Intent,
        k: usize,
    ) -> Result<(HydratedRows, Vec<Fused>)> {
        let rows = self.hydrate(&fused).await?;

        let mut with_priors = Vec::with_capacity(fused.len());
        for mut candidate in fused {
            match candidate.table {
                "symbols" => {
                    if intent == Intent::Definition {
                        if let Some(symbol) = rows.symbols.get(&candidate.id) {
                            if symbol.is_exported {
                                apply_prior(
                                    &mut candidate,
                                    "export_boost",
                                    self.tuning.export_boost,
                                    "exported symbol",
                                );
                            }
                        }
                    }
                }
                "refs" => {
                    if intent == Intent::Usage {
                        if let Some(r) = rows.refs.get(&candidate.id) {
                            let (value, note) = match r.ref_kind {
                                RefKind::Call => (self.tuning.prior_call, "call site"),
                                RefKind::Import => (self.tuning.prior_import, "import"),
                                RefKind::StringLiteral => {
                                    (self.tuning.prior_string_literal, "string literal")
                                }
                                RefKind::Identifier => {
                                    (self.tuning.prior_identifier, "identifier")
                                }
                            };
                            apply_prior(&mut candidate, "ref_kind_prior", value, note);
                        }
                    }
                }
                _ => {}
            }
            apply_test_demotion(&mut candidate, self.tuning);
            with_priors.push(candidate);
        }

        let selected = select_with_diversity(with_priors, k.max(1), self.tuning);
        Ok((rows, selected))
    }

    async fn hydrate(&self, fused: &[Fused]) -> Result<HydratedRows> {
        let mut ids: HashMap<&'static str, Vec<String>> = HashMap::new();
        for candidate in fused {
            ids.entry(candidate.table).or_default().push(candidate.id.clone());
        }

        let mut rows = HydratedRows::default();
        if let Some(symbol_ids) = ids.get("symbols") {
            for row in self.store.get_symbols_by_ids(symbol_ids).await? {
                rows.symbols.insert(row.symbol_id.clone(), row);
            }
        }
        if let Some(chunk_ids) = ids.get("chunks") {
            for row in self.store.get_chunks_by_ids(chunk_ids).await? {
                rows.chunks.insert(row.chunk_id.clone(), row);
            }
        }
        if let Some(file_ids) = ids.get("files") {
            for row in self.store.get_files_by_ids(file_ids).await? {
                rows.files.insert(row.file_id.clone(), row);
            }
        }
        if let Some(ref_ids) = ids.get("refs") {
            for row in self.store.get_refs_by_ids(ref_ids).await? {
                rows.refs.insert(row.ref_id.clone(), row);
            }
        }
        Ok(rows)
    }

    // ═══════════════════════════════════════════════════════════════════
    // getSymbol / findUsages / expandContext
    // ═══════════════════════════════════════════════════════════════════

    pub async fn get_symbol(&self, symbol_id: &str) -> Result<Option<SymbolRow>> {
        self.store.get_symbol(symbol_id).await
    }

    pub async fn find_usages(
        &self,
        symbol_id: Option<&str>,
        symbol_name: Option<&str>,
        scope: &Scope,
        k: usize,
    ) -> Result<FindUsagesResponse> {
        let name = match (symbol_id, symbol_name) {
            (Some(id), _) => {
                let symbol = self
                    .store
                    .get_symbol(id)
                    .await?
                    .ok_or_else(|| Error::InvalidParams(format!("unknown symbol_id: {}", id)))?;
                symbol.symbol_name
            }
            (None, Some(name)) => name.to_string(),
            (None, None) => {
                return Err(Error::InvalidParams(
                    "findUsages requires symbol_id or symbol_name".to_string(),
                ));
            }
        };

        let k_eff =
            (self.tuning.usage_oversample_factor * k.max(1)).max(self.tuning.usage_oversample_floor);
        let candidates = self
            .store
            .fts_search("refs", "token_text", &phrase_expr(&name), k_eff, &scope.to_sql())
            .await?;

        let fused = rrf_fuse(
            vec![fts_channel("refs", "refs.token_text", candidates)],
            self.tuning,
        );
        let (rows, ranked) = self.rerank(fused, Intent::Usage, k_eff).await?;

        let mut hits: Vec<&RefRow> = ranked
            .iter()
            .filter_map(|c| rows.refs.get(&c.id))
            .collect();

        // Exact token matches dominate when present.
        let exact: Vec<&RefRow> = hits
            .iter()
            .copied()
            .filter(|r| r.token_text == name)
            .collect();
        if !exact.is_empty() {
            hits = exact;
        }

        let total_refs = hits.len();
        let mut by_file_map: HashMap<String, Vec<RefRow>> = HashMap::new();
        for r in hits {
            by_file_map.entry(r.file_path.clone()).or_default().push(r.clone());
        }
        let mut by_file: Vec<UsagesByFile> = by_file_map
            .into_iter()
            .map(|(file_path, mut refs)| {
                refs.sort_by_key(|r| (r.start_line, r.start_byte));
                UsagesByFile { file_path, refs }
            })
            .collect();
        by_file.sort_by(|a, b| a.file_path.cmp(&b.file_path));

        Ok(FindUsagesResponse {
            symbol_name: name,
            by_file,
            total_refs,
        })
    }

    pub async fn expand_context(
        &self,
        table: &str,
        id: &str,
        limit: usize,
    ) -> Result<ExpandResponse> {
        let limit = limit.max(1);
        match table {
            "symbols" => {
                let symbol = self
                    .store
                    .get_symbol(id)
                    .await?
                    .ok_or_else(|| Error::InvalidParams(format!("unknown symbol: {}", id)))?;
                let siblings = self
                    .store
                    .symbols_in_file(&symbol.file_path, limit + 1)
                    .await?
                    .into_iter()
                    .filter(|s| s.symbol_id != symbol.symbol_id)
                    .take(limit)
                    .map(symbol_neighbor)
                    .collect();
                let owned = self
                    .store
                    .chunks_owned_by(&symbol.symbol_id, limit)
                    .await?
                    .into_iter()
                    .map(chunk_neighbor)
                    .collect();
                Ok(ExpandResponse {
                    table: "symbols".to_string(),
                    id: id.to_string(),
                    file_path: symbol.file_path.clone(),
                    symbols: siblings,
                    chunks: owned,
                    owner: None,
                })
            }
            "chunks" => {
                let chunk = self
                    .store
                    .get_chunks_by_ids(&[id.to_string()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::InvalidParams(format!("unknown chunk: {}", id)))?;
                let siblings = self
                    .store
                    .chunks_in_file(&chunk.file_path, limit + 1)
                    .await?
                    .into_iter()
                    .filter(|c| c.chunk_id != chunk.chunk_id)
                    .take(limit)
                    .map(chunk_neighbor)
                    .collect();
                let symbols = self
                    .store
                    .symbols_in_file(&chunk.file_path, limit)
                    .await?
                    .into_iter()
                    .map(symbol_neighbor)
                    .collect();
                let owner = match &chunk.owner_symbol_id {
                    Some(owner_id) => self
                        .store
                        .get_symbol(owner_id)
                        .await?
                        .map(|s| symbol_neighbor(s)),
                    None => None,
                };
                Ok(ExpandResponse {
                    table: "chunks".to_string(),
                    id: id.to_string(),
                    file_path: chunk.file_path.clone(),
                    symbols,
                    chunks: siblings,
                    owner,
                })
            }
            "files" => {
                let file = self
                    .store
                    .get_files_by_ids(&[id.to_string()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::InvalidParams(format!("unknown file: {}", id)))?;
                let symbols = self
                    .store
                    .symbols_in_file(&file.file_path, limit)
                    .await?
                    .into_iter()
                    .map(symbol_neighbor)
                    .collect();
                Ok(ExpandResponse {
                    table: "files".to_string(),
                    id: id.to_string(),
                    file_path: file.file_path.clone(),
                    symbols,
                    chunks: Vec::new(),
                    owner: None,
                })
            }
            other => Err(Error::InvalidParams(format!(
                "expandContext table must be symbols, chunks, or files; got {}",
                other
            ))),
        }
    }
}

/// A bounded neighbor reference returned by `expand_context`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Neighbor {
    pub table: String,
    pub id: String,
    pub title: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExpandResponse {
    pub table: String,
    pub id: String,
    pub file_path: String,
    pub symbols: Vec<Neighbor>,
    pub chunks: Vec<Neighbor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Neighbor>,
}

fn symbol_neighbor(s: SymbolRow) -> Neighbor {
    Neighbor {
        table: "symbols".to_string(),
        title: s.qualname.clone(),
        id: s.symbol_id,
        file_path: s.file_path,
        start_line: s.start_line,
        end_line: s.end_line,
    }
}

fn chunk_neighbor(c: ChunkRow) -> Neighbor {
    Neighbor {
        table: "chunks".to_string(),
        title: c.context_header.clone(),
        id: c.chunk_id,
        file_path: c.file_path,
        start_line: c.start_line,
        end_line: c.end_line,
    }
}

#[derive(Debug, Default)]
struct HydratedRows {
    symbols: HashMap<String, SymbolRow>,
    chunks: HashMap<String, ChunkRow>,
    files: HashMap<String, FileRow>,
    refs: HashMap<String, RefRow>,
}

fn fts_channel(
    table: &'static str,
    source: &str,
    candidates: Vec<ChannelCandidate>,
) -> ChannelResult {
    ChannelResult {
        channel: "fts",
        source: source.to_string(),
        table,
        candidates,
    }
}

fn vector_channel_result(
    table: &'static str,
    source: &str,
    candidates: Vec<ChannelCandidate>,
) -> ChannelResult {
    ChannelResult {
        channel: "vector",
        source: source.to_string(),
        table,
        candidates,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Match expressions
// ═══════════════════════════════════════════════════════════════════════

/// Word tokens of the query, each as a quoted FTS term, OR-joined.
fn words_expr(query: &str) -> String {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 1)
        .map(|w| format!("\"{}\"", w.replace('"', "")))
        .collect();
    words.join(" OR ")
}

/// Trigram-friendly expression: identifier-shaped tokens of length ≥ 3,
/// quoted, OR-joined.
fn trigram_expr(query: &str) -> String {
    let words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() >= 3)
        .map(|w| format!("\"{}\"", w.replace('"', "")))
        .collect();
    words.join(" OR ")
}

/// One exact phrase; embedded double quotes are doubled per FTS5 string
/// syntax.
fn phrase_expr(text: &str) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return String::new();
    }
    format!("\"{}\"", cleaned.replace('"', "\"\""))
}

/// The literal to search for under exact_text: the first quoted fragment if
/// any, otherwise the whole query.
fn exact_literal(query: &str) -> String {
    for quote in ['`', '"', '\''] {
        if let Some(start) = query.find(quote) {
            let rest = &query[start + 1..];
            if let Some(end) = rest.find(quote) {
                let inner = rest[..end].trim();
                if !inner.is_empty() {
                    return inner.to_string();
                }
            }
        }
    }
    query.trim().to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Response assembly
// ═══════════════════════════════════════════════════════════════════════

fn snippet_of(text: &str, max: usize) -> String {
    let mut out = String::new();
    for line in text.lines() {
        if out.len() + line.len() > max && !out.is_empty() {
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
        if out.len() >= max {
            break;
        }
    }
    out.chars().take(max).collect()
}

/// For exact-text hits, prefer the line containing the literal.
fn matching_line_snippet(text: &str, needle: &str) -> Option<String> {
    text.lines()
        .find(|l| l.contains(needle))
        .map(|l| l.trim().to_string())
}

fn build_groups(
    ranked: &[Fused],
    rows: &HydratedRows,
    explain: bool,
    query: &str,
) -> SearchGroups {
    let needle = exact_literal(query);
    let mut groups = SearchGroups::default();

    for candidate in ranked {
        let why = explain.then(|| Explain {
            channels: candidate.channels.clone(),
            priors: candidate.priors.clone(),
        });

        match candidate.table {
            "symbols" => {
                let Some(s) = rows.symbols.get(&candidate.id) else { continue };
                groups.definitions.push(SearchHit {
                    table: "symbols".to_string(),
                    id: s.symbol_id.clone(),
                    file_path: s.file_path.clone(),
                    start_line: s.start_line,
                    end_line: s.end_line,
                    title: s.qualname.clone(),
                    snippet: s
                        .signature
                        .clone()
                        .unwrap_or_else(|| snippet_of(&s.code_text, 200)),
                    score: candidate.score,
                    why,
                });
            }
            "refs" => {
                let Some(r) = rows.refs.get(&candidate.id) else { continue };
                groups.usages.push(SearchHit {
                    table: "refs".to_string(),
                    id: r.ref_id.clone(),
                    file_path: r.file_path.clone(),
                    start_line: r.start_line,
                    end_line: r.start_line,
                    title: r.token_text.clone(),
                    snippet: r.context_snippet.clone(),
                    score: candidate.score,
                    why,
                });
            }
            "files" => {
                let Some(f) = rows.files.get(&candidate.id) else { continue };
                groups.files.push(SearchHit {
                    table: "files".to_string(),
                    id: f.file_id.clone(),
                    file_path: f.file_path.clone(),
                    start_line: 1,
                    end_line: 1,
                    title: f.file_path.clone(),
                    snippet: snippet_of(&f.file_summary_text, 240),
                    score: candidate.score,
                    why,
                });
            }
            "chunks" => {
                let Some(c) = rows.chunks.get(&candidate.id) else { continue };
                let snippet = matching_line_snippet(&c.code_text, &needle)
                    .unwrap_or_else(|| snippet_of(&c.code_text, 240));
                groups.blocks.push(SearchHit {
                    table: "chunks".to_string(),
                    id: c.chunk_id.clone(),
                    file_path: c.file_path.clone(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    title: c.context_header.clone(),
                    snippet,
                    score: candidate.score,
                    why,
                });
            }
            _ => {}
        }
    }

    groups
}

/// Deterministic follow-up recommendations from the top hits.
fn next_actions(groups: &SearchGroups) -> Vec<NextAction> {
    let mut actions = Vec::new();

    if let Some(def) = groups.definitions.first() {
        actions.push(NextAction {
            tool: "getSymbol".to_string(),
            args: serde_json::json!({ "id": def.id }),
        });
        actions.push(NextAction {
            tool: "findUsages".to_string(),
            args: serde_json::json!({ "symbol_name": def.title.rsplit('.').next().unwrap_or(def.title.as_str()) }),
        });
    }
    if let Some(usage) = groups.usages.first() {
        actions.push(NextAction {
            tool: "openSpan".to_string(),
            args: serde_json::json!({
                "file_path": usage.file_path,
                "start_line": usage.start_line,
                "end_line": usage.end_line,
            }),
        });
    }
    if let Some(block) = groups.blocks.first() {
        actions.push(NextAction {
            tool: "expandContext".to_string(),
            args: serde_json::json!({ "table": "chunks", "id": block.id }),
        });
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_expr_quotes_and_joins() {
        assert_eq!(words_expr("add two numbers"), "\"add\" OR \"two\" OR \"numbers\"");
        assert_eq!(words_expr("a"), "");
    }

    #[test]
    fn trigram_expr_drops_short_tokens() {
        assert_eq!(trigram_expr("do HttpClient go"), "\"HttpClient\"");
    }

    #[test]
    fn phrase_expr_escapes_quotes() {
        assert_eq!(phrase_expr("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(phrase_expr("  "), "");
    }

    #[test]
    fn exact_literal_prefers_quoted_fragment() {
        assert_eq!(exact_literal("find \"ECONNRESET\" here"), "ECONNRESET");
        assert_eq!(exact_literal("`retry`"), "retry");
        assert_eq!(exact_literal("plain text"), "plain text");
    }

    #[test]
    fn snippet_respects_bounds() {
        let text = "line one\nline two\nline three";
        let s = snippet_of(text, 12);
        assert!(s.len() <= 12);
        assert!(s.starts_with("line one"));
    }

    #[test]
    fn matching_line_found() {
        let text = "a\nconst e = 'ECONNRESET';\nb";
        assert_eq!(
            matching_line_snippet(text, "ECONNRESET").as_deref(),
            Some("const e = 'ECONNRESET';")
        );
        assert!(matching_line_snippet(text, "missing").is_none());
    }
}
