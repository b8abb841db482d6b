//! Retrieval eval harness.
//!
//! Generates queries from the indexed symbols themselves — name lookups,
//! qualified-name lookups, and concept queries from docstrings — runs them
//! through the search engine, and scores the results against the file the
//! symbol came from. Reported metrics: MRR, recall@k, hit@1, and p50/p95
//! latency.

use serde::Serialize;
use std::time::Instant;

use crate::engine::Engine;
use crate::error::Result;
use crate::model::{SearchHit, SymbolRow};
use crate::search::SearchRequest;

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub k: usize,
    pub max_queries: usize,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            k: 10,
            max_queries: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalReport {
    pub queries: usize,
    pub mrr: f64,
    pub recall_at_k: f64,
    pub hit_at_1: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// One generated query with its expected file.
struct EvalCase {
    query: String,
    expected_path: String,
}

fn generate_cases(symbols: &[SymbolRow], max: usize) -> Vec<EvalCase> {
    let mut cases = Vec::new();
    for symbol in symbols {
        if cases.len() >= max {
            break;
        }
        cases.push(EvalCase {
            query: symbol.symbol_name.clone(),
            expected_path: symbol.file_path.clone(),
        });
        if symbol.qualname != symbol.symbol_name && cases.len() < max {
            cases.push(EvalCase {
                query: symbol.qualname.clone(),
                expected_path: symbol.file_path.clone(),
            });
        }
        if let Some(doc) = &symbol.docstring {
            let concept: String = doc
                .split_whitespace()
                .take(6)
                .collect::<Vec<_>>()
                .join(" ");
            if concept.split_whitespace().count() >= 3 && cases.len() < max {
                cases.push(EvalCase {
                    query: concept,
                    expected_path: symbol.file_path.clone(),
                });
            }
        }
    }
    cases
}

/// Rank (0-based) of the first hit from the expected file, across all
/// response groups in score order.
fn rank_of(hits: &[&SearchHit], expected_path: &str) -> Option<usize> {
    hits.iter().position(|h| h.file_path == expected_path)
}

/// Run the harness against an indexed engine.
pub async fn run_eval(engine: &Engine, opts: EvalOptions) -> Result<EvalReport> {
    let symbols = engine.store().sample_symbols(opts.max_queries * 2).await?;
    let cases = generate_cases(&symbols, opts.max_queries);

    let mut mrr_sum = 0.0;
    let mut recalled = 0usize;
    let mut first_hits = 0usize;
    let mut latencies_ms: Vec<u64> = Vec::with_capacity(cases.len());

    for case in &cases {
        let started = Instant::now();
        let response = engine
            .search(&SearchRequest {
                query: case.query.clone(),
                k: opts.k,
                ..Default::default()
            })
            .await?;
        latencies_ms.push(started.elapsed().as_millis() as u64);

        let mut hits: Vec<&SearchHit> = response
            .groups
            .definitions
            .iter()
            .chain(response.groups.usages.iter())
            .chain(response.groups.files.iter())
            .chain(response.groups.blocks.iter())
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(opts.k);

        if let Some(rank) = rank_of(&hits, &case.expected_path) {
            mrr_sum += 1.0 / (rank as f64 + 1.0);
            recalled += 1;
            if rank == 0 {
                first_hits += 1;
            }
        }
    }

    latencies_ms.sort_unstable();
    let total = cases.len().max(1) as f64;

    Ok(EvalReport {
        queries: cases.len(),
        mrr: mrr_sum / total,
        recall_at_k: recalled as f64 / total,
        hit_at_1: first_hits as f64 / total,
        p50_ms: percentile(&latencies_ms, 50),
        p95_ms: percentile(&latencies_ms, 95),
    })
}

fn percentile(sorted: &[u64], pct: usize) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = (sorted.len() * pct).div_ceil(100).saturating_sub(1);
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SymbolKind, TokenFacts};

    fn symbol(name: &str, qualname: &str, path: &str, doc: Option<&str>) -> SymbolRow {
        SymbolRow {
            symbol_id: name.to_string(),
            repo_id: "r".into(),
            revision: "v".into(),
            file_path: path.to_string(),
            extension: "py".into(),
            language_hint: "python".into(),
            start_line: 1,
            end_line: 2,
            start_byte: 0,
            end_byte: 1,
            symbol_kind: SymbolKind::Function,
            symbol_name: name.to_string(),
            qualname: qualname.to_string(),
            parent_symbol_id: None,
            signature: None,
            docstring: doc.map(|d| d.to_string()),
            is_exported: true,
            decorator_names: vec![],
            context_header: String::new(),
            code_text: String::new(),
            search_text: String::new(),
            facts: TokenFacts::default(),
            content_hash: String::new(),
            file_hash: String::new(),
            embed_hash: String::new(),
            vec_summary: vec![],
        }
    }

    #[test]
    fn cases_cover_name_qualname_and_concept() {
        let symbols = vec![symbol(
            "greet",
            "Greeter.greet",
            "g.py",
            Some("Return a friendly greeting for the given user"),
        )];
        let cases = generate_cases(&symbols, 10);
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].query, "greet");
        assert_eq!(cases[1].query, "Greeter.greet");
        assert!(cases[2].query.starts_with("Return a friendly"));
    }

    #[test]
    fn case_generation_respects_cap() {
        let symbols: Vec<SymbolRow> = (0..20)
            .map(|i| symbol(&format!("f{}", i), &format!("f{}", i), "x.py", None))
            .collect();
        let cases = generate_cases(&symbols, 5);
        assert_eq!(cases.len(), 5);
    }

    #[test]
    fn percentile_bounds() {
        let sorted = vec![1, 2, 3, 4, 100];
        assert_eq!(percentile(&sorted, 50), 3);
        assert_eq!(percentile(&sorted, 95), 100);
        assert_eq!(percentile(&[], 50), 0);
    }
}
