//! Reciprocal-rank fusion and explainable rerank priors.
//!
//! Candidates from every channel are merged with
//! `score = Σ_c w_c / (K + rank_c + 1)`; post-fusion priors multiply the
//! fused score and are recorded on the candidate so `explain=true` can show
//! exactly why a hit ranked where it did. The per-file diversity penalty is
//! applied greedily during final selection.

use std::collections::HashMap;

use crate::config::RetrievalTuning;
use crate::model::{ChannelHit, PriorApplied};
use crate::store::ChannelCandidate;

/// One ranked list produced by a single retriever.
pub struct ChannelResult {
    /// `fts` or `vector`.
    pub channel: &'static str,
    /// Searched column, e.g. `symbols.symbol_name`.
    pub source: String,
    /// Entity table the ids belong to.
    pub table: &'static str,
    pub candidates: Vec<ChannelCandidate>,
}

/// A fused candidate before hydration.
#[derive(Debug, Clone)]
pub struct Fused {
    pub table: &'static str,
    pub id: String,
    pub file_path: String,
    pub score: f64,
    pub channels: Vec<ChannelHit>,
    pub priors: Vec<PriorApplied>,
}

/// Merge channel lists with reciprocal-rank fusion.
pub fn rrf_fuse(results: Vec<ChannelResult>, tuning: &RetrievalTuning) -> Vec<Fused> {
    let mut by_key: HashMap<(&'static str, String), Fused> = HashMap::new();

    for result in results {
        let weight = match result.channel {
            "vector" => tuning.w_vector,
            _ => tuning.w_fts,
        };
        for (rank, candidate) in result.candidates.into_iter().enumerate() {
            let contribution = weight / (tuning.rrf_k + rank as f64 + 1.0);
            let entry = by_key
                .entry((result.table, candidate.id.clone()))
                .or_insert_with(|| Fused {
                    table: result.table,
                    id: candidate.id.clone(),
                    file_path: candidate.file_path.clone(),
                    score: 0.0,
                    channels: Vec::new(),
                    priors: Vec::new(),
                });
            entry.score += contribution;
            entry.channels.push(ChannelHit {
                channel: result.channel.to_string(),
                source: result.source.clone(),
                rank,
                raw_score: candidate.raw_score,
            });
        }
    }

    let mut fused: Vec<Fused> = by_key.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// Apply one multiplicative prior and record it.
pub fn apply_prior(candidate: &mut Fused, name: &str, value: f64, note: &str) {
    if (value - 1.0).abs() < f64::EPSILON {
        return;
    }
    candidate.score *= value;
    candidate.priors.push(PriorApplied {
        name: name.to_string(),
        value,
        note: note.to_string(),
    });
}

/// Path shapes treated as test code for the demotion prior.
pub fn is_test_path(path: &str) -> bool {
    path.contains("__tests__")
        || path.contains("/test/")
        || path.contains(".spec.")
        || path.contains(".test.")
}

/// Demote test files.
pub fn apply_test_demotion(candidate: &mut Fused, tuning: &RetrievalTuning) {
    if is_test_path(&candidate.file_path) {
        apply_prior(
            candidate,
            "test_path_demotion",
            tuning.test_path_demotion,
            "path looks like test code",
        );
    }
}

/// Greedy top-k selection with the per-file diversity penalty
/// `1 / (1 + n * coeff)` where `n` counts already-selected hits from the
/// same file.
pub fn select_with_diversity(
    mut candidates: Vec<Fused>,
    k: usize,
    tuning: &RetrievalTuning,
) -> Vec<Fused> {
    let mut selected: Vec<Fused> = Vec::with_capacity(k.min(candidates.len()));
    let mut per_file: HashMap<String, usize> = HashMap::new();

    while selected.len() < k && !candidates.is_empty() {
        let (best_idx, penalty) = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let n = per_file.get(&c.file_path).copied().unwrap_or(0);
                let penalty = 1.0 / (1.0 + n as f64 * tuning.diversity_coeff);
                (i, penalty, c.score * penalty)
            })
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, p, _)| (i, p))
            .expect("non-empty candidates");

        let mut chosen = candidates.swap_remove(best_idx);
        if penalty < 1.0 {
            apply_prior(
                &mut chosen,
                "diversity_penalty",
                penalty,
                "earlier hits from the same file",
            );
        }
        *per_file.entry(chosen.file_path.clone()).or_insert(0) += 1;
        selected.push(chosen);
    }

    selected
}
