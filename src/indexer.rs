//! Indexing service: pipeline coordination and global serialization.
//!
//! `run_index` drives one run through its phases: manifest compatibility,
//! Merkle scan and diff, stale-row deletion, chunking and fact extraction,
//! orchestrated embedding, bulk upsert, and manifest commit. Ordering
//! guarantees: the diff completes before any deletes; deletes for modified
//! files complete before their replacement rows are upserted.
//!
//! [`IndexCoordinator`] enforces at most one run per process. A caller that
//! arrives while a run is in flight joins it — it awaits the same outcome
//! instead of starting a second run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chunker::Chunker;
use crate::config::{EngineTuning, RepoConfig};
use crate::embed::orchestrator::embed_all;
use crate::embed::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::events::{EventSink, IndexEvent, IndexPhase};
use crate::facts::{extract_facts, FileExtraction};
use crate::manifest::{load_manifest, save_manifest, Manifest, ManifestCounts, ManifestStatus};
use crate::merkle::{MerkleDiff, MerkleTree};
use crate::model::{IndexStats, SCHEMA_VERSION};
use crate::store::Store;

/// Options for one indexing run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Rebuild everything: reset entity tables and index every file.
    pub force: bool,
}

/// Everything a run needs, borrowed from the owning engine.
pub struct IndexContext<'a> {
    pub repo_root: &'a Path,
    pub config: &'a RepoConfig,
    pub tuning: &'a EngineTuning,
    pub store: &'a Store,
    pub provider: &'a Arc<dyn EmbeddingProvider>,
    /// Parser state is not thread-safe; extraction holds this lock.
    pub chunker: &'a Mutex<Chunker>,
}

type SharedOutcome = Option<std::result::Result<IndexStats, (String, String)>>;

/// Process-wide serialization of indexing with join semantics.
#[derive(Default)]
pub struct IndexCoordinator {
    inflight: Mutex<Option<watch::Receiver<SharedOutcome>>>,
}

impl IndexCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a run holds the indexing slot.
    pub async fn is_running(&self) -> bool {
        self.inflight.lock().await.is_some()
    }

    /// Run `make_future` under the global indexing mutex, or join the run
    /// already in flight and return its outcome.
    pub async fn run_or_join<F, Fut>(&self, make_future: F) -> Result<IndexStats>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<IndexStats>>,
    {
        let (tx, _guard_rx) = {
            let mut slot = self.inflight.lock().await;
            if let Some(rx) = slot.as_ref() {
                let mut rx = rx.clone();
                drop(slot);
                return Self::await_joined(&mut rx).await;
            }
            let (tx, rx) = watch::channel::<SharedOutcome>(None);
            *slot = Some(rx.clone());
            (tx, rx)
        };

        let result = make_future().await;

        let shared = match &result {
            Ok(stats) => Ok(stats.clone()),
            Err(e) => Err((e.wire_code().to_string(), e.to_string())),
        };
        let _ = tx.send(Some(shared));
        *self.inflight.lock().await = None;

        result
    }

    async fn await_joined(rx: &mut watch::Receiver<SharedOutcome>) -> Result<IndexStats> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return match outcome {
                    Ok(stats) => Ok(stats),
                    Err((code, message)) if code == crate::error::code::CANCELLED => {
                        Err(Error::Cancelled(message))
                    }
                    Err((_, message)) => Err(Error::Internal(anyhow::anyhow!(message))),
                };
            }
            if rx.changed().await.is_err() {
                return Err(Error::Internal(anyhow::anyhow!(
                    "indexing run dropped without reporting an outcome"
                )));
            }
        }
    }
}

/// Drive one indexing run, emitting lifecycle events on `events`.
///
/// The terminal event is always one of `complete`, `cancelled`, or `error`,
/// matching the returned value.
pub async fn run_index(
    ctx: &IndexContext<'_>,
    opts: IndexOptions,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<IndexStats> {
    events.emit(IndexEvent::Start);
    let result = run_index_inner(ctx, opts, events, cancel).await;
    match &result {
        Ok(stats) => events.emit(IndexEvent::Complete {
            stats: stats.clone(),
        }),
        Err(Error::Cancelled(reason)) => events.emit(IndexEvent::Cancelled {
            reason: reason.clone(),
        }),
        Err(e) => events.emit(IndexEvent::Error {
            error: e.to_string(),
        }),
    }
    result
}

fn check_cancel(cancel: &CancellationToken, phase: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled(format!("aborted during {}", phase)));
    }
    Ok(())
}

async fn run_index_inner(
    ctx: &IndexContext<'_>,
    opts: IndexOptions,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<IndexStats> {
    let started = Instant::now();
    let mut stats = IndexStats::default();

    // ── init: manifest compatibility and storage provisioning ──────────
    events.progress(IndexPhase::Init, "manifest", 0, 1, "steps");
    let prev_manifest = match load_manifest(ctx.repo_root) {
        ManifestStatus::Compatible(manifest) => Some(*manifest),
        ManifestStatus::NotIndexed => None,
        ManifestStatus::NeedsReindex { current } if !opts.force => {
            return Err(Error::ReindexRequired {
                current,
                required: SCHEMA_VERSION,
            });
        }
        ManifestStatus::CorruptManifest if !opts.force => {
            return Err(Error::ReindexRequired {
                current: 0,
                required: SCHEMA_VERSION,
            });
        }
        _ => None,
    };

    let dims = ctx.provider.dims();
    match ctx.store.init_schema(dims).await {
        Ok(()) => {}
        Err(Error::ReindexRequired { .. }) if opts.force => {
            // Dimensionality changed: old vectors, cached ones included,
            // are unusable.
            ctx.store.reset_entity_tables().await?;
            ctx.store.clear_embedding_cache().await?;
            ctx.store.set_vector_dims(dims).await?;
        }
        Err(e) => return Err(e),
    }
    ctx.provider.initialize(cancel).await?;
    events.progress(IndexPhase::Init, "manifest", 1, 1, "steps");
    check_cancel(cancel, "init")?;

    // ── scan: merkle build and diff ─────────────────────────────────────
    let repo_root = ctx.repo_root.to_path_buf();
    let config = ctx.config.clone();
    let (current_tree, scan_stats) =
        tokio::task::spawn_blocking(move || MerkleTree::build(&repo_root, &config))
            .await
            .map_err(|e| Error::Internal(e.into()))??;
    stats.files_scanned = scan_stats.files_scanned;
    stats.file_count = scan_stats.file_count;
    events.progress(
        IndexPhase::Scan,
        "merkle",
        scan_stats.file_count,
        scan_stats.file_count,
        "files",
    );

    let prev_tree = prev_manifest
        .as_ref()
        .map(|m| m.merkle.clone())
        .unwrap_or_default();
    let diff = if opts.force {
        MerkleDiff::force_from(&current_tree)
    } else {
        MerkleTree::compare(&prev_tree, &current_tree)
    };
    stats.files_new = diff.new.len() as u64;
    stats.files_modified = diff.modified.len() as u64;
    stats.files_deleted = diff.deleted.len() as u64;
    check_cancel(cancel, "scan")?;

    // Diff is final before any destructive step.
    if opts.force {
        ctx.store.reset_entity_tables().await?;
    }
    let stale: Vec<String> = diff.paths_to_delete().cloned().collect();
    for (i, path) in stale.iter().enumerate() {
        let counts = ctx.store.delete_all_rows_for_file(path).await?;
        stats.rows_deleted += counts.total();
        events.progress(
            IndexPhase::Scan,
            "delete-stale",
            (i + 1) as u64,
            stale.len() as u64,
            "files",
        );
    }
    check_cancel(cancel, "scan")?;

    // ── chunk: extraction and embed-input accumulation ──────────────────
    let revision = revision_of(&current_tree);
    let repo_id = ctx.config.repo_id_for(ctx.repo_root);
    let to_process: Vec<String> = diff.paths_to_process().cloned().collect();
    let mut extractions: Vec<FileExtraction> = Vec::with_capacity(to_process.len());
    let mut embed_items = Vec::new();

    {
        let mut chunker = ctx.chunker.lock().await;
        for (i, path) in to_process.iter().enumerate() {
            check_cancel(cancel, "chunk")?;
            let abs = ctx.repo_root.join(path);
            let bytes = match tokio::fs::read(&abs).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path, error = %e, "read failed; file skipped");
                    continue;
                }
            };
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let file_hash = current_tree
                .leaves
                .get(path)
                .cloned()
                .unwrap_or_else(|| crate::model::sha256_hex(&bytes));

            let chunked = chunker.chunk_file(path, &content, &ctx.tuning.chunking);
            let mut extraction = extract_facts(
                &repo_id,
                &revision,
                path,
                &content,
                &file_hash,
                &chunked,
                &ctx.tuning.chunking,
            );
            embed_items.append(&mut extraction.embed_items);
            extractions.push(extraction);

            events.progress(
                IndexPhase::Chunk,
                "extract",
                (i + 1) as u64,
                to_process.len() as u64,
                "files",
            );
        }
    }

    // ── embed ───────────────────────────────────────────────────────────
    events.progress(
        IndexPhase::Embed,
        "vectorize",
        0,
        embed_items.len() as u64,
        "inputs",
    );
    let outcome = embed_all(
        ctx.store,
        ctx.provider,
        embed_items,
        &ctx.tuning.pipeline,
        events,
        cancel,
    )
    .await?;
    stats.embeddings_cached = outcome.cache_hits;
    stats.embeddings_computed = outcome.computed;
    check_cancel(cancel, "embed")?;

    // ── persist: join vectors and bulk-upsert per table ─────────────────
    let mut symbols = Vec::new();
    let mut chunks = Vec::new();
    let mut files = Vec::new();
    let mut refs = Vec::new();
    join_vectors(
        extractions,
        &outcome.vectors,
        &mut symbols,
        &mut chunks,
        &mut files,
        &mut refs,
    );

    let total_rows = (symbols.len() + chunks.len() + files.len() + refs.len()) as u64;
    stats.symbols_added = ctx.store.upsert_symbols(&symbols).await?;
    events.progress(IndexPhase::Persist, "upsert", stats.symbols_added, total_rows, "rows");
    stats.chunks_added = ctx.store.upsert_chunks(&chunks).await?;
    events.progress(
        IndexPhase::Persist,
        "upsert",
        stats.symbols_added + stats.chunks_added,
        total_rows,
        "rows",
    );
    ctx.store.upsert_files(&files).await?;
    stats.refs_added = ctx.store.upsert_refs(&refs).await?;
    events.progress(IndexPhase::Persist, "upsert", total_rows, total_rows, "rows");
    check_cancel(cancel, "persist")?;

    // ── finalize: manifest commit ───────────────────────────────────────
    let table_counts = ctx.store.table_counts().await?;
    let mut manifest = match prev_manifest {
        Some(prev) if !opts.force => prev.advanced(current_tree),
        _ => Manifest::new(repo_id, revision.clone(), current_tree),
    };
    manifest.revision = revision;
    manifest.counts = ManifestCounts {
        files: table_counts.files,
        symbols: table_counts.symbols,
        chunks: table_counts.chunks,
        refs: table_counts.refs,
    };
    stats.duration_ms = started.elapsed().as_millis() as u64;
    manifest.last_stats = Some(stats.clone());
    save_manifest(ctx.repo_root, &manifest)?;
    events.progress(IndexPhase::Finalize, "manifest", 1, 1, "steps");

    info!(
        files_new = stats.files_new,
        files_modified = stats.files_modified,
        files_deleted = stats.files_deleted,
        embeddings_computed = stats.embeddings_computed,
        duration_ms = stats.duration_ms,
        "index run complete"
    );
    Ok(stats)
}

/// Content-addressed revision: a prefix of the tree's root hash.
fn revision_of(tree: &MerkleTree) -> String {
    tree.root_hash.chars().take(12).collect()
}

/// Join embedding vectors into rows by `embed_hash`. Rows whose embedding is
/// missing are skipped with a warning.
fn join_vectors(
    extractions: Vec<FileExtraction>,
    vectors: &HashMap<String, Vec<f32>>,
    symbols: &mut Vec<crate::model::SymbolRow>,
    chunks: &mut Vec<crate::model::ChunkRow>,
    files: &mut Vec<crate::model::FileRow>,
    refs: &mut Vec<crate::model::RefRow>,
) {
    for extraction in extractions {
        for mut row in extraction.symbols {
            match vectors.get(&row.embed_hash) {
                Some(vec) => {
                    row.vec_summary = vec.clone();
                    symbols.push(row);
                }
                None => warn!(id = %row.symbol_id, "missing embedding; symbol row skipped"),
            }
        }
        for mut row in extraction.chunks {
            match vectors.get(&row.embed_hash) {
                Some(vec) => {
                    row.vec_code = vec.clone();
                    chunks.push(row);
                }
                None => warn!(id = %row.chunk_id, "missing embedding; chunk row skipped"),
            }
        }
        let mut file_row = extraction.file;
        match vectors.get(&file_row.embed_hash) {
            Some(vec) => {
                file_row.vec_file = vec.clone();
                files.push(file_row);
            }
            None => warn!(path = %file_row.file_path, "missing embedding; file row skipped"),
        }
        refs.extend(extraction.refs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coordinator_joins_concurrent_callers() {
        let coordinator = Arc::new(IndexCoordinator::new());
        let runs = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                coordinator
                    .run_or_join(|| async {
                        runs.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        Ok(IndexStats {
                            files_new: 7,
                            ..Default::default()
                        })
                    })
                    .await
            }));
        }

        for handle in handles {
            let stats = handle.await.unwrap().unwrap();
            assert_eq!(stats.files_new, 7);
        }
        // At least one joiner attached instead of running its own pass.
        assert!(runs.load(std::sync::atomic::Ordering::SeqCst) < 4);
    }

    #[tokio::test]
    async fn coordinator_clears_slot_after_run() {
        let coordinator = IndexCoordinator::new();
        coordinator
            .run_or_join(|| async { Ok(IndexStats::default()) })
            .await
            .unwrap();
        assert!(!coordinator.is_running().await);
    }

    #[tokio::test]
    async fn joiners_see_cancellation_as_cancelled() {
        let coordinator = Arc::new(IndexCoordinator::new());
        let c2 = Arc::clone(&coordinator);

        let runner = tokio::spawn(async move {
            c2.run_or_join(|| async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Err(Error::Cancelled("test abort".to_string()))
            })
            .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let joined = coordinator
            .run_or_join(|| async { Ok(IndexStats::default()) })
            .await;
        // Either we joined the failing run (cancelled) or it had already
        // finished and we ran fresh (ok); both are valid interleavings.
        if let Err(e) = joined {
            assert!(e.is_cancelled());
        }
        assert!(runner.await.unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn revision_is_stable_prefix() {
        let tree = MerkleTree {
            leaves: Default::default(),
            root_hash: "abcdef0123456789deadbeef".to_string(),
        };
        assert_eq!(revision_of(&tree), "abcdef012345");
    }
}
