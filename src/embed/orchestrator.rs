//! Embedding orchestration: cache dedup, batched concurrent compute,
//! backpressure.
//!
//! Given the embed items accumulated by fact extraction, the orchestrator
//! deduplicates by hash, resolves what it can from the persistent cache in
//! one bulk lookup, and dispatches the misses as concurrent batches through
//! a bounded semaphore (width 1 for in-process providers, 3 for remote).
//! Successful vectors are cached in bulk; cumulative `chunk-progress` events
//! flow to the run's channel as batches complete.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipelineTuning;
use crate::embed::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::events::{EventSink, IndexEvent};
use crate::facts::EmbedItem;
use crate::store::Store;

/// Result of one orchestrated embedding pass.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    /// `embed_hash → vector` for every input item that resolved.
    pub vectors: HashMap<String, Vec<f32>>,
    pub cache_hits: u64,
    pub computed: u64,
}

/// Resolve vectors for all items, from cache or the provider.
///
/// A batch failing with a non-abort error fails the whole pass; an abort
/// cancels in-flight batches cooperatively.
pub async fn embed_all(
    store: &Store,
    provider: &Arc<dyn EmbeddingProvider>,
    items: Vec<EmbedItem>,
    tuning: &PipelineTuning,
    events: &EventSink,
    cancel: &CancellationToken,
) -> Result<EmbedOutcome> {
    // Dedup by hash; the cache guarantees any hit is valid for every row
    // that shares the hash.
    let mut unique: HashMap<String, String> = HashMap::new();
    for item in items {
        unique.entry(item.hash).or_insert(item.text);
    }

    let hashes: Vec<String> = unique.keys().cloned().collect();
    let mut outcome = EmbedOutcome::default();

    let cached = store.get_cached_embeddings(&hashes).await?;
    outcome.cache_hits = cached.len() as u64;
    for (hash, vector) in cached {
        unique.remove(&hash);
        outcome.vectors.insert(hash, vector);
    }
    events.emit(IndexEvent::ChunkProgress {
        chunks_processed: outcome.cache_hits,
    });

    if unique.is_empty() {
        return Ok(outcome);
    }

    let misses: Vec<(String, String)> = unique.into_iter().collect();
    debug!(
        misses = misses.len(),
        cache_hits = outcome.cache_hits,
        "embedding cache resolved"
    );

    let width = if provider.is_local() {
        tuning.embed_concurrency_local
    } else {
        tuning.embed_concurrency_remote
    }
    .max(1);
    let semaphore = Arc::new(Semaphore::new(width));

    let mut join_set: JoinSet<Result<(Vec<String>, Vec<Vec<f32>>)>> = JoinSet::new();

    for batch in misses.chunks(tuning.embed_batch_size.max(1)) {
        let batch_hashes: Vec<String> = batch.iter().map(|(h, _)| h.clone()).collect();
        let batch_texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
        let provider = Arc::clone(provider);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let events = events.clone();

        join_set.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| Error::Internal(e.into()))?;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("embed batch aborted".to_string()));
            }
            let on_throttle = move |message: Option<String>| {
                events.emit(IndexEvent::Throttle { message });
            };
            let vectors = provider.embed(&batch_texts, &cancel, &on_throttle).await?;
            if vectors.len() != batch_hashes.len() {
                return Err(Error::ProviderFatal(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch_hashes.len()
                )));
            }
            Ok((batch_hashes, vectors))
        });
    }

    let mut computed_rows: Vec<(String, Vec<f32>)> = Vec::new();
    let mut failure: Option<Error> = None;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok((hashes, vectors))) => {
                for (hash, vector) in hashes.into_iter().zip(vectors) {
                    computed_rows.push((hash.clone(), vector.clone()));
                    outcome.vectors.insert(hash, vector);
                }
                outcome.computed = computed_rows.len() as u64;
                events.emit(IndexEvent::ChunkProgress {
                    chunks_processed: outcome.cache_hits + outcome.computed,
                });
            }
            Ok(Err(e)) => {
                // First failure wins; cancel the rest and drain.
                if failure.is_none() {
                    cancel.cancel();
                    failure = Some(e);
                }
            }
            Err(e) => {
                if failure.is_none() {
                    cancel.cancel();
                    failure = Some(Error::Internal(e.into()));
                }
            }
        }
    }

    // Vectors computed before a failure are still worth caching.
    if !computed_rows.is_empty() {
        store.cache_embeddings(&computed_rows).await?;
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::provider::HashProvider;

    fn items(texts: &[&str]) -> Vec<EmbedItem> {
        texts
            .iter()
            .map(|t| EmbedItem {
                hash: crate::model::sha256_hex(t.as_bytes()),
                text: t.to_string(),
            })
            .collect()
    }

    async fn store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.init_schema(64).await.unwrap();
        store
    }

    #[tokio::test]
    async fn computes_and_caches_misses() {
        let store = store().await;
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::default());
        let tuning = PipelineTuning::default();
        let cancel = CancellationToken::new();

        let out = embed_all(
            &store,
            &provider,
            items(&["alpha", "beta"]),
            &tuning,
            &EventSink::disabled(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(out.cache_hits, 0);
        assert_eq!(out.computed, 2);
        assert_eq!(out.vectors.len(), 2);

        // Second pass: everything hits the cache.
        let out2 = embed_all(
            &store,
            &provider,
            items(&["alpha", "beta"]),
            &tuning,
            &EventSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out2.cache_hits, 2);
        assert_eq!(out2.computed, 0);
    }

    #[tokio::test]
    async fn duplicate_hashes_embed_once() {
        let store = store().await;
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::default());
        let out = embed_all(
            &store,
            &provider,
            items(&["same", "same", "same"]),
            &PipelineTuning::default(),
            &EventSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out.computed, 1);
        assert_eq!(out.vectors.len(), 1);
    }

    #[tokio::test]
    async fn emits_cumulative_chunk_progress() {
        let store = store().await;
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::default());
        let (sink, mut rx) = EventSink::channel();

        let mut tuning = PipelineTuning::default();
        tuning.embed_batch_size = 1;
        embed_all(
            &store,
            &provider,
            items(&["a", "b", "c"]),
            &tuning,
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        drop(sink);

        let mut last = 0u64;
        while let Some(event) = rx.recv().await {
            if let IndexEvent::ChunkProgress { chunks_processed } = event {
                assert!(chunks_processed >= last, "progress must be monotone");
                last = chunks_processed;
            }
        }
        assert_eq!(last, 3);
    }

    #[tokio::test]
    async fn abort_cancels_cooperatively() {
        let store = store().await;
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = embed_all(
            &store,
            &provider,
            items(&["a", "b"]),
            &PipelineTuning::default(),
            &EventSink::disabled(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
