//! Engine: one handle owning storage, parser state, and the embedding
//! provider for a single repository.
//!
//! The daemon, the CLI, and the test suites all drive the same [`Engine`]
//! API. Indexing runs are serialized through the engine's
//! [`IndexCoordinator`]; read operations check manifest compatibility so
//! `not_indexed` and `reindex_required` surface as structured outcomes.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunker;
use crate::config::{db_path, load_repo_config, EngineTuning, RepoConfig};
use crate::embed::provider::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::indexer::{run_index, IndexContext, IndexCoordinator, IndexOptions};
use crate::manifest::{load_manifest, ManifestStatus};
use crate::model::{FindUsagesResponse, IndexStats, SearchResponse, SymbolRow, SCHEMA_VERSION};
use crate::search::scope::Scope;
use crate::search::{ExpandResponse, SearchRequest, Searcher};
use crate::store::Store;

/// Construction options. The provider override exists for tests and the
/// eval harness, which run with the deterministic hash provider.
#[derive(Default)]
pub struct EngineOptions {
    pub tuning: EngineTuning,
    pub provider: Option<Arc<dyn EmbeddingProvider>>,
}

/// Repository status as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub repo_id: String,
    pub initialized: bool,
    pub indexed: bool,
    pub schema_version: u32,
    pub index_schema_version: Option<u32>,
    pub revision: Option<String>,
    pub files: u64,
    pub symbols: u64,
    pub chunks: u64,
    pub refs: u64,
    pub provider: String,
    pub dims: usize,
    /// Actionable instruction when the index is unusable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
}

pub struct Engine {
    repo_root: PathBuf,
    config: RepoConfig,
    tuning: EngineTuning,
    store: Store,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Mutex<Chunker>,
    coordinator: IndexCoordinator,
}

impl Engine {
    /// Open the engine for a repository. Fails with `NotInitialized` when
    /// `.viberag/config.json` is absent.
    pub async fn open(repo_root: &Path, options: EngineOptions) -> Result<Engine> {
        let config = load_repo_config(repo_root)?;
        let provider = match options.provider {
            Some(provider) => provider,
            None => create_provider(&config.embedding)?,
        };
        let store = Store::open(&db_path(repo_root)).await?;

        Ok(Engine {
            repo_root: repo_root.to_path_buf(),
            config,
            tuning: options.tuning,
            store,
            provider,
            chunker: Mutex::new(Chunker::new()),
            coordinator: IndexCoordinator::new(),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Eagerly initialize the embedding provider (abortable).
    pub async fn warmup(&self, cancel: &CancellationToken) -> Result<()> {
        self.provider.initialize(cancel).await
    }

    /// True while an indexing run holds the global slot.
    pub async fn is_indexing(&self) -> bool {
        self.coordinator.is_running().await
    }

    /// Run (or join) an indexing pass.
    pub async fn index(
        &self,
        opts: IndexOptions,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<IndexStats> {
        self.coordinator
            .run_or_join(|| async {
                let ctx = IndexContext {
                    repo_root: &self.repo_root,
                    config: &self.config,
                    tuning: &self.tuning,
                    store: &self.store,
                    provider: &self.provider,
                    chunker: &self.chunker,
                };
                run_index(&ctx, opts, &events, &cancel).await
            })
            .await
    }

    /// Gate for read operations: the manifest must exist and be compatible.
    fn ensure_readable(&self) -> Result<()> {
        match load_manifest(&self.repo_root) {
            ManifestStatus::Compatible(_) => Ok(()),
            ManifestStatus::NotIndexed => Err(Error::NotIndexed),
            ManifestStatus::NeedsReindex { current } => Err(Error::ReindexRequired {
                current,
                required: SCHEMA_VERSION,
            }),
            ManifestStatus::CorruptManifest => Err(Error::ReindexRequired {
                current: 0,
                required: SCHEMA_VERSION,
            }),
        }
    }

    fn searcher(&self) -> Searcher<'_> {
        Searcher::new(&self.store, &self.provider, &self.tuning.retrieval)
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse> {
        self.ensure_readable()?;
        self.searcher().search(req).await
    }

    pub async fn get_symbol(&self, symbol_id: &str) -> Result<Option<SymbolRow>> {
        self.ensure_readable()?;
        self.searcher().get_symbol(symbol_id).await
    }

    pub async fn find_usages(
        &self,
        symbol_id: Option<&str>,
        symbol_name: Option<&str>,
        scope: &Scope,
        k: usize,
    ) -> Result<FindUsagesResponse> {
        self.ensure_readable()?;
        self.searcher()
            .find_usages(symbol_id, symbol_name, scope, k)
            .await
    }

    pub async fn expand_context(
        &self,
        table: &str,
        id: &str,
        limit: usize,
    ) -> Result<ExpandResponse> {
        self.ensure_readable()?;
        self.searcher().expand_context(table, id, limit).await
    }

    /// Structured status; unusable-index conditions become instructions,
    /// not errors.
    pub async fn status(&self) -> Result<StatusReport> {
        let repo_id = self.config.repo_id_for(&self.repo_root);
        let mut report = StatusReport {
            repo_id,
            initialized: true,
            indexed: false,
            schema_version: SCHEMA_VERSION,
            index_schema_version: None,
            revision: None,
            files: 0,
            symbols: 0,
            chunks: 0,
            refs: 0,
            provider: self.provider.name().to_string(),
            dims: self.provider.dims(),
            instruction: None,
        };

        match load_manifest(&self.repo_root) {
            ManifestStatus::Compatible(manifest) => {
                report.indexed = true;
                report.index_schema_version = Some(manifest.schema_version);
                report.revision = Some(manifest.revision.clone());
                report.files = manifest.counts.files;
                report.symbols = manifest.counts.symbols;
                report.chunks = manifest.counts.chunks;
                report.refs = manifest.counts.refs;
            }
            ManifestStatus::NotIndexed => {
                report.instruction = Some("run `viberag index` to build the index".to_string());
            }
            ManifestStatus::NeedsReindex { current } => {
                report.index_schema_version = Some(current);
                report.instruction =
                    Some("index schema is outdated; run `viberag index --force`".to_string());
            }
            ManifestStatus::CorruptManifest => {
                report.instruction =
                    Some("manifest is unreadable; run `viberag index --force`".to_string());
            }
        }

        Ok(report)
    }

    pub async fn close(&self) {
        self.provider.close().await;
        self.store.close().await;
    }
}
