//! Repository configuration and typed engine tuning.
//!
//! A repository opts in by carrying `.viberag/config.json`; the core consumes
//! this file and never writes it. All runtime knobs (chunking thresholds,
//! retrieval weights, pipeline concurrency) live in [`EngineTuning`], a plain
//! value passed explicitly to the components that need it — there is no
//! process-wide mutable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Directory under the repository root holding all persisted state.
pub const VIBERAG_DIR: &str = ".viberag";
/// Repository configuration file name (consumed, not produced, by the core).
pub const CONFIG_FILE: &str = "config.json";

/// Repository configuration, read from `<repo>/.viberag/config.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    /// Stable identifier for this repository. Defaults to the directory name.
    #[serde(default)]
    pub repo_id: Option<String>,

    /// File extensions to index (lowercase, no leading dot).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Gitignore-equivalent exclusion globs, matched against project-relative
    /// paths.
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Embedding provider selection and model settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// `"local"` (in-process fastembed) or `"remote"` (OpenAI-compatible HTTP).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name. Local default: `all-minilm-l6-v2`.
    #[serde(default)]
    pub model: Option<String>,

    /// Vector dimensionality. Resolved from the model table for local models.
    #[serde(default)]
    pub dims: Option<usize>,

    /// Endpoint base URL for the remote provider.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            endpoint: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

fn default_extensions() -> Vec<String> {
    [
        "py", "ts", "tsx", "js", "jsx", "go", "rs", "java", "kt", "cs", "swift", "php", "dart",
        "md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_globs() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/.viberag/**",
        "**/__pycache__/**",
        "**/.venv/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RepoConfig {
    /// Resolved repository id: explicit value or the root directory basename.
    pub fn repo_id_for(&self, repo_root: &Path) -> String {
        self.repo_id.clone().unwrap_or_else(|| {
            repo_root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "repo".to_string())
        })
    }

    pub fn is_local_provider(&self) -> bool {
        self.embedding.provider == "local"
    }
}

/// Load `<repo>/.viberag/config.json`.
///
/// A missing file is the `NotInitialized` condition; a malformed file is an
/// invalid-params failure naming the parse error.
pub fn load_repo_config(repo_root: &Path) -> Result<RepoConfig> {
    let path = repo_root.join(VIBERAG_DIR).join(CONFIG_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotInitialized),
        Err(e) => return Err(e.into()),
    };

    let config: RepoConfig = serde_json::from_str(&content)
        .map_err(|e| Error::InvalidParams(format!("malformed {}: {}", path.display(), e)))?;

    match config.embedding.provider.as_str() {
        "local" | "remote" => {}
        other => {
            return Err(Error::InvalidParams(format!(
                "unknown embedding provider '{}'; must be local or remote",
                other
            )))
        }
    }
    if config.embedding.provider == "remote" {
        if config.embedding.model.is_none() {
            return Err(Error::InvalidParams(
                "embedding.model is required for the remote provider".to_string(),
            ));
        }
        if config.embedding.dims.unwrap_or(0) == 0 {
            return Err(Error::InvalidParams(
                "embedding.dims must be > 0 for the remote provider".to_string(),
            ));
        }
    }
    if config.extensions.is_empty() {
        return Err(Error::InvalidParams(
            "extensions must not be empty".to_string(),
        ));
    }

    Ok(config)
}

/// Path helpers for the persisted layout.
pub fn viberag_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(VIBERAG_DIR)
}

pub fn manifest_path(repo_root: &Path) -> PathBuf {
    viberag_dir(repo_root).join("manifest-v2.json")
}

pub fn db_path(repo_root: &Path) -> PathBuf {
    viberag_dir(repo_root).join("index.sqlite")
}

pub fn socket_path(repo_root: &Path) -> PathBuf {
    viberag_dir(repo_root).join("daemon.sock")
}

// ═══════════════════════════════════════════════════════════════════════
// Engine tuning
// ═══════════════════════════════════════════════════════════════════════

/// All recognized runtime knobs, as one explicit value.
#[derive(Debug, Clone, Default)]
pub struct EngineTuning {
    pub chunking: ChunkingTuning,
    pub retrieval: RetrievalTuning,
    pub pipeline: PipelineTuning,
}

/// Chunk sizing and splitting thresholds.
#[derive(Debug, Clone)]
pub struct ChunkingTuning {
    /// Maximum chunk text length in characters before line-boundary splitting.
    pub max_chunk_size: usize,
    /// Lines of overlap carried into each continuation chunk.
    pub split_overlap_lines: usize,
    /// Minimum symbol body length for which a separate chunk row is emitted.
    pub min_chunk_row_body: usize,
    /// Target section length, in lines, for markdown chunking.
    pub markdown_target_lines: usize,
}

impl Default for ChunkingTuning {
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            split_overlap_lines: 3,
            min_chunk_row_body: 1200,
            markdown_target_lines: 60,
        }
    }
}

/// Fusion and rerank knobs.
#[derive(Debug, Clone)]
pub struct RetrievalTuning {
    /// RRF constant K in `w / (K + rank + 1)`.
    pub rrf_k: f64,
    pub w_vector: f64,
    pub w_fts: f64,
    /// Multiplier for exported symbols under the definition intent.
    pub export_boost: f64,
    pub prior_call: f64,
    pub prior_import: f64,
    pub prior_string_literal: f64,
    pub prior_identifier: f64,
    /// Multiplier for hits whose path looks like a test file.
    pub test_path_demotion: f64,
    /// Per-file diversity penalty coefficient: `1 / (1 + n * coeff)`.
    pub diversity_coeff: f64,
    /// Definition intent oversampling: `max(factor * k, floor)`, capped.
    pub definition_oversample_factor: usize,
    pub definition_oversample_floor: usize,
    pub definition_oversample_cap: usize,
    /// Usage intent oversampling: `max(factor * k, floor)`.
    pub usage_oversample_factor: usize,
    pub usage_oversample_floor: usize,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            w_vector: 1.0,
            w_fts: 0.9,
            export_boost: 1.2,
            prior_call: 1.15,
            prior_import: 1.10,
            prior_string_literal: 0.75,
            prior_identifier: 1.00,
            test_path_demotion: 0.6,
            diversity_coeff: 0.25,
            definition_oversample_factor: 6,
            definition_oversample_floor: 30,
            definition_oversample_cap: 200,
            usage_oversample_factor: 12,
            usage_oversample_floor: 100,
        }
    }
}

/// Embedding pipeline batching and concurrency.
#[derive(Debug, Clone)]
pub struct PipelineTuning {
    pub embed_batch_size: usize,
    /// Concurrent batches for in-process providers.
    pub embed_concurrency_local: usize,
    /// Concurrent batches for remote providers.
    pub embed_concurrency_remote: usize,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            embed_batch_size: 20,
            embed_concurrency_local: 1,
            embed_concurrency_remote: 3,
        }
    }
}
