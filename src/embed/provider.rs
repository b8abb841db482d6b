//! Embedding provider implementations.
//!
//! The provider set is closed: [`LocalProvider`] runs models in-process via
//! fastembed (feature `local-embeddings-fastembed`); [`RemoteProvider`] calls
//! an OpenAI-compatible `POST /v1/embeddings` endpoint with its own
//! retry/backoff. Throttling is surfaced through a callback, never as an
//! error — the orchestrator forwards it to the run's event channel.
//!
//! [`HashProvider`] is a deterministic offline provider used by the eval
//! harness and the test suites; it needs no network or model download.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Callback invoked with a human-readable message when the provider is
/// throttled, and with `None` when the throttle clears.
pub type ThrottleFn = dyn Fn(Option<String>) + Send + Sync;

/// Capability set for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dims(&self) -> usize;
    /// In-process providers get embed concurrency 1; remote ones get 3.
    fn is_local(&self) -> bool;

    /// Eagerly load model state so the first embed call is not cold.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()>;

    /// Embed a batch; vectors are returned in input order.
    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        on_throttle: &ThrottleFn,
    ) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let vectors = self
            .embed(std::slice::from_ref(&text.to_string()), cancel, &|_| {})
            .await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderFatal("empty embedding response".to_string()))
    }

    /// Release model/connection state. Idempotent.
    async fn close(&self) {}
}

/// Instantiate the configured provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::InvalidParams(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        "remote" => Ok(Arc::new(RemoteProvider::new(config)?)),
        other => Err(Error::InvalidParams(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Local provider (fastembed)
// ═══════════════════════════════════════════════════════════════════════

/// Known local models and their dimensions.
#[cfg(feature = "local-embeddings-fastembed")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
    let dims = config.dims.unwrap_or(match model.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        _ => 384,
    });
    (model, dims)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => Err(Error::InvalidParams(format!(
            "unknown local embedding model: '{}'",
            other
        ))),
    }
}

/// In-process embeddings via fastembed. The model downloads on first use and
/// runs offline afterwards; inference happens on the blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        // Validate the model name up front so a typo fails fast.
        fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    async fn ensure_loaded(&self, cancel: &CancellationToken) -> Result<()> {
        if self.model.lock().unwrap().is_some() {
            return Ok(());
        }
        let name = self.model_name.clone();
        let slot = Arc::clone(&self.model);
        let load = tokio::task::spawn_blocking(move || -> Result<()> {
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model(&name)?)
                    .with_show_download_progress(false),
            )
            .map_err(|e| Error::ProviderFatal(format!("failed to load local model: {}", e)))?;
            *slot.lock().unwrap() = Some(model);
            Ok(())
        });

        tokio::select! {
            result = load => result.map_err(|e| Error::Internal(e.into()))?,
            _ = cancel.cancelled() => Err(Error::Cancelled("warmup aborted".to_string())),
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn is_local(&self) -> bool {
        true
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_loaded(cancel).await
    }

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        _on_throttle: &ThrottleFn,
    ) -> Result<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("embed batch aborted".to_string()));
        }
        self.ensure_loaded(cancel).await?;

        let slot = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch = texts.len();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap();
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::ProviderFatal("local model not loaded".to_string()))?;
            model
                .embed(texts, Some(batch))
                .map_err(|e| Error::ProviderFatal(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::Internal(e.into()))?
    }

    async fn close(&self) {
        self.model.lock().unwrap().take();
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Remote provider (OpenAI-compatible)
// ═══════════════════════════════════════════════════════════════════════

/// Remote embeddings over an OpenAI-compatible HTTP API.
///
/// Owns its retry policy: HTTP 429 and 5xx retry with exponential backoff
/// (1s, 2s, 4s, ... capped at 32s) and surface a throttle message; other 4xx
/// fail immediately. Cancellation is observed between attempts and while
/// waiting on the request.
pub struct RemoteProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidParams("embedding.model required for remote provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::InvalidParams("embedding.dims required for remote provider".to_string())
        })?;
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(e.into()))?;

        Ok(Self {
            model,
            dims,
            endpoint,
            max_retries: config.max_retries,
            client,
        })
    }

    fn api_key() -> Result<String> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::ProviderFatal("OPENAI_API_KEY not set".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn is_local(&self) -> bool {
        false
    }

    async fn initialize(&self, _cancel: &CancellationToken) -> Result<()> {
        // Validates credentials early; no connection is opened until embed.
        Self::api_key().map(|_| ())
    }

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        on_throttle: &ThrottleFn,
    ) -> Result<Vec<Vec<f32>>> {
        let api_key = Self::api_key()?;
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let body = serde_json::json!({ "model": self.model, "input": texts });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(Error::Cancelled("embed batch aborted".to_string()));
                    }
                }
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled("embed batch aborted".to_string()));
            }

            let request = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send();

            let resp = tokio::select! {
                resp = request => resp,
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("embed batch aborted".to_string()));
                }
            };

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        on_throttle(None);
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::ProviderFatal(e.to_string()))?;
                        return parse_embeddings_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        on_throttle(Some(format!(
                            "embedding endpoint throttled ({}): retrying",
                            status
                        )));
                        last_err = Some(Error::ProviderFatal(format!(
                            "embedding API error {}: {}",
                            status, text
                        )));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(Error::ProviderFatal(format!(
                        "embedding API error {}: {}",
                        status, text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::ProviderFatal(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::ProviderFatal("embedding failed after retries".to_string())))
    }
}

/// Extract `data[].embedding` arrays in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::ProviderFatal("invalid response: missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::ProviderFatal("invalid response: missing embedding".to_string())
            })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

// ═══════════════════════════════════════════════════════════════════════
// Deterministic hash provider
// ═══════════════════════════════════════════════════════════════════════

/// Offline, deterministic embeddings derived from the SHA-256 of the input.
/// Identical texts produce identical vectors; nothing more is promised.
/// Used by the eval harness's latency mode and by tests.
pub struct HashProvider {
    dims: usize,
}

impl HashProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for HashProvider {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn is_local(&self) -> bool {
        true
    }

    async fn initialize(&self, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn embed(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
        _on_throttle: &ThrottleFn,
    ) -> Result<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled("embed batch aborted".to_string()));
        }
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter = 0u32;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        for byte in hasher.finalize() {
            if out.len() >= dims {
                break;
            }
            out.push((byte as f32 - 127.5) / 127.5);
        }
        counter += 1;
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
    out.iter().map(|v| v / norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashProvider::default();
        let cancel = CancellationToken::new();
        let a = provider
            .embed(&["hello".to_string()], &cancel, &|_| {})
            .await
            .unwrap();
        let b = provider
            .embed(&["hello".to_string()], &cancel, &|_| {})
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn hash_provider_distinguishes_inputs() {
        let provider = HashProvider::default();
        let cancel = CancellationToken::new();
        let out = provider
            .embed(&["a".to_string(), "b".to_string()], &cancel, &|_| {})
            .await
            .unwrap();
        assert_ne!(out[0], out[1]);
    }

    #[tokio::test]
    async fn hash_provider_observes_cancellation() {
        let provider = HashProvider::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider
            .embed(&["x".to_string()], &cancel, &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn hash_vectors_are_normalized() {
        let v = hash_vector("anything", 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn parse_response_extracts_in_order() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [1.0, 2.0]},
                {"embedding": [3.0, 4.0]}
            ]
        });
        let out = parse_embeddings_response(&json).unwrap();
        assert_eq!(out, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn parse_response_rejects_malformed() {
        let json = serde_json::json!({"nope": true});
        assert!(parse_embeddings_response(&json).is_err());
    }
}
