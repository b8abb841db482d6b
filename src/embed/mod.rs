//! Embedding providers and the batching orchestrator.

pub mod orchestrator;
pub mod provider;

pub use orchestrator::{embed_all, EmbedOutcome};
#[cfg(feature = "local-embeddings-fastembed")]
pub use provider::LocalProvider;
pub use provider::{create_provider, EmbeddingProvider, HashProvider, RemoteProvider};
