//! Domain error taxonomy and wire-level error codes.
//!
//! Every failure that crosses the daemon boundary is mapped to one of a
//! small set of stable codes so clients can branch on them. Per-file parse
//! and I/O problems never reach this layer — they are absorbed with a
//! warning inside the pipeline (module-chunk fallback or skip).

use thiserror::Error;

/// Stable wire codes for the daemon protocol.
pub mod code {
    pub const REINDEX_REQUIRED: &str = "reindex_required";
    pub const NOT_INITIALIZED: &str = "not_initialized";
    pub const NOT_INDEXED: &str = "not_indexed";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const INVALID_PARAMS: &str = "invalid_params";
    pub const CANCELLED: &str = "cancelled";
    pub const INTERNAL: &str = "internal";
}

/// Errors surfaced by core operations.
///
/// `Cancelled` is a terminal outcome, not a failure: the daemon converts it
/// to a `cancelled` result before anything is reported to the client.
#[derive(Debug, Error)]
pub enum Error {
    /// The persisted index schema does not match the running code.
    /// Recoverable by running a forced index.
    #[error("index schema version {current} is incompatible with required version {required}; run indexing with force to rebuild")]
    ReindexRequired { current: u32, required: u32 },

    /// The repository has no `.viberag/config.json`.
    #[error("repository is not initialized; create .viberag/config.json first")]
    NotInitialized,

    /// The repository is configured but has never been indexed.
    #[error("repository is not indexed; run indexing first")]
    NotIndexed,

    /// Another indexing run is active and the operation refuses to queue.
    #[error("an indexing run is already in progress")]
    InProgress,

    /// Request parameter validation failure.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// A provider batch failed with a non-retryable error; fatal to the
    /// current indexing run.
    #[error("embedding provider failure: {0}")]
    ProviderFatal(String),

    /// Anything else; fatal to the current request.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Map to the stable wire code used in daemon error frames.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Error::ReindexRequired { .. } => code::REINDEX_REQUIRED,
            Error::NotInitialized => code::NOT_INITIALIZED,
            Error::NotIndexed => code::NOT_INDEXED,
            Error::InProgress => code::IN_PROGRESS,
            Error::InvalidParams(_) => code::INVALID_PARAMS,
            Error::Cancelled(_) => code::CANCELLED,
            Error::ProviderFatal(_) => code::INTERNAL,
            Error::Internal(_) => code::INTERNAL,
        }
    }

    /// True when the error is the cooperative-cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

/// Result alias used across the core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Internal(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(e.into())
    }
}
