use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Single error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("chunk exceeds configured token size ({actual} > {limit})")]
    ChunkTooLarge { actual: usize, limit: usize },

    #[error("chunk processing failed for chunk {chunk_id}: {source}")]
    ChunkProcessingError {
        chunk_id: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("{kind} '{name}' has no usable description after merge")]
    MissingDescription { kind: &'static str, name: String },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("store I/O error: {0}")]
    StoreIOError(String),

    #[error("task was cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(#[from] JoinError),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// True when this error represents a transient backing-store conflict that is
    /// worth retrying (matching the teacher's `is_retryable_conflict` convention).
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, AppError::StoreIOError(msg) if msg.contains("conflict") || msg.contains("locked"))
    }
}
