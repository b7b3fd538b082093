use thiserror::Error;

/// Failures callers need to tell apart.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<RagError>()` to
/// inspect them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RagError {
    #[error("Unsupported file type: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Got {embeddings} embeddings for {chunks} chunks")]
    MisalignedBatch { embeddings: usize, chunks: usize },
}
