//! Typed failures of the schema knowledge engine.
//!
//! Structurally absent answers (no join path between two tables, no direct
//! relation) are *not* errors: they are ordinary results, see
//! [`JoinPathOutcome`](crate::graph::JoinPathOutcome). Merge conflicts are
//! reported in the merge report and never abort a run.

use thiserror::Error;

pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Unknown table or column in a metadata lookup.
    #[error("{0} not found")]
    NotFound(String),

    /// A join-path endpoint that is not a node of the schema graph.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("embedding request timed out after {0}s")]
    EmbeddingTimeout(u64),

    #[error("embeddings are disabled; set [embedding] provider in config")]
    EmbeddingsDisabled,

    /// The query embedding and the index vectors come from different models.
    #[error("index was built with model '{index}' but queries use '{query}'; re-run ingest")]
    IndexModelMismatch { index: String, query: String },

    /// Extraction could not connect, authenticate or read. Fatal for ingestion.
    #[error("ingestion source error: {0}")]
    IngestionSource(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl KnowledgeError {
    /// Stable machine-readable code used by the HTTP and MCP transports.
    pub fn code(&self) -> &'static str {
        match self {
            KnowledgeError::NotFound(_) => "not_found",
            KnowledgeError::UnknownTable(_) => "unknown_table",
            KnowledgeError::EmbeddingProvider(_) => "embedding_provider_error",
            KnowledgeError::EmbeddingTimeout(_) => "timeout",
            KnowledgeError::EmbeddingsDisabled => "embeddings_disabled",
            KnowledgeError::IndexModelMismatch { .. } => "index_model_mismatch",
            KnowledgeError::IngestionSource(_) => "ingestion_source_error",
            KnowledgeError::InvalidArgument(_) => "bad_request",
            KnowledgeError::Storage(_) => "internal",
        }
    }
}
