use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index write failed: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding endpoint returned {status}: {details}")]
    BackendResponse { status: StatusCode, details: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding dimension {actual} != expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no vector index at {0}")]
    Missing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt vector index: {0}")]
    Corrupt(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(
        "vector index was built with {indexed_model} ({indexed_dimensions} dims) \
         but the query embedder is {query_model} ({query_dimensions} dims)"
    )]
    ModelMismatch {
        indexed_model: String,
        indexed_dimensions: usize,
        query_model: String,
        query_dimensions: usize,
    },

    #[error("{0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("generation endpoint rejected the credential ({status}); is HF_TOKEN set?")]
    Unauthorized { status: StatusCode },

    #[error("generation endpoint is rate limiting requests: {0}")]
    RateLimited(String),

    #[error("invalid response from {backend} ({status}): {details}")]
    BackendResponse {
        backend: String,
        status: StatusCode,
        details: String,
    },

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
