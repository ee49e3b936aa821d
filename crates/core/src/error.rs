use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking config: {0}")]
    InvalidChunking(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("missing required setting: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("could not extract text from {filename}: {reason}")]
    Extraction { filename: String, reason: String },

    #[error("could not decode {filename} with any of: {attempted}")]
    Decode { filename: String, attempted: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("no supported documents found in {0}")]
    NoDocuments(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from embedding endpoint: {0}")]
    BadResponse(String),

    #[error("embedding dimension {actual} != {expected}")]
    Dimension { expected: usize, actual: usize },
}

/// Failures of the embedding index. A `Write` failure never leaves part of a
/// batch behind; the caller retries the whole batch.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index write to {collection} failed: {reason}")]
    Write { collection: String, reason: String },

    #[error("index query on {collection} failed: {reason}")]
    Query { collection: String, reason: String },

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("embedding failed: {0}")]
    Embed(#[from] EmbedError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the web-search and synthesis collaborators.
#[derive(Debug, Error)]
pub enum EvidenceSourceError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{source_name} timed out after {seconds}s")]
    Timeout { source_name: String, seconds: u64 },

    #[error("evidence request failed: {0}")]
    Request(String),
}
