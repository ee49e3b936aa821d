use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_MODEL: &str = "ngram-128";
pub const DEFAULT_COLLECTION: &str = "rag_documents";
pub const DEFAULT_COLLECTION_DIR: &str = "./rag_store";
pub const DEFAULT_CHAT_MODEL: &str = "deepseek/deepseek-chat";

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub model: String,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub dimensions: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub embedding: EmbeddingSettings,
    pub collection_dir: PathBuf,
    pub collection: String,
    pub qdrant_url: Option<String>,
    pub chunking: ChunkingConfig,
    pub document_results: usize,
    pub web_results: usize,
    pub web_timeout: Duration,
    pub tavily_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub chat_model: String,
}

impl AssistantConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or blank keys fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).and_then(|value| {
                let trimmed = value.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            })
        };

        let chunk_size = parse_or(&get, "RAG_CHUNK_SIZE", 1_000usize)?;
        let chunk_overlap = parse_or(&get, "RAG_CHUNK_OVERLAP", 200usize)?;
        let web_timeout_secs = parse_or(&get, "RAG_WEB_TIMEOUT_SECS", 15u64)?;
        let dimensions = parse_or(&get, "RAG_EMBEDDING_DIMENSIONS", 0usize)?;

        Ok(Self {
            embedding: EmbeddingSettings {
                model: get("RAG_EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                endpoint: get("RAG_EMBEDDING_ENDPOINT"),
                api_key: get("RAG_EMBEDDING_API_KEY"),
                dimensions: (dimensions > 0).then_some(dimensions),
            },
            collection_dir: get("RAG_COLLECTION_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COLLECTION_DIR)),
            collection: get("RAG_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            qdrant_url: get("RAG_QDRANT_URL"),
            chunking: ChunkingConfig::new(chunk_size, chunk_overlap)?,
            document_results: parse_or(&get, "RAG_DOC_RESULTS", 3usize)?,
            web_results: parse_or(&get, "RAG_WEB_RESULTS", 2usize)?,
            web_timeout: Duration::from_secs(web_timeout_secs),
            tavily_api_key: get("TAVILY_API_KEY"),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            chat_model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
        })
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingSettings {
                model: DEFAULT_EMBEDDING_MODEL.to_string(),
                endpoint: None,
                api_key: None,
                dimensions: None,
            },
            collection_dir: PathBuf::from(DEFAULT_COLLECTION_DIR),
            collection: DEFAULT_COLLECTION.to_string(),
            qdrant_url: None,
            chunking: ChunkingConfig::default(),
            document_results: 3,
            web_results: 2,
            web_timeout: Duration::from_secs(15),
            tavily_api_key: None,
            openrouter_api_key: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
