use crate::config::EmbeddingSettings;
use crate::error::{ConfigError, EmbedError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT: usize = 128;
const NGRAM: usize = 3;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Dimensions assumed for remote models when none are configured
/// (all-MiniLM-L6-v2).
pub const DEFAULT_REMOTE_DIMENSIONS: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::BadResponse("no vector returned".to_string()))
    }
}

/// Deterministic hashed character-trigram vectors, L2-normalized. Needs no
/// model download, which makes it the default for local use and tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        // Short inputs like "AI" fall back to the longest n-gram they hold.
        for window in chars.windows(NGRAM.min(chars.len())) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("ngram-{}", self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> String {
        self.model.clone()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EmbedError::BadResponse(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_vectors(payload, texts.len(), self.dimensions)
    }
}

fn order_vectors(
    mut payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if payload.data.len() != expected {
        return Err(EmbedError::BadResponse(format!(
            "expected {expected} embeddings, got {}",
            payload.data.len()
        )));
    }

    payload
        .data
        .sort_by_key(|datum| datum.index.unwrap_or(usize::MAX));

    payload
        .data
        .into_iter()
        .map(|datum| {
            if datum.embedding.len() == dimensions {
                Ok(datum.embedding)
            } else {
                Err(EmbedError::Dimension {
                    expected: dimensions,
                    actual: datum.embedding.len(),
                })
            }
        })
        .collect()
}

/// Picks the embedder for a model identifier: `ngram` / `ngram-<dims>` run
/// locally, anything else goes to the configured HTTP endpoint.
pub fn embedder_from_settings(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn Embedder>, ConfigError> {
    let model = settings.model.trim();

    if model == "ngram" {
        return Ok(Arc::new(CharacterNgramEmbedder::default()));
    }

    if let Some(raw_dims) = model.strip_prefix("ngram-") {
        let dimensions = raw_dims
            .parse::<usize>()
            .ok()
            .filter(|dims| *dims > 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "RAG_EMBEDDING_MODEL".to_string(),
                value: model.to_string(),
            })?;
        return Ok(Arc::new(CharacterNgramEmbedder { dimensions }));
    }

    let endpoint = settings
        .endpoint
        .clone()
        .ok_or_else(|| ConfigError::Missing("RAG_EMBEDDING_ENDPOINT".to_string()))?;

    Ok(Arc::new(HttpEmbedder::new(
        endpoint,
        model,
        settings.api_key.clone(),
        settings.dimensions.unwrap_or(DEFAULT_REMOTE_DIMENSIONS),
    )))
}
