pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod retrieval;
pub mod stores;
pub mod synthesis;
pub mod traits;
pub mod web;

pub use chunking::{build_chunks, chunk_text, ChunkingConfig};
pub use config::{AssistantConfig, EmbeddingSettings};
pub use embeddings::{
    embedder_from_settings, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, EmbedError, EvidenceSourceError, IndexError, IngestError};
pub use extractor::{Extractor, PdfExtractor, PdfStrategy, TextEncoding};
pub use index::{cosine_distance, EmbeddingIndex};
pub use ingest::{
    discover_documents, ingest_document, ingest_folder_best_effort, ingest_paths_best_effort,
    ingest_upload, IngestedDocument, IngestionReport, SkippedFile,
};
pub use models::{
    Chunk, CitedEvidence, CollectionStats, DocumentMetadata, EvidenceItem, EvidenceKind,
    ExtractedDocument, FormatTag, IndexedUnit, MergedEvidence, Metadata, MetadataFilter, NewUnit,
    RawDocument, WebHit,
};
pub use normalizer::{clean_text, Normalizer};
pub use orchestrator::{merge, Answer, HybridSearch, ResearchAssistant, SearchScope};
pub use retrieval::{build_snippet, RetrievalEngine, SnippetConfig};
pub use stores::{LocalCollection, QdrantStore};
pub use synthesis::OpenRouterClient;
pub use traits::{EvidenceConsumer, VectorIndex, WebSearch};
pub use uuid::Uuid;
pub use web::WebSearchClient;
