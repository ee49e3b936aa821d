use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatTag {
    Pdf,
    PlainText,
    Docx,
    Html,
    Markdown,
}

impl FormatTag {
    pub const ALL: [FormatTag; 5] = [
        FormatTag::Pdf,
        FormatTag::PlainText,
        FormatTag::Docx,
        FormatTag::Html,
        FormatTag::Markdown,
    ];

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::PlainText),
            "docx" => Some(Self::Docx),
            "html" | "htm" => Some(Self::Html),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::PlainText => "txt",
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Markdown => "md",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub format: FormatTag,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    pub file_size: u64,
    pub word_count: usize,
    pub char_count: usize,
    pub format: FormatTag,
    pub processed_at: DateTime<Utc>,
    pub checksum: String,
}

impl DocumentMetadata {
    /// Flattens into the metadata map stored alongside every indexed unit.
    pub fn to_metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("file_size".to_string(), Value::from(self.file_size));
        map.insert("word_count".to_string(), Value::from(self.word_count));
        map.insert("char_count".to_string(), Value::from(self.char_count));
        map.insert("file_type".to_string(), Value::from(self.format.as_str()));
        map.insert(
            "processed_date".to_string(),
            Value::from(self.processed_at.to_rfc3339()),
        );
        map.insert("checksum".to_string(), Value::from(self.checksum.clone()));
        map
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedDocument {
    pub filename: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_document: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedUnit {
    pub id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub filename: String,
    pub chunk_index: usize,
}

/// A unit waiting to be embedded and written as part of one batch.
#[derive(Debug, Clone)]
pub struct NewUnit {
    pub text: String,
    pub metadata: Metadata,
}

impl NewUnit {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// Equality predicate over unit metadata, e.g. `{"filename": "doc.txt"}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataFilter {
    pub equals: Metadata,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.equals
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    Document,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceItem {
    pub title: String,
    pub url_or_filename: String,
    pub snippet: String,
    pub domain_or_source: String,
    pub content: String,
    pub relevance_score: f64,
    pub kind: EvidenceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub domain: String,
    pub content: Option<String>,
}

/// One numbered source handed to the synthesis collaborator.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CitedEvidence {
    pub index: usize,
    pub title: String,
    pub source: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MergedEvidence {
    pub document_results: Vec<EvidenceItem>,
    pub web_results: Vec<EvidenceItem>,
    pub total_count: usize,
}

impl MergedEvidence {
    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Documents first, then web results, numbered from 1.
    pub fn cited(&self) -> Vec<CitedEvidence> {
        self.document_results
            .iter()
            .chain(self.web_results.iter())
            .enumerate()
            .map(|(position, item)| CitedEvidence {
                index: position + 1,
                title: item.title.clone(),
                source: item.domain_or_source.clone(),
                snippet: if item.content.is_empty() {
                    item.snippet.clone()
                } else {
                    item.content.chars().take(400).collect()
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStats {
    pub unit_count: usize,
    pub collection: String,
    pub embedding_model: String,
}
