use crate::error::IngestError;
use crate::extractor::Extractor;
use crate::models::{DocumentMetadata, ExtractedDocument, FormatTag, RawDocument};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

const KEPT_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '(', ')', '-', '\'', '"'];

/// Drops characters outside letters, digits, whitespace and basic punctuation,
/// collapses whitespace runs to a single space and trims. Applying it twice
/// yields the same string.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|ch| ch.is_alphanumeric() || ch.is_whitespace() || KEPT_PUNCTUATION.contains(ch))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Registry of extractors keyed by format.
#[derive(Debug, Clone)]
pub struct Normalizer {
    extractors: BTreeMap<FormatTag, Extractor>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_formats(&FormatTag::ALL)
    }
}

impl Normalizer {
    pub fn with_formats(formats: &[FormatTag]) -> Self {
        let mut normalizer = Self {
            extractors: BTreeMap::new(),
        };
        for format in formats {
            normalizer.register(Extractor::for_format(*format));
        }
        normalizer
    }

    pub fn register(&mut self, extractor: Extractor) {
        self.extractors.insert(extractor.format(), extractor);
    }

    pub fn supports(&self, format: FormatTag) -> bool {
        self.extractors.contains_key(&format)
    }

    /// Resolves the format from the extension without touching the file.
    pub fn format_for_path(&self, path: &Path) -> Result<FormatTag, IngestError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();

        match FormatTag::from_path(path) {
            Some(format) if self.supports(format) => Ok(format),
            _ => Err(IngestError::UnsupportedFormat(if extension.is_empty() {
                path.display().to_string()
            } else {
                extension
            })),
        }
    }

    pub async fn normalize_path(&self, path: &Path) -> Result<ExtractedDocument, IngestError> {
        let format = self.format_for_path(path)?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();

        let bytes = tokio::fs::read(path).await?;
        self.normalize_blocking(RawDocument {
            filename,
            bytes,
            format,
        })
        .await
    }

    /// Runs `normalize` on the blocking pool. PDF and DOCX parsing is
    /// CPU-bound, and a panicking parser becomes an `Extraction` error.
    pub async fn normalize_blocking(
        &self,
        raw: RawDocument,
    ) -> Result<ExtractedDocument, IngestError> {
        let normalizer = self.clone();
        let filename = raw.filename.clone();

        tokio::task::spawn_blocking(move || normalizer.normalize(raw))
            .await
            .map_err(|error| IngestError::Extraction {
                filename,
                reason: format!("extraction task failed: {error}"),
            })?
    }

    pub fn normalize(&self, raw: RawDocument) -> Result<ExtractedDocument, IngestError> {
        let extractor = self
            .extractors
            .get(&raw.format)
            .ok_or_else(|| IngestError::UnsupportedFormat(raw.format.to_string()))?;

        let extracted = extractor.extract(&raw.filename, &raw.bytes)?;
        let content = clean_text(&extracted);

        let metadata = DocumentMetadata {
            file_size: raw.bytes.len() as u64,
            word_count: content.split_whitespace().count(),
            char_count: content.chars().count(),
            format: raw.format,
            processed_at: Utc::now(),
            checksum: checksum(&raw.bytes),
        };

        tracing::debug!(
            filename = %raw.filename,
            format = %raw.format,
            chars = metadata.char_count,
            "normalized document"
        );

        Ok(ExtractedDocument {
            filename: raw.filename,
            content,
            metadata,
        })
    }
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
