use crate::error::ConfigError;
use crate::models::{Chunk, ExtractedDocument};
use std::ops::Range;

/// How far back from a tentative chunk end we look for a sentence break.
pub const SENTENCE_LOOKBACK_CHARS: usize = 100;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Validated chunker parameters. Sizes are in characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::InvalidChunking(
                "chunk size must be positive".to_string(),
            ));
        }

        if overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }

        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Character ranges of each window before trimming. Consecutive ranges
/// overlap and together cover the whole content.
pub fn chunk_spans(content: &str, config: ChunkingConfig) -> Vec<Range<usize>> {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();

    if len == 0 {
        return Vec::new();
    }

    if len <= config.chunk_size {
        return vec![0..len];
    }

    let mut spans = Vec::new();
    let mut start = 0usize;

    while start < len {
        let mut end = start + config.chunk_size;

        if end < len {
            let search_start = start.max(end.saturating_sub(SENTENCE_LOOKBACK_CHARS));
            let sentence_end = chars[search_start..end]
                .iter()
                .rposition(|ch| *ch == '.')
                .map(|offset| search_start + offset);

            if let Some(position) = sentence_end.filter(|position| *position > start) {
                end = position + 1;
            }
        } else {
            end = len;
        }

        spans.push(start..end);

        if end >= len {
            break;
        }

        // A sentence snap close to `start` could otherwise move the window backwards.
        let next = end.saturating_sub(config.overlap);
        start = if next > start { next } else { end };
    }

    spans
}

/// Splits content into overlapping, sentence-aware chunks. Chunks that are
/// empty after trimming are dropped.
pub fn chunk_text(content: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();

    chunk_spans(content, config)
        .into_iter()
        .filter_map(|span| {
            let piece: String = chars[span].iter().collect();
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

pub fn build_chunks(document: &ExtractedDocument, config: ChunkingConfig) -> Vec<Chunk> {
    let pieces = chunk_text(&document.content, config);
    let total_chunks = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            text,
            source_document: document.filename.clone(),
            chunk_index,
            total_chunks,
        })
        .collect()
}
