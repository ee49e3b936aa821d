use crate::chunking::{build_chunks, ChunkingConfig};
use crate::index::EmbeddingIndex;
use crate::normalizer::Normalizer;
use crate::{ExtractedDocument, FormatTag, IngestError, NewUnit, RawDocument};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use uuid::Uuid;
use walkdir::WalkDir;

/// Files under `folder` (recursively) whose extension maps to a known format.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| FormatTag::from_path(entry.path()).is_some())
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestedDocument {
    pub filename: String,
    pub chunk_count: usize,
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub documents: Vec<IngestedDocument>,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|document| document.chunk_count).sum()
    }
}

/// Chunks an extracted document and writes all of its chunks as one batch.
pub async fn index_document(
    document: &ExtractedDocument,
    chunking: ChunkingConfig,
    index: &EmbeddingIndex,
) -> Result<IngestedDocument, IngestError> {
    let chunks = build_chunks(document, chunking);
    if chunks.is_empty() {
        return Err(IngestError::Extraction {
            filename: document.filename.clone(),
            reason: "no text content".to_string(),
        });
    }

    let base = document.metadata.to_metadata();
    let units: Vec<NewUnit> = chunks
        .into_iter()
        .map(|chunk| {
            let mut metadata = base.clone();
            metadata.insert(
                "source_document".to_string(),
                Value::from(chunk.source_document),
            );
            NewUnit::new(chunk.text, metadata)
        })
        .collect();

    let ids = index.add(&document.filename, units).await?;

    Ok(IngestedDocument {
        filename: document.filename.clone(),
        chunk_count: ids.len(),
        ids,
    })
}

pub async fn ingest_document(
    path: &Path,
    normalizer: &Normalizer,
    chunking: ChunkingConfig,
    index: &EmbeddingIndex,
) -> Result<IngestedDocument, IngestError> {
    let document = normalizer.normalize_path(path).await?;
    index_document(&document, chunking, index).await
}

/// Upload entry: the caller already holds the bytes.
pub async fn ingest_upload(
    raw: RawDocument,
    normalizer: &Normalizer,
    chunking: ChunkingConfig,
    index: &EmbeddingIndex,
) -> Result<IngestedDocument, IngestError> {
    let document = normalizer.normalize_blocking(raw).await?;
    index_document(&document, chunking, index).await
}

/// Ingests every path on its own task. One file failing never stops the
/// others; its reason ends up in `skipped_files`.
pub async fn ingest_paths_best_effort(
    paths: Vec<PathBuf>,
    normalizer: &Normalizer,
    chunking: ChunkingConfig,
    index: &EmbeddingIndex,
) -> IngestionReport {
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::new();
    for path in paths {
        let normalizer = normalizer.clone();
        let index = index.clone();
        let task_path = path.clone();
        let handle = tasks.spawn(async move {
            ingest_document(&task_path, &normalizer, chunking, &index).await
        });
        pending.insert(handle.id(), path);
    }

    let mut ingested = Vec::new();
    let mut report = IngestionReport::default();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, result)) => (id, result.map_err(|error| error.to_string())),
            Err(error) => (error.id(), Err(format!("ingest task failed: {error}"))),
        };
        let Some(path) = pending.remove(&id) else {
            continue;
        };

        match outcome {
            Ok(document) => ingested.push((path, document)),
            Err(reason) => {
                tracing::warn!(path = %path.display(), reason = %reason, "skipped file");
                report.skipped_files.push(SkippedFile { path, reason });
            }
        }
    }

    ingested.sort_by(|left, right| left.0.cmp(&right.0));
    report.documents = ingested.into_iter().map(|(_, document)| document).collect();
    report
        .skipped_files
        .sort_by(|left, right| left.path.cmp(&right.path));

    tracing::info!(
        documents = report.documents.len(),
        chunks = report.chunk_count(),
        skipped = report.skipped_files.len(),
        "ingestion finished"
    );
    report
}

pub async fn ingest_folder_best_effort(
    folder: &Path,
    normalizer: &Normalizer,
    chunking: ChunkingConfig,
    index: &EmbeddingIndex,
) -> Result<IngestionReport, IngestError> {
    let files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::NoDocuments(folder.display().to_string()));
    }

    Ok(ingest_paths_best_effort(files, normalizer, chunking, index).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, Embedder};
    use crate::error::EmbedError;
    use async_trait::async_trait;
    use crate::retrieval::RetrievalEngine;
    use crate::stores::LocalCollection;
    use std::fs;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    async fn local_index(dir: &TempDir) -> Result<EmbeddingIndex, Box<dyn std::error::Error>> {
        let backend = Arc::new(LocalCollection::open(&dir.path().join("store"), "docs").await?);
        Ok(EmbeddingIndex::new(
            backend,
            Arc::new(CharacterNgramEmbedder::default()),
        ))
    }

    struct PanickingEmbedder;

    #[async_trait]
    impl Embedder for PanickingEmbedder {
        fn model_id(&self) -> String {
            "panicking".to_string()
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            panic!("embedding backend crashed")
        }
    }

    fn three_chunk_text() -> String {
        [
            "The doc topic covers retrieval of passages from local files. ",
            "Each passage is embedded once and stored with its metadata. ",
            "Searching the doc topic returns the closest passages first. ",
        ]
        .concat()
    }

    #[test]
    fn discover_documents_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.txt"), "alpha")?;
        fs::write(nested.join("b.MD"), "# beta")?;
        fs::write(nested.join("c.xyz"), "ignored")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|path| path.extension().is_some_and(|ext| ext != "xyz")));
        Ok(())
    }

    #[tokio::test]
    async fn ingest_then_search_finds_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = local_index(&dir).await?;
        let path = dir.path().join("doc.txt");
        fs::write(&path, three_chunk_text())?;

        let chunking = ChunkingConfig::new(70, 10)?;
        let ingested = ingest_document(&path, &Normalizer::default(), chunking, &index).await?;
        assert_eq!(ingested.filename, "doc.txt");
        assert_eq!(ingested.chunk_count, 3);
        assert_eq!(index.stats().await?.unit_count, 3);

        let results = RetrievalEngine::new(index).retrieve("doc topic", 2).await?;
        assert!(!results.is_empty() && results.len() <= 2);
        assert!(results.iter().all(|item| item.url_or_filename == "doc.txt"));
        assert!(results
            .windows(2)
            .all(|pair| pair[0].relevance_score >= pair[1].relevance_score));
        Ok(())
    }

    #[tokio::test]
    async fn units_carry_document_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = local_index(&dir).await?;
        let raw = RawDocument {
            filename: "notes.md".to_string(),
            bytes: b"# Notes\n\nSome **important** text.".to_vec(),
            format: FormatTag::Markdown,
        };

        ingest_upload(raw, &Normalizer::default(), ChunkingConfig::default(), &index).await?;

        let hits = index.search("important text", 1, None).await?;
        let (unit, _) = &hits[0];
        assert_eq!(unit.text, "Notes Some important text.");
        assert_eq!(unit.metadata["file_type"], Value::from("md"));
        assert_eq!(unit.metadata["source_document"], Value::from("notes.md"));
        assert_eq!(unit.metadata["total_chunks"], Value::from(1));
        assert!(unit.metadata.contains_key("checksum"));
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_format_rejected_early() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = local_index(&dir).await?;
        let missing = dir.path().join("never-created.xyz");

        let result =
            ingest_document(&missing, &Normalizer::default(), ChunkingConfig::default(), &index)
                .await;
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(ext)) if ext == ".xyz"));
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_fails_without_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = local_index(&dir).await?;
        let empty = dir.path().join("empty");
        fs::create_dir(&empty)?;

        let normalizer = Normalizer::default();
        let result =
            ingest_folder_best_effort(&empty, &normalizer, ChunkingConfig::default(), &index).await;
        assert!(matches!(result, Err(IngestError::NoDocuments(_))));
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_skips_broken_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let index = local_index(&dir).await?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        fs::write(docs.join("good.txt"), "A readable document about pumps.")?;
        fs::write(docs.join("broken.pdf"), b"%PDF-1.4\n%broken")?;
        fs::write(docs.join("blank.txt"), "   \n\t ")?;

        let normalizer = Normalizer::default();
        let report =
            ingest_folder_best_effort(&docs, &normalizer, ChunkingConfig::default(), &index).await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].filename, "good.txt");
        assert_eq!(report.chunk_count(), 1);

        let skipped: Vec<&str> = report
            .skipped_files
            .iter()
            .filter_map(|skipped| skipped.path.file_name().and_then(|name| name.to_str()))
            .collect();
        assert_eq!(skipped, vec!["blank.txt", "broken.pdf"]);
        assert_eq!(index.stats().await?.unit_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn panicking_task_is_reported_as_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(&dir.path().join("store"), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(PanickingEmbedder));
        let path = dir.path().join("a.txt");
        fs::write(&path, "Some text worth indexing.")?;

        let report = ingest_paths_best_effort(
            vec![path.clone()],
            &Normalizer::default(),
            ChunkingConfig::default(),
            &index,
        )
        .await;

        assert!(report.documents.is_empty());
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].path, path);
        assert!(report.skipped_files[0].reason.starts_with("ingest task failed"));
        Ok(())
    }
}
