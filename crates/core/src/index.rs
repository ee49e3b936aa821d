use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{CollectionStats, IndexError, IndexedUnit, MetadataFilter, NewUnit};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Cosine distance in `[0, 2]`; vectors with no magnitude are treated as
/// unrelated (distance 1).
pub fn cosine_distance(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 1.0;
    }

    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();

    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        1.0
    } else {
        1.0 - dot / (left_norm * right_norm)
    }
}

/// Embeds units exactly once on insertion and delegates storage to a
/// [`VectorIndex`] backend.
#[derive(Clone)]
pub struct EmbeddingIndex {
    backend: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingIndex {
    pub fn new(backend: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { backend, embedder }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn collection(&self) -> &str {
        self.backend.collection()
    }

    /// Adds one document's units as a single batch. Every unit is stamped with
    /// `filename`, `chunk_index`, `total_chunks` and one shared
    /// `added_date`; either all are stored or the call fails.
    pub async fn add(&self, filename: &str, units: Vec<NewUnit>) -> Result<Vec<Uuid>, IndexError> {
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = units.iter().map(|unit| unit.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|error| self.write_error(error.to_string()))?;

        if embeddings.len() != units.len() {
            return Err(self.write_error(format!(
                "embedding count {} doesn't match unit count {}",
                embeddings.len(),
                units.len()
            )));
        }

        let total_chunks = units.len();
        let added_date = Utc::now().to_rfc3339();
        let indexed: Vec<IndexedUnit> = units
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(chunk_index, (unit, embedding))| {
                let id = Uuid::new_v4();
                let mut metadata = unit.metadata;
                metadata.insert("filename".to_string(), Value::from(filename));
                metadata.insert("doc_id".to_string(), Value::from(id.to_string()));
                metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
                metadata.insert("total_chunks".to_string(), Value::from(total_chunks));
                metadata.insert("added_date".to_string(), Value::from(added_date.clone()));

                IndexedUnit {
                    id,
                    text: unit.text,
                    embedding,
                    metadata,
                    filename: filename.to_string(),
                    chunk_index,
                }
            })
            .collect();

        self.backend.insert_units(&indexed).await?;

        info!(
            collection = self.collection(),
            filename,
            units = total_chunks,
            "added units"
        );

        Ok(indexed.into_iter().map(|unit| unit.id).collect())
    }

    /// Embeds the query and returns up to `k` units, most similar first.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedUnit, f32)>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|error| IndexError::Query {
                collection: self.collection().to_string(),
                reason: error.to_string(),
            })?;

        self.search_by_vector(&query_vector, k, filter).await
    }

    pub async fn search_by_vector(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedUnit, f32)>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits = self.backend.nearest(query_vector, k, filter).await?;
        hits.sort_by(|left, right| left.1.total_cmp(&right.1));
        hits.truncate(k);
        debug!(collection = self.collection(), hits = hits.len(), "index search");
        Ok(hits)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, IndexError> {
        let deleted = self.backend.delete_unit(id).await?;
        if deleted {
            info!(collection = self.collection(), %id, "deleted unit");
        }
        Ok(deleted)
    }

    pub async fn clear(&self) -> Result<(), IndexError> {
        self.backend.clear().await?;
        info!(collection = self.collection(), "collection cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CollectionStats, IndexError> {
        Ok(CollectionStats {
            unit_count: self.backend.count().await?,
            collection: self.collection().to_string(),
            embedding_model: self.embedder.model_id(),
        })
    }

    fn write_error(&self, reason: String) -> IndexError {
        IndexError::Write {
            collection: self.collection().to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbedError;
    use crate::stores::LocalCollection;
    use crate::Metadata;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_id(&self) -> String {
            "failing".to_string()
        }

        fn dimensions(&self) -> usize {
            4
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::BadResponse("model offline".to_string()))
        }
    }

    fn units(texts: &[&str]) -> Vec<NewUnit> {
        texts
            .iter()
            .map(|text| NewUnit::new(*text, Metadata::new()))
            .collect()
    }

    #[test]
    fn cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }

    #[tokio::test]
    async fn batch_metadata_is_consistent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(dir.path(), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(CharacterNgramEmbedder::default()));

        let ids = index
            .add("doc.txt", units(&["first part", "second part", "third part"]))
            .await?;
        assert_eq!(ids.len(), 3);

        let hits = index.search("part", 10, None).await?;
        assert_eq!(hits.len(), 3);

        let added_dates: Vec<&Value> = hits
            .iter()
            .map(|(unit, _)| &unit.metadata["added_date"])
            .collect();
        assert!(added_dates.windows(2).all(|pair| pair[0] == pair[1]));

        for (unit, _) in &hits {
            assert_eq!(unit.filename, "doc.txt");
            assert_eq!(unit.metadata["total_chunks"], Value::from(3));
            assert_eq!(unit.metadata["chunk_index"], Value::from(unit.chunk_index));
            assert!(ids.contains(&unit.id));
        }
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(dir.path(), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(FailingEmbedder));

        let result = index.add("doc.txt", units(&["a", "b"])).await;
        assert!(matches!(result, Err(IndexError::Write { .. })));
        assert_eq!(index.stats().await?.unit_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn search_results_are_sorted_and_filtered() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(dir.path(), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(CharacterNgramEmbedder::default()));

        index
            .add("pumps.txt", units(&["hydraulic pump pressure", "pump maintenance schedule"]))
            .await?;
        index
            .add("valves.txt", units(&["valve seat leakage", "hydraulic valve pressure"]))
            .await?;

        let hits = index.search("hydraulic pressure", 3, None).await?;
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].1 <= pair[1].1));

        let filter = MetadataFilter::new().with("filename", "valves.txt");
        let filtered = index.search("hydraulic pressure", 5, Some(&filter)).await?;
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|(unit, _)| unit.filename == "valves.txt"));

        assert!(index.search("anything", 0, None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_and_clear() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let backend = Arc::new(LocalCollection::open(dir.path(), "docs").await?);
        let index = EmbeddingIndex::new(backend, Arc::new(CharacterNgramEmbedder::default()));

        let ids = index.add("doc.txt", units(&["one", "two"])).await?;
        assert!(index.delete(ids[0]).await?);
        assert!(!index.delete(ids[0]).await?);
        assert!(!index.delete(Uuid::new_v4()).await?);
        assert_eq!(index.stats().await?.unit_count, 1);

        index.clear().await?;
        let stats = index.stats().await?;
        assert_eq!(stats.unit_count, 0);
        assert_eq!(stats.collection, "docs");
        assert_eq!(stats.embedding_model, "ngram-128");
        Ok(())
    }
}
