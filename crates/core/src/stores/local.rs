use crate::index::cosine_distance;
use crate::traits::VectorIndex;
use crate::{IndexError, IndexedUnit, Metadata, MetadataFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

/// On-disk schema of one unit.
#[derive(Debug, Serialize, Deserialize)]
struct StoredUnit {
    id: Uuid,
    text: String,
    embedding_vector: Vec<f32>,
    metadata_map: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile {
    collection: String,
    units: Vec<StoredUnit>,
}

impl From<&IndexedUnit> for StoredUnit {
    fn from(unit: &IndexedUnit) -> Self {
        Self {
            id: unit.id,
            text: unit.text.clone(),
            embedding_vector: unit.embedding.clone(),
            metadata_map: unit.metadata.clone(),
        }
    }
}

impl From<StoredUnit> for IndexedUnit {
    fn from(stored: StoredUnit) -> Self {
        let filename = stored
            .metadata_map
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let chunk_index = stored
            .metadata_map
            .get("chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        Self {
            id: stored.id,
            text: stored.text,
            embedding: stored.embedding_vector,
            metadata: stored.metadata_map,
            filename,
            chunk_index,
        }
    }
}

/// A named collection persisted as `<dir>/<collection>.json`. Every write
/// rewrites the file through a temporary sibling and a rename, and the
/// in-memory copy only changes once the file is in place.
pub struct LocalCollection {
    name: String,
    path: PathBuf,
    units: RwLock<Vec<IndexedUnit>>,
}

impl LocalCollection {
    pub async fn open(dir: &Path, name: &str) -> Result<Self, IndexError> {
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
            && !name.starts_with('.');
        if !valid_name {
            return Err(IndexError::InvalidCollection(name.to_string()));
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{name}.json"));

        let units = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: CollectionFile = serde_json::from_slice(&bytes)?;
                file.units.into_iter().map(IndexedUnit::from).collect()
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(IndexError::Io(error)),
        };

        tracing::debug!(
            collection = name,
            path = %path.display(),
            units = units.len(),
            "opened collection"
        );

        Ok(Self {
            name: name.to_string(),
            path,
            units: RwLock::new(units),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, units: &[IndexedUnit]) -> Result<(), IndexError> {
        let file = CollectionFile {
            collection: self.name.clone(),
            units: units.iter().map(StoredUnit::from).collect(),
        };
        let bytes = serde_json::to_vec(&file)?;

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, bytes).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    fn write_error(&self, error: impl std::fmt::Display) -> IndexError {
        IndexError::Write {
            collection: self.name.clone(),
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for LocalCollection {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn insert_units(&self, units: &[IndexedUnit]) -> Result<(), IndexError> {
        if units.is_empty() {
            return Ok(());
        }

        let mut guard = self.units.write().await;

        if let Some(duplicate) = units
            .iter()
            .find(|unit| guard.iter().any(|existing| existing.id == unit.id))
        {
            return Err(self.write_error(format!("duplicate unit id {}", duplicate.id)));
        }

        let mut next = guard.clone();
        next.extend(units.iter().cloned());
        self.persist(&next)
            .await
            .map_err(|error| self.write_error(error))?;
        *guard = next;
        Ok(())
    }

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedUnit, f32)>, IndexError> {
        let guard = self.units.read().await;

        let mut scored: Vec<(&IndexedUnit, f32)> = guard
            .iter()
            .filter(|unit| filter.map_or(true, |filter| filter.matches(&unit.metadata)))
            .map(|unit| (unit, cosine_distance(query_vector, &unit.embedding)))
            .collect();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(unit, distance)| (unit.clone(), distance))
            .collect())
    }

    async fn delete_unit(&self, id: Uuid) -> Result<bool, IndexError> {
        let mut guard = self.units.write().await;
        if !guard.iter().any(|unit| unit.id == id) {
            return Ok(false);
        }

        let next: Vec<IndexedUnit> = guard.iter().filter(|unit| unit.id != id).cloned().collect();
        self.persist(&next)
            .await
            .map_err(|error| self.write_error(error))?;
        *guard = next;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let mut guard = self.units.write().await;
        self.persist(&[])
            .await
            .map_err(|error| self.write_error(error))?;
        guard.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.units.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn unit(text: &str, filename: &str, chunk_index: usize, embedding: Vec<f32>) -> IndexedUnit {
        let mut metadata = Metadata::new();
        metadata.insert("filename".to_string(), Value::from(filename));
        metadata.insert("chunk_index".to_string(), Value::from(chunk_index));
        IndexedUnit {
            id: Uuid::new_v4(),
            text: text.to_string(),
            embedding,
            metadata,
            filename: filename.to_string(),
            chunk_index,
        }
    }

    #[tokio::test]
    async fn collection_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let stored = unit("persisted text", "doc.txt", 4, vec![0.6, 0.8]);

        {
            let collection = LocalCollection::open(dir.path(), "notes").await?;
            collection.insert_units(std::slice::from_ref(&stored)).await?;
        }

        let reopened = LocalCollection::open(dir.path(), "notes").await?;
        assert_eq!(reopened.count().await?, 1);

        let hits = reopened.nearest(&[0.6, 0.8], 5, None).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, stored);
        assert!(hits[0].1.abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn nearest_orders_by_distance() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "notes").await?;
        collection
            .insert_units(&[
                unit("far", "a.txt", 0, vec![0.0, 1.0]),
                unit("near", "a.txt", 1, vec![1.0, 0.1]),
                unit("middle", "b.txt", 0, vec![1.0, 1.0]),
            ])
            .await?;

        let hits = collection.nearest(&[1.0, 0.0], 2, None).await?;
        let texts: Vec<&str> = hits.iter().map(|(unit, _)| unit.text.as_str()).collect();
        assert_eq!(texts, vec!["near", "middle"]);

        let filter = MetadataFilter::new().with("filename", "a.txt");
        let filtered = collection.nearest(&[1.0, 0.0], 5, Some(&filter)).await?;
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[1].0.text, "far");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_ids_reject_the_whole_batch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = LocalCollection::open(dir.path(), "notes").await?;
        let existing = unit("existing", "a.txt", 0, vec![1.0]);
        collection.insert_units(std::slice::from_ref(&existing)).await?;

        let result = collection
            .insert_units(&[unit("fresh", "a.txt", 1, vec![1.0]), existing.clone()])
            .await;
        assert!(matches!(result, Err(IndexError::Write { .. })));
        assert_eq!(collection.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_collection_names_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["", "../escape", "a/b", ".hidden"] {
            let result = LocalCollection::open(dir.path(), name).await;
            assert!(matches!(result, Err(IndexError::InvalidCollection(_))), "{name}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let collection = Arc::new(LocalCollection::open(dir.path(), "notes").await?);

        let mut handles = Vec::new();
        for writer in 0..8 {
            let collection = Arc::clone(&collection);
            handles.push(tokio::spawn(async move {
                let batch: Vec<IndexedUnit> = (0..5)
                    .map(|index| unit("text", &format!("doc-{writer}.txt"), index, vec![1.0, 0.0]))
                    .collect();
                collection.insert_units(&batch).await
            }));
        }
        for handle in handles {
            handle.await??;
        }

        assert_eq!(collection.count().await?, 40);
        let reopened = LocalCollection::open(dir.path(), "notes").await?;
        assert_eq!(reopened.count().await?, 40);
        Ok(())
    }
}
