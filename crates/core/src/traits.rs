use crate::{CitedEvidence, EvidenceSourceError, IndexError, IndexedUnit, MetadataFilter, WebHit};
use async_trait::async_trait;
use uuid::Uuid;

/// Storage backend for embedded units. Implementations own persistence and
/// must serialize concurrent writers themselves.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn collection(&self) -> &str;

    /// Writes the whole batch or nothing.
    async fn insert_units(&self, units: &[IndexedUnit]) -> Result<(), IndexError>;

    /// Returns up to `k` units ordered by ascending cosine distance.
    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedUnit, f32)>, IndexError>;

    async fn delete_unit(&self, id: Uuid) -> Result<bool, IndexError>;

    async fn clear(&self) -> Result<(), IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<WebHit>, EvidenceSourceError>;
}

/// Turns numbered evidence into a synthesized answer that cites sources by
/// their 1-based index.
#[async_trait]
pub trait EvidenceConsumer: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        evidence: &[CitedEvidence],
    ) -> Result<String, EvidenceSourceError>;
}
