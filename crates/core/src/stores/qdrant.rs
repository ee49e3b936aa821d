use crate::traits::VectorIndex;
use crate::{IndexError, IndexedUnit, Metadata, MetadataFilter};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const BACKEND: &str = "qdrant";

/// Remote collection on a Qdrant server, using cosine distance. Unit metadata
/// is stored flat in the point payload next to `text`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status().is_success() {
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        tracing::info!(
            collection = %self.collection,
            size = self.vector_size,
            "created qdrant collection"
        );
        Ok(())
    }

    fn write_error(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Write {
            collection: self.collection.clone(),
            reason: reason.into(),
        }
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

fn unit_payload(unit: &IndexedUnit) -> Value {
    let mut payload: Map<String, Value> = unit
        .metadata
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    payload.insert("filename".to_string(), Value::from(unit.filename.clone()));
    payload.insert("chunk_index".to_string(), Value::from(unit.chunk_index));
    payload.insert("text".to_string(), Value::from(unit.text.clone()));
    Value::Object(payload)
}

fn metadata_filter(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .equals
        .iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect();
    json!({ "must": must })
}

fn parse_hits(parsed: &Value) -> Result<Vec<(IndexedUnit, f32)>, IndexError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "search response has no result array".to_string(),
        })?;

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit
            .pointer("/id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("point without uuid id: {hit}"),
            })?;
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let embedding = hit
            .pointer("/vector")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|value| value as f32)
                    .collect()
            })
            .unwrap_or_default();

        let mut metadata: Metadata = hit
            .pointer("/payload")
            .and_then(Value::as_object)
            .map(|payload| {
                payload
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let text = metadata
            .remove("text")
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        let filename = metadata
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let chunk_index = metadata
            .get("chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize;

        result.push((
            IndexedUnit {
                id,
                text,
                embedding,
                metadata,
                filename,
                chunk_index,
            },
            1.0 - score,
        ));
    }

    Ok(result)
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert_units(&self, units: &[IndexedUnit]) -> Result<(), IndexError> {
        let points = units
            .iter()
            .map(|unit| {
                if unit.embedding.len() != self.vector_size {
                    return Err(self.write_error(format!(
                        "embedding dimension {} != {}",
                        unit.embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": unit.id.to_string(),
                    "vector": unit.embedding,
                    "payload": unit_payload(unit),
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|error| self.write_error(error.to_string()))?;

        if !response.status().is_success() {
            return Err(self.write_error(format!("qdrant returned {}", response.status())));
        }

        Ok(())
    }

    async fn nearest(
        &self,
        query_vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(IndexedUnit, f32)>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::Query {
                collection: self.collection.clone(),
                reason: format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    self.vector_size
                ),
            });
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
            "with_vector": true,
        });
        if let Some(filter) = filter.filter(|filter| !filter.equals.is_empty()) {
            body["filter"] = metadata_filter(filter);
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parse_hits(&parsed)
    }

    async fn delete_unit(&self, id: Uuid) -> Result<bool, IndexError> {
        let response = self
            .client
            .get(format!("{}/points/{id}", self.collection_url()))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "points": [id.to_string()] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.write_error(format!("qdrant returned {}", response.status())));
        }

        Ok(true)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url()).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(self.write_error(format!("qdrant returned {}", response.status())));
        }
        self.ensure_collection().await
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}
