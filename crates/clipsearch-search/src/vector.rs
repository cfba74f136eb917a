//! Qdrant-backed vector store for clip embeddings
//!
//! Holds one cosine-distance collection of clip vectors. The orchestrator
//! never runs nearest-neighbor queries here: re-ranking fetches the stored
//! vectors for the lexical candidates and scores them locally.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vector_output, vectors_config::Config,
    vectors_output::VectorsOptions, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    GetPointsBuilder, PointId, PointStruct, PointsIdsList, UpsertPointsBuilder, VectorOutput,
    VectorParams, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::{debug, info};

use clipsearch_core::{epoch_now, ItemId};

use crate::error::{Result, SearchError};

/// Configuration for connecting to the vector store
#[derive(Debug, Clone)]
pub struct VectorConfig {
    /// Qdrant server URL (e.g., "http://localhost:6334")
    pub url: String,
    /// Optional API key for authentication
    pub api_key: Option<String>,
    /// Collection holding clip vectors
    pub collection: String,
    /// Vector dimension, fixed at collection creation
    pub dimension: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection: "clip_embeddings".to_string(),
            dimension: 1536,
        }
    }
}

impl VectorConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Vector storage and retrieval by clip id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<()>;

    /// Fetch stored vectors for the given ids in one round trip.
    /// Ids without a stored vector are simply absent from the result.
    async fn fetch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>>;

    /// Store or overwrite the vector for one clip.
    async fn upsert(&self, id: &ItemId, vector: Vec<f32>, model: &str) -> Result<()>;

    /// Remove vectors. Absent ids are ignored.
    async fn delete(&self, ids: &[ItemId]) -> Result<()>;

    /// Dimension the collection was created with.
    fn dimension(&self) -> usize;
}

/// Qdrant client wrapper for clip vectors.
///
/// Clip ids are UUID strings and map directly to Qdrant point ids.
pub struct QdrantVectorIndex {
    client: Qdrant,
    config: VectorConfig,
}

impl QdrantVectorIndex {
    /// Connect to the Qdrant server and verify it responds.
    pub async fn connect(config: VectorConfig) -> Result<Self> {
        info!("Connecting to Qdrant at {}", config.url);

        let mut builder = Qdrant::from_url(&config.url);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder.build().map_err(|e| {
            SearchError::Connection(format!("Failed to build Qdrant client: {}", e))
        })?;

        client
            .list_collections()
            .await
            .map_err(|e| SearchError::Connection(format!("Failed to connect to Qdrant: {}", e)))?;

        Ok(Self { client, config })
    }

    fn point_id(id: &ItemId) -> PointId {
        PointId::from(id.as_str().to_string())
    }

    fn item_id(point_id: PointId) -> Option<ItemId> {
        match point_id.point_id_options? {
            PointIdOptions::Uuid(u) => Some(ItemId::from(u)),
            PointIdOptions::Num(n) => Some(ItemId::from(n.to_string())),
        }
    }

    /// Pull the dense vector out of a point's vector output. Servers
    /// predating the typed oneof fill only the flat legacy field.
    #[allow(deprecated)]
    fn dense_vector(output: VectorOutput) -> Option<Vec<f32>> {
        match output.vector {
            Some(vector_output::Vector::Dense(dense)) => Some(dense.data),
            Some(_) => None,
            None if !output.data.is_empty() => Some(output.data),
            None => None,
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn ensure_collection(&self) -> Result<()> {
        let name = &self.config.collection;
        if self.client.collection_exists(name).await? {
            debug!("Collection '{}' already exists", name);
            return Ok(());
        }

        info!(
            "Creating collection '{}' (dim={}, distance=Cosine)",
            name, self.config.dimension
        );

        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: self.config.dimension as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        self.client
            .create_collection(
                CreateCollectionBuilder::new(name.clone()).vectors_config(vectors_config),
            )
            .await?;

        Ok(())
    }

    async fn fetch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let point_ids: Vec<PointId> = ids.iter().map(Self::point_id).collect();

        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(self.config.collection.clone(), point_ids)
                    .with_vectors(true),
            )
            .await?;

        let mut vectors = HashMap::with_capacity(response.result.len());
        for point in response.result {
            let Some(id) = point.id.and_then(Self::item_id) else {
                continue;
            };
            let Some(data) = point.vectors.and_then(|v| match v.vectors_options {
                Some(VectorsOptions::Vector(vector)) => Self::dense_vector(vector),
                _ => None,
            }) else {
                continue;
            };
            vectors.insert(id, data);
        }

        debug!(requested = ids.len(), found = vectors.len(), "fetched vectors");
        Ok(vectors)
    }

    async fn upsert(&self, id: &ItemId, vector: Vec<f32>, model: &str) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        let payload = Payload::try_from(json!({
            "clip_id": id.as_str(),
            "model": model,
            "embedded_at": epoch_now(),
        }))
        .map_err(|e| SearchError::VectorStore(format!("invalid payload: {}", e)))?;

        let point = PointStruct::new(Self::point_id(id), vector, payload);

        self.client
            .upsert_points(
                UpsertPointsBuilder::new(self.config.collection.clone(), vec![point]).wait(true),
            )
            .await?;

        Ok(())
    }

    async fn delete(&self, ids: &[ItemId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = ids.iter().map(Self::point_id).collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(self.config.collection.clone())
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await?;

        debug!(count = ids.len(), "deleted vectors");
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::DenseVector;

    #[test]
    fn uuid_point_ids_round_trip() {
        let id = ItemId::from("2f4a9c1e-0000-4000-8000-1234567890ab");
        let point = QdrantVectorIndex::point_id(&id);
        assert_eq!(QdrantVectorIndex::item_id(point), Some(id));
    }

    #[test]
    fn numeric_point_ids_map_to_strings() {
        let point = PointId::from(42u64);
        assert_eq!(QdrantVectorIndex::item_id(point), Some(ItemId::from("42")));
    }

    #[test]
    fn dense_vectors_come_from_the_typed_output() {
        let output = VectorOutput {
            vector: Some(vector_output::Vector::Dense(DenseVector {
                data: vec![0.1, 0.2],
                ..Default::default()
            })),
            ..Default::default()
        };
        assert_eq!(
            QdrantVectorIndex::dense_vector(output),
            Some(vec![0.1, 0.2])
        );
    }

    #[test]
    #[allow(deprecated)]
    fn legacy_flat_output_still_yields_a_vector() {
        let output = VectorOutput {
            data: vec![0.3, 0.4],
            ..Default::default()
        };
        assert_eq!(
            QdrantVectorIndex::dense_vector(output),
            Some(vec![0.3, 0.4])
        );
    }
}
