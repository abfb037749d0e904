use crate::index::IndexError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One stored point: id, embedding and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedVector {
    pub id: String,
    pub values: Vec<f32>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVector {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Storage backend behind the song index.
///
/// Implementations must keep a single dimension for all stored vectors and
/// return query results ordered by decreasing similarity.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace by id.
    async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<(), IndexError>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredVector>, IndexError>;

    async fn fetch(&self, id: &str) -> Result<Option<IndexedVector>, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    /// Dimension of the stored vectors, `None` while empty.
    async fn dimension(&self) -> Result<Option<usize>, IndexError>;

    /// Drop every stored vector.
    async fn clear(&self) -> Result<(), IndexError>;

    async fn entries(&self, limit: usize) -> Result<Vec<IndexedVector>, IndexError>;
}
