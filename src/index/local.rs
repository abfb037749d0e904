use crate::index::{IndexError, IndexedVector, ScoredVector, VectorStore};
use crate::ml::cosine_similarity;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedIndex {
    dimension: Option<usize>,
    vectors: Vec<IndexedVector>,
}

#[derive(Debug, Default)]
struct LocalState {
    dimension: Option<usize>,
    vectors: BTreeMap<String, IndexedVector>,
}

impl LocalState {
    fn snapshot(&self) -> PersistedIndex {
        PersistedIndex {
            dimension: self.dimension,
            vectors: self.vectors.values().cloned().collect(),
        }
    }
}

/// Exact cosine search over an in-memory map, persisted as a JSON file.
pub struct LocalVectorStore {
    path: Option<PathBuf>,
    state: RwLock<LocalState>,
    /// Serialises file writes so snapshots land in mutation order.
    persist_lock: Mutex<()>,
}

impl LocalVectorStore {
    /// Not persisted; used when no index path is configured and in tests.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(LocalState::default()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Loads `path` if it exists, otherwise starts empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let persisted: PersistedIndex = serde_json::from_str(&contents).map_err(|e| {
                    IndexError::Storage(format!("corrupt index file {}: {}", path.display(), e))
                })?;
                let dimension = persisted
                    .dimension
                    .or_else(|| persisted.vectors.first().map(|v| v.values.len()));
                let vectors = persisted
                    .vectors
                    .into_iter()
                    .map(|v| (v.id.clone(), v))
                    .collect::<BTreeMap<_, _>>();
                info!(
                    "Loaded {} vectors (dimension {:?}) from {}",
                    vectors.len(),
                    dimension,
                    path.display()
                );
                LocalState { dimension, vectors }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No index file at {}, starting empty", path.display());
                LocalState::default()
            }
            Err(e) => return Err(IndexError::Storage(e.to_string())),
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            persist_lock: Mutex::new(()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, LocalState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LocalState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let body = serde_json::to_vec(&self.read().snapshot())
            .map_err(|e| IndexError::Storage(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IndexError::Storage(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| IndexError::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| IndexError::Storage(e.to_string()))?;

        debug!("Persisted index to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<(), IndexError> {
        if vectors.is_empty() {
            return Ok(());
        }

        {
            let mut state = self.write();
            let expected = state
                .dimension
                .filter(|_| !state.vectors.is_empty())
                .unwrap_or(vectors[0].values.len());

            if let Some(bad) = vectors.iter().find(|v| v.values.len() != expected) {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: bad.values.len(),
                });
            }

            state.dimension = Some(expected);
            for vector in vectors {
                state.vectors.insert(vector.id.clone(), vector);
            }
        }

        self.persist().await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredVector>, IndexError> {
        let state = self.read();
        if vector.is_empty() || top_k == 0 || state.vectors.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dimension) = state.dimension {
            if dimension != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: vector.len(),
                });
            }
        }

        // BTreeMap iteration is by id, so the stable sort breaks ties by id.
        let mut scored: Vec<(f32, &IndexedVector)> = state
            .vectors
            .values()
            .map(|v| (cosine_similarity(vector, &v.values), v))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, v)| ScoredVector {
                id: v.id.clone(),
                score,
                metadata: v.metadata.clone(),
            })
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<Option<IndexedVector>, IndexError> {
        Ok(self.read().vectors.get(id).cloned())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.read().vectors.len())
    }

    async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let state = self.read();
        Ok(state.dimension.filter(|_| !state.vectors.is_empty()))
    }

    async fn clear(&self) -> Result<(), IndexError> {
        {
            let mut state = self.write();
            state.vectors.clear();
            state.dimension = None;
        }
        self.persist().await
    }

    async fn entries(&self, limit: usize) -> Result<Vec<IndexedVector>, IndexError> {
        Ok(self.read().vectors.values().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn vector(id: &str, values: Vec<f32>) -> IndexedVector {
        IndexedVector {
            id: id.to_string(),
            values,
            metadata: json!({ "title": id }),
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = LocalVectorStore::in_memory();
        store
            .upsert(vec![
                vector("a", vec![1.0, 0.0]),
                vector("b", vec![0.0, 1.0]),
                vector("c", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.1], 3).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_query_empty_index_and_empty_vector() {
        let store = LocalVectorStore::in_memory();
        assert!(store.query(&[1.0, 0.0], 5).await.unwrap().is_empty());

        store.upsert(vec![vector("a", vec![1.0, 0.0])]).await.unwrap();
        assert!(store.query(&[], 5).await.unwrap().is_empty());
        assert!(store.query(&[1.0, 0.0], 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = LocalVectorStore::in_memory();
        store.upsert(vec![vector("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(vec![vector("a", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let fetched = store.fetch("a").await.unwrap().unwrap();
        assert_eq!(fetched.values, vec![0.0, 1.0]);
        assert!(store.fetch("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mixed_dimensions_rejected() {
        let store = LocalVectorStore::in_memory();
        store.upsert(vec![vector("a", vec![1.0, 0.0])]).await.unwrap();

        let err = store
            .upsert(vec![vector("b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                got: 3
            }
        ));
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.query(&[1.0, 0.0, 0.0], 1).await.is_err());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let store = LocalVectorStore::open(&path).await.unwrap();
        store
            .upsert(vec![vector("a", vec![1.0, 0.0]), vector("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        drop(store);

        let reopened = LocalVectorStore::open(&path).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2);
        assert_eq!(reopened.dimension().await.unwrap(), Some(2));
        assert_eq!(
            reopened.fetch("b").await.unwrap().unwrap().metadata,
            json!({ "title": "b" })
        );
    }

    #[tokio::test]
    async fn test_clear_resets_dimension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");

        let store = LocalVectorStore::open(&path).await.unwrap();
        store.upsert(vec![vector("a", vec![1.0, 0.0])]).await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.dimension().await.unwrap(), None);
        store
            .upsert(vec![vector("x", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let reopened = LocalVectorStore::open(&path).await.unwrap();
        assert_eq!(reopened.dimension().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            LocalVectorStore::open(&path).await,
            Err(IndexError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_respects_limit() {
        let store = LocalVectorStore::in_memory();
        store
            .upsert(vec![
                vector("a", vec![1.0]),
                vector("b", vec![1.0]),
                vector("c", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.entries(2).await.unwrap().len(), 2);
    }
}
