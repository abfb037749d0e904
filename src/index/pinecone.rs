use crate::index::{IndexError, IndexedVector, ScoredVector, VectorStore};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const UPSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    vector: &'a [f32],
    top_k: usize,
    include_values: bool,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [IndexedVector],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteAllRequest<'a> {
    delete_all: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, IndexedVector>,
}

#[derive(Debug, Deserialize)]
struct ListedId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListedId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    dimension: usize,
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
    #[serde(default)]
    total_vector_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: usize,
}

/// Pinecone data-plane client for a single index host.
#[derive(Debug, Clone)]
pub struct PineconeStore {
    client: Client,
    base_url: String,
    namespace: Option<String>,
}

impl PineconeStore {
    /// `host` is the index host from the Pinecone console, with or without scheme.
    pub fn new(api_key: &str, host: &str, namespace: Option<String>) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| IndexError::Backend(format!("invalid Pinecone API key: {}", e)))?;
        headers.insert("Api-Key", key);
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| IndexError::Backend(format!("failed to create HTTP client: {}", e)))?;

        let host = host.trim().trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Ok(Self {
            client,
            base_url,
            namespace: namespace.filter(|n| !n.is_empty()),
        })
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response, IndexError> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(IndexError::Backend(format!(
                "Pinecone {} failed ({}): {}",
                what, status, error_text
            )));
        }
        Ok(response)
    }

    async fn describe_index_stats(&self) -> Result<IndexStats, IndexError> {
        let response = self
            .client
            .post(format!("{}/describe_index_stats", self.base_url))
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let stats = Self::check(response, "describe index stats")
            .await?
            .json()
            .await?;
        Ok(stats)
    }

    async fn fetch_many(&self, ids: &[String]) -> Result<HashMap<String, IndexedVector>, IndexError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        if let Some(namespace) = &self.namespace {
            params.push(("namespace", namespace.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/vectors/fetch", self.base_url))
            .query(&params)
            .send()
            .await?;

        let body: FetchResponse = Self::check(response, "fetch").await?.json().await?;
        Ok(body.vectors)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(&self, vectors: Vec<IndexedVector>) -> Result<(), IndexError> {
        for chunk in vectors.chunks(UPSERT_BATCH_SIZE) {
            let request = UpsertRequest {
                vectors: chunk,
                namespace: self.namespace.as_deref(),
            };

            let response = self
                .client
                .post(format!("{}/vectors/upsert", self.base_url))
                .json(&request)
                .send()
                .await?;
            Self::check(response, "upsert").await?;
            debug!("Upserted {} vectors to Pinecone", chunk.len());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredVector>, IndexError> {
        if vector.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let request = QueryRequest {
            namespace: self.namespace.as_deref(),
            vector,
            top_k,
            include_values: false,
            include_metadata: true,
        };

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&request)
            .send()
            .await?;

        let body: QueryResponse = Self::check(response, "query").await?.json().await?;
        Ok(body
            .matches
            .into_iter()
            .map(|m| ScoredVector {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<Option<IndexedVector>, IndexError> {
        let mut vectors = self.fetch_many(&[id.to_string()]).await?;
        Ok(vectors.remove(id))
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let stats = self.describe_index_stats().await?;
        Ok(match &self.namespace {
            Some(namespace) => stats
                .namespaces
                .get(namespace)
                .map(|n| n.vector_count)
                .unwrap_or(0),
            None => stats.total_vector_count,
        })
    }

    async fn dimension(&self) -> Result<Option<usize>, IndexError> {
        let stats = self.describe_index_stats().await?;
        Ok((stats.total_vector_count > 0 && stats.dimension > 0).then_some(stats.dimension))
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let request = DeleteAllRequest {
            delete_all: true,
            namespace: self.namespace.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/vectors/delete", self.base_url))
            .json(&request)
            .send()
            .await?;
        Self::check(response, "delete").await?;
        Ok(())
    }

    async fn entries(&self, limit: usize) -> Result<Vec<IndexedVector>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let page_limit = limit.min(100).to_string();
        let mut params: Vec<(&str, &str)> = vec![("limit", page_limit.as_str())];
        if let Some(namespace) = &self.namespace {
            params.push(("namespace", namespace.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/vectors/list", self.base_url))
            .query(&params)
            .send()
            .await?;

        let listed: ListResponse = Self::check(response, "list").await?.json().await?;
        let ids: Vec<String> = listed.vectors.into_iter().map(|v| v.id).collect();
        let mut fetched = self.fetch_many(&ids).await?;

        Ok(ids.iter().filter_map(|id| fetched.remove(id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_request_wire_format() {
        let request = QueryRequest {
            namespace: None,
            vector: &[0.1, 0.2],
            top_k: 7,
            include_values: false,
            include_metadata: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "vector": [0.1f32, 0.2f32],
                "topK": 7,
                "includeValues": false,
                "includeMetadata": true
            })
        );
    }

    #[test]
    fn test_delete_all_wire_format() {
        let request = DeleteAllRequest {
            delete_all: true,
            namespace: Some("songs"),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "deleteAll": true, "namespace": "songs" })
        );
    }

    #[test]
    fn test_stats_parsing() {
        let stats: IndexStats = serde_json::from_value(json!({
            "dimension": 768,
            "indexFullness": 0.0,
            "namespaces": { "songs": { "vectorCount": 12 } },
            "totalVectorCount": 12
        }))
        .unwrap();
        assert_eq!(stats.dimension, 768);
        assert_eq!(stats.namespaces["songs"].vector_count, 12);
        assert_eq!(stats.total_vector_count, 12);
    }

    #[test]
    fn test_host_gets_https_scheme() {
        let store = PineconeStore::new("key", "songs-abc.svc.pinecone.io/", None).unwrap();
        assert_eq!(store.base_url, "https://songs-abc.svc.pinecone.io");
        assert!(store.namespace.is_none());
    }
}
