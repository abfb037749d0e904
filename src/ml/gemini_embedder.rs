use crate::config::Config;
use crate::ml::{EmbeddingError, EmbeddingProvider, TaskType};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MODEL_NAME: &str = "text-embedding-004";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 15;

/// Gemini accepts at most this many texts per batchEmbedContents call.
pub const BATCH_SIZE_LIMIT: usize = 100;

const MAX_TEXT_PREVIEW_LENGTH: usize = 60;

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: TaskType,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

/// REST client for the Gemini embedding endpoint.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    /// Always carries the `models/` prefix.
    model: String,
}

impl GeminiEmbedder {
    /// `None` when no key is configured: the embedding subsystem is then
    /// disabled rather than failing.
    pub fn from_config(config: &Config) -> Result<Option<Self>, EmbeddingError> {
        let api_key = match config.google_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => {
                warn!("No Google API key configured, embeddings disabled");
                return Ok(None);
            }
        };

        Self::new(
            api_key,
            &config.embedding_base_url,
            &config.embedding_model,
            config.embedding_timeout_secs,
        )
        .map(Some)
    }

    pub fn new(
        api_key: String,
        base_url: &str,
        model_name: &str,
        timeout_seconds: u64,
    ) -> Result<Self, EmbeddingError> {
        let model = normalize_model_name(model_name);

        info!(
            "Initializing Gemini embedder with model: {}, timeout: {}s",
            model, timeout_seconds
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECONDS))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.model,
                    content: Content {
                        parts: [Part {
                            text: preprocess_text(text),
                        }],
                    },
                    task_type: task,
                })
                .collect(),
        };

        let url = format!("{}/{}:batchEmbedContents", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let body = self.process_api_response(response).await?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: body.embeddings.len(),
            });
        }

        Ok(body.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn process_api_response(
        &self,
        response: reqwest::Response,
    ) -> Result<BatchEmbedResponse, EmbeddingError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match status.as_u16() {
                404 => format!(
                    "Model not found: {}. Check EMBEDDING_MODEL in your configuration.",
                    self.model
                ),
                401 | 403 => "Authentication failed. Check your Google API key.".to_string(),
                429 => "Rate limit exceeded for the embedding API.".to_string(),
                _ => text,
            };
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<BatchEmbedResponse>()
            .await
            .map_err(|e| EmbeddingError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(first) = texts.first() {
            debug!(
                "Embedding {} texts ({:?}), first: {}",
                texts.len(),
                task,
                &first[..floor_char_boundary(first, MAX_TEXT_PREVIEW_LENGTH)]
            );
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE_LIMIT) {
            out.extend(self.embed_batch(chunk, task).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Accepts `text-embedding-004` or `models/text-embedding-004`.
pub fn normalize_model_name(name: &str) -> String {
    let name = name.trim();
    let name = if name.is_empty() {
        DEFAULT_MODEL_NAME
    } else {
        name
    };
    if name.starts_with("models/") {
        name.to_string()
    } else {
        format!("models/{}", name)
    }
}

fn preprocess_text(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "empty text"
    } else {
        trimmed
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0)
}
