pub mod gemini_embedder;
pub mod genre_classifier;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use gemini_embedder::GeminiEmbedder;
pub use genre_classifier::{
    assign_genre, compute_genre_vectors, cosine_similarity, GenreClassifier, GenreVectors,
    GENRE_PROTOTYPES, UNKNOWN_GENRE,
};

/// Gemini task hint sent with each embedding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled (no API key configured)")]
    Disabled,

    #[error("request to embedding provider failed: {0}")]
    Http(String),

    #[error("embedding provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
}

impl EmbeddingError {
    /// Network failures, rate limiting and server errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Http(_) => true,
            EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        EmbeddingError::Http(err.to_string())
    }
}

/// Turns text into fixed-length vectors. Implementations keep the input order
/// and return exactly one vector per input.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn model_name(&self) -> String;
}

/// Embeds a single text.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
    task: TaskType,
) -> Result<Vec<f32>, EmbeddingError> {
    let mut vectors = provider.embed(&[text.to_string()], task).await?;
    match vectors.len() {
        1 => Ok(vectors.remove(0)),
        got => Err(EmbeddingError::CountMismatch { expected: 1, got }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embed_one_unwraps_single_vector() {
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .withf(|texts, task| texts.len() == 1 && *task == TaskType::RetrievalQuery)
            .returning(|_, _| Ok(vec![vec![0.5, 0.5]]));

        let vector = embed_one(&provider, "hello", TaskType::RetrievalQuery)
            .await
            .unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_embed_one_rejects_empty_response() {
        let mut provider = MockEmbeddingProvider::new();
        provider.expect_embed().returning(|_, _| Ok(vec![]));

        let err = embed_one(&provider, "hello", TaskType::RetrievalQuery)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::CountMismatch {
                expected: 1,
                got: 0
            }
        ));
    }

    #[test]
    fn test_transient_errors() {
        assert!(EmbeddingError::Http("reset".into()).is_transient());
        assert!(EmbeddingError::Status {
            status: 429,
            message: String::new()
        }
        .is_transient());
        assert!(!EmbeddingError::Status {
            status: 401,
            message: String::new()
        }
        .is_transient());
        assert!(!EmbeddingError::Disabled.is_transient());
    }
}
