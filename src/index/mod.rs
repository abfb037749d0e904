//! Nearest-neighbour index over song embeddings.
//!
//! [`SongIndex`] is what the rest of the service talks to. It owns the
//! embedding provider (optional: without credentials the index is disabled
//! and every call is a cheap no-op) and a [`VectorStore`] backend.

mod local;
mod pinecone;
mod song_index;
mod store;

use thiserror::Error;

use crate::ml::EmbeddingError;

pub use local::LocalVectorStore;
pub use pinecone::PineconeStore;
pub use song_index::{IndexHit, SongIndex, SongMetadata, INDEX_BATCH_SIZE};
pub use store::{IndexedVector, ScoredVector, VectorStore};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector index is disabled")]
    Disabled,

    #[error("embedding dimension mismatch: index holds {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index storage error: {0}")]
    Storage(String),

    #[error("index backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

impl IndexError {
    pub fn is_transient(&self) -> bool {
        match self {
            IndexError::Backend(_) => true,
            IndexError::Embedding(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(err: reqwest::Error) -> Self {
        IndexError::Backend(err.to_string())
    }
}
