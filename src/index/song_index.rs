use crate::index::{IndexError, IndexedVector, VectorStore};
use crate::ml::{embed_one, EmbeddingProvider, TaskType};
use crate::models::{Song, SongId};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

/// Songs are embedded and stored in batches of this size.
pub const INDEX_BATCH_SIZE: usize = 100;

const DIMENSION_PROBE_TEXT: &str = "dimension probe";

/// Metadata stored next to each embedding. Older entries used `name`,
/// `image` and `primary_genre`; those keys are still read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub id: SongId,
    #[serde(default, alias = "deezer_id", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, alias = "name")]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, alias = "primary_genre", skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, alias = "image", skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl From<&Song> for SongMetadata {
    fn from(song: &Song) -> Self {
        Self {
            id: song.id,
            external_id: song.external_id.clone(),
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
            genre: song.genre.clone(),
            cover_url: song.cover_url.clone(),
            preview_url: song.preview_url.clone(),
            duration: song.duration,
            bpm: song.bpm,
            tags: song.tags.clone(),
        }
    }
}

impl SongMetadata {
    /// Play counters are not kept in the index and come back zeroed.
    pub fn into_song(self) -> Song {
        Song {
            id: self.id,
            external_id: self.external_id,
            title: self.title,
            artist: self.artist,
            album: self.album.filter(|a| !a.is_empty()),
            genre: self.genre.filter(|g| !g.is_empty()),
            cover_url: self.cover_url.filter(|c| !c.is_empty()),
            preview_url: self.preview_url.filter(|p| !p.is_empty()),
            duration: self.duration,
            bpm: self.bpm,
            tags: self.tags.filter(|t| !t.is_empty()),
            play_count: 0,
            last_played_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub score: f32,
    pub metadata: SongMetadata,
}

impl IndexHit {
    pub fn id(&self) -> SongId {
        self.metadata.id
    }
}

pub struct SongIndex {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Arc<dyn VectorStore>,
    count: AtomicUsize,
    /// 0 while unknown.
    dimension: AtomicUsize,
}

impl SongIndex {
    /// An index without an embedding provider: mutations are no-ops and
    /// queries come back empty.
    pub fn disabled(store: Arc<dyn VectorStore>) -> Self {
        Self {
            provider: None,
            store,
            count: AtomicUsize::new(0),
            dimension: AtomicUsize::new(0),
        }
    }

    /// Probes the provider's output dimension and drops the stored vectors
    /// when they were produced in a different embedding space.
    pub async fn open(
        provider: Option<Arc<dyn EmbeddingProvider>>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, IndexError> {
        let Some(provider) = provider else {
            warn!("Song index disabled: no embedding provider");
            return Ok(Self::disabled(store));
        };

        let stored_dimension = store.dimension().await?;
        let mut cleared = false;
        let dimension = match embed_one(
            provider.as_ref(),
            DIMENSION_PROBE_TEXT,
            TaskType::RetrievalDocument,
        )
        .await
        {
            Ok(probe) if !probe.is_empty() => {
                if let Some(stored) = stored_dimension.filter(|d| *d != probe.len()) {
                    warn!(
                        "Index dimension mismatch: stored {}, provider yields {}. Dropping index.",
                        stored,
                        probe.len()
                    );
                    store.clear().await?;
                    cleared = true;
                }
                Some(probe.len())
            }
            Ok(_) => {
                warn!("Dimension probe returned an empty embedding");
                stored_dimension
            }
            Err(e) => {
                warn!("Dimension probe failed, keeping stored index: {}", e);
                stored_dimension
            }
        };

        // Backends may report the old total for a while after a clear.
        let count = if cleared { 0 } else { store.count().await? };
        info!(
            "Song index ready with {} vectors (dimension {:?}, model {})",
            count,
            dimension,
            provider.model_name()
        );

        Ok(Self {
            provider: Some(provider),
            store,
            count: AtomicUsize::new(count),
            dimension: AtomicUsize::new(dimension.unwrap_or(0)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider.as_deref()
    }

    /// Cached entry count, refreshed after every mutation.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    pub async fn refresh_count(&self) -> Result<usize, IndexError> {
        if !self.is_enabled() {
            return Ok(0);
        }
        let count = self.store.count().await?;
        self.count.store(count, Ordering::Release);
        Ok(count)
    }

    /// Pins the index dimension on first use and rejects anything else.
    fn check_dimension(&self, got: usize) -> Result<(), IndexError> {
        match self
            .dimension
            .compare_exchange(0, got, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(expected) if expected == got => Ok(()),
            Err(expected) => Err(IndexError::DimensionMismatch { expected, got }),
        }
    }

    /// Embeds `text` and stores it under `id`, replacing any previous entry.
    pub async fn upsert(
        &self,
        id: SongId,
        text: &str,
        metadata: &SongMetadata,
    ) -> Result<(), IndexError> {
        let Some(provider) = self.provider.as_deref() else {
            return Ok(());
        };

        let values = embed_one(provider, text, TaskType::RetrievalDocument).await?;
        self.check_dimension(values.len())?;

        self.store
            .upsert(vec![IndexedVector {
                id: id.to_string(),
                values,
                metadata: serde_json::to_value(metadata)
                    .map_err(|e| IndexError::Storage(e.to_string()))?,
            }])
            .await?;
        self.refresh_count().await?;
        debug!("Indexed song {}", id);
        Ok(())
    }

    /// Embeds and stores one batch. Returns how many songs were written.
    pub async fn upsert_batch(&self, songs: &[Song]) -> Result<usize, IndexError> {
        let Some(provider) = self.provider.as_deref() else {
            return Ok(0);
        };
        if songs.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = songs.iter().map(Song::search_text).collect();
        let embeddings = provider.embed(&texts, TaskType::RetrievalDocument).await?;
        if embeddings.len() != songs.len() {
            return Err(IndexError::Embedding(
                crate::ml::EmbeddingError::CountMismatch {
                    expected: songs.len(),
                    got: embeddings.len(),
                },
            ));
        }

        let mut vectors = Vec::with_capacity(songs.len());
        for (song, values) in songs.iter().zip(embeddings) {
            self.check_dimension(values.len())?;
            vectors.push(IndexedVector {
                id: song.id.to_string(),
                values,
                metadata: serde_json::to_value(SongMetadata::from(song))
                    .map_err(|e| IndexError::Storage(e.to_string()))?,
            });
        }

        let written = vectors.len();
        self.store.upsert(vectors).await?;
        self.refresh_count().await?;
        Ok(written)
    }

    /// Indexes all songs in batches of [`INDEX_BATCH_SIZE`].
    pub async fn upsert_songs(&self, songs: &[Song]) -> Result<usize, IndexError> {
        let mut total = 0;
        for batch in songs.chunks(INDEX_BATCH_SIZE) {
            total += self.upsert_batch(batch).await?;
        }
        Ok(total)
    }

    /// Up to `k` entries by decreasing cosine similarity. Empty when the index
    /// is disabled or empty, or the vector is empty. Emptiness is decided by
    /// the store, which other writers may have filled since `open`.
    pub async fn query_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, IndexError> {
        if !self.is_enabled() || vector.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.dimension().filter(|d| *d != vector.len()) {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }

        let matches = self.store.query(vector, k).await?;
        Ok(matches
            .into_iter()
            .filter_map(
                |m| match serde_json::from_value::<SongMetadata>(m.metadata) {
                    Ok(metadata) => Some(IndexHit {
                        score: m.score,
                        metadata,
                    }),
                    Err(e) => {
                        warn!("Skipping index entry {} with bad metadata: {}", m.id, e);
                        None
                    }
                },
            )
            .collect())
    }

    /// `Ok(None)` when the song is not indexed.
    pub async fn get_embedding(&self, id: SongId) -> Result<Option<Vec<f32>>, IndexError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        Ok(self
            .store
            .fetch(&id.to_string())
            .await?
            .map(|entry| entry.values))
    }

    /// Stored songs with their embeddings, in backend order.
    pub async fn entries(&self, limit: usize) -> Result<Vec<(SongMetadata, Vec<f32>)>, IndexError> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .entries(limit)
            .await?
            .into_iter()
            .filter_map(|entry| {
                serde_json::from_value::<SongMetadata>(entry.metadata)
                    .ok()
                    .map(|metadata| (metadata, entry.values))
            })
            .collect())
    }
}
