use crate::{
    index::{IndexError, SongIndex},
    ml::{GenreClassifier, GenreVectors},
    models::{degraded, AnnotatedSong, DegradeReason, Outcome, Song, SongId},
    services::{
        catalog::{CatalogStore, ListQuery, SongOrder},
        history::{ListenHistory, DEFAULT_HISTORY_SIZE},
    },
};
use ndarray::{Array2, Axis};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, warn};

/// Element-wise mean of the history embeddings.
///
/// Every embedding must have the same non-zero length; mixed dimensions are
/// reported rather than averaged.
pub fn centroid(embeddings: &[Vec<f32>]) -> Result<Vec<f32>, IndexError> {
    let Some(first) = embeddings.first() else {
        return Err(IndexError::Storage("centroid of an empty history".to_string()));
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(IndexError::Storage("centroid of empty embeddings".to_string()));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            got: bad.len(),
        });
    }

    let flat: Vec<f32> = embeddings.iter().flatten().copied().collect();
    let matrix = Array2::from_shape_vec((embeddings.len(), dimension), flat)
        .map_err(|e| IndexError::Storage(e.to_string()))?;
    matrix
        .mean_axis(Axis(0))
        .map(|mean| mean.to_vec())
        .ok_or_else(|| IndexError::Storage("centroid of an empty history".to_string()))
}

fn degrade_reason_for(err: &IndexError) -> DegradeReason {
    match err {
        IndexError::DimensionMismatch { .. } => DegradeReason::DimensionMismatch,
        IndexError::Disabled => DegradeReason::IndexDisabled,
        _ => DegradeReason::QueryFailed,
    }
}

/// Centroid recommender over the process-wide listen window.
pub struct Recommender {
    index: Arc<SongIndex>,
    catalog: Arc<dyn CatalogStore>,
    history: ListenHistory,
    genres: GenreClassifier,
}

impl Recommender {
    pub fn new(index: Arc<SongIndex>, catalog: Arc<dyn CatalogStore>, history_size: usize) -> Self {
        Self {
            index,
            catalog,
            history: ListenHistory::new(history_size),
            genres: GenreClassifier::new(),
        }
    }

    /// Uses precomputed genre prototypes instead of embedding them.
    #[must_use]
    pub fn with_genres(mut self, genres: GenreClassifier) -> Self {
        self.genres = genres;
        self
    }

    /// Embeds the genre prototypes once. Later calls return the same set.
    pub async fn initialize_genres(&self) -> &GenreVectors {
        self.genres.initialize(self.index.provider()).await
    }

    pub fn index(&self) -> &SongIndex {
        &self.index
    }

    pub fn history(&self) -> &ListenHistory {
        &self.history
    }

    pub fn get_genre_vectors(&self) -> &GenreVectors {
        self.genres.vectors()
    }

    /// Feeds a listen into the history window. Songs without an embedding
    /// are dropped so they cannot skew the centroid.
    pub async fn log_listen(&self, song_id: SongId) -> Outcome<()> {
        if !self.index.is_enabled() {
            return degraded(DegradeReason::IndexDisabled, ());
        }

        let embedding = match self.index.get_embedding(song_id).await {
            Ok(Some(embedding)) if !embedding.is_empty() => embedding,
            Ok(_) => {
                debug!("Song {} is not indexed, listen not tracked", song_id);
                return degraded(DegradeReason::NotIndexed, ());
            }
            Err(e) => {
                warn!("Embedding lookup for {} failed: {}", song_id, e);
                return degraded(degrade_reason_for(&e), ());
            }
        };

        if let Some(expected) = self.index.dimension().filter(|d| *d != embedding.len()) {
            warn!(
                "Song {} has a {}-dim embedding, index uses {}; listen not tracked",
                song_id,
                embedding.len(),
                expected
            );
            return degraded(DegradeReason::DimensionMismatch, ());
        }

        self.history.record(song_id, embedding);
        debug!("Tracked listen {} ({} in window)", song_id, self.history.len());
        Ok(())
    }

    /// Up to `k` songs near the centroid of the listen window, never one
    /// already in the window. Every failure path still yields a list, tagged
    /// with the reason.
    pub async fn recommend_next(
        &self,
        k: usize,
        fallback: Option<&[Song]>,
        genre: Option<&str>,
    ) -> Outcome<Vec<Song>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.history.snapshot();
        let heard: HashSet<SongId> = entries.iter().map(|e| e.song_id).collect();

        if !self.index.is_enabled() {
            let songs = match fallback {
                Some(fallback) => top_up(Vec::new(), fallback, genre, &heard, k),
                None => return self.cold_start(k, genre, DegradeReason::IndexDisabled).await,
            };
            return degraded(DegradeReason::IndexDisabled, songs);
        }

        if entries.is_empty() {
            return match fallback {
                Some(fallback) => degraded(
                    DegradeReason::ColdStart,
                    top_up(Vec::new(), fallback, genre, &heard, k),
                ),
                None => self.cold_start(k, genre, DegradeReason::ColdStart).await,
            };
        }

        let embeddings: Vec<Vec<f32>> = entries.into_iter().map(|e| e.embedding).collect();
        let fallback = fallback.unwrap_or(&[]);

        let center = match centroid(&embeddings) {
            Ok(center) => center,
            Err(e) => {
                warn!("Cannot compute listen centroid: {}", e);
                return degraded(
                    degrade_reason_for(&e),
                    top_up(Vec::new(), fallback, genre, &heard, k),
                );
            }
        };

        let hits = match self.index.query_by_vector(&center, k + heard.len()).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Similarity query failed, serving fallback: {}", e);
                return degraded(
                    degrade_reason_for(&e),
                    top_up(Vec::new(), fallback, genre, &heard, k),
                );
            }
        };

        let mut emitted = HashSet::new();
        let mut songs = Vec::with_capacity(k);
        for hit in hits {
            let song = hit.metadata.into_song();
            if heard.contains(&song.id) || emitted.contains(&song.id) {
                continue;
            }
            if genre.is_some_and(|g| !song.has_genre(g)) {
                continue;
            }
            emitted.insert(song.id);
            songs.push(song);
            if songs.len() == k {
                break;
            }
        }

        let from_index = songs.len();
        // Trending only tops up a genre-filtered walk.
        let songs = if genre.is_some() {
            top_up(songs, fallback, genre, &heard, k)
        } else {
            songs
        };
        info!(
            "Recommended {} songs ({} from index) from {} listens",
            songs.len(),
            from_index,
            heard.len()
        );
        Ok(songs)
    }

    async fn cold_start(&self, k: usize, genre: Option<&str>, reason: DegradeReason) -> Outcome<Vec<Song>> {
        let query = ListQuery::new(SongOrder::Recency, k).with_genre(genre.map(str::to_string));
        match self.catalog.list(&query).await {
            Ok(songs) => degraded(reason, songs),
            Err(e) => {
                warn!("Catalog listing failed on cold start: {}", e);
                degraded(DegradeReason::CatalogUnavailable, Vec::new())
            }
        }
    }

    /// Index entries labelled with their nearest genre prototype.
    pub async fn annotate(&self, limit: usize) -> Outcome<Vec<AnnotatedSong>> {
        if !self.index.is_enabled() {
            return degraded(DegradeReason::IndexDisabled, Vec::new());
        }

        match self.index.entries(limit).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|(metadata, embedding)| AnnotatedSong {
                    primary_genre: self.genres.classify(&embedding).to_string(),
                    song: metadata.into_song(),
                })
                .collect()),
            Err(e) => {
                warn!("Listing index entries failed: {}", e);
                degraded(degrade_reason_for(&e), Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for Recommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recommender")
            .field("index_count", &self.index.count())
            .field("history", &self.history.len())
            .field("genres", &self.genres.vectors().len())
            .finish()
    }
}

/// Appends fallback songs that pass the genre filter and are neither heard
/// nor already chosen, until `k`.
fn top_up(
    mut songs: Vec<Song>,
    fallback: &[Song],
    genre: Option<&str>,
    heard: &HashSet<SongId>,
    k: usize,
) -> Vec<Song> {
    songs.truncate(k);
    let mut chosen: HashSet<SongId> = songs.iter().map(|s| s.id).collect();
    for song in fallback {
        if songs.len() >= k {
            break;
        }
        if heard.contains(&song.id) || chosen.contains(&song.id) {
            continue;
        }
        if genre.is_some_and(|g| !song.has_genre(g)) {
            continue;
        }
        chosen.insert(song.id);
        songs.push(song.clone());
    }
    songs
}

impl Default for Recommender {
    fn default() -> Self {
        Self::new(
            Arc::new(SongIndex::disabled(Arc::new(
                crate::index::LocalVectorStore::in_memory(),
            ))),
            Arc::new(crate::services::catalog::MemoryCatalog::new()),
            DEFAULT_HISTORY_SIZE,
        )
    }
}
