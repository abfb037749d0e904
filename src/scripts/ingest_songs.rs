use crate::{
    error::Result,
    index::{SongIndex, INDEX_BATCH_SIZE},
    models::{NewSong, RawSong},
    services::{
        catalog::{CatalogStore, ListQuery, SongOrder, UpsertStatus},
        deezer::DeezerClient,
    },
};
use futures::future::BoxFuture;
use serde::Serialize;
use std::{fmt::Display, ops::AddAssign};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

const CATALOG_PAGE_SIZE: usize = 1000;
const MAX_BATCH_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl IngestReport {
    pub fn stored(&self) -> usize {
        self.inserted + self.updated
    }
}

impl AddAssign for IngestReport {
    fn add_assign(&mut self, other: Self) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

/// Retry an async operation with exponential backoff
pub async fn retry_with_backoff<'a, F, T, E>(
    operation: F,
    max_retries: u32,
    base_delay_ms: u64,
) -> anyhow::Result<T>
where
    F: Fn() -> BoxFuture<'a, std::result::Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow::anyhow!(
                        "Operation failed after {} attempts: {}",
                        max_retries,
                        e
                    ));
                }
                let delay = base_delay_ms * 2u64.pow(attempt - 1);
                warn!("Attempt {} failed, retrying in {}ms: {}", attempt, delay, e);
                sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

/// Upserts already-normalised songs one by one. A failing row is counted
/// and skipped.
pub async fn store_songs(catalog: &dyn CatalogStore, songs: Vec<NewSong>) -> IngestReport {
    let mut report = IngestReport {
        fetched: songs.len(),
        ..IngestReport::default()
    };

    for song in songs {
        match catalog.upsert_by_external_id(&song).await {
            Ok(outcome) => match outcome.status {
                UpsertStatus::Inserted => report.inserted += 1,
                UpsertStatus::Updated => report.updated += 1,
            },
            Err(e) => {
                warn!("Failed to store {} ({}): {}", song.title, song.external_id, e);
                report.failed += 1;
            }
        }
    }
    report
}

/// Parses a seed file: a JSON array of loosely-typed song records. Returns
/// the usable songs and how many records were rejected.
pub fn parse_seed_songs(json: &str) -> Result<(Vec<NewSong>, usize)> {
    let raw: Vec<RawSong> = serde_json::from_str(json)?;
    let total = raw.len();
    let songs: Vec<NewSong> = raw.into_iter().filter_map(RawSong::into_new_song).collect();
    let rejected = total - songs.len();
    if rejected > 0 {
        warn!("Rejected {} seed records without an id or title", rejected);
    }
    Ok((songs, rejected))
}

/// Fetches up to `limit` songs of one genre from Deezer into the catalog.
pub async fn ingest_genre(
    deezer: &DeezerClient,
    catalog: &dyn CatalogStore,
    genre: &str,
    limit: usize,
) -> Result<IngestReport> {
    info!("🎵 Ingesting genre '{}' (up to {} songs)", genre, limit);
    let songs = deezer.fetch_tracks_by_genre(genre, limit).await?;
    let report = store_songs(catalog, songs).await;
    info!(
        "✅ Genre '{}': fetched {}, inserted {}, updated {}, failed {}",
        genre, report.fetched, report.inserted, report.updated, report.failed
    );
    Ok(report)
}

/// Ingests every genre in turn; a failing genre is logged and reported
/// with an empty report.
pub async fn ingest_all(
    deezer: &DeezerClient,
    catalog: &dyn CatalogStore,
    genres: &[&str],
    limit: usize,
) -> Vec<(String, IngestReport)> {
    let mut results = Vec::with_capacity(genres.len());
    for genre in genres {
        let report = match ingest_genre(deezer, catalog, genre, limit).await {
            Ok(report) => report,
            Err(e) => {
                error!("❌ Ingestion failed for genre '{}': {}", genre, e);
                IngestReport::default()
            }
        };
        results.push((genre.to_string(), report));
    }
    results
}

/// Pushes every catalog song into the index. Each batch is retried with
/// backoff; a batch that still fails is skipped. Returns the number of
/// songs written.
pub async fn reindex_catalog(catalog: &dyn CatalogStore, index: &SongIndex) -> Result<usize> {
    if !index.is_enabled() {
        warn!("Song index disabled, skipping reindex");
        return Ok(0);
    }

    let mut songs = Vec::new();
    loop {
        let page = catalog
            .list(&ListQuery::new(SongOrder::Recency, CATALOG_PAGE_SIZE).with_offset(songs.len()))
            .await?;
        let done = page.len() < CATALOG_PAGE_SIZE;
        songs.extend(page);
        if done {
            break;
        }
    }

    let total_batches = songs.len().div_ceil(INDEX_BATCH_SIZE);
    info!("📊 Indexing {} songs in {} batches", songs.len(), total_batches);

    let mut indexed = 0;
    for (batch_num, batch) in songs.chunks(INDEX_BATCH_SIZE).enumerate() {
        match retry_with_backoff(
            || Box::pin(index.upsert_batch(batch)),
            MAX_BATCH_RETRIES,
            RETRY_BASE_DELAY_MS,
        )
        .await
        {
            Ok(written) => {
                indexed += written;
                info!(
                    "✅ Indexed batch {}/{} ({} songs, {} total)",
                    batch_num + 1,
                    total_batches,
                    written,
                    indexed
                );
            }
            Err(e) => error!("❌ Failed to index batch {}: {}", batch_num + 1, e),
        }
    }

    info!("🎉 Indexed {} of {} songs", indexed, songs.len());
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LocalVectorStore;
    use crate::ml::MockEmbeddingProvider;
    use crate::services::catalog::MemoryCatalog;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    fn new_song(external_id: &str) -> NewSong {
        NewSong {
            external_id: external_id.to_string(),
            title: format!("Song {}", external_id),
            artist: "Artist".to_string(),
            album: Some("Album".to_string()),
            genre: Some("indie".to_string()),
            cover_url: None,
            preview_url: None,
            duration: Some(120),
            bpm: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_store_songs_counts_inserts_and_updates() {
        let catalog = MemoryCatalog::new();

        let first = store_songs(&catalog, vec![new_song("1"), new_song("2")]).await;
        assert_eq!(first.inserted, 2);
        assert_eq!(first.updated, 0);

        let second = store_songs(&catalog, vec![new_song("2"), new_song("3")]).await;
        assert_eq!(second.inserted, 1);
        assert_eq!(second.updated, 1);
        assert_eq!(second.fetched, 2);

        let mut total = first;
        total += second;
        assert_eq!(total.stored(), 4);
    }

    #[tokio::test]
    async fn test_seed_file_aliases_are_normalised() {
        let (songs, rejected) = parse_seed_songs(
            r#"[
                {"id": 908604612, "name": "Flowers", "artist": "Miley Cyrus",
                 "image": "https://img/cover.jpg", "bpm": "117.9", "tags": ["Pop", " Upbeat "]},
                {"deezer_id": "42", "title": "Answer", "primary_genre": " Jazz "},
                {"title": "no id"}
            ]"#,
        )
        .unwrap();

        assert_eq!(rejected, 1);
        assert_eq!(songs[0].external_id, "908604612");
        assert_eq!(songs[0].title, "Flowers");
        assert_eq!(songs[0].cover_url.as_deref(), Some("https://img/cover.jpg"));
        assert_eq!(songs[0].bpm, Some(118));
        assert_eq!(songs[0].tags.as_deref(), Some("Pop, Upbeat"));
        assert_eq!(songs[1].genre.as_deref(), Some("jazz"));

        let catalog = MemoryCatalog::new();
        assert_eq!(store_songs(&catalog, songs).await.inserted, 2);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_recovers() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(
            || {
                Box::pin(async {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err("transient")
                    } else {
                        Ok(7)
                    }
                })
            },
            3,
            1,
        )
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: anyhow::Result<()> = retry_with_backoff(
            || {
                Box::pin(async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                })
            },
            3,
            1,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_reindex_catalog_indexes_every_song() {
        let catalog = MemoryCatalog::new();
        let songs: Vec<NewSong> = (0..150).map(|i| new_song(&i.to_string())).collect();
        store_songs(&catalog, songs).await;

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .returning(|texts, _| Ok(texts.iter().map(|_| vec![0.6, 0.8]).collect()));
        provider
            .expect_model_name()
            .returning(|| "models/test".to_string());

        let index = SongIndex::open(
            Some(Arc::new(provider)),
            Arc::new(LocalVectorStore::in_memory()),
        )
        .await
        .unwrap();

        assert_eq!(reindex_catalog(&catalog, &index).await.unwrap(), 150);
        assert_eq!(index.count(), 150);
    }

    #[tokio::test]
    async fn test_reindex_with_disabled_index_is_noop() {
        let catalog = MemoryCatalog::new();
        store_songs(&catalog, vec![new_song("1")]).await;
        let index = SongIndex::disabled(Arc::new(LocalVectorStore::in_memory()));

        assert_eq!(reindex_catalog(&catalog, &index).await.unwrap(), 0);
    }
}
