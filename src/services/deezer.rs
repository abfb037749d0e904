use crate::error::{ApiError, Result};
use crate::models::{normalize_genre, NewSong};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use std::{collections::HashSet, time::Duration};
use tracing::{debug, warn};

pub const DEFAULT_DEEZER_BASE_URL: &str = "https://api.deezer.com";

/// Genres fetched by a full ingestion run.
pub const ALL_GENRES: [&str; 12] = [
    "all",
    "rock",
    "pop",
    "jazz",
    "hip hop",
    "rap",
    "electronic",
    "r&b",
    "indie",
    "metal",
    "classical",
    "country",
];

pub const SONGS_PER_GENRE: usize = 100;

const PAGE_SIZE: usize = 25;
const MAX_PAGES: usize = 10;
const TOP_ARTISTS: usize = 10;
const TRACKS_PER_ARTIST: usize = 10;
const REQUEST_DELAY: Duration = Duration::from_millis(200);

/// Deezer genre id for an ingestion genre. `all` and unknown genres have none.
pub fn genre_id(genre: &str) -> Option<u32> {
    match normalize_genre(genre).as_str() {
        "rock" | "pop" => Some(132),
        "jazz" => Some(129),
        "hip hop" | "rap" => Some(116),
        "electronic" => Some(106),
        "r&b" => Some(165),
        "indie" => Some(85),
        "metal" => Some(152),
        "classical" => Some(98),
        "country" => Some(84),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    error: Option<PageError>,
}

#[derive(Debug, Deserialize)]
struct PageError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeezerTrack {
    pub id: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<DeezerArtist>,
    #[serde(default)]
    pub album: Option<DeezerAlbum>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeezerArtist {
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeezerAlbum {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cover_medium: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub genre: Option<DeezerGenre>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeezerGenre {
    #[serde(default)]
    pub name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Converts a Deezer track into a catalog payload. Tracks without an id are
/// dropped. The genre is `genre` when given, else the album genre, else `all`.
pub fn normalize_track(track: DeezerTrack, genre: Option<&str>) -> Option<NewSong> {
    let id = track.id?;
    let album = track.album;

    let genre = match genre {
        Some(genre) => normalize_genre(genre),
        None => album
            .as_ref()
            .and_then(|a| a.genre.as_ref())
            .and_then(|g| g.name.as_deref())
            .map(normalize_genre)
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| "all".to_string()),
    };

    let (album_title, cover_url) = match album {
        Some(album) => (
            non_empty(album.title),
            non_empty(album.cover_medium).or_else(|| non_empty(album.cover)),
        ),
        None => (None, None),
    };

    Some(NewSong {
        external_id: id.to_string(),
        title: track.title.unwrap_or_default(),
        artist: track.artist.and_then(|a| a.name).unwrap_or_default(),
        album: album_title,
        genre: Some(genre),
        cover_url,
        preview_url: non_empty(track.preview),
        duration: track.duration,
        bpm: None,
        tags: None,
    })
}

/// Keeps the first occurrence of each Deezer id, up to `limit` songs.
fn dedupe(songs: Vec<NewSong>, limit: usize) -> Vec<NewSong> {
    let mut seen = HashSet::new();
    songs
        .into_iter()
        .filter(|s| seen.insert(s.external_id.clone()))
        .take(limit)
        .collect()
}

/// Read-only client for the public Deezer API.
#[derive(Debug, Clone)]
pub struct DeezerClient {
    client: Client,
    base_url: String,
    request_delay: Duration,
}

impl DeezerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::ExternalServiceError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_delay: REQUEST_DELAY,
        })
    }

    #[must_use]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {} {:?}", url, params);

        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::ExternalServiceError(format!(
                "Deezer returned {} for {}",
                status, path
            )));
        }

        // Deezer reports quota and lookup errors with a 200 status.
        let page: Page<T> = response.json().await?;
        if let Some(error) = page.error {
            return Err(ApiError::ExternalServiceError(format!(
                "Deezer error for {}: {}",
                path, error.message
            )));
        }
        Ok(page.data)
    }

    /// Songs for one ingestion genre. `all` reads the global chart; other
    /// genres take the top tracks of the genre's leading artists and top up
    /// from track search.
    pub async fn fetch_tracks_by_genre(&self, genre: &str, limit: usize) -> Result<Vec<NewSong>> {
        let genre = normalize_genre(genre);
        if genre.is_empty() || genre == "all" {
            return self.chart_tracks(limit).await;
        }

        let mut songs = Vec::new();
        if let Some(id) = genre_id(&genre) {
            match self.genre_artists(id).await {
                Ok(artists) => {
                    for artist_id in artists {
                        match self.artist_top_tracks(artist_id, &genre).await {
                            Ok(tracks) => songs.extend(tracks),
                            Err(e) => warn!("Top tracks for artist {} failed: {}", artist_id, e),
                        }
                        if songs.len() >= limit {
                            break;
                        }
                        self.pause().await;
                    }
                }
                Err(e) => warn!("Genre artist lookup failed for {}: {}", genre, e),
            }
        }

        let mut songs = dedupe(songs, limit);
        if songs.len() < limit {
            let found = self.search_tracks(&genre, limit - songs.len(), &genre).await?;
            songs.extend(found);
            songs = dedupe(songs, limit);
        }
        Ok(songs)
    }

    /// Global chart, paged until `limit` songs or the page cap.
    pub async fn chart_tracks(&self, limit: usize) -> Result<Vec<NewSong>> {
        self.paged_tracks("/chart/0/tracks", None, limit, "all").await
    }

    pub async fn search_tracks(&self, query: &str, limit: usize, genre: &str) -> Result<Vec<NewSong>> {
        self.paged_tracks("/search/track", Some(query), limit, genre)
            .await
    }

    async fn paged_tracks(
        &self,
        path: &str,
        query: Option<&str>,
        limit: usize,
        genre: &str,
    ) -> Result<Vec<NewSong>> {
        let mut songs = Vec::new();
        for page in 0..MAX_PAGES {
            if songs.len() >= limit {
                break;
            }
            if page > 0 {
                self.pause().await;
            }

            let mut params = vec![
                ("index", (page * PAGE_SIZE).to_string()),
                ("limit", PAGE_SIZE.to_string()),
            ];
            if let Some(q) = query {
                params.push(("q", q.to_string()));
            }

            let tracks: Vec<DeezerTrack> = self.get_page(path, &params).await?;
            if tracks.is_empty() {
                break;
            }
            songs.extend(
                tracks
                    .into_iter()
                    .filter_map(|t| normalize_track(t, Some(genre))),
            );
        }
        Ok(dedupe(songs, limit))
    }

    async fn genre_artists(&self, genre_id: u32) -> Result<Vec<u64>> {
        let artists: Vec<DeezerArtist> = self
            .get_page(&format!("/genre/{}/artists", genre_id), &[])
            .await?;
        Ok(artists
            .into_iter()
            .filter_map(|a| a.id)
            .take(TOP_ARTISTS)
            .collect())
    }

    pub async fn artist_top_tracks(&self, artist_id: u64, genre: &str) -> Result<Vec<NewSong>> {
        let tracks: Vec<DeezerTrack> = self
            .get_page(
                &format!("/artist/{}/top", artist_id),
                &[("limit", TRACKS_PER_ARTIST.to_string())],
            )
            .await?;
        Ok(tracks
            .into_iter()
            .filter_map(|t| normalize_track(t, Some(genre)))
            .collect())
    }
}
