use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use outcome::{DegradeReason, Degraded, Outcome, OutcomeExt};
pub use song::{build_search_text, genre_filter, normalize_genre, NewSong, RawSong, Song, SongId};

pub(crate) use outcome::degraded;

mod outcome;
mod song;

/// Body of `POST /api/listen`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenRequest {
    pub song_id: String,
    /// Unauthenticated listener key for persisted history
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `?genre=` for recommendation endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenreQuery {
    pub genre: Option<String>,
}

/// Query string shared by the catalog listing endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub genre: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryParams {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshParams {
    pub genre: Option<String>,
}

/// Song list returned by read endpoints
#[derive(Debug, Clone, Serialize)]
pub struct SongsResponse {
    pub songs: Vec<Song>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradeReason>,
}

impl SongsResponse {
    pub fn new(songs: Vec<Song>) -> Self {
        Self {
            songs,
            degraded: None,
        }
    }

    pub fn from_outcome(outcome: Outcome<Vec<Song>>) -> Self {
        let degraded = outcome.degrade_reason();
        Self {
            songs: outcome.into_value(),
            degraded,
        }
    }
}

/// A catalog song labelled with its nearest genre prototype
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedSong {
    #[serde(flatten)]
    pub song: Song,
    pub primary_genre: String,
}

/// One persisted listen joined with its song
#[derive(Debug, Clone, Serialize)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub song: Song,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub timestamp: String,
}
