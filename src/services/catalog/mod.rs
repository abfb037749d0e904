//! Persisted song catalog and listen log.

mod memory;
mod postgres;

use crate::{
    error::Result,
    models::{HistoryItem, NewSong, Song, SongId},
};
use async_trait::async_trait;
use serde::Serialize;

pub use memory::MemoryCatalog;
pub use postgres::PgCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SongOrder {
    /// Newest catalog entries first.
    #[default]
    Recency,
    /// Most played first, then most recently played.
    PlayCountDesc,
    /// Least played first, ties shuffled.
    LeastPlayed,
}

impl SongOrder {
    /// Maps the `?type=` parameter of the listing endpoints.
    pub fn from_param(kind: Option<&str>) -> Self {
        match kind.map(|k| k.trim().to_lowercase()).as_deref() {
            Some("trending") | Some("popular") => SongOrder::PlayCountDesc,
            Some("discover") => SongOrder::LeastPlayed,
            _ => SongOrder::Recency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Lower-case genre; `None` lists everything.
    pub genre: Option<String>,
    pub order: SongOrder,
    pub limit: usize,
    pub offset: usize,
}

impl ListQuery {
    pub fn new(order: SongOrder, limit: usize) -> Self {
        Self {
            genre: None,
            order,
            limit,
            offset: 0,
        }
    }

    pub fn trending(limit: usize) -> Self {
        Self::new(SongOrder::PlayCountDesc, limit)
    }

    #[must_use]
    pub fn with_genre(mut self, genre: Option<String>) -> Self {
        self.genre = genre;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: SongId,
    pub status: UpsertStatus,
}

/// Catalog operations. Each call is atomic on its own; callers do not
/// manage transactions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts or updates by source id and reports which one happened.
    async fn upsert_by_external_id(&self, song: &NewSong) -> Result<UpsertOutcome>;

    async fn get_by_id(&self, id: SongId) -> Result<Option<Song>>;

    async fn list(&self, query: &ListQuery) -> Result<Vec<Song>>;

    /// `false` when the song does not exist.
    async fn increment_play_count(&self, id: SongId) -> Result<bool>;

    /// Logs a listen row and bumps the play counter together.
    async fn record_listen(&self, id: SongId, user_id: Option<&str>) -> Result<bool>;

    /// Distinct songs a user listened to, most recent first. Anonymous
    /// listeners have no persisted history.
    async fn list_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>>;

    async fn count(&self, genre: Option<&str>) -> Result<i64>;
}
