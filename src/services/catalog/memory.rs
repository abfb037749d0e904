use super::{CatalogStore, ListQuery, SongOrder, UpsertOutcome, UpsertStatus};
use crate::{
    error::Result,
    models::{HistoryItem, NewSong, Song, SongId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashSet,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Default)]
struct MemoryState {
    /// Insertion order doubles as creation order.
    songs: Vec<Song>,
    listens: Vec<(Option<String>, SongId, DateTime<Utc>)>,
}

/// In-process catalog used when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(state: &mut MemoryState, id: SongId, at: DateTime<Utc>) -> bool {
        match state.songs.iter_mut().find(|s| s.id == id) {
            Some(song) => {
                song.play_count += 1;
                song.last_played_at = Some(at);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn upsert_by_external_id(&self, song: &NewSong) -> Result<UpsertOutcome> {
        let mut state = self.write();

        if let Some(existing) = state
            .songs
            .iter_mut()
            .find(|s| s.external_id.as_deref() == Some(song.external_id.as_str()))
        {
            let updated = song.clone().into_song(existing.id);
            existing.title = updated.title;
            existing.artist = updated.artist;
            existing.album = updated.album;
            existing.genre = updated.genre;
            existing.cover_url = updated.cover_url;
            existing.preview_url = updated.preview_url;
            existing.duration = updated.duration;
            existing.bpm = updated.bpm;
            existing.tags = updated.tags;
            return Ok(UpsertOutcome {
                id: existing.id,
                status: UpsertStatus::Updated,
            });
        }

        let id = SongId::new();
        state.songs.push(song.clone().into_song(id));
        Ok(UpsertOutcome {
            id,
            status: UpsertStatus::Inserted,
        })
    }

    async fn get_by_id(&self, id: SongId) -> Result<Option<Song>> {
        Ok(self.read().songs.iter().find(|s| s.id == id).cloned())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Song>> {
        let state = self.read();
        let mut songs: Vec<&Song> = state
            .songs
            .iter()
            .filter(|s| match &query.genre {
                Some(genre) => s.has_genre(genre),
                None => true,
            })
            .collect();

        match query.order {
            SongOrder::Recency => songs.reverse(),
            SongOrder::PlayCountDesc => songs.sort_by(|a, b| {
                b.play_count
                    .cmp(&a.play_count)
                    // `None` sorts below `Some`, so never-played songs come last.
                    .then_with(|| b.last_played_at.cmp(&a.last_played_at))
            }),
            SongOrder::LeastPlayed => songs.sort_by_key(|s| s.play_count),
        }

        Ok(songs
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn increment_play_count(&self, id: SongId) -> Result<bool> {
        Ok(Self::bump(&mut self.write(), id, Utc::now()))
    }

    async fn record_listen(&self, id: SongId, user_id: Option<&str>) -> Result<bool> {
        let mut state = self.write();
        let now = Utc::now();
        if !Self::bump(&mut state, id, now) {
            return Ok(false);
        }
        state.listens.push((user_id.map(str::to_string), id, now));
        Ok(true)
    }

    async fn list_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>> {
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };

        let state = self.read();
        let mut seen = HashSet::new();
        Ok(state
            .listens
            .iter()
            .rev()
            .filter(|(user, _, _)| user.as_deref() == Some(user_id))
            .filter(|(_, id, _)| seen.insert(*id))
            .filter_map(|(_, id, played_at)| {
                state
                    .songs
                    .iter()
                    .find(|s| s.id == *id)
                    .map(|song| HistoryItem {
                        song: song.clone(),
                        played_at: *played_at,
                    })
            })
            .take(limit)
            .collect())
    }

    async fn count(&self, genre: Option<&str>) -> Result<i64> {
        let state = self.read();
        let count = state
            .songs
            .iter()
            .filter(|s| genre.map(|g| s.has_genre(g)).unwrap_or(true))
            .count();
        Ok(count as i64)
    }
}
