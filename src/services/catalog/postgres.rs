use super::{CatalogStore, ListQuery, SongOrder, UpsertOutcome, UpsertStatus};
use crate::{
    error::Result,
    models::{HistoryItem, NewSong, Song, SongId},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    FromRow, Postgres, QueryBuilder,
};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS songs (
        id UUID PRIMARY KEY,
        external_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        artist TEXT NOT NULL DEFAULT '',
        album TEXT,
        genre TEXT,
        cover_url TEXT,
        preview_url TEXT,
        duration INTEGER,
        bpm INTEGER,
        tags TEXT,
        play_count BIGINT NOT NULL DEFAULT 0,
        last_played_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS songs_genre_idx ON songs (genre)",
    r#"
    CREATE TABLE IF NOT EXISTS listens (
        id UUID PRIMARY KEY,
        user_id TEXT,
        song_id UUID NOT NULL REFERENCES songs (id) ON DELETE CASCADE,
        played_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS listens_user_idx ON listens (user_id, played_at DESC)",
];

const SONG_COLUMNS: &str = "s.id, s.external_id, s.title, s.artist, s.album, s.genre, \
     s.cover_url, s.preview_url, s.duration, s.bpm, s.tags, s.play_count, s.last_played_at";

#[derive(Debug, FromRow)]
struct SongRow {
    id: Uuid,
    external_id: Option<String>,
    title: String,
    artist: String,
    album: Option<String>,
    genre: Option<String>,
    cover_url: Option<String>,
    preview_url: Option<String>,
    duration: Option<i32>,
    bpm: Option<i32>,
    tags: Option<String>,
    play_count: i64,
    last_played_at: Option<DateTime<Utc>>,
}

impl From<SongRow> for Song {
    fn from(row: SongRow) -> Self {
        Song {
            id: SongId::from_uuid(row.id),
            external_id: row.external_id,
            title: row.title,
            artist: row.artist,
            album: row.album,
            genre: row.genre,
            cover_url: row.cover_url,
            preview_url: row.preview_url,
            duration: row.duration,
            bpm: row.bpm,
            tags: row.tags,
            play_count: row.play_count,
            last_played_at: row.last_played_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    #[sqlx(flatten)]
    song: SongRow,
    played_at: DateTime<Utc>,
}

/// Catalog backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Builds a lazy pool; no connection is made until the first query.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the tables when they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Catalog schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn list_query_builder(query: &ListQuery) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM songs s", SONG_COLUMNS));

    if let Some(genre) = &query.genre {
        builder.push(" WHERE s.genre = ").push_bind(genre.as_str());
    }

    builder.push(match query.order {
        SongOrder::Recency => " ORDER BY s.created_at DESC",
        SongOrder::PlayCountDesc => " ORDER BY s.play_count DESC, s.last_played_at DESC NULLS LAST",
        SongOrder::LeastPlayed => " ORDER BY s.play_count ASC, RANDOM()",
    });

    builder
        .push(" LIMIT ")
        .push_bind(query.limit as i64)
        .push(" OFFSET ")
        .push_bind(query.offset as i64);
    builder
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn upsert_by_external_id(&self, song: &NewSong) -> Result<UpsertOutcome> {
        // xmax is 0 only for a row this statement inserted.
        let (id, inserted): (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO songs (id, external_id, title, artist, album, genre,
                               cover_url, preview_url, duration, bpm, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (external_id) DO UPDATE SET
                title = EXCLUDED.title,
                artist = EXCLUDED.artist,
                album = EXCLUDED.album,
                genre = EXCLUDED.genre,
                cover_url = EXCLUDED.cover_url,
                preview_url = EXCLUDED.preview_url,
                duration = EXCLUDED.duration,
                bpm = EXCLUDED.bpm,
                tags = EXCLUDED.tags,
                updated_at = NOW()
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&song.external_id)
        .bind(&song.title)
        .bind(&song.artist)
        .bind(&song.album)
        .bind(&song.genre)
        .bind(&song.cover_url)
        .bind(&song.preview_url)
        .bind(song.duration)
        .bind(song.bpm)
        .bind(&song.tags)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            "Upserted song {} ({}): {}",
            song.external_id,
            id,
            if inserted { "inserted" } else { "updated" }
        );

        Ok(UpsertOutcome {
            id: SongId::from_uuid(id),
            status: if inserted {
                UpsertStatus::Inserted
            } else {
                UpsertStatus::Updated
            },
        })
    }

    async fn get_by_id(&self, id: SongId) -> Result<Option<Song>> {
        let row: Option<SongRow> =
            sqlx::query_as(&format!("SELECT {} FROM songs s WHERE s.id = $1", SONG_COLUMNS))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Song::from))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Song>> {
        let rows: Vec<SongRow> = list_query_builder(query)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Song::from).collect())
    }

    async fn increment_play_count(&self, id: SongId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE songs SET play_count = play_count + 1, last_played_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_listen(&self, id: SongId, user_id: Option<&str>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE songs SET play_count = play_count + 1, last_played_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO listens (id, user_id, song_id, played_at) VALUES ($1, $2, $3, NOW())")
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<HistoryItem>> {
        let Some(user_id) = user_id else {
            return Ok(Vec::new());
        };

        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}, h.played_at
            FROM (
                SELECT song_id, MAX(played_at) AS played_at
                FROM listens
                WHERE user_id = $1
                GROUP BY song_id
            ) h
            JOIN songs s ON s.id = h.song_id
            ORDER BY h.played_at DESC
            LIMIT $2
            "#,
            SONG_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryItem {
                song: row.song.into(),
                played_at: row.played_at,
            })
            .collect())
    }

    async fn count(&self, genre: Option<&str>) -> Result<i64> {
        let count: i64 = match genre {
            Some(genre) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM songs WHERE genre = $1")
                    .bind(genre)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM songs")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_sql_with_genre_and_trending_order() {
        let query = ListQuery::trending(20).with_genre(Some("rock".into()));
        let builder = list_query_builder(&query);
        let sql = builder.sql();
        assert!(sql.contains("WHERE s.genre = $1"));
        assert!(sql.contains("ORDER BY s.play_count DESC, s.last_played_at DESC NULLS LAST"));
        assert!(sql.ends_with("LIMIT $2 OFFSET $3"));
    }

    #[test]
    fn test_list_sql_without_genre() {
        let query = ListQuery::new(SongOrder::LeastPlayed, 5);
        let builder = list_query_builder(&query);
        let sql = builder.sql();
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY s.play_count ASC, RANDOM()"));
        assert!(sql.ends_with("LIMIT $1 OFFSET $2"));
    }
}
