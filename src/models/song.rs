use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Catalog identity of a song. Distinct from the id of whatever source it was
/// ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SongId(Uuid);

impl SongId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SongId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SongId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub external_id: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Lower-case genre label, `None` while unassigned.
    pub genre: Option<String>,
    pub cover_url: Option<String>,
    pub preview_url: Option<String>,
    /// Seconds.
    pub duration: Option<i32>,
    pub bpm: Option<i32>,
    pub tags: Option<String>,
    #[serde(default)]
    pub play_count: i64,
    pub last_played_at: Option<DateTime<Utc>>,
}

impl Song {
    /// Text the embedding provider sees for this song.
    pub fn search_text(&self) -> String {
        build_search_text(
            &self.title,
            &self.artist,
            self.album.as_deref(),
            self.genre.as_deref(),
            self.bpm,
            self.tags.as_deref(),
        )
    }

    pub fn has_genre(&self, genre: &str) -> bool {
        self.genre
            .as_deref()
            .map(|g| g.trim().eq_ignore_ascii_case(genre.trim()))
            .unwrap_or(false)
    }
}

/// Normalised insert/update payload, keyed by the source id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSong {
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub cover_url: Option<String>,
    pub preview_url: Option<String>,
    pub duration: Option<i32>,
    pub bpm: Option<i32>,
    pub tags: Option<String>,
}

impl NewSong {
    pub fn search_text(&self) -> String {
        build_search_text(
            &self.title,
            &self.artist,
            self.album.as_deref(),
            self.genre.as_deref(),
            self.bpm,
            self.tags.as_deref(),
        )
    }

    /// Materialise the record the catalog stores for a fresh insert.
    pub fn into_song(self, id: SongId) -> Song {
        Song {
            id,
            external_id: Some(self.external_id),
            title: self.title,
            artist: self.artist,
            album: self.album,
            genre: self.genre,
            cover_url: self.cover_url,
            preview_url: self.preview_url,
            duration: self.duration,
            bpm: self.bpm,
            tags: self.tags,
            play_count: 0,
            last_played_at: None,
        }
    }
}

/// `"{title} {artist} {album} {genre}"` with empty parts skipped, then the
/// optional BPM and tags suffixes.
pub fn build_search_text(
    title: &str,
    artist: &str,
    album: Option<&str>,
    genre: Option<&str>,
    bpm: Option<i32>,
    tags: Option<&str>,
) -> String {
    let mut text = [Some(title), Some(artist), album, genre]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(bpm) = bpm {
        text.push_str(&format!(" BPM: {}", bpm));
    }
    if let Some(tags) = tags.map(str::trim).filter(|t| !t.is_empty()) {
        text.push_str(&format!(" Tags: {}", tags));
    }
    text
}

pub fn normalize_genre(genre: &str) -> String {
    genre.trim().to_lowercase()
}

/// Turns a `?genre=` parameter into a filter. Blank and `all` mean no filter.
pub fn genre_filter(param: Option<&str>) -> Option<String> {
    param
        .map(normalize_genre)
        .filter(|g| !g.is_empty() && g != "all")
}

fn deserialize_optional_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
        Null,
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) if s.trim().is_empty() => Ok(None),
        StringOrInt::String(s) => Ok(Some(s.trim().to_string())),
        StringOrInt::Int(i) => Ok(Some(i.to_string())),
        StringOrInt::Null => Ok(None),
    }
}

fn deserialize_optional_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Int(i64),
        Float(f64),
        Null,
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<f64>()
                    .map(rounded_i32)
                    .map_err(serde::de::Error::custom)
            }
        }
        StringOrNumber::Int(i) => Ok(i32::try_from(i).ok()),
        StringOrNumber::Float(f) => Ok(rounded_i32(f)),
        StringOrNumber::Null => Ok(None),
    }
}

/// `None` for NaN, infinities and anything outside `i32`.
fn rounded_i32(value: f64) -> Option<i32> {
    let rounded = value.round();
    (rounded.is_finite() && rounded >= f64::from(i32::MIN) && rounded <= f64::from(i32::MAX))
        .then_some(rounded as i32)
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
        Null,
    }

    let joined = match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => s,
        StringOrVec::Vec(v) => v
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        StringOrVec::Null => String::new(),
    };
    let joined = joined.trim().to_string();
    Ok((!joined.is_empty()).then_some(joined))
}

/// Loosely-typed song record as it arrives from seed files, chart scrapers
/// and older index metadata. Converted into [`NewSong`] exactly once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSong {
    #[serde(
        alias = "deezer_id",
        alias = "id",
        default,
        deserialize_with = "deserialize_optional_string_or_int"
    )]
    pub external_id: Option<String>,
    #[serde(alias = "name", default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(alias = "primary_genre", default)]
    pub genre: Option<String>,
    #[serde(alias = "image", alias = "image_url", default)]
    pub cover_url: Option<String>,
    #[serde(alias = "preview", default)]
    pub preview_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_i32")]
    pub duration: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_optional_i32")]
    pub bpm: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: Option<String>,
}

impl RawSong {
    /// Records without a source id or a title are rejected.
    pub fn into_new_song(self) -> Option<NewSong> {
        let external_id = self.external_id.filter(|id| !id.trim().is_empty())?;
        let title = clean(self.title)?;

        Some(NewSong {
            external_id,
            title,
            artist: clean(self.artist).unwrap_or_default(),
            album: clean(self.album),
            genre: clean(self.genre).map(|g| normalize_genre(&g)),
            cover_url: clean(self.cover_url),
            preview_url: clean(self.preview_url),
            duration: self.duration.filter(|d| *d >= 0),
            bpm: self.bpm.filter(|b| *b > 0),
            tags: self.tags,
        })
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_text_skips_empty_parts() {
        let text = build_search_text("Song", "Artist", None, Some("rock"), None, None);
        assert_eq!(text, "Song Artist rock");
    }

    #[test]
    fn test_search_text_with_bpm_and_tags() {
        let text = build_search_text(
            "Song",
            "Artist",
            Some("Album"),
            Some(""),
            Some(120),
            Some("upbeat, summer"),
        );
        assert_eq!(text, "Song Artist Album BPM: 120 Tags: upbeat, summer");
    }

    #[test]
    fn test_raw_song_aliases_normalise_once() {
        let raw: RawSong = serde_json::from_value(json!({
            "deezer_id": 3135556,
            "name": "Harder, Better, Faster, Stronger",
            "artist": "Daft Punk",
            "primary_genre": " Electronic ",
            "image": "https://cdn/cover.jpg",
            "duration": "224",
            "tags": ["french house", "robots"]
        }))
        .unwrap();

        let song = raw.into_new_song().unwrap();
        assert_eq!(song.external_id, "3135556");
        assert_eq!(song.title, "Harder, Better, Faster, Stronger");
        assert_eq!(song.genre.as_deref(), Some("electronic"));
        assert_eq!(song.cover_url.as_deref(), Some("https://cdn/cover.jpg"));
        assert_eq!(song.duration, Some(224));
        assert_eq!(song.tags.as_deref(), Some("french house, robots"));
    }

    #[test]
    fn test_raw_song_canonical_keys() {
        let raw: RawSong = serde_json::from_value(json!({
            "external_id": "abc",
            "title": "Title",
            "artist": "Someone",
            "genre": "Jazz",
            "cover_url": "https://cdn/x.jpg"
        }))
        .unwrap();

        let song = raw.into_new_song().unwrap();
        assert_eq!(song.genre.as_deref(), Some("jazz"));
        assert_eq!(song.cover_url.as_deref(), Some("https://cdn/x.jpg"));
    }

    #[test]
    fn test_raw_song_drops_out_of_range_numbers() {
        let raw: RawSong = serde_json::from_value(json!({
            "deezer_id": "7",
            "title": "Overflow",
            "duration": 4_294_967_396_i64,
            "bpm": "3e10"
        }))
        .unwrap();
        assert_eq!(raw.duration, None);
        assert_eq!(raw.bpm, None);

        let raw: RawSong = serde_json::from_value(json!({
            "deezer_id": "8",
            "title": "Fits",
            "duration": 2_147_483_647_i64,
            "bpm": -12.4
        }))
        .unwrap();
        assert_eq!(raw.duration, Some(i32::MAX));
        assert_eq!(raw.into_new_song().unwrap().bpm, None);
    }

    #[test]
    fn test_raw_song_without_title_is_rejected() {
        let raw: RawSong = serde_json::from_value(json!({ "deezer_id": "1" })).unwrap();
        assert!(raw.into_new_song().is_none());

        let raw: RawSong = serde_json::from_value(json!({ "title": "Orphan" })).unwrap();
        assert!(raw.into_new_song().is_none());
    }

    #[test]
    fn test_genre_filter() {
        assert_eq!(genre_filter(None), None);
        assert_eq!(genre_filter(Some("  ")), None);
        assert_eq!(genre_filter(Some("All")), None);
        assert_eq!(genre_filter(Some(" Hip Hop ")), Some("hip hop".to_string()));
    }

    #[test]
    fn test_song_id_round_trip_through_str() {
        let id = SongId::new();
        let parsed: SongId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SongId>().is_err());
    }
}
