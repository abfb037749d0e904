pub mod ingest_songs;

pub use ingest_songs::{
    ingest_all, ingest_genre, parse_seed_songs, reindex_catalog, retry_with_backoff, store_songs,
    IngestReport,
};
