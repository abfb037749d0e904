//! Fetches songs from Deezer into the catalog and reindexes it.
//!
//! Usage: `ingest [genre...]` or `ingest --file songs.json`. Without
//! arguments every known genre is fetched.

use indicatif::{ProgressBar, ProgressStyle};
use song_recommender_api::{
    app::{build_catalog, build_embedder, build_vector_store},
    config::Config,
    index::SongIndex,
    scripts::{ingest_genre, parse_seed_songs, reindex_catalog, store_songs, IngestReport},
    services::{
        deezer::{DeezerClient, ALL_GENRES},
        CatalogStore,
    },
    Result,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "song_recommender_api=info,ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let catalog = build_catalog(&config).await?;

    let total = match args.as_slice() {
        [flag, path] if flag == "--file" => {
            info!("📂 Loading seed songs from {}", path);
            let json = tokio::fs::read_to_string(path).await?;
            let (songs, rejected) = parse_seed_songs(&json)?;
            let mut report = store_songs(catalog.as_ref(), songs).await;
            report.failed += rejected;
            report
        }
        _ => {
            let genres: Vec<String> = if args.is_empty() {
                ALL_GENRES.iter().map(|g| g.to_string()).collect()
            } else {
                args.clone()
            };
            ingest_from_deezer(&config, catalog.as_ref(), &genres).await?
        }
    };

    info!(
        "📥 Fetched {}, inserted {}, updated {}, failed {}",
        total.fetched, total.inserted, total.updated, total.failed
    );

    let index = SongIndex::open(build_embedder(&config)?, build_vector_store(&config).await?).await?;
    let indexed = reindex_catalog(catalog.as_ref(), &index).await?;
    info!("🎉 Indexed {} songs, {} vectors in store", indexed, index.count());

    Ok(())
}

async fn ingest_from_deezer(
    config: &Config,
    catalog: &dyn CatalogStore,
    genres: &[String],
) -> Result<IngestReport> {
    let deezer = DeezerClient::new(&config.deezer_base_url)?;

    let progress = ProgressBar::new(genres.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );

    let mut total = IngestReport::default();
    for genre in genres {
        progress.set_message(genre.clone());
        match ingest_genre(&deezer, catalog, genre, config.songs_per_genre).await {
            Ok(report) => total += report,
            Err(e) => error!("❌ Genre '{}' failed: {}", genre, e),
        }
        progress.inc(1);
    }
    progress.finish_with_message("ingestion done");

    Ok(total)
}
