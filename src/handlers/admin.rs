use crate::{
    config::Config,
    error::ApiError,
    models::{genre_filter, RefreshParams},
    scripts::{ingest_all, ingest_genre, reindex_catalog, IngestReport},
    services::{deezer::ALL_GENRES, DeezerClient, ServiceHandle},
};
use actix_web::{web, HttpResponse};
use tracing::info;

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/admin/refresh").route(web::post().to(refresh_catalog)))
        .service(web::resource("/admin/deezer/refresh").route(web::post().to(refresh_catalog)));
}

/// Pulls songs from Deezer into the catalog, then reindexes the catalog.
pub async fn refresh_catalog(
    params: web::Query<RefreshParams>,
    service: web::Data<ServiceHandle>,
    deezer: web::Data<DeezerClient>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let recommender = service.recommender().ok_or_else(|| {
        ApiError::ServiceUnavailable(format!("Recommender is {}", service.state()))
    })?;
    let catalog = service.catalog();

    let genre = genre_filter(params.genre.as_deref());
    let report = match &genre {
        Some(genre) => {
            ingest_genre(&deezer, catalog.as_ref(), genre, config.songs_per_genre).await?
        }
        None => {
            let mut total = IngestReport::default();
            for (_, report) in
                ingest_all(&deezer, catalog.as_ref(), &ALL_GENRES, config.songs_per_genre).await
            {
                total += report;
            }
            total
        }
    };

    let indexed = reindex_catalog(catalog.as_ref(), recommender.index()).await?;
    let vector_store_count = recommender.index().count();
    info!(
        "Refresh done: {} inserted, {} updated, {} indexed, {} in store",
        report.inserted, report.updated, indexed, vector_store_count
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "genre": genre.as_deref().unwrap_or("all"),
        "fetched": report.fetched,
        "inserted": report.inserted,
        "updated": report.updated,
        "failed": report.failed,
        "indexed": indexed,
        "vector_store_count": vector_store_count,
    })))
}
