use crate::{
    config::Config,
    error::ApiError,
    models::{genre_filter, DegradeReason, ListParams, OutcomeExt, SongId, SongsResponse},
    services::{deezer::ALL_GENRES, CatalogStore, ListQuery, ServiceHandle, SongOrder},
};
use actix_web::{web, HttpResponse};
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 500;

pub fn songs_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/songs").route(web::get().to(list_songs)))
        .service(web::resource("/songs/{id}").route(web::get().to(get_song)))
        .service(web::resource("/trending").route(web::get().to(trending)))
        .service(web::resource("/discover").route(web::get().to(discover)))
        .service(web::resource("/genres").route(web::get().to(genres)))
        .service(web::resource("/catalog").route(web::get().to(annotated_catalog)));
}

/// Lists the catalog. A failing store yields an empty, flagged list.
async fn list_or_empty(catalog: &dyn CatalogStore, query: ListQuery) -> SongsResponse {
    match catalog.list(&query).await {
        Ok(songs) => SongsResponse::new(songs),
        Err(e) => {
            warn!("Catalog listing failed ({:?}): {}", query.order, e);
            SongsResponse {
                songs: Vec::new(),
                degraded: Some(DegradeReason::CatalogUnavailable),
            }
        }
    }
}

fn page_size(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}

pub async fn list_songs(
    params: web::Query<ListParams>,
    service: web::Data<ServiceHandle>,
) -> HttpResponse {
    let query = ListQuery::new(
        SongOrder::from_param(params.kind.as_deref()),
        page_size(params.limit, DEFAULT_PAGE_SIZE),
    )
    .with_genre(genre_filter(params.genre.as_deref()))
    .with_offset(params.offset.unwrap_or(0));

    let response = list_or_empty(service.catalog().as_ref(), query).await;
    info!("GET /songs returning {} songs", response.songs.len());
    HttpResponse::Ok().json(response)
}

pub async fn get_song(
    path: web::Path<String>,
    service: web::Data<ServiceHandle>,
) -> Result<HttpResponse, ApiError> {
    let id: SongId = path
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("Invalid song id: {}", path)))?;

    match service.catalog().get_by_id(id).await {
        Ok(Some(song)) => Ok(HttpResponse::Ok().json(song)),
        Ok(None) => Err(ApiError::NotFound(format!("Song {} not found", id))),
        Err(e) => {
            warn!("Song lookup for {} failed: {}", id, e);
            Err(ApiError::ServiceUnavailable("Catalog unavailable".to_string()))
        }
    }
}

pub async fn trending(
    params: web::Query<ListParams>,
    service: web::Data<ServiceHandle>,
    config: web::Data<Config>,
) -> HttpResponse {
    let query = ListQuery::trending(page_size(params.limit, config.trending_size))
        .with_genre(genre_filter(params.genre.as_deref()));
    HttpResponse::Ok().json(list_or_empty(service.catalog().as_ref(), query).await)
}

/// Least-played songs, to surface the long tail.
pub async fn discover(
    params: web::Query<ListParams>,
    service: web::Data<ServiceHandle>,
    config: web::Data<Config>,
) -> HttpResponse {
    let query = ListQuery::new(
        SongOrder::LeastPlayed,
        page_size(params.limit, config.trending_size),
    )
    .with_genre(genre_filter(params.genre.as_deref()));
    HttpResponse::Ok().json(list_or_empty(service.catalog().as_ref(), query).await)
}

pub async fn genres(service: web::Data<ServiceHandle>) -> HttpResponse {
    let prototypes: Vec<String> = service
        .recommender()
        .map(|r| r.get_genre_vectors().labels().map(str::to_string).collect())
        .unwrap_or_default();

    HttpResponse::Ok().json(serde_json::json!({
        "genres": ALL_GENRES,
        "prototypes": prototypes,
    }))
}

/// Index listing where each song carries the nearest genre prototype.
pub async fn annotated_catalog(
    params: web::Query<ListParams>,
    service: web::Data<ServiceHandle>,
) -> HttpResponse {
    let Some(recommender) = service.recommender() else {
        return HttpResponse::Ok().json(serde_json::json!({ "songs": [] }));
    };

    let outcome = recommender
        .annotate(page_size(params.limit, MAX_PAGE_SIZE))
        .await;
    let degraded = outcome.degrade_reason();
    if let Some(reason) = degraded {
        warn!("Annotated catalog degraded: {}", reason);
    }

    let genre = genre_filter(params.genre.as_deref());
    let songs: Vec<_> = outcome
        .into_value()
        .into_iter()
        .filter(|s| {
            genre
                .as_deref()
                .map(|g| s.primary_genre.eq_ignore_ascii_case(g) || s.song.has_genre(g))
                .unwrap_or(true)
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "songs": songs,
        "degraded": degraded,
    }))
}
