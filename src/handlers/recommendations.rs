use crate::{
    config::Config,
    models::{genre_filter, GenreQuery, OutcomeExt, SongsResponse},
    services::{ListQuery, ServiceHandle},
};
use actix_web::{web, HttpResponse};
use tracing::{info, warn};

pub fn recommendations_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/recommend").route(web::get().to(get_recommendations)))
        .service(web::resource("/recommendations").route(web::get().to(get_recommendations)));
}

/// Songs near the listener's recent taste, topped up from trending.
pub async fn get_recommendations(
    query: web::Query<GenreQuery>,
    service: web::Data<ServiceHandle>,
    config: web::Data<Config>,
) -> HttpResponse {
    let genre = genre_filter(query.genre.as_deref());
    let k = config.recommend_k;

    // Over-fetch so the fallback survives removing already-heard songs.
    let trending_query = ListQuery::trending(k + config.history_size).with_genre(genre.clone());
    let trending = match service.catalog().list(&trending_query).await {
        Ok(songs) => songs,
        Err(e) => {
            warn!("Trending fallback unavailable: {}", e);
            Vec::new()
        }
    };

    let response = match service.recommender() {
        Some(recommender) => {
            let outcome = recommender
                .recommend_next(k, Some(&trending), genre.as_deref())
                .await;
            if let Some(reason) = outcome.degrade_reason() {
                warn!("Recommendations degraded: {}", reason);
            }
            SongsResponse::from_outcome(outcome)
        }
        None => {
            warn!("Recommender not ready ({}), serving trending", service.state());
            SongsResponse::new(trending.into_iter().take(k).collect())
        }
    };

    info!(
        "GET /recommend returning {} songs (genre={})",
        response.songs.len(),
        genre.as_deref().unwrap_or("all")
    );
    HttpResponse::Ok().json(response)
}
