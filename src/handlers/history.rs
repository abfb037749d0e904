use crate::{
    models::{HistoryItem, HistoryParams},
    services::ServiceHandle,
};
use actix_web::{web, HttpResponse};
use tracing::{info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 10;

pub fn history_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/history").route(web::get().to(get_history)));
}

/// Persisted listens for `user_id`; without one, the in-process window.
pub async fn get_history(
    params: web::Query<HistoryParams>,
    service: web::Data<ServiceHandle>,
) -> HttpResponse {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);
    let catalog = service.catalog();

    let user_id = params
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let history = match user_id {
        Some(user_id) => match catalog.list_history(Some(user_id), limit).await {
            Ok(items) => items,
            Err(e) => {
                warn!("History lookup for {} failed: {}", user_id, e);
                Vec::new()
            }
        },
        None => {
            let recent = service
                .recommender()
                .map(|r| r.history().with_timestamps(limit))
                .unwrap_or_default();

            let mut items = Vec::with_capacity(recent.len());
            for (song_id, played_at) in recent {
                match catalog.get_by_id(song_id).await {
                    Ok(Some(song)) => items.push(HistoryItem { song, played_at }),
                    Ok(None) => {}
                    Err(e) => warn!("Song lookup for {} failed: {}", song_id, e),
                }
            }
            items
        }
    };

    info!("GET /history returning {} songs", history.len());
    HttpResponse::Ok().json(serde_json::json!({ "history": history }))
}
