use crate::{
    error::ApiError,
    models::{ListenRequest, OutcomeExt, SongId},
    services::ServiceHandle,
};
use actix_web::{
    web::{self, Json},
    HttpResponse,
};
use tracing::{info, warn};

pub fn listen_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/listen").route(web::post().to(log_listen)));
}

/// Records a listen in the catalog and feeds the recommender's window.
pub async fn log_listen(
    request: Json<ListenRequest>,
    service: web::Data<ServiceHandle>,
) -> Result<HttpResponse, ApiError> {
    let song_id: SongId = request
        .song_id
        .trim()
        .parse()
        .map_err(|_| ApiError::InvalidInput(format!("Invalid song id: {}", request.song_id)))?;
    let user_id = request
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let recorded = match service.catalog().record_listen(song_id, user_id).await {
        Ok(true) => true,
        Ok(false) => return Err(ApiError::NotFound(format!("Song {} not found", song_id))),
        Err(e) => {
            warn!("Failed to persist listen for {}: {}", song_id, e);
            false
        }
    };

    let (tracked, degraded) = match service.recommender() {
        Some(recommender) => {
            let outcome = recommender.log_listen(song_id).await;
            let reason = outcome.degrade_reason();
            if let Some(reason) = reason {
                warn!("Listen {} not tracked: {}", song_id, reason);
            }
            (reason.is_none(), reason)
        }
        None => (false, None),
    };

    info!("Listen {} recorded={} tracked={}", song_id, recorded, tracked);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "song_id": song_id,
        "recorded": recorded,
        "tracked": tracked,
        "degraded": degraded,
    })))
}
