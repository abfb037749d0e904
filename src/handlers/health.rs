use crate::{models::HealthResponse, services::ServiceHandle};
use actix_web::{get, web, HttpResponse};

#[get("/health")]
pub async fn health_check(service: web::Data<ServiceHandle>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        state: service.state().to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Index and recommender internals for diagnosing a deployment.
#[get("/debug")]
pub async fn debug_info(service: web::Data<ServiceHandle>) -> HttpResponse {
    let recommender = service.recommender();
    let index = recommender.as_ref().map(|r| r.index());

    HttpResponse::Ok().json(serde_json::json!({
        "state": service.state(),
        "has_recommender": recommender.is_some(),
        "index_enabled": index.map(|i| i.is_enabled()).unwrap_or(false),
        "store_count": index.map(|i| i.count()).unwrap_or(0),
        "dimension": index.and_then(|i| i.dimension()),
        "model": index.and_then(|i| i.provider()).map(|p| p.model_name()),
        "history_size": recommender.as_ref().map(|r| r.history().len()).unwrap_or(0),
        "genre_vectors": recommender.as_ref().map(|r| r.get_genre_vectors().len()).unwrap_or(0),
    }))
}
