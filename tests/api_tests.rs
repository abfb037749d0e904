use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use song_recommender_api::{
    config::{Config, IndexBackend},
    index::{LocalVectorStore, SongIndex},
    models::{HistoryItem, NewSong, Song, SongId},
    routes::api_routes,
    services::{
        catalog::UpsertOutcome, CatalogStore, DeezerClient, ListQuery, MemoryCatalog, Recommender,
        ServiceHandle,
    },
    ApiError, Result,
};

/// Catalog whose backend is down.
struct UnreachableCatalog;

fn backend_down<T>() -> Result<T> {
    Err(ApiError::DatabaseError("connection refused".to_string()))
}

#[async_trait]
impl CatalogStore for UnreachableCatalog {
    async fn upsert_by_external_id(&self, _song: &NewSong) -> Result<UpsertOutcome> {
        backend_down()
    }

    async fn get_by_id(&self, _id: SongId) -> Result<Option<Song>> {
        backend_down()
    }

    async fn list(&self, _query: &ListQuery) -> Result<Vec<Song>> {
        backend_down()
    }

    async fn increment_play_count(&self, _id: SongId) -> Result<bool> {
        backend_down()
    }

    async fn record_listen(&self, _id: SongId, _user_id: Option<&str>) -> Result<bool> {
        backend_down()
    }

    async fn list_history(&self, _user_id: Option<&str>, _limit: usize) -> Result<Vec<HistoryItem>> {
        backend_down()
    }

    async fn count(&self, _genre: Option<&str>) -> Result<i64> {
        backend_down()
    }
}

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        google_api_key: None,
        embedding_model: "text-embedding-004".to_string(),
        embedding_base_url: "http://127.0.0.1:9".to_string(),
        embedding_timeout_secs: 1,
        database_url: None,
        database_max_connections: 1,
        index_backend: IndexBackend::Local,
        index_path: String::new(),
        pinecone_api_key: None,
        pinecone_host: None,
        pinecone_namespace: None,
        history_size: 10,
        recommend_k: 2,
        trending_size: 20,
        songs_per_genre: 10,
        deezer_base_url: "http://127.0.0.1:9".to_string(),
    }
}

fn new_song(external_id: &str, genre: &str) -> NewSong {
    NewSong {
        external_id: external_id.to_string(),
        title: format!("Title {}", external_id),
        artist: "Artist".to_string(),
        album: None,
        genre: Some(genre.to_string()),
        cover_url: None,
        preview_url: None,
        duration: Some(200),
        bpm: None,
        tags: None,
    }
}

async fn seeded_catalog() -> (Arc<MemoryCatalog>, Vec<SongId>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let mut ids = Vec::new();
    for (external_id, genre) in [("1", "rock"), ("2", "pop"), ("3", "rock")] {
        ids.push(
            catalog
                .upsert_by_external_id(&new_song(external_id, genre))
                .await
                .unwrap()
                .id,
        );
    }
    (catalog, ids)
}

fn ready_handle(catalog: Arc<MemoryCatalog>) -> ServiceHandle {
    let index = SongIndex::disabled(Arc::new(LocalVectorStore::in_memory()));
    let recommender = Recommender::new(Arc::new(index), catalog.clone(), 10);
    ServiceHandle::ready(catalog, recommender)
}

macro_rules! test_app {
    ($handle:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($handle))
                .app_data(web::Data::new(test_config()))
                .app_data(web::Data::new(
                    DeezerClient::new("http://127.0.0.1:9").unwrap(),
                ))
                .service(api_routes()),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_check() {
    let (catalog, _) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["state"], "ready");
    assert!(body["timestamp"].is_string());
}

#[actix_web::test]
async fn test_listen_updates_trending_and_history() {
    let (catalog, ids) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    for id in [ids[2], ids[2], ids[0]] {
        let req = test::TestRequest::post()
            .uri("/api/listen")
            .set_json(json!({ "song_id": id.to_string(), "user_id": "listener-1" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["recorded"], true);
        // No embeddings configured, so the window is not fed.
        assert_eq!(body["tracked"], false);
        assert_eq!(body["degraded"], "index_disabled");
    }

    let req = test::TestRequest::get().uri("/api/trending").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let songs = body["songs"].as_array().unwrap();
    assert_eq!(songs[0]["id"], ids[2].to_string());
    assert_eq!(songs[0]["play_count"], 2);
    assert_eq!(songs[1]["id"], ids[0].to_string());

    let req = test::TestRequest::get()
        .uri("/api/history?user_id=listener-1")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["id"], ids[0].to_string());
    assert!(history[0]["played_at"].is_string());
}

#[actix_web::test]
async fn test_listen_rejects_bad_and_unknown_ids() {
    let (catalog, _) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::post()
        .uri("/api/listen")
        .set_json(json!({ "song_id": "not-a-uuid" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/listen")
        .set_json(json!({ "song_id": SongId::new().to_string() }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_song_by_id() {
    let (catalog, ids) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::get()
        .uri(&format!("/api/songs/{}", ids[1]))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["external_id"], "2");
    assert_eq!(body["genre"], "pop");

    let req = test::TestRequest::get()
        .uri(&format!("/api/songs/{}", SongId::new()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/api/songs/42").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_catalog_outage_is_not_reported_as_missing() {
    let catalog: Arc<dyn CatalogStore> = Arc::new(UnreachableCatalog);
    let index = SongIndex::disabled(Arc::new(LocalVectorStore::in_memory()));
    let recommender = Recommender::new(Arc::new(index), catalog.clone(), 10);
    let app = test_app!(ServiceHandle::ready(catalog, recommender));

    let req = test::TestRequest::get()
        .uri(&format!("/api/songs/{}", SongId::new()))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    let req = test::TestRequest::get().uri("/api/songs").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["songs"].as_array().unwrap().is_empty());
    assert_eq!(body["degraded"], "catalog_unavailable");
}

#[actix_web::test]
async fn test_songs_listing_filters_and_pages() {
    let (catalog, ids) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::get()
        .uri("/api/songs?genre=Rock&limit=1&offset=1")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let songs = body["songs"].as_array().unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0]["id"], ids[0].to_string());

    let req = test::TestRequest::get().uri("/api/songs?genre=all").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["songs"].as_array().unwrap().len(), 3);
    assert!(body.get("degraded").is_none());
}

#[actix_web::test]
async fn test_recommend_without_embeddings_serves_trending() {
    let (catalog, _) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::get().uri("/api/recommend").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["songs"].as_array().unwrap().len(), 2);
    assert_eq!(body["degraded"], "index_disabled");

    let req = test::TestRequest::get()
        .uri("/api/recommendations?genre=pop")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let songs = body["songs"].as_array().unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0]["genre"], "pop");
}

#[actix_web::test]
async fn test_initializing_service_answers_from_catalog() {
    let (catalog, _) = seeded_catalog().await;
    let app = test_app!(ServiceHandle::new(catalog, 10));

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["state"], "initializing");

    let req = test::TestRequest::get().uri("/api/recommend").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["songs"].as_array().unwrap().len(), 2);

    let req = test::TestRequest::post().uri("/api/admin/refresh").to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[actix_web::test]
async fn test_genres_lists_ingestion_genres() {
    let (catalog, _) = seeded_catalog().await;
    let app = test_app!(ready_handle(catalog));

    let req = test::TestRequest::get().uri("/api/genres").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let genres = body["genres"].as_array().unwrap();
    assert!(genres.contains(&json!("hip hop")));
    assert!(body["prototypes"].as_array().unwrap().is_empty());
}
