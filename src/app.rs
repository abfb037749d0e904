use crate::{
    config::{Config, IndexBackend},
    error::Result,
    index::{LocalVectorStore, PineconeStore, VectorStore},
    ml::{EmbeddingProvider, GeminiEmbedder},
    routes::api_routes,
    services::{CatalogStore, DeezerClient, MemoryCatalog, PgCatalog, ServiceHandle},
};
use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::{error, info, warn};
use std::{net::TcpListener, sync::Arc};

pub struct Application {
    port: u16,
    host: String,
    config: Config,
}

impl Application {
    /// Create a new application instance
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.port,
            host: config.host.clone(),
            config: config.clone(),
        }
    }

    /// Build and run the server
    pub async fn run(&self) -> Result<()> {
        let bind_address = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&bind_address)?;
        info!("Starting server at http://{}", bind_address);

        self.run_with_listener(listener).await
    }

    /// Run the server with a specific TCP listener
    /// This is useful for testing where we want to use a random port
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        let catalog = build_catalog(&self.config).await?;
        let store = build_vector_store(&self.config).await?;
        let provider = build_embedder(&self.config)?;
        let deezer = DeezerClient::new(&self.config.deezer_base_url)?;

        let service = web::Data::new(ServiceHandle::new(catalog, self.config.history_size));

        // The server answers from the catalog while the index is opened.
        let init_service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = init_service.initialize(provider, store).await {
                error!("Recommendation service failed to initialize: {}", e);
            }
        });

        let config = web::Data::new(self.config.clone());
        let deezer = web::Data::new(deezer);
        let shutdown_service = service.clone();

        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header();

            App::new()
                .wrap(cors)
                .wrap(Logger::default())
                .app_data(service.clone())
                .app_data(config.clone())
                .app_data(deezer.clone())
                .service(api_routes())
        })
        .listen(listener)?
        .run()
        .await?;

        shutdown_service.shutdown();
        Ok(())
    }
}

/// Postgres when a database URL is configured, otherwise in memory.
pub async fn build_catalog(config: &Config) -> Result<Arc<dyn CatalogStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let catalog = PgCatalog::connect_lazy(url, config.database_max_connections)?;
            catalog
                .migrate()
                .await
                .context("Failed to prepare catalog schema")?;
            info!("Using Postgres catalog");
            Ok(Arc::new(catalog))
        }
        None => {
            warn!("No database configured, using in-memory catalog");
            Ok(Arc::new(MemoryCatalog::new()))
        }
    }
}

pub async fn build_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.index_backend {
        IndexBackend::Pinecone => {
            let store = PineconeStore::new(
                config.pinecone_api_key.as_deref().unwrap_or_default(),
                config.pinecone_host.as_deref().unwrap_or_default(),
                config.pinecone_namespace.clone(),
            )?;
            info!("Using Pinecone vector store");
            Ok(Arc::new(store))
        }
        IndexBackend::Local if config.index_path.trim().is_empty() => {
            info!("Using in-memory vector store");
            Ok(Arc::new(LocalVectorStore::in_memory()))
        }
        IndexBackend::Local => Ok(Arc::new(LocalVectorStore::open(&config.index_path).await?)),
    }
}

pub fn build_embedder(config: &Config) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    Ok(GeminiEmbedder::from_config(config)?
        .map(|embedder| Arc::new(embedder) as Arc<dyn EmbeddingProvider>))
}
