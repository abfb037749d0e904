pub mod catalog;
pub mod deezer;
pub mod history;
pub mod lifecycle;
pub mod recommendation;

// Re-export public types
pub use catalog::{CatalogStore, ListQuery, MemoryCatalog, PgCatalog, SongOrder};
pub use deezer::DeezerClient;
pub use history::ListenHistory;
pub use lifecycle::{ServiceHandle, ServiceState};
pub use recommendation::Recommender;
