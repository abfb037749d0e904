//! Explicit start-up state for the recommendation core.
//!
//! The HTTP server comes up before the index is opened. Handlers read the
//! state from a [`ServiceHandle`] and answer from the catalog until it is
//! [`ServiceState::Ready`].

use crate::{
    error::{ApiError, Result},
    index::{SongIndex, VectorStore},
    ml::EmbeddingProvider,
    services::{catalog::CatalogStore, recommendation::Recommender},
};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ServiceState {
    Initializing,
    Ready,
    Failed(String),
    ShutDown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Initializing => "initializing",
            ServiceState::Ready => "ready",
            ServiceState::Failed(_) => "failed",
            ServiceState::ShutDown => "shut_down",
        }
    }

    fn can_transition_to(&self, next: &ServiceState) -> bool {
        matches!(
            (self, next),
            (ServiceState::Initializing, ServiceState::Ready)
                | (ServiceState::Initializing, ServiceState::Failed(_))
                | (_, ServiceState::ShutDown)
        ) && *self != ServiceState::ShutDown
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Owns the lifecycle state and, once ready, the recommender.
pub struct ServiceHandle {
    state: RwLock<ServiceState>,
    recommender: OnceCell<Arc<Recommender>>,
    catalog: Arc<dyn CatalogStore>,
    history_size: usize,
}

impl ServiceHandle {
    pub fn new(catalog: Arc<dyn CatalogStore>, history_size: usize) -> Self {
        Self {
            state: RwLock::new(ServiceState::Initializing),
            recommender: OnceCell::new(),
            catalog,
            history_size,
        }
    }

    /// A handle that is already ready with `recommender`.
    pub fn ready(catalog: Arc<dyn CatalogStore>, recommender: Recommender) -> Self {
        let handle = Self::new(catalog, recommender.history().capacity());
        let _ = handle.recommender.set(Arc::new(recommender));
        *handle.state.write().unwrap_or_else(PoisonError::into_inner) = ServiceState::Ready;
        handle
    }

    pub fn state(&self) -> ServiceState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ServiceState::Ready
    }

    pub fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.catalog.clone()
    }

    /// The recommender, only while the service is ready.
    pub fn recommender(&self) -> Option<Arc<Recommender>> {
        if !self.is_ready() {
            return None;
        }
        self.recommender.get().cloned()
    }

    pub fn transition(&self, next: ServiceState) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(&next) {
            return Err(ApiError::InternalError(format!(
                "invalid service transition {} -> {}",
                *state, next
            )));
        }
        info!("Service state {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    /// Opens the index, computes the genre prototypes and marks the service
    /// ready. A failure leaves the service in `Failed` with the reason.
    pub async fn initialize(
        &self,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        store: Arc<dyn VectorStore>,
    ) -> Result<()> {
        let index = match SongIndex::open(provider, store).await {
            Ok(index) => index,
            Err(e) => {
                error!("Failed to open song index: {}", e);
                self.transition(ServiceState::Failed(e.to_string()))?;
                return Err(e.into());
            }
        };

        let recommender = Recommender::new(Arc::new(index), self.catalog.clone(), self.history_size);
        let genres = recommender.initialize_genres().await.len();

        if self.recommender.set(Arc::new(recommender)).is_err() {
            return Err(ApiError::InternalError(
                "service initialised twice".to_string(),
            ));
        }
        self.transition(ServiceState::Ready)?;
        info!("Recommendation service ready ({} genre prototypes)", genres);
        Ok(())
    }

    pub fn shutdown(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != ServiceState::ShutDown {
            info!("Service state {} -> shut_down", *state);
            *state = ServiceState::ShutDown;
        }
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("state", &self.state())
            .field("recommender", &self.recommender.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::LocalVectorStore;
    use crate::services::catalog::MemoryCatalog;

    fn handle() -> ServiceHandle {
        ServiceHandle::new(Arc::new(MemoryCatalog::new()), 10)
    }

    #[test]
    fn test_transitions() {
        let handle = handle();
        assert_eq!(handle.state(), ServiceState::Initializing);
        assert!(handle.transition(ServiceState::Initializing).is_err());
        handle.transition(ServiceState::Failed("boom".into())).unwrap();
        assert!(handle.transition(ServiceState::Ready).is_err());
        handle.transition(ServiceState::ShutDown).unwrap();
        assert!(handle.transition(ServiceState::ShutDown).is_err());
    }

    #[tokio::test]
    async fn test_initialize_without_provider_is_ready_and_disabled() {
        let handle = handle();
        assert!(handle.recommender().is_none());

        handle
            .initialize(None, Arc::new(LocalVectorStore::in_memory()))
            .await
            .unwrap();

        assert_eq!(handle.state(), ServiceState::Ready);
        let recommender = handle.recommender().unwrap();
        assert!(!recommender.index().is_enabled());
        assert!(recommender.get_genre_vectors().is_empty());

        handle.shutdown();
        assert_eq!(handle.state(), ServiceState::ShutDown);
        assert!(handle.recommender().is_none());
    }

    #[test]
    fn test_state_serializes_with_reason() {
        let json = serde_json::to_value(ServiceState::Failed("no index".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "failed", "reason": "no index" }));
        assert_eq!(ServiceState::Ready.to_string(), "ready");
    }
}
