use std::sync::Arc;

use crate::{
    clock::SystemClock,
    config::Config,
    db::{DurableCache, MemoryCache},
    error::AppResult,
    services::{InMemorySignalProvider, RecommendationService, SignalProvider},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecommendationService>,
}

impl AppState {
    pub fn new(service: Arc<RecommendationService>) -> Self {
        Self { service }
    }

    /// Fully in-process state: memory durable tier and pushed signals only
    pub fn in_memory(config: Config) -> AppResult<Self> {
        let clock = Arc::new(SystemClock);
        let durable: Arc<dyn DurableCache> = Arc::new(MemoryCache::new(clock.clone()));
        let provider: Arc<dyn SignalProvider> = Arc::new(InMemorySignalProvider::new());

        let service = RecommendationService::new(config, provider, durable, clock)?;
        Ok(Self::new(Arc::new(service)))
    }
}
