use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shelfwise_api::{
    api::{create_router, AppState},
    clock::SystemClock,
    config::Config,
    db::{create_redis_client, DurableCache, MemoryCache, RedisCache},
    services::{InMemorySignalProvider, RecommendationService, SignalProvider},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("shelfwise_api=info,tower_http=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let clock = Arc::new(SystemClock);

    let (durable, cache_writer) = match &config.redis_url {
        Some(url) => {
            let client = create_redis_client(url).context("Invalid REDIS_URL")?;
            let (cache, writer) = RedisCache::new(client);
            let durable: Arc<dyn DurableCache> = Arc::new(cache);
            tracing::info!("Durable cache tier: redis");
            (durable, Some(writer))
        }
        None => {
            let durable: Arc<dyn DurableCache> = Arc::new(MemoryCache::new(clock.clone()));
            tracing::info!("REDIS_URL not set, durable cache tier kept in memory");
            (durable, None)
        }
    };

    let provider: Arc<dyn SignalProvider> = Arc::new(InMemorySignalProvider::new());
    let service = Arc::new(RecommendationService::new(
        config.clone(),
        provider,
        durable,
        clock,
    )?);

    let retrain_loop = config
        .retrain_interval()
        .map(|interval| service.clone().spawn_retrain_loop(interval));

    let app = create_router(AppState::new(service));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = retrain_loop {
        handle.abort();
    }
    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
