mod api;
mod archive;
mod cache;
mod config;
mod dispatcher;
mod pipeline;
mod pool;
mod processor;
mod reconcile;
mod resolver;
mod store;
mod tracker;
mod transport;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::archive::{ArchiveIndex, ElasticIndex, NoopIndex};
use crate::cache::{MemoryCache, RecordCache, RedisCache};
use crate::config::{CacheProvider, Config};
use crate::pipeline::{Collaborators, Pipeline, PipelineSettings};
use crate::store::{ServerDb, ServerStore, StoreHandle};
use crate::transport::LocalTopic;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("healthcheckd=info"))
        )
        .init();

    tracing::info!("Starting healthcheckd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/healthcheck/healthcheckd.toml".to_string());

    let config = Config::resolve(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // Durable store
    let db = ServerDb::open(&config.store.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.store.db_path))?;
    tracing::info!("Opened database at {:?}", config.store.db_path);
    let store_handle = StoreHandle::spawn(db);
    let store: Arc<dyn ServerStore> = Arc::new(store_handle.clone());

    // Fast-path cache
    let cache: Arc<dyn RecordCache> = match config.cache.provider {
        CacheProvider::Memory => Arc::new(MemoryCache::new(config.cache.memory_capacity, config.cache.ttl())),
        CacheProvider::Redis => {
            let url = config
                .cache
                .url
                .as_deref()
                .context("cache.url is required for the redis provider")?;
            Arc::new(RedisCache::connect(url).await.context("Failed to connect to redis")?)
        }
    };
    tracing::info!("Using {} cache (ttl {}s)", cache.provider_name(), config.cache.ttl_secs);

    // Archival index
    let index: Arc<dyn ArchiveIndex> = match &config.archive.url {
        Some(url) => {
            let elastic = ElasticIndex::new(
                url,
                &config.archive.index,
                config.archive.api_key.clone(),
                config.archive.request_timeout(),
            )
            .context("Failed to build archival index client")?;
            elastic
                .ping()
                .await
                .with_context(|| format!("Failed to reach archival index at {}", url))?;
            Arc::new(elastic)
        }
        None => {
            tracing::warn!("No archive url configured, heartbeat documents will not be stored");
            Arc::new(NoopIndex)
        }
    };

    let (publisher, subscription) = LocalTopic::new(&config.transport.topic, config.transport.capacity);
    tracing::info!("Consuming topic {}", publisher.topic());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let pipeline = Pipeline::start(
        Collaborators {
            source: Arc::new(subscription),
            store: store.clone(),
            cache,
            index,
        },
        PipelineSettings::from_config(&config),
        cancel.clone(),
    );

    let app_state = api::routes::AppState {
        store,
        publisher,
        tracker: pipeline.tracker(),
        reconciler: pipeline.reconciler_status(),
        archive_stats: pipeline.archive_stats(),
    };
    let app = api::routes::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Stops the HTTP intake and the dispatcher together
    cancel.cancel();

    if let Err(e) = server_handle.await {
        tracing::error!("Server task failed: {}", e);
    }

    pipeline.shutdown().await;

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
