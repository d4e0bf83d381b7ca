use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use feed_core::{
    load_feeds, spawn_warmer, AppConfig, CacheStore, FeedCacheManager, HttpSource, MemoryStore,
    RedisStore,
};
use feed_web::{create_router, AppState};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "feed-web stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    let feeds = load_feeds(&config.feeds_file)?;
    info!(
        feeds = feeds.len(),
        file = %config.feeds_file.display(),
        "loaded feed configuration"
    );

    let store = build_store(&config);
    let client = HttpSource::default_client()?;
    let source = Arc::new(HttpSource::new(client, config.cache.fetch_timeout));
    let manager = FeedCacheManager::new(&config.cache, store, source);

    let warmer = spawn_warmer(
        manager.clone(),
        feeds.clone(),
        config.server.warm_interval,
    );

    let state = Arc::new(AppState {
        manager: manager.clone(),
        feeds,
    });
    let app = create_router(state);

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(warmer) = warmer {
        if let Err(err) = warmer.stop().await {
            warn!(error = %err, "warmer did not stop cleanly");
        }
    }
    manager.shutdown().await;
    Ok(())
}

/// Redis when configured, memory otherwise. A bad store URL is not fatal.
fn build_store(config: &AppConfig) -> Arc<dyn CacheStore> {
    match &config.store {
        Some(store_config) => match RedisStore::new(store_config) {
            Ok(store) => {
                info!(redis_url = %store_config.redacted_url(), "using redis cache store");
                Arc::new(store)
            }
            Err(err) => {
                warn!(error = %err, "redis store unusable, falling back to memory");
                Arc::new(MemoryStore::new())
            }
        },
        None => {
            info!("using in-memory cache store");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
