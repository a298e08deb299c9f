use crate::analytics::AnalyticsService;
use crate::config::parse::load_config;
use crate::config::{Config, StoreConfig, StoreType};
use crate::feed::{
    spawn_scheduler, BackfillSource, Broadcaster, CheckpointPoller, FeedState, IntervalLimits,
    PollerSettings, SystemClock,
};
use crate::fields::{FieldResolver, FieldTable};
use crate::store::{DocumentStore, ElasticStore, MemoryStore};
use crate::web::{run_server, AppState};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("field resolution error: {0}")]
    Resolve(#[from] crate::fields::ResolveError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),

    #[error(
        "config not found; searched ~/.config/firewatch/config.yml and /etc/firewatch/config.yml. \
         Use --config <path> to specify a config file, or run 'firewatch config init' to generate one"
    )]
    ConfigNotFound,
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    run_service(&config_path).await.map_err(|e| e.into())
}

/// Open the configured store. A memory store is seeded from `seed_path`
/// when one is given.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, RunError> {
    match config.store_type {
        StoreType::Elasticsearch => {
            info!(url = %config.url, index = %config.index, "Using Elasticsearch store");
            Ok(Arc::new(ElasticStore::new(config)?))
        }
        StoreType::Memory => {
            let store = MemoryStore::new();
            if let Some(path) = &config.seed_path {
                let index = seed_index_name(&config.index);
                let loaded = store.load_ndjson(&index, path).await?;
                info!(path = %path.display(), index = %index, documents = loaded, "Seeded memory store");
            } else {
                info!("Using empty memory store");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Concrete index name for seeded documents, matched by the configured
/// pattern: the first pattern in a list, with wildcards filled in.
fn seed_index_name(pattern: &str) -> String {
    let first = pattern.split(',').next().unwrap_or(pattern).trim();
    first.replace('*', "seed")
}

pub fn build_resolver(config: &Config, store: Arc<dyn DocumentStore>) -> FieldResolver {
    let table = FieldTable::default().with_overrides(&config.fields.overrides);
    let ttl = (!config.fields.cache_ttl.is_zero()).then_some(config.fields.cache_ttl);
    FieldResolver::new(store, table, ttl)
}

async fn run_service(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let store = build_store(&config.store).await?;
    let resolver = Arc::new(build_resolver(&config, store.clone()));
    let analytics = Arc::new(AnalyticsService::new(
        store.clone(),
        resolver,
        config.store.index.clone(),
        config.store.time_field.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = CheckpointPoller::new(
        store.clone(),
        PollerSettings {
            index: config.store.index.clone(),
            time_field: config.store.time_field.clone(),
            page_size: config.feed.page_size,
            on_store_error: config.feed.on_store_error,
        },
        Utc::now(),
    );
    let feed_state = FeedState::new(
        poller,
        Arc::new(SystemClock),
        config.feed.interval,
        IntervalLimits {
            min: config.feed.min_interval,
            max: config.feed.max_interval,
        },
    );
    let backfill = BackfillSource {
        store,
        index: config.store.index.clone(),
        time_field: config.store.time_field.clone(),
        size: config.feed.backfill_size,
    };

    info!("Starting feed scheduler");
    let (feed, scheduler_handle) = spawn_scheduler(
        feed_state,
        Broadcaster::new(config.feed.channel_capacity),
        backfill,
        shutdown_rx.clone(),
    );

    info!("Starting web server on {}", config.web.listen);
    let state = AppState { analytics, feed };
    let web_config = config.web.clone();
    let web_rx = shutdown_rx.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(state, web_config, web_rx)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Firewatch started, press Ctrl+C to shutdown");

    let web_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            web_handle.await
        }
        result = &mut web_handle => {
            // Server exited on its own; stop the scheduler too.
            let _ = shutdown_tx.send(true);
            result
        }
    };

    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Feed scheduler task join error");
    }

    web_result??;
    info!("Firewatch shutdown complete");
    Ok(())
}
