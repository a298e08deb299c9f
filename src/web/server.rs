use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::config::WebConfig;

use super::api::{
    aggregate, feed_status, health_check, list_fields, live, refresh_fields, search, AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/feed/status", get(feed_status))
        .route("/api/live", get(live))
        .route("/api/search", post(search))
        .route("/api/aggregate", post(aggregate))
        .route("/api/fields", get(list_fields))
        .route("/api/fields/refresh", post(refresh_fields))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown_rx` flips to true.
pub async fn run_server(
    state: AppState,
    web_config: WebConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&web_config.listen).await?;
    tracing::info!("Web server listening on {}", web_config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await?;

    Ok(())
}
