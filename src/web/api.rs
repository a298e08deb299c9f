use crate::analytics::{
    AggregationRequest, AggregationResponse, AnalyticsService, QueryError, SearchRequest,
};
use crate::feed::{FeedError, FeedHandle, FeedStatus, LogBatch};
use crate::fields::{normalize, FieldReport, FieldTable, ResolveError};
use crate::store::{Hit, StoreError};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared state for the API
#[derive(Clone)]
pub struct AppState {
    pub analytics: Arc<AnalyticsService>,
    pub feed: FeedHandle,
}

impl AppState {
    fn table(&self) -> &FieldTable {
        self.analytics.resolver().table()
    }
}

/// A raw document plus its canonical view.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub id: String,
    pub index: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, Value>,
    pub source: Value,
}

impl DocumentView {
    pub fn from_hit(hit: &Hit, table: &FieldTable) -> Self {
        Self {
            id: hit.id.clone(),
            index: hit.index.clone(),
            timestamp: hit.timestamp,
            fields: normalize(&hit.source, table),
            source: hit.source.clone(),
        }
    }
}

fn views(documents: &[Hit], table: &FieldTable) -> Vec<DocumentView> {
    documents.iter().map(|hit| DocumentView::from_hit(hit, table)).collect()
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/feed/status
pub async fn feed_status(State(state): State<AppState>) -> Result<Json<FeedStatus>, ApiError> {
    Ok(Json(state.feed.status().await?))
}

#[derive(Debug, Serialize)]
pub struct SearchResponseBody {
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub hits: Vec<DocumentView>,
}

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let response = state.analytics.search(&request).await?;
    Ok(Json(SearchResponseBody {
        total: response.total,
        page: response.page,
        page_size: response.page_size,
        hits: views(&response.hits, state.table()),
    }))
}

/// POST /api/aggregate
pub async fn aggregate(
    State(state): State<AppState>,
    Json(request): Json<AggregationRequest>,
) -> Result<Json<AggregationResponse>, ApiError> {
    Ok(Json(state.analytics.aggregate(&request).await?))
}

#[derive(Debug, Deserialize)]
pub struct FieldsQuery {
    #[serde(default)]
    pub index: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FieldsResponse {
    pub index: String,
    pub fields: Vec<FieldReport>,
}

/// GET /api/fields
pub async fn list_fields(
    State(state): State<AppState>,
    Query(query): Query<FieldsQuery>,
) -> Result<Json<FieldsResponse>, ApiError> {
    let index = query.index.unwrap_or_else(|| state.analytics.index().to_string());
    let fields = state.analytics.resolver().report(&index).await?;
    Ok(Json(FieldsResponse { index, fields }))
}

/// POST /api/fields/refresh
pub async fn refresh_fields(
    State(state): State<AppState>,
    Query(query): Query<FieldsQuery>,
) -> Json<Value> {
    let index = query.index.unwrap_or_else(|| state.analytics.index().to_string());
    state.analytics.resolver().invalidate(&index).await;
    Json(serde_json::json!({ "invalidated": index }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Backfill {
        window_end: DateTime<Utc>,
        documents: Vec<DocumentView>,
    },
    Batch {
        window_start: Option<DateTime<Utc>>,
        window_end: DateTime<Utc>,
        documents: Vec<DocumentView>,
    },
    IntervalChanged {
        seconds: u64,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    fn backfill(batch: &LogBatch, table: &FieldTable) -> Self {
        ServerMessage::Backfill {
            window_end: batch.window_end,
            documents: views(&batch.documents, table),
        }
    }

    fn batch(batch: &LogBatch, table: &FieldTable) -> Self {
        ServerMessage::Batch {
            window_start: batch.window_start,
            window_end: batch.window_end,
            documents: views(&batch.documents, table),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SetInterval { seconds: u64 },
}

/// GET /api/live
pub async fn live(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live(socket, state))
}

async fn handle_live(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut subscription = match state.feed.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Live subscription refused");
            let _ = send(&mut sender, &ServerMessage::Error { message: e.to_string() }).await;
            return;
        }
    };
    let observer = subscription.id();
    info!(observer = %observer, "Live observer connected");

    let backfill = subscription.take_backfill();
    if send(&mut sender, &ServerMessage::backfill(&backfill, state.table()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state, &text).await;
                        if send(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sender.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(observer = %observer, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
            batch = subscription.recv() => {
                match batch {
                    Some(batch) => {
                        if send(&mut sender, &ServerMessage::batch(&batch, state.table())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    info!(observer = %observer, "Live observer disconnected");
}

async fn handle_client_message(state: &AppState, text: &str) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::Error {
                message: format!("unrecognized message: {}", e),
            }
        }
    };

    match message {
        ClientMessage::SetInterval { seconds } => {
            match state.feed.set_interval(Duration::from_secs(seconds)).await {
                Ok(interval) => ServerMessage::IntervalChanged {
                    seconds: interval.as_secs(),
                },
                Err(e) => ServerMessage::Error { message: e.to_string() },
            }
        }
    }
}

async fn send<S>(sender: &mut S, message: &ServerMessage) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let payload = serde_json::to_string(message).map_err(|e| {
        warn!(error = %e, "Failed to serialize live message");
    })?;
    sender.send(Message::Text(payload)).await.map_err(|_| ())
}

// Error handling
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    BadGateway(String),
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidTimeRange(_) | QueryError::InvalidRequest(_) => {
                ApiError::BadRequest(e.to_string())
            }
            QueryError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_unavailable() {
            ApiError::Unavailable(e.to_string())
        } else {
            ApiError::BadGateway(e.to_string())
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        QueryError::from(e).into()
    }
}

impl From<FeedError> for ApiError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::SchedulerStopped => ApiError::Unavailable(e.to_string()),
            FeedError::InvalidInterval { .. } => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
