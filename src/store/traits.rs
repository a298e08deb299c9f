use super::query::{AggregationQuery, AggregationResults, SearchQuery, SearchResults};
use async_trait::async_trait;
use std::time::Duration;

/// Execution boundary to the document store. Implementations translate the
/// query model into the store's native request form and return results
/// unmodified; no business logic lives behind this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResults, StoreError>;

    async fn aggregate(
        &self,
        index: &str,
        query: &AggregationQuery,
    ) -> Result<AggregationResults, StoreError>;

    /// Whether at least one document in `index` carries `field`.
    async fn field_exists(&self, index: &str, field: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected store response: {0}")]
    Decode(String),
}

impl StoreError {
    /// Transient I/O failure, as opposed to the store refusing the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}
