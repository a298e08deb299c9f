use super::health::PollHealth;
use crate::config::types::OnStoreError;
use crate::store::{DocumentStore, Hit, SearchQuery, TimeWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Hard cap on documents in one live batch, bounding memory on the
/// receiving side.
pub const MAX_LIVE_BATCH: usize = 200;

/// Documents delivered together, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBatch {
    /// Exclusive lower edge of the polled window; `None` for a backfill.
    pub window_start: Option<DateTime<Utc>>,
    /// Inclusive upper edge of the polled window.
    pub window_end: DateTime<Utc>,
    pub documents: Vec<Hit>,
}

impl LogBatch {
    pub fn empty(window_start: Option<DateTime<Utc>>, window_end: DateTime<Utc>) -> Self {
        Self {
            window_start,
            window_end,
            documents: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub index: String,
    pub time_field: String,
    pub page_size: usize,
    pub on_store_error: OnStoreError,
}

/// Turns a query-only store into a feed by repeatedly fetching documents in
/// `(watermark, now]` and moving the watermark to `now`.
pub struct CheckpointPoller {
    store: Arc<dyn DocumentStore>,
    settings: PollerSettings,
    watermark: DateTime<Utc>,
    health: PollHealth,
}

impl CheckpointPoller {
    pub fn new(store: Arc<dyn DocumentStore>, settings: PollerSettings, watermark: DateTime<Utc>) -> Self {
        let mut settings = settings;
        settings.page_size = settings.page_size.clamp(1, MAX_LIVE_BATCH);

        Self {
            store,
            settings,
            watermark,
            health: PollHealth::default(),
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn health(&self) -> &PollHealth {
        &self.health
    }

    /// Discard any backlog by moving the watermark up to `now`. The watermark
    /// never moves backwards, even if the clock does.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        if now > self.watermark {
            self.watermark = now;
        }
    }

    pub fn record_skip(&mut self) {
        self.health.record_skip();
    }

    /// Fetch documents with event time in `(watermark, now]`, newest first.
    ///
    /// Store failures are absorbed: the error is logged and recorded in
    /// [`PollHealth`] and an empty batch is returned. With
    /// [`OnStoreError::Advance`] the watermark still moves to `now`, so an
    /// outage loses that window instead of building a backlog.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> LogBatch {
        let from = self.watermark;
        if now <= from {
            tracing::debug!(watermark = %from, now = %now, "Clock has not advanced past watermark, skipping poll");
            return LogBatch::empty(Some(from), from);
        }

        let query = SearchQuery::newest_first(
            &self.settings.time_field,
            TimeWindow::after(from, now),
            self.settings.page_size,
        );

        match self.store.search(&self.settings.index, &query).await {
            Ok(results) => {
                let dropped = results.total.saturating_sub(results.hits.len() as u64);
                if dropped > 0 {
                    tracing::warn!(
                        window_start = %from,
                        window_end = %now,
                        total = results.total,
                        page_size = self.settings.page_size,
                        dropped,
                        "Poll window exceeded page size, older documents not delivered"
                    );
                }

                tracing::debug!(
                    window_start = %from,
                    window_end = %now,
                    documents = results.hits.len(),
                    "Polled store"
                );

                self.health.record_success(now, results.hits.len(), dropped);
                self.watermark = now;

                LogBatch {
                    window_start: Some(from),
                    window_end: now,
                    documents: results.hits,
                }
            }
            Err(e) => {
                tracing::warn!(
                    window_start = %from,
                    window_end = %now,
                    error = %e,
                    policy = ?self.settings.on_store_error,
                    "Poll failed"
                );
                self.health.record_failure(now, e.to_string());

                if self.settings.on_store_error == OnStoreError::Advance {
                    self.watermark = now;
                }

                LogBatch::empty(Some(from), now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
    }

    fn settings(on_store_error: OnStoreError) -> PollerSettings {
        PollerSettings {
            index: "fw".to_string(),
            time_field: "@timestamp".to_string(),
            page_size: 100,
            on_store_error,
        }
    }

    async fn insert_at(store: &MemoryStore, offset_secs: i64) {
        store
            .insert(
                "fw",
                json!({"@timestamp": (t0() + Duration::seconds(offset_secs)).to_rfc3339(), "n": offset_secs}),
            )
            .await;
    }

    fn offsets(batch: &LogBatch) -> Vec<i64> {
        batch.documents.iter().map(|d| d.source["n"].as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_tick_windows_are_half_open() {
        let store = Arc::new(MemoryStore::new());
        for offset in [1, 2, 5] {
            insert_at(&store, offset).await;
        }
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Advance), t0());

        let first = poller.tick(t0() + Duration::seconds(3)).await;
        assert_eq!(offsets(&first), vec![2, 1]);
        assert_eq!(poller.watermark(), t0() + Duration::seconds(3));

        let second = poller.tick(t0() + Duration::seconds(6)).await;
        assert_eq!(offsets(&second), vec![5]);
    }

    #[tokio::test]
    async fn test_boundary_document_delivered_once() {
        let store = Arc::new(MemoryStore::new());
        insert_at(&store, 3).await;
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Advance), t0());

        let first = poller.tick(t0() + Duration::seconds(3)).await;
        let second = poller.tick(t0() + Duration::seconds(4)).await;
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_repeat_tick_is_empty() {
        let store = Arc::new(MemoryStore::new());
        insert_at(&store, 1).await;
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Advance), t0());

        let now = t0() + Duration::seconds(2);
        assert_eq!(poller.tick(now).await.len(), 1);
        assert!(poller.tick(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_advances_watermark_by_default() {
        let store = Arc::new(MemoryStore::new());
        insert_at(&store, 1).await;
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Advance), t0());

        store.set_unavailable(true);
        let batch = poller.tick(t0() + Duration::seconds(2)).await;
        assert!(batch.is_empty());
        assert_eq!(poller.watermark(), t0() + Duration::seconds(2));
        assert_eq!(poller.health().consecutive_failures, 1);

        store.set_unavailable(false);
        let batch = poller.tick(t0() + Duration::seconds(3)).await;
        assert!(batch.is_empty(), "document in the failed window is not replayed");
    }

    #[tokio::test]
    async fn test_hold_policy_retries_window() {
        let store = Arc::new(MemoryStore::new());
        insert_at(&store, 1).await;
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Hold), t0());

        store.set_unavailable(true);
        poller.tick(t0() + Duration::seconds(2)).await;
        assert_eq!(poller.watermark(), t0());

        store.set_unavailable(false);
        let batch = poller.tick(t0() + Duration::seconds(3)).await;
        assert_eq!(offsets(&batch), vec![1]);
        assert!(poller.health().is_healthy());
    }

    #[tokio::test]
    async fn test_clock_regression_never_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let mut poller = CheckpointPoller::new(store.clone(), settings(OnStoreError::Advance), t0());

        poller.tick(t0() - Duration::seconds(10)).await;
        assert_eq!(poller.watermark(), t0());
        assert_eq!(store.calls().search, 0);

        poller.reset(t0() - Duration::seconds(5));
        assert_eq!(poller.watermark(), t0());
    }

    #[tokio::test]
    async fn test_page_overflow_is_counted() {
        let store = Arc::new(MemoryStore::new());
        for offset in 1..=5 {
            insert_at(&store, offset).await;
        }
        let mut config = settings(OnStoreError::Advance);
        config.page_size = 2;
        let mut poller = CheckpointPoller::new(store.clone(), config, t0());

        let batch = poller.tick(t0() + Duration::seconds(10)).await;
        assert_eq!(offsets(&batch), vec![5, 4]);
        assert_eq!(poller.health().documents_dropped, 3);
        assert_eq!(poller.watermark(), t0() + Duration::seconds(10));
    }
}
