use super::compiler::{compile, required_fields, validate};
use super::error::QueryError;
use super::request::{
    AggregationRequest, AggregationResponse, SearchRequest, SearchResponse, TimeRange,
};
use crate::fields::FieldResolver;
use crate::store::{DocumentStore, SearchQuery, SortOrder};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const MAX_PAGE_SIZE: usize = 500;

/// Request/response analytics over one index: ad-hoc search and compiled
/// aggregations. Runs on the caller's task; shares nothing mutable with the
/// live feed.
pub struct AnalyticsService {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<FieldResolver>,
    index: String,
    time_field: String,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<FieldResolver>,
        index: String,
        time_field: String,
    ) -> Self {
        Self {
            store,
            resolver,
            index,
            time_field,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn resolver(&self) -> &Arc<FieldResolver> {
        &self.resolver
    }

    pub async fn aggregate(&self, request: &AggregationRequest) -> Result<AggregationResponse, QueryError> {
        let table = self.resolver.table();
        validate(request, table)?;

        let resolution = self
            .resolver
            .resolve_all(required_fields(&request.shape), &self.index)
            .await?;
        let compiled = compile(request, &self.time_field, table, &resolution)?;

        if !compiled.unresolved.is_empty() {
            let fields: Vec<&str> = compiled.unresolved.iter().map(|u| u.field.as_str()).collect();
            tracing::info!(
                index = %self.index,
                unresolved = ?fields,
                "Aggregation degraded by unresolved fields"
            );
        }

        if compiled.is_empty() {
            return Ok(AggregationResponse {
                buckets: BTreeMap::new(),
                unresolved_fields: compiled.unresolved,
            });
        }

        let buckets = self.store.aggregate(&self.index, &compiled.query).await?;
        Ok(AggregationResponse {
            buckets,
            unresolved_fields: compiled.unresolved,
        })
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, QueryError> {
        let range = TimeRange::from_bounds(request.from, request.to)?;
        let page = request.page.max(1);
        let page_size = request.page_size.clamp(1, MAX_PAGE_SIZE);

        let query = SearchQuery {
            time_field: self.time_field.clone(),
            window: range.window(),
            text: request.query.clone().filter(|q| !q.trim().is_empty()),
            sort: SortOrder::Desc,
            offset: (page - 1).saturating_mul(page_size),
            limit: page_size,
        };

        let results = self.store.search(&self.index, &query).await?;
        Ok(SearchResponse {
            total: results.total,
            page,
            page_size,
            hits: results.hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::request::{AggregationShape, Metric};
    use crate::fields::table::{ACTION, BYTES, SOURCE_IP};
    use crate::fields::FieldTable;
    use crate::store::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn service(store: Arc<MemoryStore>) -> AnalyticsService {
        let resolver = Arc::new(FieldResolver::new(store.clone(), FieldTable::default(), None));
        AnalyticsService::new(store, resolver, "fw".to_string(), "@timestamp".to_string())
    }

    #[tokio::test]
    async fn test_inverted_range_never_reaches_store() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let request = AggregationRequest {
            from: Some(t0() + chrono::Duration::hours(1)),
            to: Some(t0()),
            shape: AggregationShape::TopN {
                group_by: Some(SOURCE_IP.to_string()),
                top_n: 10,
                metric: Metric::Sum(BYTES.to_string()),
            },
        };

        let err = service.aggregate(&request).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidTimeRange(_)));
        assert_eq!(store.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_grouping_skips_gateway() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert("fw", json!({"@timestamp": t0().to_rfc3339(), "bytes": 10}))
            .await;
        let service = service(store.clone());

        let request = AggregationRequest {
            from: Some(t0()),
            to: Some(t0() + chrono::Duration::hours(1)),
            shape: AggregationShape::Classification { group_by: None, top_n: 5 },
        };

        let response = service.aggregate(&request).await.unwrap();
        assert!(response.buckets.is_empty());
        assert_eq!(response.unresolved_fields[0].field, ACTION);
        assert_eq!(store.calls().aggregate, 0);
    }

    #[tokio::test]
    async fn test_search_pages_newest_first() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            store
                .insert(
                    "fw",
                    json!({"@timestamp": (t0() + chrono::Duration::seconds(i)).to_rfc3339(), "seq": i}),
                )
                .await;
        }
        let service = service(store.clone());

        let response = service
            .search(&SearchRequest {
                query: None,
                from: Some(t0()),
                to: Some(t0() + chrono::Duration::minutes(1)),
                page: 2,
                page_size: 2,
            })
            .await
            .unwrap();

        assert_eq!(response.total, 5);
        let seqs: Vec<i64> = response.hits.iter().map(|h| h.source["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_search_store_outage_surfaces() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let service = service(store.clone());

        let err = service
            .search(&SearchRequest {
                query: None,
                from: Some(t0()),
                to: Some(t0()),
                page: 1,
                page_size: 10,
            })
            .await
            .unwrap_err();

        match err {
            QueryError::Store(e) => assert!(e.is_unavailable()),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
