use super::document::{as_f64, as_key, lookup_present, parse_timestamp};
use super::query::{
    AggregateResult, Aggregation, AggregationQuery, AggregationResults, Bucket, Hit, SearchQuery,
    SearchResults, SortOrder, TermsOrder, TimeWindow,
};
use super::traits::{DocumentStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    index: String,
    source: Value,
}

/// Number of gateway operations served, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub search: usize,
    pub aggregate: usize,
    pub probe: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.search + self.aggregate + self.probe
    }
}

/// In-process document store evaluating the query model with
/// Elasticsearch-compatible semantics. Backs local development setups and
/// the test suite.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<Vec<StoredDocument>>,
    unavailable: AtomicBool,
    search_calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    probe_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document and return its generated id.
    pub async fn insert(&self, index: &str, source: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.documents.write().await.push(StoredDocument {
            id: id.clone(),
            index: index.to_string(),
            source,
        });
        id
    }

    pub async fn insert_many<I>(&self, index: &str, sources: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.extend(sources.into_iter().map(|source| StoredDocument {
            id: Uuid::new_v4().to_string(),
            index: index.to_string(),
            source,
        }));
        documents.len() - before
    }

    /// Preload newline-delimited JSON documents into `index`.
    pub async fn load_ndjson(&self, index: &str, path: &Path) -> Result<usize, StoreError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            StoreError::Unavailable(format!("failed to read seed file '{}': {}", path.display(), e))
        })?;

        let mut sources = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).map_err(|e| {
                StoreError::Decode(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            sources.push(value);
        }

        Ok(self.insert_many(index, sources).await)
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            search: self.search_calls.load(AtomicOrdering::SeqCst),
            aggregate: self.aggregate_calls.load(AtomicOrdering::SeqCst),
            probe: self.probe_calls.load(AtomicOrdering::SeqCst),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn matching(
        &self,
        index: &str,
        time_field: &str,
        window: &TimeWindow,
        text: Option<&str>,
    ) -> Result<Vec<Matched>, StoreError> {
        let indices = index_pattern(index)?;
        let needle = text.map(str::to_lowercase);
        let documents = self.documents.read().await;

        Ok(documents
            .iter()
            .filter(|doc| indices.is_match(&doc.index))
            .filter_map(|doc| {
                let timestamp = lookup_present(&doc.source, time_field).and_then(parse_timestamp)?;
                if !window.contains(timestamp) {
                    return None;
                }
                if let Some(needle) = &needle {
                    if !doc.source.to_string().to_lowercase().contains(needle) {
                        return None;
                    }
                }
                Some(Matched {
                    doc: doc.clone(),
                    timestamp,
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct Matched {
    doc: StoredDocument,
    timestamp: DateTime<Utc>,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResults, StoreError> {
        self.search_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;

        let mut matched = self
            .matching(index, &query.time_field, &query.window, query.text.as_deref())
            .await?;

        matched.sort_by(|a, b| {
            let by_time = a.timestamp.cmp(&b.timestamp).then_with(|| a.doc.id.cmp(&b.doc.id));
            match query.sort {
                SortOrder::Asc => by_time,
                SortOrder::Desc => by_time.reverse(),
            }
        });

        let total = matched.len() as u64;
        let hits = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|m| Hit {
                id: m.doc.id,
                index: m.doc.index,
                timestamp: Some(m.timestamp),
                source: m.doc.source,
            })
            .collect();

        Ok(SearchResults { total, hits })
    }

    async fn aggregate(
        &self,
        index: &str,
        query: &AggregationQuery,
    ) -> Result<AggregationResults, StoreError> {
        self.aggregate_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;

        let matched = self.matching(index, &query.time_field, &query.window, None).await?;
        let docs: Vec<&Matched> = matched.iter().collect();

        Ok(evaluate_all(&query.aggregations, &docs))
    }

    async fn field_exists(&self, index: &str, field: &str) -> Result<bool, StoreError> {
        self.probe_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.check_available()?;

        let indices = index_pattern(index)?;
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .filter(|doc| indices.is_match(&doc.index))
            .any(|doc| lookup_present(&doc.source, field).is_some()))
    }
}

fn evaluate_all(
    aggregations: &BTreeMap<String, Aggregation>,
    docs: &[&Matched],
) -> BTreeMap<String, AggregateResult> {
    aggregations
        .iter()
        .map(|(name, agg)| (name.clone(), evaluate(agg, docs)))
        .collect()
}

fn evaluate(aggregation: &Aggregation, docs: &[&Matched]) -> AggregateResult {
    match aggregation {
        Aggregation::DateHistogram {
            interval,
            bounds_from,
            bounds_to,
            aggregations,
        } => {
            let width = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX).max(1);
            let align = |ts: DateTime<Utc>| ts.timestamp_millis().div_euclid(width) * width;

            let mut slots: BTreeMap<i64, Vec<&Matched>> = BTreeMap::new();
            let mut key = align(*bounds_from);
            let last = align(*bounds_to);
            while key <= last {
                slots.insert(key, Vec::new());
                key += width;
            }
            for doc in docs {
                slots.entry(align(doc.timestamp)).or_default().push(*doc);
            }

            let buckets = slots
                .into_iter()
                .map(|(key, members)| Bucket {
                    key: Value::from(key),
                    key_as_time: Utc.timestamp_millis_opt(key).single(),
                    doc_count: members.len() as u64,
                    children: evaluate_all(aggregations, &members),
                })
                .collect();

            AggregateResult::Buckets { buckets }
        }
        Aggregation::Terms {
            field,
            size,
            order,
            aggregations,
        } => {
            let mut groups: BTreeMap<String, Vec<&Matched>> = BTreeMap::new();
            for doc in docs {
                if let Some(key) = lookup_present(&doc.doc.source, field).and_then(as_key) {
                    groups.entry(key).or_default().push(*doc);
                }
            }

            let mut buckets: Vec<Bucket> = groups
                .into_iter()
                .map(|(key, members)| Bucket {
                    key: Value::String(key),
                    key_as_time: None,
                    doc_count: members.len() as u64,
                    children: evaluate_all(aggregations, &members),
                })
                .collect();

            buckets.sort_by(|a, b| compare_buckets(order, a, b));
            buckets.truncate(*size);

            AggregateResult::Buckets { buckets }
        }
        Aggregation::Filter {
            field,
            values,
            aggregations,
        } => {
            let members: Vec<&Matched> = docs
                .iter()
                .copied()
                .filter(|doc| {
                    lookup_present(&doc.doc.source, field)
                        .and_then(as_key)
                        .map_or(false, |key| values.contains(&key))
                })
                .collect();

            AggregateResult::Filter {
                doc_count: members.len() as u64,
                children: evaluate_all(aggregations, &members),
            }
        }
        Aggregation::Sum { field } => {
            let total = numeric_values(docs, field).sum::<f64>();
            AggregateResult::Metric { value: Some(total) }
        }
        Aggregation::Avg { field } => {
            let values: Vec<f64> = numeric_values(docs, field).collect();
            let value = if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            };
            AggregateResult::Metric { value }
        }
    }
}

fn numeric_values<'a>(docs: &'a [&'a Matched], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    docs.iter()
        .filter_map(move |doc| lookup_present(&doc.doc.source, field).and_then(as_f64))
}

/// Descending by the requested key, ties broken by bucket key ascending.
fn compare_buckets(order: &TermsOrder, a: &Bucket, b: &Bucket) -> Ordering {
    let primary = match order {
        TermsOrder::DocCount => b.doc_count.cmp(&a.doc_count),
        TermsOrder::Metric { name } => {
            let a_value = a.metric(name).unwrap_or(f64::NEG_INFINITY);
            let b_value = b.metric(name).unwrap_or(f64::NEG_INFINITY);
            b_value.partial_cmp(&a_value).unwrap_or(Ordering::Equal)
        }
    };

    primary.then_with(|| a.key.to_string().cmp(&b.key.to_string()))
}

/// Compile a comma-separated list of index globs (`fw, firewall-*`).
fn index_pattern(pattern: &str) -> Result<GlobSet, StoreError> {
    let mut builder = GlobSetBuilder::new();
    for part in pattern.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let glob = Glob::new(part).map_err(|e| StoreError::Rejected {
            status: 400,
            message: format!("invalid index pattern '{}': {}", part, e),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| StoreError::Rejected {
        status: 400,
        message: format!("invalid index pattern '{}': {}", pattern, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::query::TimeWindow;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn ts(offset_secs: i64) -> String {
        (t0() + ChronoDuration::seconds(offset_secs)).to_rfc3339()
    }

    #[test]
    fn test_index_pattern() {
        let matches = |pattern: &str, index: &str| index_pattern(pattern).unwrap().is_match(index);
        assert!(matches("firewall-*", "firewall-2024.03.01"));
        assert!(matches("fw, firewall-*", "fw"));
        assert!(matches("*-logs-*", "fortigate-logs-01"));
        assert!(matches("fw-*-a", "fw--a"));
        assert!(!matches("fw-*-a", "fw-a"));
        assert!(!matches("firewall-*", "proxy-2024"));
        assert!(!matches("fw", "fw-2024"));
        assert!(matches("*", "anything"));
    }

    #[tokio::test]
    async fn test_invalid_index_pattern_is_rejected() {
        let store = MemoryStore::new();
        store.insert("fw", json!({"@timestamp": ts(1), "srcip": "10.0.0.1"})).await;

        let err = store.field_exists("fw-[", "srcip").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 400, .. }));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_search_sorts_and_pages() {
        let store = MemoryStore::new();
        for offset in [1, 5, 3] {
            store.insert("fw", json!({"@timestamp": ts(offset), "n": offset})).await;
        }

        let mut query = SearchQuery::newest_first(
            "@timestamp",
            TimeWindow::closed(t0(), t0() + ChronoDuration::seconds(10)),
            2,
        );
        let results = store.search("fw", &query).await.unwrap();
        assert_eq!(results.total, 3);
        let order: Vec<_> = results.hits.iter().map(|h| h.source["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![5, 3]);

        query.offset = 2;
        let results = store.search("fw", &query).await.unwrap();
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].source["n"], 1);
    }

    #[tokio::test]
    async fn test_search_text_filter() {
        let store = MemoryStore::new();
        store.insert("fw", json!({"@timestamp": ts(1), "msg": "Denied by policy"})).await;
        store.insert("fw", json!({"@timestamp": ts(2), "msg": "accepted"})).await;

        let mut query = SearchQuery::newest_first("@timestamp", TimeWindow::up_to(t0() + ChronoDuration::hours(1)), 10);
        query.text = Some("denied".to_string());

        let results = store.search("fw", &query).await.unwrap();
        assert_eq!(results.total, 1);
    }

    #[tokio::test]
    async fn test_histogram_extends_to_bounds() {
        let store = MemoryStore::new();
        store.insert("fw", json!({"@timestamp": ts(70), "bytes": 10})).await;

        let mut metrics = BTreeMap::new();
        metrics.insert("bytes".to_string(), Aggregation::Sum { field: "bytes".to_string() });
        let mut aggregations = BTreeMap::new();
        aggregations.insert(
            "timeline".to_string(),
            Aggregation::DateHistogram {
                interval: Duration::from_secs(60),
                bounds_from: t0(),
                bounds_to: t0() + ChronoDuration::seconds(179),
                aggregations: metrics,
            },
        );

        let query = AggregationQuery {
            time_field: "@timestamp".to_string(),
            window: TimeWindow::closed(t0(), t0() + ChronoDuration::seconds(179)),
            aggregations,
        };
        let results = store.aggregate("fw", &query).await.unwrap();
        let buckets = results["timeline"].buckets().unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].doc_count, 0);
        assert_eq!(buckets[1].doc_count, 1);
        assert_eq!(buckets[1].metric("bytes"), Some(10.0));
        assert_eq!(buckets[2].metric("bytes"), Some(0.0));
    }

    #[tokio::test]
    async fn test_field_exists_and_unavailable() {
        let store = MemoryStore::new();
        store.insert("fw", json!({"@timestamp": ts(1), "srcip": "10.0.0.1"})).await;

        assert!(store.field_exists("fw", "srcip").await.unwrap());
        assert!(!store.field_exists("fw", "source.ip").await.unwrap());
        assert!(!store.field_exists("other", "srcip").await.unwrap());

        store.set_unavailable(true);
        let err = store.field_exists("fw", "srcip").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.calls().probe, 4);
    }

    #[tokio::test]
    async fn test_load_ndjson() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"@timestamp\": \"{}\", \"action\": \"deny\"}}", ts(1)).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"@timestamp\": \"{}\", \"action\": \"allow\"}}", ts(2)).unwrap();
        file.flush().unwrap();

        let store = MemoryStore::new();
        let loaded = store.load_ndjson("fw", file.path()).await.unwrap();
        assert_eq!(loaded, 2);
    }
}
