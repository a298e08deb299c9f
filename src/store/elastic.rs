use super::document::{lookup_present, parse_timestamp};
use super::query::{
    AggregateResult, Aggregation, AggregationQuery, AggregationResults, Bound, Bucket, Hit,
    SearchQuery, SearchResults, SortOrder, TermsOrder, TimeWindow,
};
use super::traits::{DocumentStore, StoreError};
use crate::config::types::StoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Elasticsearch/OpenSearch backend speaking the `_search` REST API.
#[derive(Debug)]
pub struct ElasticStore {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        let credentials = config
            .username
            .clone()
            .map(|user| (user, config.password.clone()));

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            timeout: config.timeout,
            credentials,
        })
    }

    async fn post_search(&self, index: &str, body: &Value) -> Result<Value, StoreError> {
        let url = format!("{}/{}/_search", self.base_url, index);
        let mut request = self.client.post(&url).json(body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                StoreError::Unavailable(format!("status {}: {}", status.as_u16(), message))
            } else {
                StoreError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        response.json().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<SearchResults, StoreError> {
        let body = search_body(query);
        tracing::trace!(index = %index, body = %body, "Executing search");
        let response = self.post_search(index, &body).await?;
        parse_search(&response, &query.time_field)
    }

    async fn aggregate(
        &self,
        index: &str,
        query: &AggregationQuery,
    ) -> Result<AggregationResults, StoreError> {
        let body = aggregation_body(query);
        tracing::trace!(index = %index, body = %body, "Executing aggregation");
        let response = self.post_search(index, &body).await?;
        parse_aggregations(&query.aggregations, &response["aggregations"])
    }

    async fn field_exists(&self, index: &str, field: &str) -> Result<bool, StoreError> {
        let body = json!({
            "size": 0,
            "terminate_after": 1,
            "track_total_hits": true,
            "query": { "exists": { "field": field } }
        });
        let response = self.post_search(index, &body).await?;
        Ok(total_hits(&response)? > 0)
    }
}

fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn range_filter(time_field: &str, window: &TimeWindow) -> Value {
    let mut range = Map::new();
    match window.lower {
        Bound::Inclusive(ts) => {
            range.insert("gte".to_string(), json!(format_time(ts)));
        }
        Bound::Exclusive(ts) => {
            range.insert("gt".to_string(), json!(format_time(ts)));
        }
        Bound::Unbounded => {}
    }
    match window.upper {
        Bound::Inclusive(ts) => {
            range.insert("lte".to_string(), json!(format_time(ts)));
        }
        Bound::Exclusive(ts) => {
            range.insert("lt".to_string(), json!(format_time(ts)));
        }
        Bound::Unbounded => {}
    }
    range.insert("format".to_string(), json!("strict_date_optional_time"));

    json!({ "range": { time_field: Value::Object(range) } })
}

pub(crate) fn search_body(query: &SearchQuery) -> Value {
    let mut filters = vec![range_filter(&query.time_field, &query.window)];
    if let Some(text) = query.text.as_deref().filter(|t| !t.trim().is_empty()) {
        filters.push(json!({ "query_string": { "query": text } }));
    }

    let order = match query.sort {
        SortOrder::Asc => "asc",
        SortOrder::Desc => "desc",
    };

    json!({
        "from": query.offset,
        "size": query.limit,
        "track_total_hits": true,
        "sort": [ { query.time_field.as_str(): { "order": order } } ],
        "query": { "bool": { "filter": filters } }
    })
}

pub(crate) fn aggregation_body(query: &AggregationQuery) -> Value {
    json!({
        "size": 0,
        "query": { "bool": { "filter": [ range_filter(&query.time_field, &query.window) ] } },
        "aggs": aggregations_json(&query.time_field, &query.aggregations)
    })
}

fn aggregations_json(time_field: &str, aggregations: &BTreeMap<String, Aggregation>) -> Value {
    let mut out = Map::new();
    for (name, agg) in aggregations {
        out.insert(name.clone(), aggregation_json(time_field, agg));
    }
    Value::Object(out)
}

fn aggregation_json(time_field: &str, aggregation: &Aggregation) -> Value {
    let (mut body, children) = match aggregation {
        Aggregation::DateHistogram {
            interval,
            bounds_from,
            bounds_to,
            aggregations,
        } => (
            json!({
                "date_histogram": {
                    "field": time_field,
                    "fixed_interval": format!("{}ms", interval.as_millis().max(1)),
                    "min_doc_count": 0,
                    "extended_bounds": {
                        "min": bounds_from.timestamp_millis(),
                        "max": bounds_to.timestamp_millis()
                    }
                }
            }),
            Some(aggregations),
        ),
        Aggregation::Terms {
            field,
            size,
            order,
            aggregations,
        } => {
            // Elasticsearch orders terms by document count unless told
            // otherwise, so the order key is always spelled out.
            let order = match order {
                TermsOrder::DocCount => json!({ "_count": "desc" }),
                TermsOrder::Metric { name } => json!({ name.as_str(): "desc" }),
            };
            (
                json!({ "terms": { "field": field, "size": size, "order": order } }),
                Some(aggregations),
            )
        }
        Aggregation::Filter {
            field,
            values,
            aggregations,
        } => (
            json!({ "filter": { "terms": { field.as_str(): values } } }),
            Some(aggregations),
        ),
        Aggregation::Sum { field } => (json!({ "sum": { "field": field } }), None),
        Aggregation::Avg { field } => (json!({ "avg": { "field": field } }), None),
    };

    if let Some(children) = children.filter(|c| !c.is_empty()) {
        body["aggs"] = aggregations_json(time_field, children);
    }
    body
}

fn total_hits(response: &Value) -> Result<u64, StoreError> {
    let total = &response["hits"]["total"];
    total["value"]
        .as_u64()
        .or_else(|| total.as_u64())
        .ok_or_else(|| StoreError::Decode("missing hits.total".to_string()))
}

pub(crate) fn parse_search(response: &Value, time_field: &str) -> Result<SearchResults, StoreError> {
    let total = total_hits(response)?;
    let raw_hits = response["hits"]["hits"]
        .as_array()
        .ok_or_else(|| StoreError::Decode("missing hits.hits".to_string()))?;

    let hits = raw_hits
        .iter()
        .map(|hit| {
            let source = hit["_source"].clone();
            Hit {
                id: hit["_id"].as_str().unwrap_or_default().to_string(),
                index: hit["_index"].as_str().unwrap_or_default().to_string(),
                timestamp: lookup_present(&source, time_field).and_then(parse_timestamp),
                source,
            }
        })
        .collect();

    Ok(SearchResults { total, hits })
}

/// Walk the compiled tree alongside the response so each node is decoded by
/// the shape that was requested.
pub(crate) fn parse_aggregations(
    aggregations: &BTreeMap<String, Aggregation>,
    response: &Value,
) -> Result<AggregationResults, StoreError> {
    let mut out = BTreeMap::new();
    for (name, agg) in aggregations {
        let node = response
            .get(name)
            .ok_or_else(|| StoreError::Decode(format!("missing aggregation '{}'", name)))?;
        out.insert(name.clone(), parse_aggregation(agg, node)?);
    }
    Ok(out)
}

fn parse_aggregation(aggregation: &Aggregation, node: &Value) -> Result<AggregateResult, StoreError> {
    match aggregation {
        Aggregation::DateHistogram { aggregations, .. } | Aggregation::Terms { aggregations, .. } => {
            let is_histogram = matches!(aggregation, Aggregation::DateHistogram { .. });
            let raw = node["buckets"]
                .as_array()
                .ok_or_else(|| StoreError::Decode("aggregation without buckets".to_string()))?;

            let mut buckets = Vec::with_capacity(raw.len());
            for bucket in raw {
                let key = bucket["key"].clone();
                let key_as_time = if is_histogram {
                    key.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                } else {
                    None
                };
                buckets.push(Bucket {
                    key,
                    key_as_time,
                    doc_count: bucket["doc_count"].as_u64().unwrap_or(0),
                    children: parse_aggregations(aggregations, bucket)?,
                });
            }
            Ok(AggregateResult::Buckets { buckets })
        }
        Aggregation::Filter { aggregations, .. } => Ok(AggregateResult::Filter {
            doc_count: node["doc_count"].as_u64().unwrap_or(0),
            children: parse_aggregations(aggregations, node)?,
        }),
        Aggregation::Sum { .. } | Aggregation::Avg { .. } => Ok(AggregateResult::Metric {
            value: node["value"].as_f64(),
        }),
    }
}
