use super::error::QueryError;
use super::request::{AggregationRequest, AggregationShape, Metric, TimeRange};
use crate::fields::table::ACTION;
use crate::fields::{FieldTable, Resolution, UnresolvedField};
use crate::store::{Aggregation, AggregationQuery, TermsOrder};
use std::collections::BTreeMap;

/// Upper bound on buckets a single aggregation may produce, and therefore on
/// `top_n`. Stays well below Elasticsearch's default `search.max_buckets`.
pub const MAX_BUCKETS: i64 = 10_000;

pub const TIMELINE: &str = "timeline";
pub const TOP: &str = "top";
pub const ALLOWED: &str = "allowed";
pub const DENIED: &str = "denied";

/// Action values counted as allowed traffic. Values in neither list are
/// counted in neither class.
pub const ALLOWED_ACTIONS: &[&str] = &["allow", "accept", "permit", "pass"];
pub const DENIED_ACTIONS: &[&str] = &["deny", "block", "drop", "reject"];

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAggregation {
    pub query: AggregationQuery,
    pub unresolved: Vec<UnresolvedField>,
}

impl CompiledAggregation {
    /// True when every aggregation was omitted for lack of fields.
    pub fn is_empty(&self) -> bool {
        self.query.aggregations.is_empty()
    }
}

/// Canonical fields a request needs resolved, in the order they matter.
pub fn required_fields(shape: &AggregationShape) -> Vec<&str> {
    match shape {
        AggregationShape::Timeline { metrics, .. } => {
            metrics.iter().filter_map(Metric::field).collect()
        }
        AggregationShape::TopN {
            group_by, metric, ..
        } => group_by.as_deref().into_iter().chain(metric.field()).collect(),
        AggregationShape::Classification { group_by, .. } => {
            std::iter::once(ACTION).chain(group_by.as_deref()).collect()
        }
    }
}

/// Structural validation that needs no store access. Runs before any field
/// probe so a malformed request never costs a round trip.
pub fn validate(request: &AggregationRequest, table: &FieldTable) -> Result<TimeRange, QueryError> {
    let range = TimeRange::from_bounds(request.from, request.to)?;

    match &request.shape {
        AggregationShape::Timeline { bucket, .. } => {
            let width_ms = i64::try_from(bucket.as_millis()).unwrap_or(i64::MAX);
            if width_ms < 1 {
                return Err(QueryError::InvalidRequest(
                    "timeline bucket width must be at least 1ms".to_string(),
                ));
            }
            let buckets = range.span().num_milliseconds() / width_ms + 1;
            if buckets > MAX_BUCKETS {
                return Err(QueryError::InvalidRequest(format!(
                    "timeline would produce {} buckets (max {})",
                    buckets, MAX_BUCKETS
                )));
            }
        }
        AggregationShape::TopN { group_by: None, .. } => {
            return Err(QueryError::InvalidRequest(
                "top_n requires a group_by field".to_string(),
            ));
        }
        _ => {}
    }

    for field in required_fields(&request.shape) {
        if !table.contains(field) {
            return Err(QueryError::InvalidRequest(format!("unknown field '{}'", field)));
        }
    }

    Ok(range)
}

/// Clamp a requested group count into `1..=MAX_BUCKETS`.
pub fn clamp_top_n(top_n: i64) -> usize {
    top_n.clamp(1, MAX_BUCKETS) as usize
}

/// Turn a semantic request into a bucketed aggregation query.
///
/// Pure apart from the already-performed field resolution. Fields that did
/// not resolve drop their metric or grouping from the query and are reported
/// in `unresolved`; the rest of the request still compiles.
pub fn compile(
    request: &AggregationRequest,
    time_field: &str,
    table: &FieldTable,
    resolution: &Resolution,
) -> Result<CompiledAggregation, QueryError> {
    let range = validate(request, table)?;
    let mut aggregations = BTreeMap::new();

    match &request.shape {
        AggregationShape::Timeline { bucket, metrics } => {
            aggregations.insert(
                TIMELINE.to_string(),
                Aggregation::DateHistogram {
                    interval: *bucket,
                    bounds_from: range.from,
                    bounds_to: range.to,
                    aggregations: metric_aggregations(metrics, resolution),
                },
            );
        }
        AggregationShape::TopN {
            group_by,
            top_n,
            metric,
        } => {
            let group_field = group_by.as_deref().and_then(|g| resolution.get(g));
            if let Some(field) = group_field {
                let children = metric_aggregations(std::slice::from_ref(metric), resolution);
                // Without an explicit metric order the store ranks by document
                // count, putting chatty low-volume talkers above heavy ones.
                let order = match children.keys().next() {
                    Some(name) => TermsOrder::Metric { name: name.clone() },
                    None => TermsOrder::DocCount,
                };
                aggregations.insert(
                    TOP.to_string(),
                    Aggregation::Terms {
                        field: field.to_string(),
                        size: clamp_top_n(*top_n),
                        order,
                        aggregations: children,
                    },
                );
            }
        }
        AggregationShape::Classification { group_by, top_n } => {
            if let Some(action_field) = resolution.get(ACTION) {
                let group_field = group_by.as_deref().and_then(|g| resolution.get(g));
                for (name, values) in [(ALLOWED, ALLOWED_ACTIONS), (DENIED, DENIED_ACTIONS)] {
                    let mut children = BTreeMap::new();
                    if let Some(field) = group_field {
                        children.insert(
                            TOP.to_string(),
                            Aggregation::Terms {
                                field: field.to_string(),
                                size: clamp_top_n(*top_n),
                                order: TermsOrder::DocCount,
                                aggregations: BTreeMap::new(),
                            },
                        );
                    }
                    aggregations.insert(
                        name.to_string(),
                        Aggregation::Filter {
                            field: action_field.to_string(),
                            values: values.iter().map(|v| v.to_string()).collect(),
                            aggregations: children,
                        },
                    );
                }
            }
        }
    }

    let needed = required_fields(&request.shape);
    let unresolved = resolution
        .unresolved()
        .iter()
        .filter(|u| needed.contains(&u.field.as_str()))
        .cloned()
        .collect();

    Ok(CompiledAggregation {
        query: AggregationQuery {
            time_field: time_field.to_string(),
            window: range.window(),
            aggregations,
        },
        unresolved,
    })
}

/// Sum/avg sub-aggregations for the metrics whose fields resolved. Document
/// counts come with every bucket and need no sub-aggregation.
fn metric_aggregations(metrics: &[Metric], resolution: &Resolution) -> BTreeMap<String, Aggregation> {
    let mut out = BTreeMap::new();
    for metric in metrics {
        let aggregation = match metric {
            Metric::Count => None,
            Metric::Sum(canonical) => resolution
                .get(canonical)
                .map(|field| Aggregation::Sum { field: field.to_string() }),
            Metric::Avg(canonical) => resolution
                .get(canonical)
                .map(|field| Aggregation::Avg { field: field.to_string() }),
        };
        if let Some(aggregation) = aggregation {
            out.insert(metric.name(), aggregation);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::table::{BYTES, RECEIVED_BYTES, SENT_BYTES, SOURCE_IP};
    use chrono::{DateTime, TimeZone, Utc};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn request(shape: AggregationShape) -> AggregationRequest {
        AggregationRequest {
            from: Some(t0()),
            to: Some(t0() + chrono::Duration::hours(1)),
            shape,
        }
    }

    fn resolution() -> Resolution {
        let mut resolution = Resolution::default();
        resolution.insert_found(SOURCE_IP, "srcip");
        resolution.insert_found(BYTES, "bytes");
        resolution.insert_found(SENT_BYTES, "sentbyte");
        resolution.insert_found(ACTION, "action");
        resolution
    }

    #[test]
    fn test_top_n_orders_by_metric() {
        let compiled = compile(
            &request(AggregationShape::TopN {
                group_by: Some(SOURCE_IP.to_string()),
                top_n: 10,
                metric: Metric::Sum(BYTES.to_string()),
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap();

        match &compiled.query.aggregations[TOP] {
            Aggregation::Terms { field, size, order, aggregations } => {
                assert_eq!(field, "srcip");
                assert_eq!(*size, 10);
                assert_eq!(order, &TermsOrder::Metric { name: "sum_bytes".to_string() });
                assert!(aggregations.contains_key("sum_bytes"));
            }
            other => panic!("unexpected aggregation {:?}", other),
        }
    }

    #[test]
    fn test_top_n_count_metric_orders_by_doc_count() {
        let compiled = compile(
            &request(AggregationShape::TopN {
                group_by: Some(SOURCE_IP.to_string()),
                top_n: 3,
                metric: Metric::Count,
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap();

        match &compiled.query.aggregations[TOP] {
            Aggregation::Terms { order, .. } => assert_eq!(order, &TermsOrder::DocCount),
            other => panic!("unexpected aggregation {:?}", other),
        }
    }

    #[test]
    fn test_top_n_clamped_to_one() {
        assert_eq!(clamp_top_n(0), 1);
        assert_eq!(clamp_top_n(-7), 1);
        assert_eq!(clamp_top_n(25), 25);
        assert_eq!(clamp_top_n(i64::MAX), MAX_BUCKETS as usize);
    }

    #[test]
    fn test_top_n_without_group_by_is_invalid() {
        let err = compile(
            &request(AggregationShape::TopN {
                group_by: None,
                top_n: 10,
                metric: Metric::Count,
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn test_timeline_omits_unresolved_metric() {
        let mut resolution = resolution();
        resolution.insert_unresolved(RECEIVED_BYTES, &["destination.bytes".to_string()]);

        let compiled = compile(
            &request(AggregationShape::Timeline {
                bucket: Duration::from_secs(60),
                metrics: vec![
                    Metric::Sum(BYTES.to_string()),
                    Metric::Sum(SENT_BYTES.to_string()),
                    Metric::Sum(RECEIVED_BYTES.to_string()),
                ],
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution,
        )
        .unwrap();

        match &compiled.query.aggregations[TIMELINE] {
            Aggregation::DateHistogram { interval, aggregations, bounds_from, .. } => {
                assert_eq!(*interval, Duration::from_secs(60));
                assert_eq!(*bounds_from, t0());
                assert!(aggregations.contains_key("sum_bytes"));
                assert!(aggregations.contains_key("sum_sentBytes"));
                assert!(!aggregations.contains_key("sum_receivedBytes"));
            }
            other => panic!("unexpected aggregation {:?}", other),
        }
        assert_eq!(compiled.unresolved.len(), 1);
        assert_eq!(compiled.unresolved[0].field, RECEIVED_BYTES);
    }

    #[test]
    fn test_timeline_rejects_bucket_explosion() {
        let err = compile(
            &request(AggregationShape::Timeline {
                bucket: Duration::from_millis(1),
                metrics: vec![],
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }

    #[test]
    fn test_timeline_rejects_sub_millisecond_bucket() {
        let err = compile(
            &request(AggregationShape::Timeline {
                bucket: Duration::from_micros(500),
                metrics: vec![],
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap_err();
        match err {
            QueryError::InvalidRequest(msg) => assert!(msg.contains("at least 1ms"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classification_uses_closed_action_lists() {
        let compiled = compile(
            &request(AggregationShape::Classification {
                group_by: Some(SOURCE_IP.to_string()),
                top_n: 0,
            }),
            "@timestamp",
            &FieldTable::default(),
            &resolution(),
        )
        .unwrap();

        match &compiled.query.aggregations[DENIED] {
            Aggregation::Filter { field, values, aggregations } => {
                assert_eq!(field, "action");
                assert_eq!(values, &vec!["deny", "block", "drop", "reject"]);
                match &aggregations[TOP] {
                    Aggregation::Terms { size, .. } => assert_eq!(*size, 1),
                    other => panic!("unexpected aggregation {:?}", other),
                }
            }
            other => panic!("unexpected aggregation {:?}", other),
        }
        assert!(compiled.query.aggregations.contains_key(ALLOWED));
    }

    #[test]
    fn test_classification_without_action_compiles_empty() {
        let mut resolution = Resolution::default();
        resolution.insert_unresolved(ACTION, &["event.action".to_string()]);

        let compiled = compile(
            &request(AggregationShape::Classification { group_by: None, top_n: 5 }),
            "@timestamp",
            &FieldTable::default(),
            &resolution,
        )
        .unwrap();

        assert!(compiled.is_empty());
        assert_eq!(compiled.unresolved[0].field, ACTION);
    }

    #[test]
    fn test_unknown_field_is_invalid_request() {
        let err = validate(
            &request(AggregationShape::TopN {
                group_by: Some("colour".to_string()),
                top_n: 5,
                metric: Metric::Count,
            }),
            &FieldTable::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidRequest(_)));
    }
}
