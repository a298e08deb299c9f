use super::error::QueryError;
use crate::store::{Hit, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Validated `[from, to]` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, QueryError> {
        if from > to {
            return Err(QueryError::InvalidTimeRange(format!(
                "'from' ({}) is after 'to' ({})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    /// Both ends must be present; a missing end is never widened to "all
    /// time" or narrowed to an empty window.
    pub fn from_bounds(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Self, QueryError> {
        match (from, to) {
            (Some(from), Some(to)) => Self::new(from, to),
            (None, _) => Err(QueryError::InvalidTimeRange("missing 'from'".to_string())),
            (_, None) => Err(QueryError::InvalidTimeRange("missing 'to'".to_string())),
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::closed(self.from, self.to)
    }

    pub fn span(&self) -> chrono::Duration {
        self.to - self.from
    }
}

/// Semantic analytic request, expressed in canonical field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    pub shape: AggregationShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationShape {
    /// Fixed-width histogram with per-bucket metrics (bandwidth over time).
    Timeline {
        #[serde(with = "humantime_serde")]
        bucket: Duration,
        #[serde(default)]
        metrics: Vec<Metric>,
    },
    /// Largest `top_n` groups ranked by `metric`.
    TopN {
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default = "default_top_n")]
        top_n: i64,
        #[serde(default)]
        metric: Metric,
    },
    /// Allowed/denied document counts, each with its own top groups.
    Classification {
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default = "default_top_n")]
        top_n: i64,
    },
}

fn default_top_n() -> i64 {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "field", rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Count,
    Sum(String),
    Avg(String),
}

impl Metric {
    pub fn field(&self) -> Option<&str> {
        match self {
            Metric::Count => None,
            Metric::Sum(field) | Metric::Avg(field) => Some(field),
        }
    }

    /// Sub-aggregation name in the compiled query and the response.
    pub fn name(&self) -> String {
        match self {
            Metric::Count => "count".to_string(),
            Metric::Sum(field) => format!("sum_{}", field),
            Metric::Avg(field) => format!("avg_{}", field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationResponse {
    pub buckets: crate::store::AggregationResults,
    pub unresolved_fields: Vec<crate::fields::UnresolvedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub hits: Vec<Hit>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_inverted_range_rejected() {
        let to = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let from = to + chrono::Duration::seconds(1);
        assert!(matches!(
            TimeRange::new(from, to),
            Err(QueryError::InvalidTimeRange(_))
        ));
        assert!(TimeRange::new(to, to).is_ok());
    }

    #[test]
    fn test_missing_bound_rejected() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeRange::from_bounds(None, Some(t)).is_err());
        assert!(TimeRange::from_bounds(Some(t), None).is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let request: AggregationRequest = serde_json::from_value(json!({
            "from": "2024-01-01T00:00:00Z",
            "to": "2024-01-01T06:00:00Z",
            "shape": {
                "type": "top_n",
                "group_by": "sourceIP",
                "top_n": 5,
                "metric": { "op": "sum", "field": "bytes" }
            }
        }))
        .unwrap();

        match request.shape {
            AggregationShape::TopN { group_by, top_n, metric } => {
                assert_eq!(group_by.as_deref(), Some("sourceIP"));
                assert_eq!(top_n, 5);
                assert_eq!(metric, Metric::Sum("bytes".to_string()));
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_timeline_wire_format() {
        let request: AggregationRequest = serde_json::from_value(json!({
            "from": "2024-01-01T00:00:00Z",
            "to": "2024-01-01T06:00:00Z",
            "shape": { "type": "timeline", "bucket": "5m", "metrics": [ { "op": "count" } ] }
        }))
        .unwrap();

        assert_eq!(
            request.shape,
            AggregationShape::Timeline {
                bucket: Duration::from_secs(300),
                metrics: vec![Metric::Count],
            }
        );
    }

    #[test]
    fn test_search_request_defaults() {
        let request: SearchRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 50);
        assert!(request.from.is_none());
    }
}
