use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One end of a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum Bound {
    Inclusive(DateTime<Utc>),
    Exclusive(DateTime<Utc>),
    Unbounded,
}

impl Bound {
    fn admits_above(&self, ts: DateTime<Utc>) -> bool {
        match *self {
            Bound::Inclusive(b) => ts >= b,
            Bound::Exclusive(b) => ts > b,
            Bound::Unbounded => true,
        }
    }

    fn admits_below(&self, ts: DateTime<Utc>) -> bool {
        match *self {
            Bound::Inclusive(b) => ts <= b,
            Bound::Exclusive(b) => ts < b,
            Bound::Unbounded => true,
        }
    }
}

/// Event-time window a query is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub lower: Bound,
    pub upper: Bound,
}

impl TimeWindow {
    /// `[from, to]`, used by ad-hoc search and aggregation.
    pub fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            lower: Bound::Inclusive(from),
            upper: Bound::Inclusive(to),
        }
    }

    /// `(after, until]`, used by the poller so the boundary record is never
    /// delivered twice.
    pub fn after(after: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            lower: Bound::Exclusive(after),
            upper: Bound::Inclusive(until),
        }
    }

    /// `(-inf, until]`, used for the subscribe backfill.
    pub fn up_to(until: DateTime<Utc>) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Inclusive(until),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.lower.admits_above(ts) && self.upper.admits_below(ts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub time_field: String,
    pub window: TimeWindow,
    /// Free-text query in the store's query-string syntax.
    pub text: Option<String>,
    pub sort: SortOrder,
    pub offset: usize,
    pub limit: usize,
}

impl SearchQuery {
    /// Newest-first page of documents inside `window`.
    pub fn newest_first(time_field: &str, window: TimeWindow, limit: usize) -> Self {
        Self {
            time_field: time_field.to_string(),
            window,
            text: None,
            sort: SortOrder::Desc,
            offset: 0,
            limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub total: u64,
    pub hits: Vec<Hit>,
}

/// A raw document as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub index: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: serde_json::Value,
}

/// Compiled aggregation tree, executed as-is by a [`super::DocumentStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationQuery {
    pub time_field: String,
    pub window: TimeWindow,
    pub aggregations: BTreeMap<String, Aggregation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    /// Fixed-width buckets over the query's time field, extended to cover
    /// `[bounds_from, bounds_to]` even where no documents fall.
    DateHistogram {
        #[serde(with = "humantime_serde")]
        interval: Duration,
        bounds_from: DateTime<Utc>,
        bounds_to: DateTime<Utc>,
        aggregations: BTreeMap<String, Aggregation>,
    },
    Terms {
        field: String,
        size: usize,
        order: TermsOrder,
        aggregations: BTreeMap<String, Aggregation>,
    },
    /// Single bucket of documents whose `field` is one of `values`.
    Filter {
        field: String,
        values: Vec<String>,
        aggregations: BTreeMap<String, Aggregation>,
    },
    Sum {
        field: String,
    },
    Avg {
        field: String,
    },
}

/// Terms bucket ordering. Always descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum TermsOrder {
    DocCount,
    /// Order by the named sibling sub-aggregation's value.
    Metric { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateResult {
    Buckets {
        buckets: Vec<Bucket>,
    },
    Filter {
        doc_count: u64,
        children: BTreeMap<String, AggregateResult>,
    },
    Metric {
        value: Option<f64>,
    },
}

impl AggregateResult {
    pub fn buckets(&self) -> Option<&[Bucket]> {
        match self {
            AggregateResult::Buckets { buckets } => Some(buckets),
            _ => None,
        }
    }

    pub fn doc_count(&self) -> Option<u64> {
        match self {
            AggregateResult::Filter { doc_count, .. } => Some(*doc_count),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            AggregateResult::Metric { value } => *value,
            _ => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<&AggregateResult> {
        match self {
            AggregateResult::Filter { children, .. } => children.get(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_as_time: Option<DateTime<Utc>>,
    pub doc_count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, AggregateResult>,
}

impl Bucket {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.children.get(name).and_then(AggregateResult::value)
    }
}

pub type AggregationResults = BTreeMap<String, AggregateResult>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_poll_window_excludes_lower_boundary() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(3);
        let window = TimeWindow::after(t0, t1);

        assert!(!window.contains(t0));
        assert!(window.contains(t0 + chrono::Duration::milliseconds(1)));
        assert!(window.contains(t1));
        assert!(!window.contains(t1 + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn test_closed_window_includes_both_ends() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::closed(t0, t0);
        assert!(window.contains(t0));
    }

    #[test]
    fn test_up_to_window_is_unbounded_below() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::up_to(t0);
        assert!(window.contains(t0 - chrono::Duration::days(3650)));
        assert!(!window.contains(t0 + chrono::Duration::seconds(1)));
    }
}
