use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Look up a dotted field path in a document.
///
/// Shippers disagree on whether `source.ip` is a nested object or a literal
/// key containing a dot, so both shapes are tried: the literal key first, then
/// every split of the path into a key prefix and a nested remainder.
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let object = document.as_object()?;

    if let Some(value) = object.get(path) {
        return Some(value);
    }

    let mut search_from = 0;
    while let Some(pos) = path[search_from..].find('.') {
        let split = search_from + pos;
        let (head, rest) = (&path[..split], &path[split + 1..]);
        if let Some(child) = object.get(head) {
            if let Some(found) = lookup(child, rest) {
                return Some(found);
            }
        }
        search_from = split + 1;
    }

    None
}

/// Like [`lookup`], but treats an explicit `null` as absent.
pub fn lookup_present<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    lookup(document, path).filter(|v| !v.is_null())
}

/// Interpret a field value as an event timestamp.
///
/// Accepts RFC 3339 strings and epoch milliseconds (number or numeric string).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(from_epoch_millis)),
        Value::Number(n) => n.as_i64().and_then(from_epoch_millis),
        _ => None,
    }
}

fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Numeric view of a field value, used by sum/avg metrics.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String view of a field value, used as a terms bucket key and for filter
/// membership.
pub fn as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
