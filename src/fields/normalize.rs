use super::table::FieldTable;
use crate::store::document::lookup_present;
use serde_json::Value;
use std::collections::BTreeMap;

/// Map a raw document onto canonical field names.
///
/// Unlike index-level resolution this looks at one document at a time, so a
/// mixed batch from several device generations still presents uniformly.
pub fn normalize(document: &Value, table: &FieldTable) -> BTreeMap<String, Value> {
    table
        .canonical_names()
        .filter_map(|canonical| {
            let variants = table.variants(canonical)?;
            variants
                .iter()
                .find_map(|variant| lookup_present(document, variant))
                .map(|value| (canonical.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::table::{ACTION, BYTES, SOURCE_IP};
    use serde_json::json;

    #[test]
    fn test_normalize_mixed_schemas() {
        let table = FieldTable::default();
        let structured = json!({"source": {"ip": "10.0.0.1"}, "event": {"action": "deny"}});
        let legacy = json!({"srcip": "10.0.0.2", "action": "accept", "bytes": 512});

        let a = normalize(&structured, &table);
        let b = normalize(&legacy, &table);

        assert_eq!(a[SOURCE_IP], "10.0.0.1");
        assert_eq!(a[ACTION], "deny");
        assert!(!a.contains_key(BYTES));
        assert_eq!(b[SOURCE_IP], "10.0.0.2");
        assert_eq!(b[BYTES], 512);
    }

    #[test]
    fn test_structured_variant_preferred_within_document() {
        let table = FieldTable::default();
        let doc = json!({"source": {"ip": "10.0.0.1"}, "srcip": "192.168.0.1"});
        assert_eq!(normalize(&doc, &table)[SOURCE_IP], "10.0.0.1");
    }
}
