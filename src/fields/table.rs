use std::collections::{BTreeMap, HashMap};

pub const SOURCE_IP: &str = "sourceIP";
pub const DESTINATION_IP: &str = "destinationIP";
pub const SOURCE_PORT: &str = "sourcePort";
pub const DESTINATION_PORT: &str = "destinationPort";
pub const PROTOCOL: &str = "protocol";
pub const ACTION: &str = "action";
pub const BYTES: &str = "bytes";
pub const SENT_BYTES: &str = "sentBytes";
pub const RECEIVED_BYTES: &str = "receivedBytes";
pub const APPLICATION: &str = "application";
pub const RULE: &str = "rule";
pub const SOURCE_COUNTRY: &str = "sourceCountry";
pub const DESTINATION_COUNTRY: &str = "destinationCountry";
pub const USER: &str = "user";
pub const DEVICE: &str = "device";

/// Canonical field name -> concrete field-name variants, highest priority
/// first. Structured (ECS-style) names precede legacy flat names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl Default for FieldTable {
    fn default() -> Self {
        let builtin: &[(&str, &[&str])] = &[
            (SOURCE_IP, &["source.ip", "srcip", "src_ip"]),
            (DESTINATION_IP, &["destination.ip", "dstip", "dst_ip"]),
            (SOURCE_PORT, &["source.port", "srcport", "src_port"]),
            (DESTINATION_PORT, &["destination.port", "dstport", "dst_port"]),
            (PROTOCOL, &["network.transport", "network.protocol", "proto", "service"]),
            (ACTION, &["event.action", "fortinet.firewall.action", "action"]),
            (BYTES, &["network.bytes", "bytes", "total_bytes"]),
            (SENT_BYTES, &["source.bytes", "sentbyte", "bytes_sent"]),
            (RECEIVED_BYTES, &["destination.bytes", "rcvdbyte", "bytes_received"]),
            (APPLICATION, &["network.application", "app", "appname"]),
            (RULE, &["rule.name", "policyname", "policyid"]),
            (SOURCE_COUNTRY, &["source.geo.country_name", "srccountry"]),
            (DESTINATION_COUNTRY, &["destination.geo.country_name", "dstcountry"]),
            (USER, &["user.name", "source.user.name", "user"]),
            (DEVICE, &["observer.name", "host.name", "devname"]),
        ];

        let entries = builtin
            .iter()
            .map(|(canonical, variants)| {
                (
                    canonical.to_string(),
                    variants.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect();

        Self { entries }
    }
}

impl FieldTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Replace or add entries. An override fully replaces the built-in
    /// variant list for that canonical name.
    pub fn with_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for (canonical, variants) in overrides {
            self.entries.insert(canonical.clone(), variants.clone());
        }
        self
    }

    pub fn insert(&mut self, canonical: &str, variants: &[&str]) {
        self.entries.insert(
            canonical.to_string(),
            variants.iter().map(|v| v.to_string()).collect(),
        );
    }

    pub fn variants(&self, canonical: &str) -> Option<&[String]> {
        self.entries.get(canonical).map(Vec::as_slice)
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.entries.contains_key(canonical)
    }

    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_priority_order() {
        let table = FieldTable::default();
        let variants = table.variants(SOURCE_IP).unwrap();
        assert_eq!(variants[0], "source.ip");
        assert_eq!(variants[1], "srcip");
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let mut overrides = HashMap::new();
        overrides.insert(SOURCE_IP.to_string(), vec!["src".to_string()]);
        overrides.insert("vdom".to_string(), vec!["vd".to_string()]);

        let table = FieldTable::default().with_overrides(&overrides);
        assert_eq!(table.variants(SOURCE_IP).unwrap(), ["src".to_string()]);
        assert!(table.contains("vdom"));
        assert!(table.contains(DESTINATION_IP));
    }
}
