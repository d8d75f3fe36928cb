//! Custom enrichment: profile-declared rules over server metadata.
//!
//! Rules are carried in the middleware config (usually via
//! `profile.metadata["enrich"].custom_rules`) and applied in order:
//!
//! ```json
//! [
//!   {"op": "set", "key": "tier", "value": "premium", "protocol": "vless"},
//!   {"op": "copy", "from": "servername", "to": "display_host"}
//! ]
//! ```

use serde_json::Value;

use boxflow_api::model::ParsedServer;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CustomRule {
    /// Set a meta key to a fixed value, optionally only for one protocol.
    Set {
        key: String,
        value: Value,
        #[serde(default)]
        protocol: Option<String>,
    },
    /// Copy one meta key to another; missing sources are a no-op.
    Copy { from: String, to: String },
    /// Remove a meta key.
    Drop { key: String },
}

pub struct CustomEnricher;

impl CustomEnricher {
    pub fn enrich(&self, server: &mut ParsedServer, rules: &[CustomRule]) {
        for rule in rules {
            match rule {
                CustomRule::Set { key, value, protocol } => {
                    if protocol
                        .as_deref()
                        .is_none_or(|p| p.eq_ignore_ascii_case(&server.protocol))
                    {
                        server.meta.insert(key.clone(), value.clone());
                    }
                }
                CustomRule::Copy { from, to } => {
                    if let Some(value) = server.meta.get(from).cloned() {
                        server.meta.insert(to.clone(), value);
                    }
                }
                CustomRule::Drop { key } => {
                    server.meta.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules(raw: Value) -> Vec<CustomRule> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn set_respects_protocol_filter() {
        let rules = rules(json!([
            {"op": "set", "key": "tier", "value": "premium", "protocol": "vless"}
        ]));
        let mut vless = ParsedServer::new("vless", "a", 443);
        let mut ss = ParsedServer::new("ss", "b", 443);
        CustomEnricher.enrich(&mut vless, &rules);
        CustomEnricher.enrich(&mut ss, &rules);
        assert_eq!(vless.meta["tier"], json!("premium"));
        assert!(!ss.meta.contains_key("tier"));
    }

    #[test]
    fn copy_and_drop() {
        let rules = rules(json!([
            {"op": "copy", "from": "servername", "to": "display_host"},
            {"op": "drop", "key": "servername"}
        ]));
        let mut server = ParsedServer::new("trojan", "t", 443);
        server.set_meta("servername", "sni.example.com");
        CustomEnricher.enrich(&mut server, &rules);
        assert_eq!(server.meta["display_host"], json!("sni.example.com"));
        assert!(!server.meta.contains_key("servername"));
    }

    #[test]
    fn copy_of_missing_source_is_noop() {
        let rules = rules(json!([{"op": "copy", "from": "nope", "to": "dest"}]));
        let mut server = ParsedServer::new("ss", "s", 443);
        CustomEnricher.enrich(&mut server, &rules);
        assert!(!server.meta.contains_key("dest"));
    }

    #[test]
    fn unknown_op_fails_deserialization() {
        assert!(
            serde_json::from_value::<Vec<CustomRule>>(json!([{"op": "explode"}])).is_err()
        );
    }
}
