//! sing-box configuration exporter.
//!
//! Emits `outbounds` + `route` (+ `inbounds` when a client profile with
//! listeners is given). Modern dialect emits no special outbounds; the
//! legacy dialect (< 1.11.0) adds `direct`, `block` and `dns-out`.

mod outbound;

pub use outbound::build_outbound;

use std::collections::HashSet;

use serde_json::{Map, Value, json};

use boxflow_api::error::PluginError;
use boxflow_api::exporter::{ExportOptions, Exporter};
use boxflow_api::model::{ParsedServer, PipelineContext};
use boxflow_api::profile::ClientProfile;
use boxflow_api::routing::RouteRules;

pub const NAME: &str = "singbox";

/// Tag of the synthetic urltest selector aggregating all proxies.
pub const AUTO_TAG: &str = "auto";

pub struct SingboxExporter;

impl SingboxExporter {
    fn unique_tag(tag: String, used: &mut HashSet<String>) -> String {
        if used.insert(tag.clone()) {
            return tag;
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{tag} ({counter})");
            if used.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }
}

impl Exporter for SingboxExporter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn export(
        &self,
        servers: &[ParsedServer],
        routes: &RouteRules,
        client_profile: Option<&ClientProfile>,
        opts: &ExportOptions,
        ctx: &mut PipelineContext,
    ) -> Result<Value, PluginError> {
        let use_legacy = opts.use_legacy();
        if use_legacy && let Some(version) = opts.version.as_deref() {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                version,
                "using legacy outbounds for sing-box compatibility"
            );
        }

        let excluded: HashSet<&str> = client_profile
            .map(|p| p.exclude_outbounds.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut used_tags = HashSet::new();
        let mut outbounds = Vec::new();
        let mut proxy_tags = Vec::new();
        let mut skipped = 0usize;

        for server in servers {
            let Some(mut out) = build_outbound(server) else {
                skipped += 1;
                continue;
            };
            let tag = out
                .get("tag")
                .and_then(Value::as_str)
                .unwrap_or(&server.address)
                .to_string();
            let tag = Self::unique_tag(tag, &mut used_tags);
            out["tag"] = json!(tag);
            proxy_tags.push(tag);
            outbounds.push(out);
        }

        if skipped > 0 {
            tracing::warn!(
                trace_id = %ctx.trace_id,
                skipped,
                emitted = outbounds.len(),
                "some servers were skipped during export"
            );
        }

        // Synthetic urltest selector over all concrete proxies.
        let auto_excluded =
            excluded.contains("urltest") || excluded.contains("selector") || excluded.contains(AUTO_TAG);
        if !proxy_tags.is_empty() && !auto_excluded {
            let tag = Self::unique_tag(AUTO_TAG.to_string(), &mut used_tags);
            outbounds.push(json!({
                "type": "urltest",
                "tag": tag,
                "outbounds": proxy_tags,
            }));
        }

        if use_legacy {
            for (kind, tag) in [("direct", "direct"), ("block", "block"), ("dns", "dns-out")] {
                if used_tags.insert(tag.to_string()) {
                    outbounds.push(json!({"type": kind, "tag": tag}));
                }
            }
        }

        let final_tag = client_profile
            .and_then(ClientProfile::final_route)
            .map(str::to_string)
            .or_else(|| routes.final_tag.clone())
            .unwrap_or_else(|| AUTO_TAG.to_string());

        let mut config = Map::new();
        config.insert("outbounds".into(), Value::Array(outbounds));
        config.insert(
            "route".into(),
            json!({"rules": routes.rules, "final": final_tag}),
        );

        if let Some(profile) = client_profile
            && !profile.inbounds.is_empty()
        {
            config.insert("inbounds".into(), Value::Array(build_inbounds(profile)?));
        }

        Ok(Value::Object(config))
    }
}

fn build_inbounds(profile: &ClientProfile) -> Result<Vec<Value>, PluginError> {
    let mut inbounds = Vec::new();
    for inbound in &profile.inbounds {
        inbound.validate()?;
        let mut obj = Map::new();
        obj.insert("type".into(), serde_json::to_value(inbound.inbound_type)?);
        obj.insert("listen".into(), json!(inbound.listen));
        if let Some(port) = inbound.effective_port() {
            obj.insert("listen_port".into(), json!(port));
        }
        for (key, value) in &inbound.options {
            if key == "allow_external" {
                continue;
            }
            obj.insert(key.clone(), value.clone());
        }
        inbounds.push(Value::Object(obj));
    }
    Ok(inbounds)
}

pub fn create(_config: &Value) -> Result<Box<dyn Exporter>, PluginError> {
    Ok(Box::new(SingboxExporter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxflow_api::profile::{InboundProfile, InboundType};

    fn ss(addr: &str, tag: &str) -> ParsedServer {
        let mut s = ParsedServer::new("ss", addr, 8388);
        s.security = Some("aes-256-gcm".into());
        s.password = Some("pw".into());
        s.tag = Some(tag.into());
        s
    }

    fn vmess(addr: &str) -> ParsedServer {
        ParsedServer::new("vmess", addr, 443)
    }

    fn modern_routes() -> RouteRules {
        RouteRules {
            rules: vec![json!({"protocol": "dns", "action": "hijack-dns"})],
            final_tag: Some(AUTO_TAG.to_string()),
        }
    }

    fn export(
        servers: &[ParsedServer],
        profile: Option<&ClientProfile>,
        opts: &ExportOptions,
    ) -> Value {
        let mut ctx = PipelineContext::new();
        SingboxExporter
            .export(servers, &modern_routes(), profile, opts, &mut ctx)
            .unwrap()
    }

    fn types_of(config: &Value) -> Vec<&str> {
        config["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["type"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn two_servers_emit_three_outbounds_with_auto_final() {
        let config = export(
            &[ss("example.com", "tag1"), vmess("ex.com")],
            None,
            &ExportOptions::default(),
        );
        let outbounds = config["outbounds"].as_array().unwrap();
        assert_eq!(outbounds.len(), 3);
        assert_eq!(outbounds[2]["type"], json!("urltest"));
        assert_eq!(outbounds[2]["tag"], json!(AUTO_TAG));
        assert_eq!(
            outbounds[2]["outbounds"],
            json!(["tag1", "ex.com"])
        );
        assert_eq!(config["route"]["final"], json!(AUTO_TAG));
    }

    #[test]
    fn modern_dialect_has_no_special_outbounds() {
        let config = export(&[ss("a.example.com", "a")], None, &ExportOptions::default());
        for t in types_of(&config) {
            assert!(!matches!(t, "direct" | "block" | "dns"));
        }
    }

    #[test]
    fn legacy_dialect_emits_special_trio() {
        let config = export(
            &[ss("a.example.com", "a")],
            None,
            &ExportOptions::for_version("1.10.0"),
        );
        let types = types_of(&config);
        for t in ["direct", "block", "dns"] {
            assert!(types.contains(&t), "missing {t} in {types:?}");
        }
    }

    #[test]
    fn excluded_types_never_emitted() {
        let mut profile = ClientProfile::default();
        profile.exclude_outbounds = vec!["vmess".to_string()];
        // The outbound filter runs earlier in the real pipeline; the
        // exporter itself must still never list excluded tags in auto.
        let servers = vec![ss("a.example.com", "a")];
        let config = export(&servers, Some(&profile), &ExportOptions::default());
        let types = types_of(&config);
        assert!(!types.contains(&"vmess"));
        let auto = config["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|o| o["type"] == json!("urltest"))
            .unwrap();
        assert_eq!(auto["outbounds"], json!(["a"]));
    }

    #[test]
    fn client_final_override_wins() {
        let mut profile = ClientProfile::default();
        profile.routing.insert("final".into(), json!("block"));
        let config = export(&[ss("a.example.com", "a")], Some(&profile), &ExportOptions::default());
        assert_eq!(config["route"]["final"], json!("block"));
    }

    #[test]
    fn emitted_tags_are_unique() {
        let config = export(
            &[ss("a.example.com", "dup"), ss("b.example.com", "dup")],
            None,
            &ExportOptions::default(),
        );
        let tags: Vec<_> = config["outbounds"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["tag"].as_str().unwrap().to_string())
            .collect();
        let unique: HashSet<_> = tags.iter().collect();
        assert_eq!(tags.len(), unique.len());
        assert!(tags.contains(&"dup (2)".to_string()));
    }

    #[test]
    fn incomplete_server_skipped_not_fatal() {
        let broken = ParsedServer::new("wireguard", "wg.example.com", 51820);
        let config = export(
            &[ss("a.example.com", "a"), broken],
            None,
            &ExportOptions::default(),
        );
        // One proxy plus the selector.
        assert_eq!(config["outbounds"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn inbounds_emitted_for_client_profile() {
        let mut profile = ClientProfile::default();
        let mut socks = InboundProfile::new(InboundType::Socks);
        socks.port = Some(10808);
        profile.inbounds.push(socks);

        let config = export(&[ss("a.example.com", "a")], Some(&profile), &ExportOptions::default());
        let inbounds = config["inbounds"].as_array().unwrap();
        assert_eq!(inbounds.len(), 1);
        assert_eq!(inbounds[0]["type"], json!("socks"));
        assert_eq!(inbounds[0]["listen"], json!("127.0.0.1"));
        assert_eq!(inbounds[0]["listen_port"], json!(10808));
    }

    #[test]
    fn invalid_inbound_fails_export() {
        let mut profile = ClientProfile::default();
        let mut tun = InboundProfile::new(InboundType::Tun);
        tun.listen = "0.0.0.0".into();
        profile.inbounds.push(tun);

        let mut ctx = PipelineContext::new();
        let err = SingboxExporter
            .export(
                &[ss("a.example.com", "a")],
                &modern_routes(),
                Some(&profile),
                &ExportOptions::default(),
                &mut ctx,
            )
            .unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::Export);
    }

    #[test]
    fn empty_server_list_emits_no_auto() {
        let config = export(&[], None, &ExportOptions::default());
        assert!(config["outbounds"].as_array().unwrap().is_empty());
    }
}
