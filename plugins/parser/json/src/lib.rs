//! JSON subscription parser.
//!
//! Accepts two shapes: a sing-box-like document `{"outbounds": [...]}` and
//! a bare array of outbound objects. Synthetic outbounds (selectors and
//! the legacy direct/block/dns trio) are infrastructure, not servers, and
//! are skipped silently.

use serde_json::Value;

use boxflow_api::error::PluginError;
use boxflow_api::model::{ParsedServer, PipelineContext, PipelineError};
use boxflow_api::parser::Parser;

pub const NAME: &str = "json";

const SYNTHETIC_TYPES: &[&str] = &["urltest", "selector", "direct", "block", "dns"];

pub struct JsonParser;

impl Parser for JsonParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn parse(
        &self,
        raw: &[u8],
        ctx: &mut PipelineContext,
    ) -> Result<Vec<ParsedServer>, PluginError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            if ctx.mode.is_strict() {
                return Err(PluginError::parse("empty subscription body"));
            }
            return Ok(Vec::new());
        }

        let doc: Value = serde_json::from_slice(raw)
            .map_err(|e| PluginError::parse(format!("invalid JSON subscription: {e}")))?;

        let entries = match &doc {
            Value::Object(obj) => obj
                .get("outbounds")
                .and_then(Value::as_array)
                .ok_or_else(|| PluginError::parse("JSON object has no 'outbounds' array"))?,
            Value::Array(list) => list,
            _ => return Err(PluginError::parse("JSON subscription must be an object or array")),
        };

        let mut servers = Vec::new();
        for (idx, entry) in entries.iter().enumerate() {
            match coerce_outbound(entry) {
                Ok(Some(server)) => servers.push(server),
                Ok(None) => {} // synthetic outbound
                Err(e) if ctx.mode.is_strict() => {
                    return Err(e.with_context(format!("outbound {idx}")));
                }
                Err(e) => {
                    ctx.push_error(
                        PipelineError::from_plugin(NAME, e).with("outbound", idx as u64),
                    );
                }
            }
        }
        Ok(servers)
    }
}

/// Coerce one sing-box outbound object into a server record.
/// Returns `Ok(None)` for synthetic outbounds.
fn coerce_outbound(entry: &Value) -> Result<Option<ParsedServer>, PluginError> {
    let obj = entry
        .as_object()
        .ok_or_else(|| PluginError::parse("outbound is not an object"))?;

    let out_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::parse("outbound missing 'type'"))?;
    if SYNTHETIC_TYPES.contains(&out_type) {
        return Ok(None);
    }

    let address = obj
        .get("server")
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::parse(format!("{out_type} outbound missing 'server'")))?;
    let port = obj
        .get("server_port")
        .or_else(|| obj.get("port"))
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| PluginError::parse(format!("{out_type} outbound missing valid port")))?;

    let mut server = ParsedServer::new(out_type, address, port);
    server.tag = obj.get("tag").and_then(Value::as_str).map(str::to_string);

    for (key, value) in obj {
        match key.as_str() {
            "type" | "server" | "server_port" | "port" | "tag" => {}
            "method" | "security" => server.security = value.as_str().map(str::to_string),
            "uuid" => server.uuid = value.as_str().map(str::to_string),
            "password" => server.password = value.as_str().map(str::to_string),
            "flow" => server.flow = value.as_str().map(str::to_string),
            "username" => server.username = value.as_str().map(str::to_string),
            "private_key" => server.private_key = value.as_str().map(str::to_string),
            "peer_public_key" => server.peer_public_key = value.as_str().map(str::to_string),
            "pre_shared_key" => server.pre_shared_key = value.as_str().map(str::to_string),
            "local_address" => {
                server.local_address = value.as_array().map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                });
            }
            "mtu" => server.mtu = value.as_u64().and_then(|v| u32::try_from(v).ok()),
            "keepalive" => server.keepalive = value.as_u64().and_then(|v| u32::try_from(v).ok()),
            "version" => server.version = value.as_u64().and_then(|v| u8::try_from(v).ok()),
            "congestion_control" => {
                server.congestion_control = value.as_str().map(str::to_string)
            }
            "handshake" => server.handshake = Some(value.clone()),
            "obfs" => server.obfs = Some(value.clone()),
            "network" => {
                server.set_meta("network", value.clone());
            }
            "tls" => apply_tls(&mut server, value),
            "transport" => apply_transport(&mut server, value),
            other => {
                server.meta.insert(other.to_string(), value.clone());
            }
        }
    }

    Ok(Some(server))
}

fn apply_tls(server: &mut ParsedServer, tls: &Value) {
    let Some(tls) = tls.as_object() else {
        server.tls = Some(tls.clone());
        return;
    };
    if tls.get("enabled").and_then(Value::as_bool).unwrap_or(false) {
        server.set_meta("tls", true);
    }
    if let Some(name) = tls.get("server_name").and_then(Value::as_str) {
        server.set_meta("servername", name);
    }
    if let Some(alpn) = tls.get("alpn").and_then(Value::as_array) {
        server.alpn = Some(
            alpn.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        );
    }
    if let Some(reality) = tls.get("reality").and_then(Value::as_object) {
        if let Some(pbk) = reality.get("public_key").and_then(Value::as_str) {
            server.set_meta("pbk", pbk);
        }
        if let Some(sid) = reality.get("short_id").and_then(Value::as_str) {
            server.set_meta("short_id", sid);
        }
    }
    if let Some(utls) = tls.get("utls").and_then(Value::as_object)
        && let Some(fp) = utls.get("fingerprint").and_then(Value::as_str)
    {
        server.set_meta("fp", fp);
    }
}

fn apply_transport(server: &mut ParsedServer, transport: &Value) {
    let Some(transport) = transport.as_object() else {
        return;
    };
    let Some(kind) = transport.get("type").and_then(Value::as_str) else {
        return;
    };
    server.set_meta("network", kind);
    for (key, value) in transport {
        match key.as_str() {
            "type" => {}
            "headers" => {
                if let Some(host) = value
                    .as_object()
                    .and_then(|h| h.get("Host").or_else(|| h.get("host")))
                    .and_then(Value::as_str)
                {
                    server.set_meta(format!("{kind}-host"), host);
                }
            }
            other => {
                server.meta.insert(format!("{kind}-{other}"), value.clone());
            }
        }
    }
}

pub fn create(_config: &serde_json::Value) -> Result<Box<dyn Parser>, PluginError> {
    Ok(Box::new(JsonParser))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxflow_api::model::PipelineMode;
    use serde_json::json;

    fn ctx(mode: PipelineMode) -> PipelineContext {
        PipelineContext::new().with_mode(mode)
    }

    #[test]
    fn parses_outbounds_document() {
        let doc = json!({
            "outbounds": [
                {"type": "shadowsocks", "tag": "ss-1", "server": "1.2.3.4", "server_port": 8388,
                 "method": "aes-256-gcm", "password": "pw"},
                {"type": "urltest", "tag": "auto", "outbounds": ["ss-1"]},
                {"type": "vless", "tag": "v", "server": "v.example.com", "server_port": 443,
                 "uuid": "u-u-i-d",
                 "tls": {"enabled": true, "server_name": "v.example.com",
                          "reality": {"public_key": "PBK", "short_id": "ab"},
                          "utls": {"enabled": true, "fingerprint": "chrome"}},
                 "transport": {"type": "ws", "path": "/ws", "headers": {"Host": "v.example.com"}}}
            ]
        });
        let servers = JsonParser
            .parse(doc.to_string().as_bytes(), &mut ctx(PipelineMode::Tolerant))
            .unwrap();
        assert_eq!(servers.len(), 2);

        let ss = &servers[0];
        assert_eq!(ss.protocol, "shadowsocks");
        assert_eq!(ss.security.as_deref(), Some("aes-256-gcm"));
        assert_eq!(ss.password.as_deref(), Some("pw"));

        let vless = &servers[1];
        assert_eq!(vless.meta_str("servername"), Some("v.example.com"));
        assert_eq!(vless.meta_str("pbk"), Some("PBK"));
        assert_eq!(vless.meta_str("fp"), Some("chrome"));
        assert_eq!(vless.meta_str("network"), Some("ws"));
        assert_eq!(vless.meta_str("ws-path"), Some("/ws"));
        assert_eq!(vless.meta_str("ws-host"), Some("v.example.com"));
    }

    #[test]
    fn bare_array_accepted() {
        let doc = json!([
            {"type": "trojan", "server": "t.example.com", "server_port": 443, "password": "pw"}
        ]);
        let servers = JsonParser
            .parse(doc.to_string().as_bytes(), &mut ctx(PipelineMode::Strict))
            .unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].protocol, "trojan");
    }

    #[test]
    fn broken_entry_tolerant_vs_strict() {
        let doc = json!({"outbounds": [
            {"type": "vmess", "server": "ok.example.com", "server_port": 443, "uuid": "u"},
            {"type": "vmess", "server_port": 443}
        ]});
        let raw = doc.to_string();

        let mut tolerant = ctx(PipelineMode::Tolerant);
        let servers = JsonParser.parse(raw.as_bytes(), &mut tolerant).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(tolerant.errors().len(), 1);

        assert!(JsonParser.parse(raw.as_bytes(), &mut ctx(PipelineMode::Strict)).is_err());
    }

    #[test]
    fn wireguard_fields_coerced() {
        let doc = json!([{
            "type": "wireguard", "server": "wg.example.com", "server_port": 51820,
            "private_key": "priv", "peer_public_key": "pub",
            "local_address": ["10.0.0.2/32"], "mtu": 1408, "keepalive": 25
        }]);
        let servers = JsonParser
            .parse(doc.to_string().as_bytes(), &mut ctx(PipelineMode::Strict))
            .unwrap();
        let wg = &servers[0];
        assert_eq!(wg.private_key.as_deref(), Some("priv"));
        assert_eq!(wg.peer_public_key.as_deref(), Some("pub"));
        assert_eq!(wg.local_address.as_ref().unwrap().len(), 1);
        assert_eq!(wg.mtu, Some(1408));
    }

    #[test]
    fn not_json_is_parse_error() {
        let err = JsonParser
            .parse(b"proxies:\n  - name: x", &mut ctx(PipelineMode::Tolerant))
            .unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::Parse);
    }
}
