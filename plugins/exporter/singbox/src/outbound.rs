//! Per-protocol outbound builders.
//!
//! Every builder validates the fields its protocol cannot live without
//! and returns `None` (after a warning) when they are missing — a broken
//! server never aborts the export.

use serde_json::{Map, Value, json};

use boxflow_api::model::ParsedServer;

/// Meta keys that pass through to the outbound object verbatim.
const META_WHITELIST: &[&str] = &[
    "multiplex",
    "packet_encoding",
    "udp_over_tcp",
    "udp_relay_mode",
    "udp_fragment",
    "udp_timeout",
];

pub fn build_outbound(server: &ParsedServer) -> Option<Value> {
    let protocol = match server.protocol.as_str() {
        "ss" => "shadowsocks",
        other => other,
    };
    match protocol {
        "shadowsocks" | "vmess" | "vless" | "trojan" => generic_outbound(server, protocol),
        "wireguard" => wireguard_outbound(server),
        "hysteria2" => hysteria2_outbound(server),
        "tuic" => tuic_outbound(server),
        "shadowtls" => shadowtls_outbound(server),
        "anytls" => anytls_outbound(server),
        "tor" => tor_outbound(server),
        "ssh" => ssh_outbound(server),
        other => {
            tracing::warn!(
                protocol = other,
                address = %server.address,
                port = server.port,
                "unsupported outbound type, skipping"
            );
            None
        }
    }
}

fn skip(server: &ParsedServer, what: &str) -> Option<Value> {
    tracing::warn!(
        protocol = %server.protocol,
        address = %server.address,
        port = server.port,
        "incomplete {what} fields, skipping"
    );
    None
}

fn base(server: &ParsedServer, protocol: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("type".into(), json!(protocol));
    out.insert("tag".into(), json!(fallback_tag(server)));
    out.insert("server".into(), json!(server.address));
    out.insert("server_port".into(), json!(server.port));
    out
}

fn fallback_tag(server: &ParsedServer) -> String {
    server
        .tag
        .clone()
        .or_else(|| server.meta_str("label").map(str::to_string))
        .or_else(|| server.meta_str("name").map(str::to_string))
        .unwrap_or_else(|| server.address.clone())
}

fn generic_outbound(server: &ParsedServer, protocol: &str) -> Option<Value> {
    let mut out = base(server, protocol);

    if protocol == "shadowsocks" {
        let Some(method) = server
            .security
            .clone()
            .or_else(|| server.meta_str("cipher").map(str::to_string))
            .or_else(|| server.meta_str("method").map(str::to_string))
        else {
            return skip(server, "shadowsocks method/cipher");
        };
        out.insert("method".into(), json!(method));
        let Some(password) = &server.password else {
            return skip(server, "shadowsocks password");
        };
        out.insert("password".into(), json!(password));
    } else {
        if let Some(uuid) = &server.uuid {
            out.insert("uuid".into(), json!(uuid));
        }
        if let Some(password) = &server.password {
            out.insert("password".into(), json!(password));
        }
        if let Some(flow) = &server.flow {
            out.insert("flow".into(), json!(flow));
        }
        if protocol == "vmess" {
            // vmess carries its cipher in `security` and the legacy
            // alter-id when non-zero.
            if let Some(security) = &server.security {
                out.insert("security".into(), json!(security));
            }
            if let Some(alter_id) = server.meta.get("alter_id").and_then(Value::as_u64)
                && alter_id > 0
            {
                out.insert("alter_id".into(), json!(alter_id));
            }
        }
    }

    if let Some(transport) = transport_block(server) {
        out.insert("transport".into(), transport);
    } else if let Some(network) = server.meta_str("network")
        && matches!(network, "tcp" | "udp")
    {
        out.insert("network".into(), json!(network));
    }

    if matches!(protocol, "vless" | "vmess" | "trojan")
        && let Some(tls) = tls_block(server)
    {
        out.insert("tls".into(), tls);
    }

    for key in META_WHITELIST {
        if let Some(value) = server.meta.get(*key) {
            out.insert((*key).to_string(), value.clone());
        }
    }

    Some(Value::Object(out))
}

/// Nested `transport` object for ws/grpc networks, built from the
/// `<network>-...` meta convention.
fn transport_block(server: &ParsedServer) -> Option<Value> {
    let network = server.meta_str("network")?;
    if !matches!(network, "ws" | "grpc") {
        return None;
    }

    let mut transport = Map::new();
    transport.insert("type".into(), json!(network));
    let prefix = format!("{network}-");
    for (key, value) in &server.meta {
        if let Some(field) = key.strip_prefix(&prefix) {
            if field == "host" {
                transport.insert("headers".into(), json!({"Host": value}));
            } else {
                transport.insert(field.to_string(), value.clone());
            }
        }
    }
    Some(Value::Object(transport))
}

/// Nested `tls` object grouping TLS, REALITY and uTLS settings.
fn tls_block(server: &ParsedServer) -> Option<Value> {
    let mut tls = Map::new();

    let enabled = server.meta.get("tls").and_then(Value::as_bool).unwrap_or(false)
        || matches!(server.security.as_deref(), Some("tls" | "reality" | "xtls"));
    if enabled {
        tls.insert("enabled".into(), json!(true));
    }
    if let Some(name) = server.meta_str("servername") {
        tls.insert("server_name".into(), json!(name));
    }
    if let Some(alpn) = &server.alpn {
        tls.insert("alpn".into(), json!(alpn));
    }

    let mut reality = Map::new();
    if let Some(pbk) = server.meta_str("pbk") {
        reality.insert("public_key".into(), json!(pbk));
    }
    if let Some(sid) = server.meta_str("short_id") {
        reality.insert("short_id".into(), json!(sid));
    }
    if !reality.is_empty() {
        reality.insert("enabled".into(), json!(true));
        tls.insert("reality".into(), Value::Object(reality));
    }

    if let Some(fp) = server.meta_str("fp") {
        tls.insert("utls".into(), json!({"enabled": true, "fingerprint": fp}));
    }

    if tls.is_empty() { None } else { Some(Value::Object(tls)) }
}

fn wireguard_outbound(server: &ParsedServer) -> Option<Value> {
    let (Some(private_key), Some(peer_public_key), Some(local_address)) = (
        &server.private_key,
        &server.peer_public_key,
        server.local_address.as_ref().filter(|a| !a.is_empty()),
    ) else {
        return skip(server, "wireguard");
    };

    let mut out = base(server, "wireguard");
    out.insert("private_key".into(), json!(private_key));
    out.insert("peer_public_key".into(), json!(peer_public_key));
    out.insert("local_address".into(), json!(local_address));
    if let Some(psk) = &server.pre_shared_key {
        out.insert("pre_shared_key".into(), json!(psk));
    }
    if let Some(mtu) = server.mtu {
        out.insert("mtu".into(), json!(mtu));
    }
    if let Some(keepalive) = server.keepalive {
        out.insert("keepalive".into(), json!(keepalive));
    }
    Some(Value::Object(out))
}

fn hysteria2_outbound(server: &ParsedServer) -> Option<Value> {
    let Some(password) = &server.password else {
        return skip(server, "hysteria2");
    };
    let mut out = base(server, "hysteria2");
    out.insert("password".into(), json!(password));
    if let Some(obfs) = &server.obfs {
        out.insert("obfs".into(), obfs.clone());
    }
    if let Some(tls) = tls_block(server) {
        out.insert("tls".into(), tls);
    } else if let Some(tls) = &server.tls {
        out.insert("tls".into(), tls.clone());
    }
    Some(Value::Object(out))
}

fn tuic_outbound(server: &ParsedServer) -> Option<Value> {
    let (Some(uuid), Some(password)) = (&server.uuid, &server.password) else {
        return skip(server, "tuic");
    };
    let mut out = base(server, "tuic");
    out.insert("uuid".into(), json!(uuid));
    out.insert("password".into(), json!(password));
    if let Some(cc) = &server.congestion_control {
        out.insert("congestion_control".into(), json!(cc));
    }
    if let Some(mode) = server.meta.get("udp_relay_mode") {
        out.insert("udp_relay_mode".into(), mode.clone());
    }
    if let Some(alpn) = &server.alpn {
        out.insert("alpn".into(), json!(alpn));
    }
    if let Some(tls) = tls_block(server) {
        out.insert("tls".into(), tls);
    } else if let Some(tls) = &server.tls {
        out.insert("tls".into(), tls.clone());
    }
    Some(Value::Object(out))
}

fn shadowtls_outbound(server: &ParsedServer) -> Option<Value> {
    let (Some(password), Some(version)) = (&server.password, server.version) else {
        return skip(server, "shadowtls");
    };
    let mut out = base(server, "shadowtls");
    out.insert("password".into(), json!(password));
    out.insert("version".into(), json!(version));
    if let Some(handshake) = &server.handshake {
        out.insert("handshake".into(), handshake.clone());
    }
    if let Some(tls) = &server.tls {
        out.insert("tls".into(), tls.clone());
    }
    Some(Value::Object(out))
}

fn anytls_outbound(server: &ParsedServer) -> Option<Value> {
    let Some(uuid) = &server.uuid else {
        return skip(server, "anytls");
    };
    let mut out = base(server, "anytls");
    out.insert("uuid".into(), json!(uuid));
    if let Some(tls) = &server.tls {
        out.insert("tls".into(), tls.clone());
    }
    Some(Value::Object(out))
}

fn tor_outbound(server: &ParsedServer) -> Option<Value> {
    Some(Value::Object(base(server, "tor")))
}

fn ssh_outbound(server: &ParsedServer) -> Option<Value> {
    let Some(username) = &server.username else {
        return skip(server, "ssh");
    };
    let mut out = base(server, "ssh");
    out.insert("user".into(), json!(username));
    if let Some(password) = &server.password {
        out.insert("password".into(), json!(password));
    }
    if let Some(key) = &server.private_key {
        out.insert("private_key".into(), json!(key));
    }
    Some(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowsocks_requires_method_and_password() {
        let mut server = ParsedServer::new("ss", "1.2.3.4", 8388);
        assert!(build_outbound(&server).is_none());
        server.security = Some("aes-256-gcm".into());
        assert!(build_outbound(&server).is_none());
        server.password = Some("pw".into());
        let out = build_outbound(&server).unwrap();
        assert_eq!(out["type"], json!("shadowsocks"));
        assert_eq!(out["method"], json!("aes-256-gcm"));
    }

    #[test]
    fn vless_groups_tls_reality_utls() {
        let mut server = ParsedServer::new("vless", "v.example.com", 443);
        server.uuid = Some("u".into());
        server.security = Some("reality".into());
        server.set_meta("servername", "cdn.example.org");
        server.set_meta("pbk", "PBK");
        server.set_meta("short_id", "ab");
        server.set_meta("fp", "chrome");
        let out = build_outbound(&server).unwrap();
        let tls = &out["tls"];
        assert_eq!(tls["enabled"], json!(true));
        assert_eq!(tls["server_name"], json!("cdn.example.org"));
        assert_eq!(tls["reality"]["public_key"], json!("PBK"));
        assert_eq!(tls["reality"]["short_id"], json!("ab"));
        assert_eq!(tls["utls"]["fingerprint"], json!("chrome"));
    }

    #[test]
    fn ws_transport_nested() {
        let mut server = ParsedServer::new("vmess", "vm.example.com", 443);
        server.uuid = Some("u".into());
        server.set_meta("network", "ws");
        server.set_meta("ws-path", "/tunnel");
        server.set_meta("ws-host", "vm.example.com");
        let out = build_outbound(&server).unwrap();
        assert_eq!(out["transport"]["type"], json!("ws"));
        assert_eq!(out["transport"]["path"], json!("/tunnel"));
        assert_eq!(out["transport"]["headers"]["Host"], json!("vm.example.com"));
    }

    #[test]
    fn wireguard_missing_fields_skipped() {
        let mut server = ParsedServer::new("wireguard", "wg.example.com", 51820);
        server.private_key = Some("priv".into());
        assert!(build_outbound(&server).is_none());
        server.peer_public_key = Some("pub".into());
        server.local_address = Some(vec!["10.0.0.2/32".into()]);
        let out = build_outbound(&server).unwrap();
        assert_eq!(out["local_address"], json!(["10.0.0.2/32"]));
    }

    #[test]
    fn tag_falls_back_to_address() {
        let mut server = ParsedServer::new("tor", "t.example.com", 9050);
        assert_eq!(build_outbound(&server).unwrap()["tag"], json!("t.example.com"));
        server.tag = Some("named".into());
        assert_eq!(build_outbound(&server).unwrap()["tag"], json!("named"));
    }

    #[test]
    fn unknown_type_skipped() {
        let server = ParsedServer::new("warp", "x", 1);
        assert!(build_outbound(&server).is_none());
    }
}
