//! Security enrichment: encryption level, port classification, known
//! protocol weaknesses and recommended settings.

use serde_json::{Value, json};

use boxflow_api::model::ParsedServer;

const WEAK_CIPHERS: &[&str] = &["rc4", "rc4-md5", "none", "plain", "table", "bf-cfb"];

pub struct SecurityEnricher;

impl SecurityEnricher {
    pub fn enrich(&self, server: &mut ParsedServer) {
        let info = json!({
            "encryption": encryption_level(server),
            "port_class": port_class(server.port),
            "vulnerabilities": vulnerabilities(server),
            "recommended": recommendations(server),
        });
        server.set_meta("security", info);
    }
}

fn has_tls(server: &ParsedServer) -> bool {
    server.meta.get("tls").and_then(Value::as_bool).unwrap_or(false)
        || matches!(server.security.as_deref(), Some("tls" | "reality" | "xtls"))
}

fn encryption_level(server: &ParsedServer) -> &'static str {
    match server.protocol.as_str() {
        "wireguard" => "modern",
        "vless" if server.security.as_deref() == Some("reality") => "modern",
        "hysteria2" | "tuic" | "shadowtls" => "modern",
        "ss" | "shadowsocks" => {
            match server.security.as_deref() {
                Some(method) if WEAK_CIPHERS.contains(&method) => "weak",
                Some(method) if method.contains("gcm") || method.contains("poly1305") => "strong",
                _ => "adequate",
            }
        }
        "vless" | "vmess" | "trojan" if has_tls(server) => "strong",
        "tor" | "ssh" => "strong",
        _ => "adequate",
    }
}

fn port_class(port: u16) -> &'static str {
    match port {
        443 | 8443 => "https",
        80 | 8080 => "http",
        1..=1023 => "well_known",
        1024..=49151 => "registered",
        _ => "ephemeral",
    }
}

fn vulnerabilities(server: &ParsedServer) -> Vec<&'static str> {
    let mut tags = Vec::new();
    match server.protocol.as_str() {
        "vmess" => {
            let alter_id = server
                .meta
                .get("alter_id")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if alter_id > 0 {
                tags.push("legacy-alter-id");
            }
            if !has_tls(server) {
                tags.push("no-tls");
            }
        }
        "ss" | "shadowsocks" => {
            if let Some(method) = server.security.as_deref()
                && WEAK_CIPHERS.contains(&method)
            {
                tags.push("weak-cipher");
            }
        }
        "vless" => {
            if !has_tls(server) && server.security.as_deref() != Some("reality") {
                tags.push("no-tls");
            }
        }
        _ => {}
    }
    if server
        .meta
        .get("insecure")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        tags.push("certificate-verification-disabled");
    }
    tags
}

fn recommendations(server: &ParsedServer) -> Vec<&'static str> {
    let mut out = Vec::new();
    for vuln in vulnerabilities(server) {
        match vuln {
            "legacy-alter-id" => out.push("set alterId to 0 (AEAD)"),
            "weak-cipher" => out.push("switch to an AEAD cipher (aes-256-gcm or chacha20-ietf-poly1305)"),
            "no-tls" => out.push("enable TLS or REALITY"),
            "certificate-verification-disabled" => out.push("enable certificate verification"),
            _ => {}
        }
    }
    out
}
