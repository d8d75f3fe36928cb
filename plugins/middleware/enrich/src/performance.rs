//! Performance enrichment: latency class, protocol efficiency, security
//! level, reliability score. Heuristic only — the latency-sort
//! postprocessor owns real measurements and overwrites `latency_ms`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use boxflow_api::model::ParsedServer;

const LOW_LATENCY: &[&str] = &["US", "CA", "GB", "DE", "FR", "JP", "KR", "SG", "NL", "CH"];
const MEDIUM_LATENCY: &[&str] = &["CN", "RU", "IN", "BR", "AU", "ZA", "TR", "MX"];
const RELIABLE_REGIONS: &[&str] = &["US", "CA", "GB", "DE", "FR", "JP", "NL", "CH", "SG"];
const UNRELIABLE_REGIONS: &[&str] = &["CN", "RU", "IR", "PK"];
const STANDARD_PORTS: &[u16] = &[443, 80, 8080, 8443, 1080, 1194, 51820];

pub struct PerformanceEnricher {
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Value, Instant)>>,
}

impl PerformanceEnricher {
    pub fn new(cache_ttl: Duration) -> Self {
        Self { cache_ttl, cache: Mutex::new(HashMap::new()) }
    }

    pub fn enrich(&self, server: &mut ParsedServer) {
        let key = format!("{}:{}", server.address, server.port);
        if let Some(cached) = self.cache.lock().ok().and_then(|c| {
            c.get(&key)
                .filter(|(_, at)| at.elapsed() < self.cache_ttl)
                .map(|(v, _)| v.clone())
        }) {
            server.set_meta("performance", cached);
            return;
        }

        let info = json!({
            "estimated_latency_class": latency_class(server),
            "protocol_efficiency": protocol_efficiency(&server.protocol),
            "security_level": security_level(server),
            "reliability_score": reliability_score(server),
        });
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, (info.clone(), Instant::now()));
        }
        server.set_meta("performance", info);
    }
}

fn country_of(server: &ParsedServer) -> Option<String> {
    server
        .meta
        .get("geo")
        .and_then(|g| g.get("country"))
        .and_then(Value::as_str)
        .map(str::to_uppercase)
}

fn latency_class(server: &ParsedServer) -> &'static str {
    match country_of(server) {
        Some(c) if LOW_LATENCY.contains(&c.as_str()) => "low",
        Some(c) if MEDIUM_LATENCY.contains(&c.as_str()) => "medium",
        Some(c) if c != "UNKNOWN" => "high",
        _ => "unknown",
    }
}

fn protocol_efficiency(protocol: &str) -> &'static str {
    match protocol.to_ascii_lowercase().as_str() {
        "wireguard" | "vless" | "hysteria2" | "tuic" => "high",
        "vmess" | "trojan" | "shadowsocks" | "ss" | "shadowtls" => "medium",
        "http" | "socks" | "socks5" => "low",
        _ => "medium",
    }
}

fn security_level(server: &ParsedServer) -> &'static str {
    let base = match server.protocol.to_ascii_lowercase().as_str() {
        "wireguard" | "vless" | "vmess" | "trojan" | "hysteria2" | "tuic" | "shadowtls" => "high",
        "shadowsocks" | "ss" => "medium",
        "http" | "socks" | "socks5" => "low",
        _ => "medium",
    };
    match server.security.as_deref() {
        Some("tls" | "reality" | "xtls") => "high",
        Some("none" | "auto") if base == "high" => "low",
        Some("none" | "auto") => "medium",
        _ => base,
    }
}

fn reliability_score(server: &ParsedServer) -> f64 {
    let mut score: f64 = match server.protocol.to_ascii_lowercase().as_str() {
        "wireguard" => 0.9,
        "hysteria2" => 0.85,
        "vless" | "trojan" | "tuic" => 0.8,
        "shadowtls" => 0.75,
        "vmess" | "shadowsocks" | "ss" => 0.7,
        "http" | "socks" | "socks5" => 0.5,
        _ => 0.6,
    };

    if STANDARD_PORTS.contains(&server.port) {
        score += 0.05;
    }
    match server.security.as_deref() {
        Some("tls" | "reality" | "xtls") => score += 0.1,
        Some("none") => score -= 0.1,
        _ => {}
    }
    if let Some(country) = country_of(server) {
        if RELIABLE_REGIONS.contains(&country.as_str()) {
            score += 0.05;
        } else if UNRELIABLE_REGIONS.contains(&country.as_str()) {
            score -= 0.05;
        }
    }

    score.clamp(0.0, 1.0)
}
