//! Clash YAML subscription parser.
//!
//! Walks the top-level `proxies:` list, dispatching on each entry's
//! `type` discriminator. Unknown proxy types are skipped with a non-fatal
//! error appended to the context.

use serde_json::Value;
use serde_yaml::Value as Yaml;

use boxflow_api::error::PluginError;
use boxflow_api::model::{ParsedServer, PipelineContext, PipelineError};
use boxflow_api::parser::Parser;

pub const NAME: &str = "clash";

pub struct ClashParser;

impl Parser for ClashParser {
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

        let doc: Yaml = serde_yaml::from_slice(raw)
            .map_err(|e| PluginError::parse(format!("invalid Clash YAML: {e}")))?;
        let proxies = doc
            .get("proxies")
            .and_then(Yaml::as_sequence)
            .ok_or_else(|| PluginError::parse("Clash document has no 'proxies' list"))?;

        let mut servers = Vec::new();
        for (idx, proxy) in proxies.iter().enumerate() {
            match coerce_proxy(proxy) {
                Ok(server) => servers.push(server),
                Err(e) if ctx.mode.is_strict() => {
                    return Err(e.with_context(format!("proxy {idx}")));
                }
                Err(e) => {
                    ctx.push_error(PipelineError::from_plugin(NAME, e).with("proxy", idx as u64));
                }
            }
        }
        Ok(servers)
    }
}

fn str_field(proxy: &Yaml, key: &str) -> Option<String> {
    proxy.get(key).and_then(Yaml::as_str).map(str::to_string)
}

fn coerce_proxy(proxy: &Yaml) -> Result<ParsedServer, PluginError> {
    let kind = proxy
        .get("type")
        .and_then(Yaml::as_str)
        .ok_or_else(|| PluginError::parse("proxy entry missing 'type'"))?;
    let name = str_field(proxy, "name");
    let address = str_field(proxy, "server")
        .ok_or_else(|| PluginError::parse(format!("{kind} proxy missing 'server'")))?;
    let port = proxy
        .get("port")
        .and_then(Yaml::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p > 0)
        .ok_or_else(|| PluginError::parse(format!("{kind} proxy missing valid 'port'")))?;

    let mut server = match kind {
        "ss" => {
            let mut s = ParsedServer::new("ss", address, port);
            s.security = str_field(proxy, "cipher");
            s.password = str_field(proxy, "password");
            s
        }
        "vmess" => {
            let mut s = ParsedServer::new("vmess", address, port);
            s.uuid = str_field(proxy, "uuid");
            s.security = str_field(proxy, "cipher");
            if let Some(aid) = proxy.get("alterId").and_then(Yaml::as_u64) {
                s.set_meta("alter_id", aid);
            }
            apply_clash_transport(&mut s, proxy);
            s
        }
        "vless" => {
            let mut s = ParsedServer::new("vless", address, port);
            s.uuid = str_field(proxy, "uuid");
            s.flow = str_field(proxy, "flow");
            apply_clash_transport(&mut s, proxy);
            apply_reality(&mut s, proxy);
            s
        }
        "trojan" => {
            let mut s = ParsedServer::new("trojan", address, port);
            s.password = str_field(proxy, "password");
            s.set_meta("tls", true);
            if let Some(sni) = str_field(proxy, "sni") {
                s.set_meta("servername", sni);
            }
            apply_clash_transport(&mut s, proxy);
            s
        }
        "hysteria2" => {
            let mut s = ParsedServer::new("hysteria2", address, port);
            s.password = str_field(proxy, "password");
            if let Some(sni) = str_field(proxy, "sni") {
                s.set_meta("servername", sni);
            }
            if let Some(obfs) = str_field(proxy, "obfs") {
                s.obfs = Some(serde_json::json!({
                    "type": obfs,
                    "password": str_field(proxy, "obfs-password"),
                }));
            }
            s
        }
        "tuic" => {
            let mut s = ParsedServer::new("tuic", address, port);
            s.uuid = str_field(proxy, "uuid");
            s.password = str_field(proxy, "password");
            s.congestion_control = str_field(proxy, "congestion-controller")
                .or_else(|| str_field(proxy, "congestion-control"));
            s
        }
        "wireguard" => {
            let mut s = ParsedServer::new("wireguard", address, port);
            s.private_key = str_field(proxy, "private-key");
            s.peer_public_key = str_field(proxy, "public-key");
            s.pre_shared_key = str_field(proxy, "pre-shared-key");
            let mut locals: Vec<String> = Vec::new();
            if let Some(ip) = str_field(proxy, "ip") {
                locals.push(ip);
            }
            if let Some(ipv6) = str_field(proxy, "ipv6") {
                locals.push(ipv6);
            }
            if !locals.is_empty() {
                s.local_address = Some(locals);
            }
            if let Some(mtu) = proxy.get("mtu").and_then(Yaml::as_u64) {
                s.mtu = u32::try_from(mtu).ok();
            }
            s
        }
        "ssh" => {
            let mut s = ParsedServer::new("ssh", address, port);
            s.username = str_field(proxy, "username");
            s.password = str_field(proxy, "password");
            s.private_key = str_field(proxy, "private-key");
            s
        }
        other => {
            return Err(PluginError::parse(format!("unsupported proxy type '{other}'")));
        }
    };

    if let Some(name) = name {
        server.set_meta("name", name.clone());
        server.tag = Some(name);
    }
    if proxy.get("tls").and_then(Yaml::as_bool).unwrap_or(false) {
        server.set_meta("tls", true);
    }
    if let Some(fp) = str_field(proxy, "client-fingerprint") {
        server.set_meta("fp", fp);
    }
    if let Some(servername) = str_field(proxy, "servername") {
        server.set_meta("servername", servername);
    }
    if let Some(alpn) = proxy.get("alpn").and_then(Yaml::as_sequence) {
        server.alpn = Some(
            alpn.iter()
                .filter_map(Yaml::as_str)
                .map(str::to_string)
                .collect(),
        );
    }

    Ok(server)
}

/// Clash `network:` plus `ws-opts`/`grpc-opts` into the shared transport
/// meta convention (`network`, `<net>-path`, `<net>-host`, ...).
fn apply_clash_transport(server: &mut ParsedServer, proxy: &Yaml) {
    let Some(network) = proxy.get("network").and_then(Yaml::as_str) else {
        return;
    };
    server.set_meta("network", network);

    match network {
        "ws" => {
            if let Some(opts) = proxy.get("ws-opts") {
                if let Some(path) = opts.get("path").and_then(Yaml::as_str) {
                    server.set_meta("ws-path", path);
                }
                if let Some(host) = opts
                    .get("headers")
                    .and_then(|h| h.get("Host"))
                    .and_then(Yaml::as_str)
                {
                    server.set_meta("ws-host", host);
                }
            }
        }
        "grpc" => {
            if let Some(name) = proxy
                .get("grpc-opts")
                .and_then(|o| o.get("grpc-service-name"))
                .and_then(Yaml::as_str)
            {
                server.set_meta("grpc-service_name", name);
            }
        }
        _ => {}
    }
}

fn apply_reality(server: &mut ParsedServer, proxy: &Yaml) {
    if let Some(opts) = proxy.get("reality-opts") {
        if let Some(pbk) = opts.get("public-key").and_then(Yaml::as_str) {
            server.set_meta("pbk", pbk);
        }
        if let Some(sid) = opts.get("short-id").and_then(Yaml::as_str) {
            server.set_meta("short_id", sid);
        }
        server.security = Some("reality".to_string());
    }
}

pub fn create(_config: &Value) -> Result<Box<dyn Parser>, PluginError> {
    Ok(Box::new(ClashParser))
}
