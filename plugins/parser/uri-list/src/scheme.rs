//! Per-scheme URI body decoding.
//!
//! Each function interprets the scheme-specific body of one line:
//!   ss://BASE64(method:pw)@host:port#tag   (or fully base64-packed body)
//!   vmess://BASE64(json)
//!   vless://uuid@host:port?params#tag
//!   trojan://pw@host:port?params#tag
//!   hysteria2://pw@host:port?params#tag    (hy2 alias)
//!   tuic://uuid:pw@host:port?params#tag

use base64::Engine;
use serde_json::{Value, json};
use url::Url;

use boxflow_api::error::PluginError;
use boxflow_api::model::ParsedServer;

/// Decode one subscription line into a server record.
pub fn parse_uri_line(line: &str) -> Result<ParsedServer, PluginError> {
    let (scheme, body) = line
        .split_once("://")
        .ok_or_else(|| PluginError::parse(format!("not a proxy URI: {line:?}")))?;

    match scheme {
        "ss" => parse_ss(body),
        "vmess" => parse_vmess(body),
        "vless" => parse_url_scheme(line, "vless"),
        "trojan" => parse_url_scheme(line, "trojan"),
        "hysteria2" | "hy2" => parse_url_scheme(line, "hysteria2"),
        "tuic" => parse_url_scheme(line, "tuic"),
        other => Err(PluginError::parse(format!("unknown protocol scheme '{other}'"))),
    }
}

/// Try all four base64 alphabets/padding combinations.
pub fn decode_base64_any(input: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{
        STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD,
    };
    let input = input.trim();
    for engine in [&STANDARD, &URL_SAFE] {
        if let Ok(out) = engine.decode(input) {
            return Some(out);
        }
    }
    let unpadded = input.trim_end_matches('=');
    for engine in [&STANDARD_NO_PAD, &URL_SAFE_NO_PAD] {
        if let Ok(out) = engine.decode(unpadded) {
            return Some(out);
        }
    }
    None
}

fn split_fragment(body: &str) -> (&str, Option<String>) {
    match body.split_once('#') {
        Some((rest, frag)) if !frag.is_empty() => {
            let tag = urlencoding::decode(frag)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| frag.to_string());
            (rest, Some(tag))
        }
        Some((rest, _)) => (rest, None),
        None => (body, None),
    }
}

fn split_host_port(s: &str) -> Result<(String, u16), PluginError> {
    // Bracketed IPv6 first.
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| PluginError::parse(format!("unterminated IPv6 literal: {s:?}")))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| PluginError::parse(format!("missing port in {s:?}")))?;
        return Ok((host.to_string(), parse_port(port)?));
    }
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| PluginError::parse(format!("missing port in {s:?}")))?;
    if host.is_empty() {
        return Err(PluginError::parse(format!("missing host in {s:?}")));
    }
    Ok((host.to_string(), parse_port(port)?))
}

fn parse_port(s: &str) -> Result<u16, PluginError> {
    let port: u16 = s
        .parse()
        .map_err(|_| PluginError::parse(format!("invalid port: {s:?}")))?;
    if port == 0 {
        return Err(PluginError::parse("invalid port: 0"));
    }
    Ok(port)
}

// ---------------------------------------------------------------------------
// shadowsocks
// ---------------------------------------------------------------------------

fn parse_ss(body: &str) -> Result<ParsedServer, PluginError> {
    let (body, tag) = split_fragment(body);
    // Drop any ?plugin=... query; plugin options are not carried through.
    let body = body.split_once('?').map(|(b, _)| b).unwrap_or(body);

    let (method, password, host, port) = if let Some((userinfo, hostport)) = body.rsplit_once('@') {
        // SIP002: userinfo is base64(method:password) or plain method:password.
        let decoded = decode_base64_any(userinfo)
            .and_then(|b| String::from_utf8(b).ok())
            .unwrap_or_else(|| {
                urlencoding::decode(userinfo)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| userinfo.to_string())
            });
        let (method, password) = decoded
            .split_once(':')
            .ok_or_else(|| PluginError::parse("shadowsocks userinfo missing method:password"))?;
        let (host, port) = split_host_port(hostport)?;
        (method.to_string(), password.to_string(), host, port)
    } else {
        // Legacy form: the whole body is base64(method:password@host:port).
        let decoded = decode_base64_any(body)
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or_else(|| PluginError::parse("shadowsocks body is not valid base64"))?;
        let (userinfo, hostport) = decoded
            .rsplit_once('@')
            .ok_or_else(|| PluginError::parse("shadowsocks body missing '@' separator"))?;
        let (method, password) = userinfo
            .split_once(':')
            .ok_or_else(|| PluginError::parse("shadowsocks body missing method:password"))?;
        let (host, port) = split_host_port(hostport)?;
        (method.to_string(), password.to_string(), host, port)
    };

    let mut server = ParsedServer::new("ss", host, port);
    server.security = Some(method);
    server.password = Some(password);
    server.tag = tag;
    Ok(server)
}

// ---------------------------------------------------------------------------
// vmess (base64-wrapped JSON)
// ---------------------------------------------------------------------------

fn parse_vmess(body: &str) -> Result<ParsedServer, PluginError> {
    let (body, tag) = split_fragment(body);
    let decoded = decode_base64_any(body)
        .ok_or_else(|| PluginError::parse("vmess body is not valid base64"))?;
    let doc: Value = serde_json::from_slice(&decoded)
        .map_err(|e| PluginError::parse(format!("vmess body is not valid JSON: {e}")))?;

    let address = doc
        .get("add")
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::parse("vmess JSON missing 'add'"))?
        .to_string();
    let port = match doc.get("port") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    };
    let port =
        u16::try_from(port).ok().filter(|p| *p > 0).ok_or_else(|| {
            PluginError::parse(format!("vmess JSON invalid port: {:?}", doc.get("port")))
        })?;

    let mut server = ParsedServer::new("vmess", address, port);
    server.uuid = doc.get("id").and_then(Value::as_str).map(str::to_string);
    server.security = doc.get("scy").and_then(Value::as_str).map(str::to_string);
    server.tag = tag.or_else(|| doc.get("ps").and_then(Value::as_str).map(str::to_string));

    if let Some(aid) = doc.get("aid") {
        let aid = match aid {
            Value::Number(n) => n.as_u64().unwrap_or(0),
            Value::String(s) => s.parse().unwrap_or(0),
            _ => 0,
        };
        server.set_meta("alter_id", aid);
    }
    if let Some(net) = doc.get("net").and_then(Value::as_str)
        && !net.is_empty()
    {
        server.set_meta("network", net);
        if let Some(path) = doc.get("path").and_then(Value::as_str)
            && !path.is_empty()
        {
            server.set_meta(format!("{net}-path"), path);
        }
        if let Some(host) = doc.get("host").and_then(Value::as_str)
            && !host.is_empty()
        {
            server.set_meta(format!("{net}-host"), host);
        }
    }
    if doc.get("tls").and_then(Value::as_str).is_some_and(|t| t == "tls")
        || doc.get("tls").and_then(Value::as_bool).unwrap_or(false)
    {
        server.set_meta("tls", true);
    }
    if let Some(sni) = doc.get("sni").and_then(Value::as_str)
        && !sni.is_empty()
    {
        server.set_meta("servername", sni);
    }
    if let Some(fp) = doc.get("fp").and_then(Value::as_str)
        && !fp.is_empty()
    {
        server.set_meta("fp", fp);
    }
    if let Some(alpn) = doc.get("alpn").and_then(Value::as_str)
        && !alpn.is_empty()
    {
        server.alpn = Some(alpn.split(',').map(|s| s.trim().to_string()).collect());
    }
    Ok(server)
}

// ---------------------------------------------------------------------------
// url-shaped schemes: vless, trojan, hysteria2, tuic
// ---------------------------------------------------------------------------

fn parse_url_scheme(line: &str, protocol: &str) -> Result<ParsedServer, PluginError> {
    let url = Url::parse(line)
        .map_err(|e| PluginError::parse(format!("{protocol} URI parse failed: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| PluginError::parse(format!("{protocol} URI missing host")))?
        .trim_matches(|c| c == '[' || c == ']')
        .to_string();
    let port = url
        .port()
        .ok_or_else(|| PluginError::parse(format!("{protocol} URI missing port")))?;

    let mut server = ParsedServer::new(protocol, host, port);
    server.tag = url.fragment().map(|f| {
        urlencoding::decode(f)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| f.to_string())
    });

    let userinfo = urlencoding::decode(url.username())
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| url.username().to_string());
    match protocol {
        "vless" => server.uuid = non_empty(userinfo),
        "trojan" | "hysteria2" => server.password = non_empty(userinfo),
        "tuic" => {
            server.uuid = non_empty(userinfo);
            server.password = url
                .password()
                .and_then(|p| urlencoding::decode(p).ok().map(|c| c.into_owned()));
        }
        _ => {}
    }

    let mut obfs_type: Option<String> = None;
    let mut obfs_password: Option<String> = None;

    for (key, value) in url.query_pairs() {
        let value = value.into_owned();
        match key.as_ref() {
            "security" => server.security = non_empty(value),
            "sni" | "peer" => {
                server.set_meta("servername", value);
            }
            "pbk" => server.set_meta("pbk", value),
            "sid" => server.set_meta("short_id", value),
            "fp" => server.set_meta("fp", value),
            "flow" => server.flow = non_empty(value),
            "alpn" => {
                server.alpn =
                    Some(value.split(',').map(|s| s.trim().to_string()).collect());
            }
            "type" => {
                if !value.is_empty() {
                    server.set_meta("network", value);
                }
            }
            "path" => server.set_meta("pending-path", value),
            "host" => server.set_meta("pending-host", value),
            "serviceName" => server.set_meta("grpc-service_name", value),
            "congestion_control" | "congestion-control" => {
                server.congestion_control = non_empty(value)
            }
            "udp_relay_mode" | "udp-relay-mode" => server.set_meta("udp_relay_mode", value),
            "obfs" => obfs_type = non_empty(value),
            "obfs-password" => obfs_password = non_empty(value),
            "insecure" | "allowInsecure" => {
                server.set_meta("insecure", value == "1" || value == "true")
            }
            other => {
                server.set_meta(other.to_string(), value);
            }
        }
    }

    // path/host params belong to the declared transport.
    if let Some(network) = server.meta_str("network").map(str::to_string) {
        if let Some(path) = server.meta.remove("pending-path") {
            server.meta.insert(format!("{network}-path"), path);
        }
        if let Some(host) = server.meta.remove("pending-host") {
            server.meta.insert(format!("{network}-host"), host);
        }
    } else {
        server.meta.remove("pending-path");
        server.meta.remove("pending-host");
    }

    if let Some(obfs) = obfs_type {
        server.obfs = Some(json!({"type": obfs, "password": obfs_password}));
    }

    // Trojan is TLS by construction; hysteria2 and tuic always run over TLS.
    if matches!(protocol, "trojan" | "hysteria2" | "tuic")
        && server.security.is_none()
    {
        server.set_meta("tls", true);
    }
    if server.security.as_deref() == Some("tls") {
        server.set_meta("tls", true);
    }

    Ok(server)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
