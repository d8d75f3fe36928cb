//! Format detection: map a source-type hint (or sniffed content) to a
//! registered parser name.

use boxflow_api::model::SourceType;

pub const PARSER_URI_LIST: &str = "uri_list";
pub const PARSER_BASE64: &str = "base64";
pub const PARSER_JSON: &str = "json";
pub const PARSER_CLASH: &str = "clash";

const KNOWN_SCHEMES: &[&str] = &[
    "ss://",
    "vmess://",
    "vless://",
    "trojan://",
    "hysteria2://",
    "hy2://",
    "tuic://",
];

/// Minimum body length before a base64 guess is considered; short inputs
/// are too easy to misclassify.
const BASE64_MIN_LEN: usize = 24;

/// Resolve the parser for a payload. A concrete source-type hint decides
/// directly; `auto` sniffs the content.
pub fn parser_name(raw: &[u8], hint: SourceType) -> &'static str {
    match hint {
        SourceType::UrlBase64 => PARSER_BASE64,
        SourceType::UrlJson | SourceType::FileJson => PARSER_JSON,
        SourceType::UriList => PARSER_URI_LIST,
        SourceType::Clash => PARSER_CLASH,
        SourceType::Auto => sniff(raw),
    }
}

fn sniff(raw: &[u8]) -> &'static str {
    let Ok(text) = std::str::from_utf8(raw) else {
        return PARSER_URI_LIST;
    };
    let trimmed = text.trim_start();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return PARSER_JSON;
    }
    if is_clash(trimmed) {
        return PARSER_CLASH;
    }
    if has_scheme_lines(trimmed) {
        return PARSER_URI_LIST;
    }
    if looks_like_base64(trimmed) {
        return PARSER_BASE64;
    }
    PARSER_URI_LIST
}

fn is_clash(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_end();
        line == "proxies:" || line.starts_with("proxies:") || line.starts_with("proxy-groups:")
    })
}

fn has_scheme_lines(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .any(|l| KNOWN_SCHEMES.iter().any(|s| l.starts_with(s)))
}

/// Valid base64 of useful length that decodes to a URI list.
fn looks_like_base64(text: &str) -> bool {
    let compact: String = text.split_whitespace().collect();
    if compact.len() < BASE64_MIN_LEN {
        return false;
    }
    if !compact
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'-' | b'_' | b'='))
    {
        return false;
    }
    match boxflow_parser_uri_list::decode_base64_any(&compact) {
        Some(decoded) => String::from_utf8(decoded)
            .map(|inner| has_scheme_lines(&inner))
            .unwrap_or(false),
        None => false,
    }
}
