use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::error::{ErrorKind, PluginError};
use crate::trace;

/// Declared encoding of a subscription source. `Auto` defers to sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    UrlBase64,
    UrlJson,
    FileJson,
    UriList,
    Clash,
    Auto,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UrlBase64 => "url_base64",
            SourceType::UrlJson => "url_json",
            SourceType::FileJson => "file_json",
            SourceType::UriList => "uri_list",
            SourceType::Clash => "clash",
            SourceType::Auto => "auto",
        }
    }
}

/// Location descriptor for a subscription feed.
///
/// `user_agent` is tri-state: `None` → the fetcher's default,
/// `Some("")` → suppress the header entirely, `Some(s)` → use as-is.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionSource {
    pub url: String,
    pub source_type: SourceType,
    /// Extra request headers. Ordered map so cache keys are deterministic.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl SubscriptionSource {
    pub fn new(url: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            url: url.into(),
            source_type,
            headers: BTreeMap::new(),
            user_agent: None,
            label: None,
        }
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Protocol-neutral server record produced by parsers and consumed by the
/// exporters. Enrichers mutate it in place as it flows through the stages.
///
/// Required fields are `protocol`, `address`, `port`; everything else is
/// protocol-specific. Carry-through values that have no typed field live
/// in `meta`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParsedServer {
    pub protocol: String,
    pub address: String,
    pub port: u16,
    /// Cipher / security mode (shadowsocks method, vless security, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_shared_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_address: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Protocol version (shadowtls).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obfs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Free-form carry-through values (transport meta, enrichment output).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl ParsedServer {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// String-valued meta entry, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
    }

    /// Canonical identity string used for hashing and latency cache keys.
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }
}

/// Processing mode: `Strict` aborts on hard errors, `Tolerant` accumulates
/// them and continues with whatever survived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Strict,
    #[default]
    Tolerant,
}

impl PipelineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Strict => "strict",
            PipelineMode::Tolerant => "tolerant",
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, PipelineMode::Strict)
    }
}

/// Structured error record — the only error shape allowed inside
/// `PipelineContext.metadata["errors"]`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage: stage.into(),
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn from_plugin(stage: impl Into<String>, err: PluginError) -> Self {
        Self::new(err.kind, stage, err.message)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:?}: {}", self.stage, self.kind, self.message)
    }
}

/// Mutable per-run context threaded through every stage.
///
/// `metadata` is the inter-stage bus: each stage writes under its own key
/// (`outbound_filter`, `routing`, `postprocessor_chain`, ...), and
/// accumulated error records live under `errors`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineContext {
    /// 8-hex-char correlation id, stable across all records of one run.
    pub trace_id: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mode: PipelineMode,
    /// 0 = quiet, 1 = stage summaries, 2 = per-entry detail.
    #[serde(default)]
    pub debug_level: u8,
    #[serde(default)]
    pub user_routes: Vec<Value>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            trace_id: trace::get_trace_id(),
            source: None,
            mode: PipelineMode::Tolerant,
            debug_level: 0,
            user_routes: Vec::new(),
            exclusions: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append a structured error record to `metadata["errors"]`.
    pub fn push_error(&mut self, err: PipelineError) {
        let entry = serde_json::to_value(&err).unwrap_or_else(|_| json!(err.to_string()));
        match self.metadata.get_mut("errors") {
            Some(Value::Array(list)) => list.push(entry),
            _ => {
                self.metadata.insert("errors".into(), Value::Array(vec![entry]));
            }
        }
    }

    /// All accumulated error records, parsed back out of the metadata bus.
    pub fn errors(&self) -> Vec<PipelineError> {
        match self.metadata.get("errors") {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        matches!(self.metadata.get("errors"), Some(Value::Array(l)) if !l.is_empty())
    }

    /// Stage-scoped metadata write (`metadata[stage] = value`).
    pub fn set_stage_meta(&mut self, stage: impl Into<String>, value: Value) {
        self.metadata.insert(stage.into(), value);
    }

    pub fn stage_meta(&self, stage: &str) -> Option<&Value> {
        self.metadata.get(stage)
    }
}

/// Result of a pipeline run. `artifact` is the server list for processing
/// runs and the emitted config document for export runs.
///
/// Invariant: `success == false` implies `errors` is non-empty; a tolerant
/// success may still carry non-fatal error records.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineResult<T> {
    pub artifact: T,
    pub context: PipelineContext,
    pub errors: Vec<PipelineError>,
    pub success: bool,
}

impl<T> PipelineResult<T> {
    pub fn ok(artifact: T, context: PipelineContext) -> Self {
        let errors = context.errors();
        Self { artifact, context, errors, success: true }
    }

    pub fn failed(artifact: T, context: PipelineContext) -> Self {
        let errors = context.errors();
        Self { artifact, context, errors, success: false }
    }
}

/// Server-list result, as returned by the coordinator.
pub type ServersResult = PipelineResult<Vec<ParsedServer>>;
/// Emitted-config result, as returned by the export path.
pub type ConfigResult = PipelineResult<Value>;

/// Short stable FNV-1a content hash, hex-encoded and truncated to 8 chars.
/// Used for derived server ids and tag fallbacks.
pub fn short_hash(input: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_error_accumulates_structured_records() {
        let mut ctx = PipelineContext::new();
        ctx.push_error(PipelineError::new(ErrorKind::Parse, "parse", "bad line").with("line", 3));
        ctx.push_error(PipelineError::new(ErrorKind::Fetch, "fetch", "timeout"));

        let errors = ctx.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, ErrorKind::Parse);
        assert_eq!(errors[0].context.get("line"), Some(&json!(3)));
        assert_eq!(errors[1].stage, "fetch");
    }

    #[test]
    fn error_records_round_trip_through_json() {
        let err = PipelineError::new(ErrorKind::AgentProtocol, "ipc", "bad version").with("version", 9);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], json!("agent_protocol"));
        let back: PipelineError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn context_trace_id_is_eight_chars() {
        let ctx = PipelineContext::new();
        assert_eq!(ctx.trace_id.len(), 8);
    }

    #[test]
    fn short_hash_is_stable_and_short() {
        let a = short_hash("vmess://ex.com:443");
        let b = short_hash("vmess://ex.com:443");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_ne!(a, short_hash("vmess://ex.com:444"));
    }

    #[test]
    fn source_type_serializes_snake_case() {
        let src = SubscriptionSource::new("https://example.com/sub", SourceType::UrlBase64);
        let v = serde_json::to_value(&src).unwrap();
        assert_eq!(v["source_type"], json!("url_base64"));
    }
}
