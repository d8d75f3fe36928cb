//! User-facing configuration profiles.
//!
//! `FullProfile` is the end-to-end document a profile catalogue hands the
//! pipeline; `ClientProfile` describes the emitted client config surface
//! (inbounds, DNS mode, routing overrides, outbound exclusions). Middleware
//! extracts its own configuration from `FullProfile.metadata[<name>]`.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::PluginError;

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    1
}

/// Local listener kind included in the emitted client config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundType {
    Socks,
    Http,
    Tun,
    Tproxy,
    Ssh,
    Dns,
    #[serde(rename = "reality-inbound")]
    RealityInbound,
    Shadowtls,
}

/// Local listener descriptor. Default posture is localhost-only: a
/// non-loopback, non-private bind is rejected unless
/// `options["allow_external"]` is set.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InboundProfile {
    #[serde(rename = "type")]
    pub inbound_type: InboundType,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

/// Conventional listener ports used when an inbound leaves `port` unset.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_TPROXY_PORT: u16 = 7895;

impl InboundProfile {
    pub fn new(inbound_type: InboundType) -> Self {
        Self {
            inbound_type,
            listen: default_listen(),
            port: None,
            options: Map::new(),
        }
    }

    /// The port to emit: explicit value, else the conventional default
    /// for port-bound inbound types. Tun and dns inbounds have none.
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or(match self.inbound_type {
            InboundType::Socks => Some(DEFAULT_SOCKS_PORT),
            InboundType::Http => Some(DEFAULT_HTTP_PORT),
            InboundType::Tproxy => Some(DEFAULT_TPROXY_PORT),
            _ => None,
        })
    }

    /// Enforce bind-address and port-range invariants.
    pub fn validate(&self) -> Result<(), PluginError> {
        if !is_local_bind(&self.listen)
            && !self
                .options
                .get("allow_external")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        {
            return Err(PluginError::export(format!(
                "inbound bind address '{}' must be loopback or a private range unless allow_external is set",
                self.listen
            )));
        }
        if let Some(port) = self.port
            && port < 1024
        {
            return Err(PluginError::export(format!(
                "inbound port {port} outside the allowed 1024-65535 range"
            )));
        }
        Ok(())
    }
}

fn is_local_bind(addr: &str) -> bool {
    if let Ok(ip) = addr.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
            std::net::IpAddr::V6(v6) => v6.is_loopback(),
        };
    }
    addr == "localhost"
}

/// Client-facing export profile: inbounds, DNS mode, routing overrides
/// (notably `final`) and the protocol types to drop from the emitted config.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ClientProfile {
    #[serde(default)]
    pub inbounds: Vec<InboundProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub routing: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_outbounds: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ClientProfile {
    /// The `final` routing override, when present.
    pub fn final_route(&self) -> Option<&str> {
        self.routing.get("final").and_then(Value::as_str)
    }
}

/// One subscription entry of a profile.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubscriptionConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordering priority, 1 is highest.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

/// Server filter rules.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub only_tags: Vec<String>,
    /// Address exclusions.
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_true")]
    pub only_enabled: bool,
}

/// Routing rules: a default action, by-source overrides and custom domain
/// rules.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub by_source: BTreeMap<String, String>,
    #[serde(default = "default_route")]
    pub default_route: String,
    #[serde(default)]
    pub custom_routes: BTreeMap<String, String>,
}

fn default_route() -> String {
    "tunnel".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            by_source: BTreeMap::new(),
            default_route: default_route(),
            custom_routes: BTreeMap::new(),
        }
    }
}

/// Export target settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_profile: Option<String>,
    #[serde(default = "default_output")]
    pub output_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

fn default_format() -> String {
    "sing-box".to_string()
}

fn default_output() -> String {
    "config.json".to_string()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            outbound_profile: None,
            inbound_profile: None,
            output_file: default_output(),
            template: None,
        }
    }
}

/// Sidecar-agent preferences.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default = "default_true")]
    pub monitor_latency: bool,
    #[serde(default = "default_interval")]
    pub health_check_interval: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_interval() -> String {
    "30s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// UI preferences. Opaque to the pipeline, carried for the outer surfaces.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_ui_mode")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default)]
    pub show_debug_info: bool,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_ui_mode() -> String {
    "cli".to_string()
}

/// End-to-end user configuration: subscriptions, filters, routing, export,
/// optional agent and UI settings, and a free `metadata` map that carries
/// middleware/postprocessor chain configuration plus an embedded
/// `ClientProfile` under `client_profile`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FullProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiConfig>,
    #[serde(default = "default_version")]
    pub version: String,
    /// ISO-8601 timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl FullProfile {
    pub fn new(id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        Self {
            id: id.into(),
            description: None,
            subscriptions: Vec::new(),
            filters: FilterConfig::default(),
            routing: RoutingConfig::default(),
            export: ExportConfig::default(),
            agent: None,
            ui: None,
            version: default_version(),
            created_at: Some(now.clone()),
            updated_at: Some(now),
            metadata: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() {
            return Err(PluginError::internal("profile id cannot be empty"));
        }
        for sub in &self.subscriptions {
            if sub.priority < 1 {
                return Err(PluginError::internal(format!(
                    "subscription '{}': priority must be >= 1",
                    sub.id
                )));
            }
        }
        Ok(())
    }

    /// Plugin configuration carried in `metadata[<name>]`, if any.
    pub fn plugin_config(&self, name: &str) -> Option<&Value> {
        self.metadata.get(name)
    }

    /// The embedded `ClientProfile`, when `metadata["client_profile"]`
    /// parses as one.
    pub fn client_profile(&self) -> Option<ClientProfile> {
        self.metadata
            .get("client_profile")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
