use std::collections::BTreeMap;

use serde::Deserialize;

use boxflow_api::model::{PipelineMode, SourceType, SubscriptionSource};

use crate::error::EngineError;

/// Root run configuration — parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BoxflowConfig {
    pub source: SourceSection,

    #[serde(default)]
    pub mode: PipelineMode,

    /// Path to a FullProfile JSON document.
    #[serde(default)]
    pub profile: Option<String>,

    #[serde(default)]
    pub export: ExportSection,

    #[serde(default)]
    pub agent: AgentSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub url: String,
    #[serde(default = "default_source_type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_source_type() -> SourceType {
    SourceType::Auto
}

impl SourceSection {
    pub fn to_source(&self) -> SubscriptionSource {
        SubscriptionSource {
            url: self.url.clone(),
            source_type: self.source_type,
            headers: self.headers.clone(),
            user_agent: self.user_agent.clone(),
            label: self.label.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub format: String,
    pub version: Option<String>,
    pub skip_version_check: bool,
    pub output: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            format: "singbox".to_string(),
            version: None,
            skip_version_check: false,
            output: "config.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub socket: String,
    pub notify: bool,
    pub connect_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            socket: "/tmp/sboxagent.sock".to_string(),
            notify: false,
            connect_timeout_secs: 5,
        }
    }
}

impl BoxflowConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let cfg = BoxflowConfig::parse(
            r#"
[source]
url = "https://example.com/sub"
"#,
        )
        .unwrap();
        assert_eq!(cfg.source.source_type, SourceType::Auto);
        assert_eq!(cfg.mode, PipelineMode::Tolerant);
        assert_eq!(cfg.export.format, "singbox");
        assert_eq!(cfg.agent.socket, "/tmp/sboxagent.sock");
    }

    #[test]
    fn parses_full_config() {
        let cfg = BoxflowConfig::parse(
            r#"
mode = "strict"
profile = "profile.json"

[source]
url = "file:///tmp/sub.txt"
source_type = "uri_list"
user_agent = ""
label = "local"

[source.headers]
authorization = "Bearer t"

[export]
format = "singbox"
version = "1.10.0"
output = "out.json"

[agent]
socket = "/run/agent.sock"
notify = true
"#,
        )
        .unwrap();
        assert_eq!(cfg.mode, PipelineMode::Strict);
        assert_eq!(cfg.source.user_agent.as_deref(), Some(""));
        assert_eq!(cfg.export.version.as_deref(), Some("1.10.0"));
        assert!(cfg.agent.notify);
        let source = cfg.source.to_source();
        assert_eq!(source.headers.get("authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn bad_toml_is_config_error() {
        assert!(matches!(
            BoxflowConfig::parse("source = 1"),
            Err(EngineError::Config(_))
        ));
    }
}
