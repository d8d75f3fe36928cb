//! Legacy request/response bridge over a child process's stdin/stdout.
//!
//! Feature-equivalent to the socket path but transport-different: one JSON
//! request written to stdin, one JSON response read from stdout. Used for
//! validate/install/check/version commands against agents that predate the
//! framed socket protocol.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use boxflow_api::error::PluginError;
use boxflow_api::trace;

pub const BRIDGE_API_VERSION: &str = "1.0";

#[derive(Debug, Clone, serde::Serialize)]
pub struct BridgeRequest {
    pub command: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl BridgeRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            version: BRIDGE_API_VERSION.to_string(),
            trace_id: Some(trace::get_trace_id()),
            params: serde_json::Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn validate(config_path: impl AsRef<Path>, client_type: Option<&str>, strict: bool) -> Self {
        let mut req = Self::new("validate")
            .with("config_path", config_path.as_ref().display().to_string())
            .with("strict", strict);
        if let Some(client) = client_type {
            req = req.with("client_type", client);
        }
        req
    }

    pub fn install(client_type: &str, version: Option<&str>, force: bool) -> Self {
        let mut req = Self::new("install")
            .with("client_type", client_type)
            .with("force", force);
        if let Some(v) = version {
            req = req.with("client_version", v);
        }
        req
    }

    pub fn check(client_type: Option<&str>) -> Self {
        let mut req = Self::new("check");
        if let Some(client) = client_type {
            req = req.with("client_type", client);
        }
        req
    }

    pub fn version() -> Self {
        Self::new("version")
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BridgeResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Child-process bridge to the agent binary.
pub struct AgentBridge {
    binary: PathBuf,
    timeout: Duration,
}

impl AgentBridge {
    pub fn new(binary: impl AsRef<Path>, timeout: Duration) -> Self {
        Self { binary: binary.as_ref().to_path_buf(), timeout }
    }

    pub async fn run(&self, request: &BridgeRequest) -> Result<BridgeResponse, PluginError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| PluginError::agent_protocol(format!("request encode failed: {e}")))?;

        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PluginError::agent_unavailable(format!(
                    "cannot spawn agent binary {}: {e}",
                    self.binary.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::agent_unavailable("agent stdin unavailable"))?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| PluginError::agent_unavailable(format!("agent stdin write failed: {e}")))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| PluginError::agent_unavailable(format!("agent stdin close failed: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PluginError::timeout(format!(
                    "agent command '{}' timed out after {:?}",
                    request.command, self.timeout
                ))
            })?
            .map_err(|e| PluginError::agent_unavailable(format!("agent process failed: {e}")))?;

        let response: BridgeResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            PluginError::agent_protocol(format!(
                "malformed agent response for '{}': {e}",
                request.command
            ))
        })?;

        tracing::debug!(
            trace_id = %trace::get_trace_id(),
            command = %request.command,
            success = response.success,
            "agent bridge command finished"
        );
        Ok(response)
    }

    pub async fn validate_config(
        &self,
        config_path: impl AsRef<Path>,
        client_type: Option<&str>,
        strict: bool,
    ) -> Result<BridgeResponse, PluginError> {
        self.run(&BridgeRequest::validate(config_path, client_type, strict)).await
    }

    pub async fn install_client(
        &self,
        client_type: &str,
        version: Option<&str>,
        force: bool,
    ) -> Result<BridgeResponse, PluginError> {
        self.run(&BridgeRequest::install(client_type, version, force)).await
    }

    pub async fn check(&self, client_type: Option<&str>) -> Result<BridgeResponse, PluginError> {
        self.run(&BridgeRequest::check(client_type)).await
    }

    /// The agent's own version string, when it reports one.
    pub async fn agent_version(&self) -> Result<Option<String>, PluginError> {
        let response = self.run(&BridgeRequest::version()).await?;
        Ok(response
            .extra
            .get("agent_version")
            .or_else(|| response.extra.get("version"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string))
    }
}
