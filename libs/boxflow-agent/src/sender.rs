//! High-level event/command/heartbeat sender.
//!
//! Connection state machine: Disconnected → Connecting → Connected →
//! Disconnected (on any I/O error or explicit close). A send in
//! Disconnected triggers one implicit connect attempt; a send that fails
//! on an established connection reconnects once and retries; repeated
//! failure surfaces `agent_unavailable`.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use boxflow_api::error::{ErrorKind, PluginError};
use boxflow_api::trace;

use crate::protocol::{AgentStatus, Message, Priority, ResponsePayload};
use crate::socket::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SOCKET_PATH, SocketClient};

pub struct AgentSender {
    client: SocketClient,
    source: String,
}

impl Default for AgentSender {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH, DEFAULT_CONNECT_TIMEOUT)
    }
}

impl AgentSender {
    pub fn new(socket_path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            client: SocketClient::new(socket_path, timeout),
            source: "boxflow".to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    pub fn disconnect(&mut self) {
        self.client.close();
    }

    /// Send an event and wait for its acknowledgment response.
    pub async fn send_event(
        &mut self,
        event_type: &str,
        data: Value,
        priority: Priority,
    ) -> Result<ResponsePayload, PluginError> {
        let message = Message::event(event_type, data, self.source.clone(), priority, None);
        let reply = self.exchange(&message).await?;
        match reply {
            Message::Response { response, .. } => {
                if response.is_success() {
                    tracing::debug!(
                        trace_id = %trace::get_trace_id(),
                        event_type,
                        "event acknowledged by agent"
                    );
                } else if let Some(err) = &response.error {
                    tracing::warn!(
                        trace_id = %trace::get_trace_id(),
                        event_type,
                        code = %err.code,
                        message = %err.message,
                        "agent rejected event"
                    );
                }
                Ok(response)
            }
            other => Err(PluginError::agent_protocol(format!(
                "expected response message, got {}",
                other.message_type()
            ))),
        }
    }

    /// Send a command and return its response data on success.
    pub async fn send_command(
        &mut self,
        command: &str,
        params: Value,
    ) -> Result<Option<Value>, PluginError> {
        let message = Message::command(command, params, None);
        let reply = self.exchange(&message).await?;
        match reply {
            Message::Response { response, .. } => {
                if response.is_success() {
                    Ok(response.data)
                } else {
                    let detail = response
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| "agent returned error status".to_string());
                    Err(PluginError::agent_protocol(format!("command '{command}' failed: {detail}")))
                }
            }
            other => Err(PluginError::agent_protocol(format!(
                "expected response message, got {}",
                other.message_type()
            ))),
        }
    }

    /// Heartbeat exchange; the agent answers with a heartbeat of its own.
    pub async fn send_heartbeat(
        &mut self,
        agent_id: &str,
        status: AgentStatus,
        version: Option<String>,
    ) -> Result<(), PluginError> {
        let message = Message::heartbeat(agent_id, status, version);
        let reply = self.exchange(&message).await?;
        match reply {
            Message::Heartbeat { .. } => Ok(()),
            Message::Response { response, .. } if response.is_success() => Ok(()),
            other => Err(PluginError::agent_protocol(format!(
                "unexpected heartbeat reply: {}",
                other.message_type()
            ))),
        }
    }

    pub async fn ping(&mut self) -> bool {
        matches!(
            self.send_command("ping", Value::Object(Default::default())).await,
            Ok(Some(data)) if data.get("pong").and_then(Value::as_bool).unwrap_or(false)
        )
    }

    pub async fn agent_status(&mut self) -> Result<Option<Value>, PluginError> {
        self.send_command("status", Value::Object(Default::default())).await
    }

    /// One write-then-read round trip with a single implicit reconnect.
    async fn exchange(&mut self, message: &Message) -> Result<Message, PluginError> {
        if !self.client.is_connected() {
            self.client.connect().await?;
        }

        match self.round_trip(message).await {
            Ok(reply) => Ok(reply),
            // Protocol errors are fatal for the exchange, not worth a retry.
            Err(e) if e.kind() == ErrorKind::AgentProtocol => Err(e),
            Err(first) => {
                tracing::debug!(
                    trace_id = %trace::get_trace_id(),
                    error = %first,
                    "agent exchange failed, reconnecting once"
                );
                self.client.connect().await.map_err(|e| {
                    PluginError::agent_unavailable(format!(
                        "agent unavailable after reconnect: {e}"
                    ))
                })?;
                self.round_trip(message).await.map_err(|e| {
                    if e.kind() == ErrorKind::AgentProtocol {
                        e
                    } else {
                        PluginError::agent_unavailable(format!("agent exchange failed twice: {e}"))
                    }
                })
            }
        }
    }

    async fn round_trip(&mut self, message: &Message) -> Result<Message, PluginError> {
        self.client.send_message(message).await?;
        self.client.recv_message().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FRAME_HEADER_SIZE, PROTOCOL_VERSION, decode_header};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    async fn serve_responses(listener: UnixListener, replies: Vec<Value>) {
        let (mut sock, _) = listener.accept().await.unwrap();
        for reply in replies {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            sock.read_exact(&mut header).await.unwrap();
            let (len, _) = decode_header(&header);
            let mut body = vec![0u8; len];
            sock.read_exact(&mut body).await.unwrap();

            let payload = serde_json::to_vec(&reply).unwrap();
            let mut wire = Vec::new();
            wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            wire.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
            wire.extend_from_slice(&payload);
            sock.write_all(&wire).await.unwrap();
        }
    }

    #[tokio::test]
    async fn event_send_surfaces_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_responses(
            listener,
            vec![json!({"type": "response", "response": {"status": "success"}})],
        ));

        let mut sender = AgentSender::new(&path, DEFAULT_CONNECT_TIMEOUT);
        let response = sender
            .send_event("subscription_updated", json!({"servers_count": 2}), Priority::Normal)
            .await
            .unwrap();
        assert!(response.is_success());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_command_is_agent_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_responses(
            listener,
            vec![json!({
                "type": "response",
                "response": {
                    "status": "error",
                    "error": {"code": "ENOENT", "message": "no such client"}
                }
            })],
        ));

        let mut sender = AgentSender::new(&path, DEFAULT_CONNECT_TIMEOUT);
        let err = sender.send_command("check", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentProtocol);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_agent_is_unavailable() {
        let mut sender =
            AgentSender::new("/tmp/no-such-boxflow-agent.sock", Duration::from_millis(200));
        let err = sender
            .send_event("x", json!({}), Priority::Low)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AgentUnavailable);
        assert!(!sender.is_connected());
    }
}
