//! Unix-socket client for the framed-JSON agent protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use boxflow_api::error::PluginError;

use crate::framing::{FRAME_HEADER_SIZE, PROTOCOL_VERSION, decode_header, encode_frame};
use crate::protocol::Message;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/sboxagent.sock";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the agent socket. Send/receive one framed message at
/// a time; any I/O or protocol failure drops the connection.
pub struct SocketClient {
    path: PathBuf,
    timeout: Duration,
    stream: Option<UnixStream>,
}

impl SocketClient {
    pub fn new(path: impl AsRef<Path>, timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            timeout,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), PluginError> {
        self.close();
        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.path))
            .await
            .map_err(|_| {
                PluginError::timeout(format!(
                    "agent connect timed out after {:?} ({})",
                    self.timeout,
                    self.path.display()
                ))
            })?
            .map_err(|e| {
                PluginError::agent_unavailable(format!(
                    "cannot connect to agent socket {}: {e}",
                    self.path.display()
                ))
            })?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), PluginError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PluginError::agent_unavailable("socket is not connected"))?;

        let body = serde_json::to_vec(message)
            .map_err(|e| PluginError::agent_protocol(format!("message encode failed: {e}")))?;
        let mut wire = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
        encode_frame(&body, &mut wire)?;

        if let Err(e) = stream.write_all(&wire).await {
            self.close();
            return Err(PluginError::agent_unavailable(format!("agent write failed: {e}")));
        }
        Ok(())
    }

    pub async fn recv_message(&mut self) -> Result<Message, PluginError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PluginError::agent_unavailable("socket is not connected"))?;

        let mut header = [0u8; FRAME_HEADER_SIZE];
        if let Err(e) = stream.read_exact(&mut header).await {
            self.close();
            return Err(PluginError::agent_unavailable(format!(
                "connection closed while reading frame header: {e}"
            )));
        }

        let (length, version) = decode_header(&header);
        if version != PROTOCOL_VERSION {
            // Version mismatch is fatal for the connection.
            self.close();
            return Err(PluginError::agent_protocol(format!(
                "unsupported protocol version: {version} (expected {PROTOCOL_VERSION})"
            )));
        }
        if length > crate::framing::MAX_FRAME_SIZE {
            self.close();
            return Err(PluginError::agent_protocol(format!(
                "frame body too large: {length} bytes"
            )));
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| PluginError::agent_unavailable("socket is not connected"))?;
        let mut body = vec![0u8; length];
        if let Err(e) = stream.read_exact(&mut body).await {
            self.close();
            return Err(PluginError::agent_unavailable(format!(
                "connection closed while reading frame body ({length} bytes expected): {e}"
            )));
        }

        serde_json::from_slice(&body).map_err(|e| {
            PluginError::agent_protocol(format!("malformed message body: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Priority, ResponsePayload};
    use serde_json::json;
    use tokio::net::UnixListener;

    async fn respond_once(listener: UnixListener, response_version: u32) {
        let (mut sock, _) = listener.accept().await.unwrap();
        // Read the incoming frame.
        let mut header = [0u8; FRAME_HEADER_SIZE];
        sock.read_exact(&mut header).await.unwrap();
        let (len, version) = decode_header(&header);
        assert_eq!(version, PROTOCOL_VERSION);
        let mut body = vec![0u8; len];
        sock.read_exact(&mut body).await.unwrap();

        // Reply with a success response.
        let reply = serde_json::to_vec(&Message::Response {
            id: None,
            timestamp: None,
            response: ResponsePayload {
                status: "success".into(),
                data: Some(json!({"ok": true})),
                error: None,
            },
            correlation_id: None,
        })
        .unwrap();
        let mut wire = Vec::new();
        wire.extend_from_slice(&(reply.len() as u32).to_be_bytes());
        wire.extend_from_slice(&response_version.to_be_bytes());
        wire.extend_from_slice(&reply);
        sock.write_all(&wire).await.unwrap();
    }

    #[tokio::test]
    async fn send_and_receive_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(respond_once(listener, PROTOCOL_VERSION));

        let mut client = SocketClient::new(&path, DEFAULT_CONNECT_TIMEOUT);
        client.connect().await.unwrap();
        let msg = Message::event("ping", json!({}), "test", Priority::Low, None);
        client.send_message(&msg).await.unwrap();
        let reply = client.recv_message().await.unwrap();
        match reply {
            Message::Response { response, .. } => assert!(response.is_success()),
            other => panic!("unexpected reply: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_frame_version_closes_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(respond_once(listener, 42));

        let mut client = SocketClient::new(&path, DEFAULT_CONNECT_TIMEOUT);
        client.connect().await.unwrap();
        let msg = Message::event("ping", json!({}), "test", Priority::Low, None);
        client.send_message(&msg).await.unwrap();
        let err = client.recv_message().await.unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::AgentProtocol);
        assert!(!client.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_agent_unavailable() {
        let mut client = SocketClient::new("/tmp/definitely-missing-boxflow.sock", DEFAULT_CONNECT_TIMEOUT);
        let err = client.connect().await.unwrap_err();
        assert_eq!(err.kind(), boxflow_api::error::ErrorKind::AgentUnavailable);
    }
}
