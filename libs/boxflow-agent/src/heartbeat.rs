//! Periodic heartbeat task.
//!
//! Keeps the agent informed that this process is alive. The task reports
//! `healthy` normally and downgrades to `degraded` after a failed
//! exchange; agent unavailability never stops the loop — subscription
//! processing is independent of the agent.

use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use boxflow_api::trace;

use crate::protocol::AgentStatus;
use crate::sender::AgentSender;

pub struct HeartbeatConfig {
    pub agent_id: String,
    pub interval: Duration,
    pub version: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            agent_id: "boxflow".to_string(),
            interval: Duration::from_secs(30),
            version: None,
        }
    }
}

/// Spawn the heartbeat loop. Runs until the token is cancelled.
pub fn spawn_heartbeat(
    socket_path: impl AsRef<Path>,
    connect_timeout: Duration,
    config: HeartbeatConfig,
    token: CancellationToken,
) -> JoinHandle<()> {
    let mut sender = AgentSender::new(socket_path, connect_timeout);
    tokio::spawn(trace::with_trace_id(None, async move {
        let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(100)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut status = AgentStatus::Healthy;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sender
                        .send_heartbeat(&config.agent_id, status, config.version.clone())
                        .await
                    {
                        Ok(()) => {
                            if status != AgentStatus::Healthy {
                                tracing::info!(agent_id = %config.agent_id, "heartbeat recovered");
                            }
                            status = AgentStatus::Healthy;
                        }
                        Err(e) => {
                            tracing::debug!(
                                agent_id = %config.agent_id,
                                error = %e,
                                "heartbeat failed"
                            );
                            status = AgentStatus::Degraded;
                        }
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        tracing::info!(agent_id = %config.agent_id, "heartbeat stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FRAME_HEADER_SIZE, PROTOCOL_VERSION, decode_header};
    use crate::protocol::Message;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    async fn heartbeat_echo(listener: UnixListener, count: usize) -> Vec<Message> {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..count {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            sock.read_exact(&mut header).await.unwrap();
            let (len, _) = decode_header(&header);
            let mut body = vec![0u8; len];
            sock.read_exact(&mut body).await.unwrap();
            let msg: Message = serde_json::from_slice(&body).unwrap();

            // Reply with a heartbeat of our own, as the agent does.
            let reply = serde_json::to_vec(&json!({
                "type": "heartbeat",
                "id": "00000000-0000-0000-0000-000000000000",
                "timestamp": crate::protocol::timestamp_now(),
                "heartbeat": {"agent_id": "agent", "status": "healthy"}
            }))
            .unwrap();
            let mut wire = Vec::new();
            wire.extend_from_slice(&(reply.len() as u32).to_be_bytes());
            wire.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
            wire.extend_from_slice(&reply);
            sock.write_all(&wire).await.unwrap();
            seen.push(msg);
        }
        seen
    }

    #[tokio::test]
    async fn heartbeats_flow_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(heartbeat_echo(listener, 2));

        let token = CancellationToken::new();
        let handle = spawn_heartbeat(
            &path,
            Duration::from_secs(1),
            HeartbeatConfig {
                agent_id: "test".into(),
                interval: Duration::from_millis(120),
                version: Some("0.1.0".into()),
            },
            token.clone(),
        );

        let seen = server.await.unwrap();
        token.cancel();
        handle.await.unwrap();

        assert_eq!(seen.len(), 2);
        for msg in seen {
            match msg {
                Message::Heartbeat { heartbeat, .. } => {
                    assert_eq!(heartbeat.agent_id, "test");
                    assert_eq!(heartbeat.version.as_deref(), Some("0.1.0"));
                }
                other => panic!("expected heartbeat, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unavailable_agent_keeps_loop_alive() {
        let token = CancellationToken::new();
        let handle = spawn_heartbeat(
            "/tmp/no-such-boxflow-heartbeat.sock",
            Duration::from_millis(100),
            HeartbeatConfig {
                interval: Duration::from_millis(50),
                ..HeartbeatConfig::default()
            },
            token.clone(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        token.cancel();
        handle.await.unwrap();
    }
}
