//! Message shapes exchanged with the sidecar agent.
//!
//! Every message carries a UUID `id`, a `type` discriminator and an
//! ISO-8601 UTC timestamp with millisecond precision and a single `Z`
//! suffix. The decoder additionally accepts `+00:00` offsets and the
//! historical doubled `+00:00Z` suffix.

use chrono::{DateTime, Utc};
use serde_json::Value;

use boxflow_api::trace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventPayload {
    pub event_type: String,
    pub source: String,
    pub priority: Priority,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CommandPayload {
    pub command: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatPayload {
    pub agent_id: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponsePayload {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponsePayload {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// One wire message. The `type` field discriminates which payload key is
/// present next to the common envelope fields.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Event {
        id: String,
        timestamp: String,
        event: EventPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    Command {
        id: String,
        timestamp: String,
        command: CommandPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    Heartbeat {
        id: String,
        timestamp: String,
        heartbeat: HeartbeatPayload,
    },
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        response: ResponsePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
}

impl Message {
    pub fn event(
        event_type: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        priority: Priority,
        correlation_id: Option<String>,
    ) -> Self {
        Message::Event {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: timestamp_now(),
            event: EventPayload {
                event_type: event_type.into(),
                source: source.into(),
                priority,
                data,
            },
            correlation_id: correlation_id.or_else(|| Some(trace::get_trace_id())),
        }
    }

    pub fn command(
        command: impl Into<String>,
        params: Value,
        correlation_id: Option<String>,
    ) -> Self {
        Message::Command {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: timestamp_now(),
            command: CommandPayload { command: command.into(), params },
            correlation_id: correlation_id.or_else(|| Some(trace::get_trace_id())),
        }
    }

    pub fn heartbeat(
        agent_id: impl Into<String>,
        status: AgentStatus,
        version: Option<String>,
    ) -> Self {
        Message::Heartbeat {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: timestamp_now(),
            heartbeat: HeartbeatPayload { agent_id: agent_id.into(), status, version },
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Message::Event { .. } => "event",
            Message::Command { .. } => "command",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Response { .. } => "response",
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Event { id, .. }
            | Message::Command { id, .. }
            | Message::Heartbeat { id, .. } => Some(id),
            Message::Response { id, .. } => id.as_deref(),
        }
    }
}

/// Current UTC time as ISO-8601 with millisecond precision and one `Z`.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse a message timestamp. Accepts the canonical `…Z` form, a
/// `…+00:00` offset, and the doubled `…+00:00Z` suffix older senders
/// produced.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = match raw.strip_suffix('Z') {
        Some(rest) if rest.ends_with("+00:00") => rest.to_string(),
        _ => raw.to_string(),
    };
    DateTime::parse_from_rfc3339(&cleaned)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_wire_shape() {
        let msg = Message::event(
            "subscription_updated",
            json!({"servers_count": 3}),
            "boxflow",
            Priority::Normal,
            Some("abc12345".into()),
        );
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], json!("event"));
        assert_eq!(wire["event"]["event_type"], json!("subscription_updated"));
        assert_eq!(wire["event"]["priority"], json!("normal"));
        assert_eq!(wire["correlation_id"], json!("abc12345"));
        assert!(wire["id"].as_str().unwrap().len() >= 32);
    }

    #[test]
    fn response_parses_from_agent_json() {
        let raw = json!({
            "type": "response",
            "response": {"status": "success", "data": {"pong": true}}
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        match msg {
            Message::Response { response, .. } => {
                assert!(response.is_success());
                assert_eq!(response.data.unwrap()["pong"], json!(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn error_response_carries_code() {
        let raw = json!({
            "type": "response",
            "response": {
                "status": "error",
                "error": {"code": "EBADCONF", "message": "invalid config"}
            }
        });
        let msg: Message = serde_json::from_value(raw).unwrap();
        match msg {
            Message::Response { response, .. } => {
                assert!(!response.is_success());
                assert_eq!(response.error.unwrap().code, "EBADCONF");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn timestamp_has_single_z_and_millis() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(!ts.ends_with("ZZ"));
        // 2026-08-01T12:34:56.789Z
        assert_eq!(ts.len(), 24);
        assert!(parse_timestamp(&ts).is_some());
    }

    #[test]
    fn timestamp_parser_accepts_historical_forms() {
        assert!(parse_timestamp("2026-08-01T10:00:00.123Z").is_some());
        assert!(parse_timestamp("2026-08-01T10:00:00.123+00:00").is_some());
        assert!(parse_timestamp("2026-08-01T10:00:00.123+00:00Z").is_some());
        assert!(parse_timestamp("not a time").is_none());
    }

    #[test]
    fn heartbeat_omits_absent_version() {
        let msg = Message::heartbeat("boxflow", AgentStatus::Healthy, None);
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["heartbeat"]["status"], json!("healthy"));
        assert!(wire["heartbeat"].get("version").is_none());
    }
}
