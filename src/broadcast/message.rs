use serde::{Deserialize, Serialize};

use crate::db::types::{ScriptStage, ScriptStatus, SessionStatus};

/// Messages sent to observers over the progress channel. The `type` tag and
/// snake_case payloads are the wire contract; both the WebSocket endpoint and
/// the Redis bridge speak this format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    ConnectionEstablished {
        connection_id: String,
        timestamp: String,
    },
    Subscribed {
        scope: SubscriptionScope,
        id: String,
    },
    Unsubscribed {
        scope: SubscriptionScope,
        id: String,
    },
    ScriptUpdate(ScriptProgress),
    SessionUpdate(SessionProgress),
    Pong,
    Stats {
        connections: usize,
        script_subscriptions: usize,
        session_subscriptions: usize,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionScope {
    Script,
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptProgress {
    pub script_id: String,
    pub session_id: String,
    pub stage: ScriptStage,
    pub status: ScriptStatus,
    pub progress: i32,
    pub stage_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub event_ts: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub status: SessionStatus,
    pub total_scripts: i32,
    pub processed_count: i32,
    pub failed_count: i32,
    pub timestamp: String,
}

/// Messages observers send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeScript { script_id: String },
    UnsubscribeScript { script_id: String },
    SubscribeSession { session_id: String },
    UnsubscribeSession { session_id: String },
    Ping,
    GetStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_update_carries_type_tag() {
        let message = WsMessage::ScriptUpdate(ScriptProgress {
            script_id: "s-1".to_string(),
            session_id: "sess-1".to_string(),
            stage: ScriptStage::OcrCompleted,
            status: ScriptStatus::Processing,
            progress: 40,
            stage_description: "Text extraction completed".to_string(),
            estimated_remaining_seconds: Some(20.0),
            ocr_confidence: Some(0.91),
            evaluation_confidence: None,
            verification_confidence: None,
            error: None,
            event_ts: 1_700_000_000_000_000,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        });

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(value["type"], "script_update");
        assert_eq!(value["stage"], "ocr_completed");
        assert_eq!(value["progress"], 40);
        assert!(value.get("evaluation_confidence").is_none());
    }

    #[test]
    fn client_message_parses_subscribe() {
        let raw = r#"{"type":"subscribe_script","script_id":"abc"}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, ClientMessage::SubscribeScript { script_id: "abc".to_string() });
    }

    #[test]
    fn ping_round_trips_as_unit_variant() {
        let raw = r#"{"type":"ping"}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, ClientMessage::Ping);
        assert_eq!(serde_json::to_string(&WsMessage::Pong).unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn unknown_client_message_rejected() {
        let raw = r#"{"type":"subscribe_everything"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }
}
