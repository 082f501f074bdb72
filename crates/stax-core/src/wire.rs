//! Wire protocol - one JSON object per message over the streaming channel
//!
//! The vocabulary is a fixed, small set of `type` tags. Unknown tags decode
//! to [`ServerMessage::Unknown`] and are ignored by consumers so the
//! protocol can grow without breaking older clients.

use serde::{Deserialize, Serialize};

/// Messages the client sends to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start a backfill stream of events newer than `since`
    #[serde(rename = "sync.stream.request")]
    StreamRequest {
        /// Checkpoint timestamp; `None` on the first-ever sync
        since: Option<String>,
    },
    /// Push locally pending events
    #[serde(rename = "sync.push")]
    Push { events: Vec<WireEvent> },
    /// Liveness probe
    #[serde(rename = "heartbeat")]
    Heartbeat,
}

/// Messages the server sends to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Stream opener declaring how many events will follow
    #[serde(rename = "sync.stream.start")]
    StreamStart {
        #[serde(rename = "totalEvents")]
        total_events: u64,
    },
    /// One batch of the backfill; events ride out-of-band of the typed
    /// envelope as raw JSON objects decoded by the codec
    #[serde(rename = "sync.stream.batch")]
    StreamBatch {
        #[serde(rename = "batchIndex")]
        batch_index: u64,
        #[serde(rename = "isLast")]
        is_last: bool,
        #[serde(default)]
        events: Vec<serde_json::Value>,
    },
    /// Stream completed; the checkpoint may advance to `newCheckpoint`
    #[serde(rename = "sync.stream.complete")]
    StreamComplete {
        #[serde(rename = "processedEvents")]
        processed_events: u64,
        #[serde(rename = "newCheckpoint")]
        new_checkpoint: String,
    },
    /// Stream failed server-side
    #[serde(rename = "sync.stream.error")]
    StreamError {
        error: String,
        #[serde(default)]
        code: Option<String>,
    },
    /// Acknowledgment of a `sync.push`
    #[serde(rename = "sync.push.ack")]
    PushAck {
        #[serde(rename = "eventIds")]
        event_ids: Vec<String>,
    },
    /// Response to a heartbeat
    #[serde(rename = "heartbeat.ack")]
    HeartbeatAck,
    /// Any tag this client does not know about
    #[serde(other)]
    Unknown,
}

/// An event envelope as it appears on the wire (camelCase JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: String,
    pub entity_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub timestamp: String,
    pub payload_version: i32,
    pub base_revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stream_request_tag() {
        let message = ClientMessage::StreamRequest {
            since: Some("2024-01-15T10:30:45.123Z".to_string()),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "sync.stream.request");
        assert_eq!(json["since"], "2024-01-15T10:30:45.123Z");

        let first_sync = serde_json::to_value(ClientMessage::StreamRequest { since: None }).unwrap();
        assert!(first_sync["since"].is_null());
    }

    #[test]
    fn test_server_message_roundtrip() {
        let raw = r#"{"type":"sync.stream.batch","batchIndex":2,"isLast":true,"events":[{"id":"x"}]}"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message,
            ServerMessage::StreamBatch {
                batch_index: 2,
                is_last: true,
                events: vec![serde_json::json!({"id": "x"})],
            }
        );
    }

    #[test]
    fn test_stream_complete_fields() {
        let raw = r#"{"type":"sync.stream.complete","processedEvents":250,"newCheckpoint":"2024-01-15T10:30:45Z"}"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        let ServerMessage::StreamComplete {
            processed_events,
            new_checkpoint,
        } = message
        else {
            panic!("wrong variant");
        };
        assert_eq!(processed_events, 250);
        assert_eq!(new_checkpoint, "2024-01-15T10:30:45Z");
    }

    #[test]
    fn test_stream_error_code_optional() {
        let raw = r#"{"type":"sync.stream.error","error":"index rebuild in progress"}"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            message,
            ServerMessage::StreamError {
                error: "index rebuild in progress".to_string(),
                code: None,
            }
        );
    }

    #[test]
    fn test_unknown_tag_is_ignored_not_fatal() {
        let raw = r#"{"type":"sync.stream.telemetry","spanId":"abc"}"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(message, ServerMessage::Unknown);
    }

    #[test]
    fn test_heartbeat_tags() {
        assert_eq!(
            serde_json::to_string(&ClientMessage::Heartbeat).unwrap(),
            r#"{"type":"heartbeat"}"#
        );
        let ack: ServerMessage = serde_json::from_str(r#"{"type":"heartbeat.ack"}"#).unwrap();
        assert_eq!(ack, ServerMessage::HeartbeatAck);
    }

    #[test]
    fn test_wire_event_camel_case() {
        let raw = r#"{
            "id":"0191a0b0-0000-7000-8000-000000000001",
            "type":"task.updated",
            "payload":"{}",
            "entityId":"task-1",
            "userId":"user-1",
            "deviceId":"device-a",
            "timestamp":"2024-01-15T10:30:45.123Z",
            "payloadVersion":2,
            "baseRevision":4
        }"#;
        let event: WireEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "task.updated");
        assert_eq!(event.entity_id, "task-1");
        assert_eq!(event.base_revision, 4);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entityId"], "task-1");
        assert_eq!(json["payloadVersion"], 2);
    }

    #[test]
    fn test_wire_event_missing_device_id() {
        let raw = r#"{
            "id":"0191a0b0-0000-7000-8000-000000000002",
            "type":"tag.created",
            "payload":"{}",
            "entityId":"tag-1",
            "userId":"user-1",
            "timestamp":"2024-01-15T10:30:45Z",
            "payloadVersion":1,
            "baseRevision":0
        }"#;
        let event: WireEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.device_id, None);
    }
}
