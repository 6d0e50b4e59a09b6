use serde::{Deserialize, Serialize};

use crate::engine::{EventOutcome, MapView};
use crate::geo::FeatureKey;

/// Raw pointer and control events forwarded by the view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Pointer entered a feature
    PointerEnter { layer: String, feature: FeatureKey },
    /// Pointer left a feature
    PointerLeave { layer: String, feature: FeatureKey },
    /// Click on the map background
    MapClick { lat: f64, lon: f64 },
    /// Click on a feature
    FeatureClick { layer: String, feature: FeatureKey },
    /// Show or hide a layer
    SetVisibility { layer: String, visible: bool },
    /// Re-fetch one source
    Refresh { source: String },
}

impl ViewEvent {
    /// Get the event type name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::PointerEnter { .. } => "pointer_enter",
            ViewEvent::PointerLeave { .. } => "pointer_leave",
            ViewEvent::MapClick { .. } => "map_click",
            ViewEvent::FeatureClick { .. } => "feature_click",
            ViewEvent::SetVisibility { .. } => "set_visibility",
            ViewEvent::Refresh { .. } => "refresh",
        }
    }
}

/// Client to Server messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Forward a view event to the engine
    Event { seq: u64, event: ViewEvent },
    /// Ping for keepalive
    Ping { seq: u64 },
}

/// Server to Client messages
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full view snapshot, sent on connect and after every change
    View { view: MapView },
    /// Acknowledgment of client event
    Ack {
        ack_seq: u64,
        status: AckStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<EventOutcome>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Protocol-level error
    Error { code: ErrorCode, message: String },
    /// Pong response (to client's Ping)
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidMessage,
    MessageTooLarge,
}

impl ClientMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ClientMessage::Event { .. } => "event",
            ClientMessage::Ping { .. } => "ping",
        }
    }
}

impl ServerMessage {
    /// Get the message type name for metrics
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::View { .. } => "view",
            ServerMessage::Ack { .. } => "ack",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event_message() {
        let json = r#"{"type":"event","seq":3,"event":{"type":"map_click","lat":31.905,"lon":36.581}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Event {
                seq: 3,
                event: ViewEvent::MapClick {
                    lat: 31.905,
                    lon: 36.581
                }
            }
        );
        assert_eq!(msg.message_type(), "event");
    }

    #[test]
    fn test_decode_hover_event() {
        let json = r#"{"type":"pointer_enter","layer":"schools","feature":{"element":"relation","id":12}}"#;
        let event: ViewEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.name(), "pointer_enter");
        assert_eq!(
            event,
            ViewEvent::PointerEnter {
                layer: "schools".to_string(),
                feature: FeatureKey::relation(12),
            }
        );
    }

    #[test]
    fn test_feature_event_requires_element_type() {
        let json = r#"{"type":"feature_click","layer":"schools","feature":{"id":12}}"#;
        assert!(serde_json::from_str::<ViewEvent>(json).is_err());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ViewEvent>(r#"{"type":"drag","x":1}"#).is_err());
    }

    #[test]
    fn test_ack_omits_empty_fields() {
        let msg = ServerMessage::Ack {
            ack_seq: 9,
            status: AckStatus::Rejected,
            outcome: None,
            reason: Some("Layer not found: parks".to_string()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["status"], "rejected");
        assert!(json.get("outcome").is_none());
        assert_eq!(msg.message_type(), "ack");
    }
}
