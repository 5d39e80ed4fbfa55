//! Message protocol definitions
//!
//! Every outbound frame is an `{"event": ..., "data": ...}` envelope.
//! Inbound frames share the same shape; only `identify`, `ping` and
//! `connectionQuality` are acted on.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;
use crate::types::ClientKind;

/// Event names published by the restaurant backend
pub mod events {
    pub const IDENTIFY: &str = "identify";
    pub const IDENTIFIED: &str = "identified";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const CONNECTION_QUALITY: &str = "connectionQuality";

    pub const NEW_ORDER_PLACED: &str = "newOrderPlaced";
    pub const ORDER_STATUS_CHANGED: &str = "orderStatusChanged";
    pub const PAYMENT_SUCCESS: &str = "paymentSuccess";
    pub const ORDER_DELETED: &str = "orderDeleted";
    pub const NEW_FOOD_ADDED: &str = "newFoodAdded";
    pub const FOOD_UPDATED: &str = "foodUpdated";
    pub const FOOD_DELETED: &str = "foodDeleted";
}

/// The unit of delivery
///
/// Immutable once published; the dispatcher shares one `Arc` of it across
/// every recipient queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build an envelope from any serializable payload
    pub fn from_serializable<T: Serialize + ?Sized>(
        event: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event, serde_json::to_value(data)?))
    }

    /// Acknowledgment sent after a successful identify
    pub fn identified() -> Self {
        Self::new(
            events::IDENTIFIED,
            serde_json::json!({ "status": "success" }),
        )
    }

    /// Reply to a ping, echoing its payload
    pub fn pong(data: Value) -> Self {
        Self::new(events::PONG, data)
    }
}

/// Payload of an `identify` frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentifyPayload {
    #[serde(rename = "type")]
    pub kind: ClientKind,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl IdentifyPayload {
    /// User id, treating an empty string as absent
    pub fn user_id(&self) -> Option<String> {
        self.user_id.clone().filter(|id| !id.is_empty())
    }
}

/// Client → Server request, as understood by the reader task
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Identify(IdentifyPayload),
    Ping(Value),
    /// Asks for uptime and idle time of this connection
    ConnectionQuality,
    /// Any other event name; ignored for forward compatibility
    Other(String),
}

impl ClientRequest {
    /// Parse a raw inbound frame
    ///
    /// Fails when the frame is not an envelope, or when it is an `identify`
    /// whose payload does not match the handshake shape.
    pub fn parse(raw: &[u8]) -> Result<Self, HubError> {
        let envelope: EventEnvelope = serde_json::from_slice(raw)
            .map_err(|e| HubError::MalformedFrame(e.to_string()))?;

        match envelope.event.as_str() {
            events::IDENTIFY => {
                let payload = serde_json::from_value(envelope.data)
                    .map_err(|e| HubError::MalformedFrame(format!("identify: {}", e)))?;
                Ok(ClientRequest::Identify(payload))
            }
            events::PING => Ok(ClientRequest::Ping(envelope.data)),
            events::CONNECTION_QUALITY => Ok(ClientRequest::ConnectionQuality),
            _ => Ok(ClientRequest::Other(envelope.event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identify() {
        let raw = br#"{"event":"identify","data":{"type":"admin","userId":"u-1"}}"#;
        match ClientRequest::parse(raw).unwrap() {
            ClientRequest::Identify(payload) => {
                assert_eq!(payload.kind, ClientKind::Admin);
                assert_eq!(payload.user_id(), Some("u-1".to_string()));
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_identify_empty_user_id_is_absent() {
        let raw = br#"{"event":"identify","data":{"type":"user","userId":""}}"#;
        let ClientRequest::Identify(payload) = ClientRequest::parse(raw).unwrap() else {
            panic!("Wrong variant");
        };
        assert_eq!(payload.user_id(), None);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let raw = br#"{"event":"orderUpdated","data":{"id":1}}"#;
        assert_eq!(
            ClientRequest::parse(raw).unwrap(),
            ClientRequest::Other("orderUpdated".to_string())
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            ClientRequest::parse(b"not json"),
            Err(HubError::MalformedFrame(_))
        ));
        assert!(matches!(
            ClientRequest::parse(br#"{"data":{}}"#),
            Err(HubError::MalformedFrame(_))
        ));
        assert!(matches!(
            ClientRequest::parse(br#"{"event":"identify","data":{"type":"anonymous"}}"#),
            Err(HubError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_envelope_wire_shape() {
        let json = serde_json::to_string(&EventEnvelope::identified()).unwrap();
        assert_eq!(json, r#"{"event":"identified","data":{"status":"success"}}"#);
    }

    #[test]
    fn test_parse_connection_quality_without_data() {
        assert_eq!(
            ClientRequest::parse(br#"{"event":"connectionQuality"}"#).unwrap(),
            ClientRequest::ConnectionQuality
        );
    }

    #[test]
    fn test_ping_echoes_payload() {
        let raw = br#"{"event":"ping","data":{"t":5}}"#;
        let ClientRequest::Ping(data) = ClientRequest::parse(raw).unwrap() else {
            panic!("Wrong variant");
        };
        assert_eq!(EventEnvelope::pong(data).data["t"], 5);
    }
}
