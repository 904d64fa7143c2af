//! The frame envelope. Every frame is a JSON object with `type`, `payload`,
//! a sender-side sequence number `seq` and a millisecond timestamp `ts`.
//! Responses additionally echo the request's `seq` as `reqSeq` and carry a
//! `success` flag plus an optional `error` string.

use crate::client::ClientMessage;
use crate::server::ServerMessage;
use serde::{Deserialize, Serialize};

/// An inbound frame as read off the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub message: ClientMessage,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub ts: u64,
}

/// An outbound frame. `seq` is assigned per connection in send order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub message: ServerMessage,
    pub seq: u64,
    pub ts: u64,
    #[serde(
        rename = "reqSeq",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub req_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AuthPayload, EmptyPayload};
    use crate::error::ErrorCode;
    use crate::server::{ErrorPayload, PongPayload};

    #[test]
    fn client_envelope_round_trip() {
        let text = r#"{"type":"auth","payload":{"token":"abc"},"seq":1,"ts":1700000000000}"#;
        let envelope: ClientEnvelope = serde_json::from_str(text).unwrap();
        assert_eq!(
            envelope.message,
            ClientMessage::Auth(AuthPayload { token: "abc".into() })
        );
        assert_eq!(envelope.seq, 1);
        let back = serde_json::to_string(&envelope).unwrap();
        let again: ClientEnvelope = serde_json::from_str(&back).unwrap();
        assert_eq!(again, envelope);
    }

    #[test]
    fn seq_defaults_to_zero() {
        let text = r#"{"type":"ping","payload":{}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(text).unwrap();
        assert_eq!(envelope.message, ClientMessage::Ping(EmptyPayload {}));
        assert_eq!(envelope.seq, 0);
    }

    #[test]
    fn response_fields_are_flat() {
        let envelope = ServerEnvelope {
            message: ServerMessage::Error(ErrorPayload {
                code: ErrorCode::RateLimited,
                message: None,
            }),
            seq: 9,
            ts: 12,
            req_seq: Some(4),
            success: Some(false),
            error: Some("RATE_LIMITED".into()),
        };
        let v = serde_json::to_value(&envelope).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["reqSeq"], 4);
        assert_eq!(v["success"], false);
    }

    #[test]
    fn pong_has_empty_payload() {
        let envelope = ServerEnvelope {
            message: ServerMessage::Pong(PongPayload {}),
            seq: 1,
            ts: 2,
            req_seq: Some(7),
            success: Some(true),
            error: None,
        };
        let text = serde_json::to_string(&envelope).unwrap();
        assert!(text.contains("\"payload\":{}"));
    }
}
