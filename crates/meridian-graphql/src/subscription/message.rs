//! graphql-transport-ws protocol frames and close reasons.
//!
//! See: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::Operation;
use crate::result::GraphQLError;

/// Wire frames exchanged over a subscription socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client -> Server: initialize the connection.
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Server -> Client: connection acknowledged.
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction: liveness probe. Answered with a payload-echoing
    /// `pong` in any state.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Either direction: liveness answer.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Client -> Server: start the operation.
    Subscribe { id: String, payload: Operation },
    /// Server -> Client: operation result.
    Next { id: String, payload: Value },
    /// Server -> Client: terminal operation error.
    Error {
        id: String,
        payload: Vec<GraphQLError>,
    },
    /// Server -> Client: operation complete.
    Complete { id: String },
}

/// The typed cause accompanying every subscription closure.
///
/// Exactly one reason is reported per session, at the first transition into
/// the closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller aborted the session.
    Client,
    /// The server completed the operation gracefully.
    Server,
    /// The server reported a terminal error frame.
    ServerError,
    /// A timeout policy closed the session.
    Timeout,
    /// Transport failure or protocol violation.
    Error,
}

impl CloseReason {
    /// WebSocket close code sent when the session closes the socket.
    pub(crate) fn close_code(self) -> u16 {
        match self {
            Self::Timeout => 4408,
            _ => 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_serialization_tags() {
        let frame = Frame::ConnectionInit {
            payload: Some(json!({"token": "t"})),
        };
        let text = serde_json::to_string(&frame).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connection_init");
        assert_eq!(value["payload"]["token"], "t");
    }

    #[test]
    fn test_ack_without_payload_parses() {
        let frame: Frame = serde_json::from_str(r#"{"type":"connection_ack"}"#).unwrap();
        assert!(matches!(frame, Frame::ConnectionAck { payload: None }));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"surprise"}"#).is_err());
    }

    #[test]
    fn test_subscribe_carries_operation() {
        let frame = Frame::Subscribe {
            id: "1".into(),
            payload: Operation::query("subscription { events }"),
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["id"], "1");
        assert_eq!(value["payload"]["query"], "subscription { events }");
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::Timeout.close_code(), 4408);
        assert_eq!(CloseReason::Client.close_code(), 1000);
        assert_eq!(CloseReason::Server.close_code(), 1000);
    }
}
