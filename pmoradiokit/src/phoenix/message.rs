//! Phoenix V2 JSON frames: `[join_ref, ref, topic, event, payload]`.

use crate::transport::JoinReply;
use serde_json::{json, Value};

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_ERROR: &str = "phx_error";
pub const PHX_CLOSE: &str = "phx_close";
pub const HEARTBEAT: &str = "heartbeat";
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Serializer version announced in the socket URL
pub const VSN: &str = "2.0.0";

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub join_ref: Option<String>,
    pub msg_ref: Option<String>,
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

type Frame = (Option<String>, Option<String>, String, String, Value);

impl Message {
    pub fn heartbeat(msg_ref: String) -> Self {
        Self {
            join_ref: None,
            msg_ref: Some(msg_ref),
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&(
            &self.join_ref,
            &self.msg_ref,
            &self.topic,
            &self.event,
            &self.payload,
        ))
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        let (join_ref, msg_ref, topic, event, payload): Frame = serde_json::from_str(text)?;
        Ok(Self {
            join_ref,
            msg_ref,
            topic,
            event,
            payload,
        })
    }
}

/// Map a `phx_reply` payload (`{"status": .., "response": ..}`) to a join outcome.
///
/// The error reason is `response.reason` when it is a string, otherwise the
/// JSON text of the whole response.
pub fn join_reply(payload: &Value) -> JoinReply {
    let response = payload.get("response").cloned().unwrap_or(Value::Null);
    match payload.get("status").and_then(Value::as_str) {
        Some("ok") => JoinReply::Ok(response),
        _ => {
            let reason = match response.get("reason").and_then(Value::as_str) {
                Some(reason) => reason.to_string(),
                None => response.to_string(),
            };
            JoinReply::Error(reason)
        }
    }
}

/// Synthetic reply used to fail pending joins when the socket goes away
pub fn error_reply(reason: &str) -> Value {
    json!({"status": "error", "response": {"reason": reason}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_join() {
        let msg = Message {
            join_ref: Some("1".into()),
            msg_ref: Some("1".into()),
            topic: "broadcast:metadata:kexp".into(),
            event: PHX_JOIN.into(),
            payload: json!({}),
        };
        assert_eq!(
            msg.encode().unwrap(),
            r#"["1","1","broadcast:metadata:kexp","phx_join",{}]"#
        );
    }

    #[test]
    fn test_encode_heartbeat_has_null_join_ref() {
        let encoded = Message::heartbeat("7".into()).encode().unwrap();
        assert_eq!(encoded, r#"[null,"7","phoenix","heartbeat",{}]"#);
    }

    #[test]
    fn test_decode_push() {
        let msg = Message::decode(
            r#"["1",null,"broadcast:metadata:kexp","update",{"metadata":{"duration":5000},"updated_at":"2017-06-01T12:00:00Z"}]"#,
        )
        .unwrap();
        assert_eq!(msg.join_ref.as_deref(), Some("1"));
        assert!(msg.msg_ref.is_none());
        assert_eq!(msg.event, "update");
        assert_eq!(msg.payload["metadata"]["duration"], json!(5000));
    }

    #[test]
    fn test_decode_rejects_object_frames() {
        assert!(Message::decode(r#"{"topic":"x","event":"y"}"#).is_err());
        assert!(Message::decode(r#"["1","1","x"]"#).is_err());
    }

    #[test]
    fn test_join_reply_mapping() {
        assert_eq!(
            join_reply(&json!({"status": "ok", "response": {"messages": []}})),
            JoinReply::Ok(json!({"messages": []}))
        );
        assert_eq!(
            join_reply(&json!({"status": "error", "response": {"reason": "unauthorized"}})),
            JoinReply::Error("unauthorized".into())
        );
        assert_eq!(
            join_reply(&json!({"status": "error", "response": {"code": 3}})),
            JoinReply::Error(r#"{"code":3}"#.into())
        );
        assert_eq!(
            join_reply(&error_reply("socket closed")),
            JoinReply::Error("socket closed".into())
        );
    }
}
