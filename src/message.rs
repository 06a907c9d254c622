//! The wire message (spec §3) and its satellite types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The six message kinds the channel dispatches (spec §3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Callback,
    Get,
    Set,
    Construct,
}

/// Wire serialization dialect tag (spec §3 `version`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationVersion {
    Json,
    Enhanced,
}

/// A slot descriptor for a transferable value embedded in a payload
/// (spec §3 `TransferSlot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransferSlot {
    /// A natively-transferable value routed through the transport itself.
    Raw { metadata: Value },
    /// A value serialized by a named custom transfer handler.
    Handler { #[serde(rename = "handlerName")] handler_name: String, metadata: Value },
}

/// The wire unit exchanged by the channel (spec §3 `Message`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Dotted path for request/construct/callback; callback id for
    /// callback messages; empty for response/get/set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,

    /// Positional args, or the `{result}`/`{error}` envelope for responses,
    /// or an empty object for get/set.
    #[serde(default = "default_args")]
    pub args: Value,

    /// Property path segments, get/set only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,

    /// Value to assign, set only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Informational — the marker embedded in `args` is authoritative
    /// (spec §3, §9 open question).
    #[serde(rename = "callbackIds", default, skip_serializing_if = "Option::is_none")]
    pub callback_ids: Option<Vec<String>>,

    #[serde(rename = "transferSlots", default, skip_serializing_if = "Option::is_none")]
    pub transfer_slots: Option<Vec<TransferSlot>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<SerializationVersion>,
}

fn default_args() -> Value {
    Value::Object(Default::default())
}

impl Message {
    pub fn new(id: impl Into<String>, kind: MessageType) -> Self {
        Self {
            id: id.into(),
            kind,
            method: String::new(),
            args: default_args(),
            path: None,
            value: None,
            callback_ids: None,
            transfer_slots: None,
            version: None,
        }
    }

    pub fn response_ok(id: impl Into<String>, result: Value) -> Self {
        let mut msg = Self::new(id, MessageType::Response);
        msg.args = serde_json::json!({ "result": result });
        msg
    }

    pub fn response_err(id: impl Into<String>, error: EnhancedError) -> Self {
        let mut msg = Self::new(id, MessageType::Response);
        msg.args = serde_json::json!({ "error": error });
        msg
    }
}

/// The structured-clone envelope (spec §3 `WireEnvelope`, v2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub version: u8,
    pub payload: Message,
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "transferSlots")]
    pub transfer_slots: Option<Vec<TransferSlot>>,
    /// The raw values pulled out of the payload by the transferable
    /// rewrite (spec §3 `WireEnvelope` `__transferredValues`), re-attached
    /// to the payload before dispatch on the receiving side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "__transferredValues")]
    pub transferred_values: Option<Vec<Value>>,
}

impl WireEnvelope {
    pub fn new(
        payload: Message,
        transfer_slots: Option<Vec<TransferSlot>>,
        transferred_values: Option<Vec<Value>>,
    ) -> Self {
        Self {
            version: 2,
            payload,
            encoding: "object".to_string(),
            transfer_slots,
            transferred_values,
        }
    }
}

/// The wire form of a thrown error (spec §3 `EnhancedError`): name,
/// message, optional stack/cause, plus every other enumerable own
/// property of the original error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<EnhancedError>>,
    /// Every other enumerable own property, preserved across the wire
    /// (spec §3).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl EnhancedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
            extra: Default::default(),
        }
    }

    /// Build an `EnhancedError` from a generic `RpcError`'s local
    /// representation, used when serializing an error a handler threw.
    pub fn from_display(name: &str, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut enhanced = Self::new(name, err.to_string());
        if let Some(source) = err.source() {
            enhanced.cause = Some(Box::new(Self::from_display("Error", source)));
        }
        enhanced
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for EnhancedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// The literal prefix identifying a callback placeholder in arguments
/// (spec §6).
pub const CALLBACK_PREFIX: &str = "__callback__";

/// The literal prefix identifying a transferable slot token (spec §6).
pub const TRANSFER_SLOT_PREFIX: &str = "__kkrpc_transfer_";

pub fn callback_marker(id: &str) -> String {
    format!("{CALLBACK_PREFIX}{id}")
}

pub fn parse_callback_marker(value: &str) -> Option<&str> {
    value.strip_prefix(CALLBACK_PREFIX)
}

pub fn transfer_slot_token(index: usize) -> String {
    format!("{TRANSFER_SLOT_PREFIX}{index}")
}

pub fn parse_transfer_slot_token(value: &str) -> Option<usize> {
    value.strip_prefix(TRANSFER_SLOT_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_marker_round_trips() {
        let marker = callback_marker("abc-123");
        assert_eq!(parse_callback_marker(&marker), Some("abc-123"));
    }

    #[test]
    fn transfer_slot_token_round_trips() {
        let token = transfer_slot_token(3);
        assert_eq!(parse_transfer_slot_token(&token), Some(3));
    }

    #[test]
    fn message_serializes_request_without_empty_fields() {
        let mut msg = Message::new("id-1", MessageType::Request);
        msg.method = "math.add".to_string();
        msg.args = serde_json::json!([1, 2]);
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"request\""));
        assert!(!encoded.contains("\"path\""));
    }

    #[test]
    fn enhanced_error_preserves_custom_properties() {
        let json = serde_json::json!({
            "name": "ValidationError",
            "message": "bad input",
            "field": "username"
        });
        let err: EnhancedError = serde_json::from_value(json).unwrap();
        assert_eq!(err.extra.get("field").unwrap(), "username");
    }
}
