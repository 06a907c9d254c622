//! Serialization layer (spec §4.2).
//!
//! Two wire dialects share one on-the-wire tagging convention for
//! non-native JSON types (`{"type": "<Kind>", "data": ...}`, spec §4.2):
//! plain JSON only revives the `Uint8Array` tag, the enhanced dialect
//! additionally revives `Date`, `Map`, `Set` and `BigInt` (SPEC_FULL §3).
//! Decode auto-detects the dialect by inspecting the first eight bytes of
//! the document (spec §6 "Enhanced dialect detection"), so older
//! plain-JSON-only endpoints keep interoperating.

use crate::message::Message;
use crate::value::RpcValue;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First eight bytes of an enhanced-dialect document (SPEC_FULL §4.2).
const ENHANCED_SENTINEL: &str = "{\"__kkrp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Json,
    Enhanced,
}

#[derive(Serialize, Deserialize)]
struct EnhancedEnvelope {
    #[serde(rename = "__kkrpc_enhanced__")]
    marker: bool,
    message: Message,
}

/// Inspect a document's leading bytes to pick a dialect (spec §4.2, §6).
pub fn detect_dialect(document: &str) -> Dialect {
    if document.len() >= ENHANCED_SENTINEL.len() && &document[..ENHANCED_SENTINEL.len()] == ENHANCED_SENTINEL {
        Dialect::Enhanced
    } else {
        Dialect::Json
    }
}

/// Encode a message as a single `\n`-terminated line in the given dialect
/// (spec §4.2 "String framing").
pub fn encode_line(message: &Message, dialect: Dialect) -> Result<String> {
    let body = match dialect {
        Dialect::Json => serde_json::to_string(message)?,
        Dialect::Enhanced => serde_json::to_string(&EnhancedEnvelope {
            marker: true,
            message: message.clone(),
        })?,
    };
    Ok(format!("{body}\n"))
}

/// Outcome of decoding one line read off a string-mode transport.
pub enum LineOutcome {
    Message(Message),
    /// A non-JSON line: pass-through diagnostic output from e.g. a child
    /// process's stdio intermixed with RPC traffic (spec §4.2).
    PassThrough(String),
}

/// Decode a single (already newline-stripped) line.
pub fn decode_line(line: &str) -> Result<LineOutcome> {
    let trimmed = line.trim_end_matches('\r');
    if !trimmed.starts_with('{') {
        return Ok(LineOutcome::PassThrough(trimmed.to_string()));
    }
    let message = match detect_dialect(trimmed) {
        Dialect::Json => serde_json::from_str::<Message>(trimmed)
            .map_err(|e| anyhow!("failed to decode plain-JSON message: {e}"))?,
        Dialect::Enhanced => serde_json::from_str::<EnhancedEnvelope>(trimmed)
            .map_err(|e| anyhow!("failed to decode enhanced message: {e}"))?
            .message,
    };
    Ok(LineOutcome::Message(message))
}

/// Buffers partial datagrams off a string-mode transport and splits on
/// `\n`, retaining the trailing partial line for the next call (spec
/// §4.5 "Reader loop").
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a freshly-read chunk and drain every complete line it
    /// completes (including lines that were already buffered).
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line = self.pending[..pos].to_string();
            self.pending.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

/// Tag a raw byte payload the way the plain-JSON replacer does (spec
/// §4.2): `{"type": "Uint8Array", "data": [...]}`. Rust has no runtime
/// `instanceof Uint8Array` check, so callers who want byte payloads to
/// survive the wire as bytes (rather than as a bare JSON number array)
/// must tag them explicitly at the call site.
pub fn tag_bytes(bytes: Vec<u8>) -> Value {
    Value::from(RpcValue::Bytes(bytes))
}

/// Revive a wire value into [`RpcValue`], honoring the tags each dialect
/// recognizes (spec §4.2: plain JSON only revives `Uint8Array`).
pub fn untag(value: &Value, dialect: Dialect) -> RpcValue {
    if let Value::Object(map) = value {
        if let (Some(Value::String(kind)), Some(data)) = (map.get("type"), map.get("data")) {
            let recognized = match dialect {
                Dialect::Json => kind == "Uint8Array",
                Dialect::Enhanced => matches!(
                    kind.as_str(),
                    "Uint8Array" | "Date" | "Map" | "Set" | "BigInt"
                ),
            };
            if recognized {
                if let Some(revived) = revive_tagged(kind, data) {
                    return revived;
                }
            }
        }
    }
    match value {
        Value::Array(items) => {
            RpcValue::Array(items.iter().map(|v| untag(v, dialect)).collect())
        }
        Value::Object(map) => RpcValue::Object(
            map.iter().map(|(k, v)| (k.clone(), untag(v, dialect))).collect(),
        ),
        other => RpcValue::from(other.clone()),
    }
}

fn revive_tagged(kind: &str, data: &Value) -> Option<RpcValue> {
    match kind {
        "Uint8Array" => {
            let bytes = data
                .as_array()?
                .iter()
                .map(|v| v.as_u64().map(|n| n as u8))
                .collect::<Option<Vec<u8>>>()?;
            Some(RpcValue::Bytes(bytes))
        }
        "Date" => Some(RpcValue::Date(data.as_i64()?)),
        "BigInt" => data.as_str()?.parse::<i128>().ok().map(RpcValue::BigInt),
        "Map" => {
            let entries = data
                .as_array()?
                .iter()
                .filter_map(|pair| {
                    let pair = pair.as_array()?;
                    let (k, v) = (pair.first()?, pair.get(1)?);
                    Some((untag(k, Dialect::Enhanced), untag(v, Dialect::Enhanced)))
                })
                .collect();
            Some(RpcValue::Map(entries))
        }
        "Set" => {
            let items = data
                .as_array()?
                .iter()
                .map(|v| untag(v, Dialect::Enhanced))
                .collect();
            Some(RpcValue::Set(items))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn detects_plain_json_by_default() {
        assert_eq!(detect_dialect("{\"id\":\"1\"}"), Dialect::Json);
    }

    #[test]
    fn detects_enhanced_by_sentinel() {
        let msg = Message::new("1", MessageType::Request);
        let line = encode_line(&msg, Dialect::Enhanced).unwrap();
        assert_eq!(detect_dialect(line.trim_end()), Dialect::Enhanced);
    }

    #[test]
    fn enhanced_round_trips_through_decode() {
        let mut msg = Message::new("abc", MessageType::Request);
        msg.method = "math.add".to_string();
        msg.args = serde_json::json!([1, 2]);
        let line = encode_line(&msg, Dialect::Enhanced).unwrap();
        match decode_line(line.trim_end()).unwrap() {
            LineOutcome::Message(decoded) => {
                assert_eq!(decoded.id, "abc");
                assert_eq!(decoded.method, "math.add");
            }
            LineOutcome::PassThrough(_) => panic!("expected a message"),
        }
    }

    #[test]
    fn non_json_lines_pass_through() {
        match decode_line("some debug output from a child process").unwrap() {
            LineOutcome::PassThrough(text) => assert!(text.contains("debug output")),
            LineOutcome::Message(_) => panic!("expected pass-through"),
        }
    }

    #[test]
    fn frame_buffer_splits_and_retains_partial() {
        let mut buf = FrameBuffer::new();
        let lines = buf.push("{\"a\":1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
        let more = buf.push(":3}\n");
        assert_eq!(more, vec!["{\"c\":3}".to_string()]);
    }

    #[test]
    fn bytes_tag_round_trips_via_untag() {
        let tagged = tag_bytes(vec![9, 8, 7]);
        let revived = untag(&tagged, Dialect::Json);
        assert_eq!(revived, RpcValue::Bytes(vec![9, 8, 7]));
    }

    #[test]
    fn plain_dialect_does_not_revive_date_tag() {
        let tagged = Value::from(RpcValue::Date(123));
        let revived = untag(&tagged, Dialect::Json);
        assert!(matches!(revived, RpcValue::Object(_)));
    }
}
