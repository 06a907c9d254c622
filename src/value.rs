//! `RpcValue` — the in-memory representation backing the enhanced
//! serialization dialect (SPEC_FULL §3 supplement).
//!
//! Plain JSON only round-trips `serde_json::Value`'s scalar/collection
//! set. The enhanced dialect additionally preserves dates, maps, sets and
//! big integers (spec §4.2), so it needs a richer in-memory type. Both
//! dialects are expressed in terms of this one type; the plain-JSON codec
//! narrows it back down to `serde_json::Value` on encode and widens on
//! decode.

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Number(Number),
    BigInt(i128),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Array(Vec<RpcValue>),
    Map(Vec<(RpcValue, RpcValue)>),
    Set(Vec<RpcValue>),
    Object(Vec<(String, RpcValue)>),
}

impl From<Value> for RpcValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RpcValue::Null,
            Value::Bool(b) => RpcValue::Bool(b),
            Value::Number(n) => RpcValue::Number(n),
            Value::String(s) => RpcValue::String(s),
            Value::Array(items) => RpcValue::Array(items.into_iter().map(RpcValue::from).collect()),
            Value::Object(map) => {
                RpcValue::Object(map.into_iter().map(|(k, v)| (k, RpcValue::from(v))).collect())
            }
        }
    }
}

/// Narrowing conversion back to plain JSON. Dialect-specific types
/// (`BigInt`, `Bytes`, `Date`, `Map`, `Set`) are encoded using the same
/// tagged-object convention the plain-JSON replacer uses for byte arrays
/// (spec §4.2): `{"type": "<Kind>", "data": ...}`.
impl From<RpcValue> for Value {
    fn from(value: RpcValue) -> Self {
        match value {
            RpcValue::Null => Value::Null,
            RpcValue::Bool(b) => Value::Bool(b),
            RpcValue::Number(n) => Value::Number(n),
            RpcValue::String(s) => Value::String(s),
            RpcValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            RpcValue::Object(entries) => {
                let mut map = Map::new();
                for (k, v) in entries {
                    map.insert(k, Value::from(v));
                }
                Value::Object(map)
            }
            RpcValue::BigInt(n) => tagged("BigInt", Value::String(n.to_string())),
            RpcValue::Bytes(bytes) => tagged(
                "Uint8Array",
                Value::Array(bytes.into_iter().map(|b| Value::from(b as u64)).collect()),
            ),
            RpcValue::Date(ms) => tagged("Date", Value::from(ms)),
            RpcValue::Map(entries) => tagged(
                "Map",
                Value::Array(
                    entries
                        .into_iter()
                        .map(|(k, v)| Value::Array(vec![Value::from(k), Value::from(v)]))
                        .collect(),
                ),
            ),
            RpcValue::Set(items) => {
                tagged("Set", Value::Array(items.into_iter().map(Value::from).collect()))
            }
        }
    }
}

fn tagged(kind: &str, data: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(kind.to_string()));
    map.insert("data".to_string(), data);
    Value::Object(map)
}
