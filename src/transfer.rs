//! Transfer system (spec §4.3) and the transferable-slot rewrite it feeds
//! into the serializer (spec §4.2 "Transferable rewriting").
//!
//! The source language's `transfer(value, handles)` stashes its
//! `{value, handles}` pair in a key-weak map so the marker disappears
//! once the object is garbage collected and is consumed at most once per
//! serialization. Rust values have no identity usable as a weak-map key,
//! so this port follows the "opt-in explicit lifetime" alternative
//! DESIGN NOTES §9 calls out: `transfer()` returns an explicit marker
//! value that is itself part of the payload, and the serializer consumes
//! (removes) that marker the first time it walks the payload. Calling
//! `transfer()` again on a fresh value produces a fresh marker, so the
//! "consumed at most once" invariant holds structurally rather than via
//! weak-reference bookkeeping.

use crate::io::TransferHandle;
use crate::message::{parse_transfer_slot_token, transfer_slot_token, TransferSlot};
use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

const TRANSFER_MARKER_KEY: &str = "__kkrpc_transfer_marker__";

/// Wrap `value` for zero-copy transfer, pairing it with the native
/// handles it owns. `value` must be a non-null object or array (spec
/// §4.3); anything else is an `InvalidArgument` failure.
pub fn transfer(value: Value, handles: Vec<TransferHandle>) -> Result<Value> {
    if !matches!(value, Value::Object(_) | Value::Array(_)) {
        return Err(anyhow!("InvalidArgument: transfer() requires a non-null object"));
    }
    let mut marker = Map::new();
    marker.insert(TRANSFER_MARKER_KEY.to_string(), Value::Bool(true));
    marker.insert("value".to_string(), value);
    marker.insert(
        "handles".to_string(),
        Value::Array(
            handles
                .into_iter()
                .map(|h| Value::Array(h.0.into_iter().map(|b| Value::from(b as u64)).collect()))
                .collect(),
        ),
    );
    Ok(Value::Object(marker))
}

fn as_marker(value: &Value) -> Option<(&Value, &[Value])> {
    let map = value.as_object()?;
    if map.get(TRANSFER_MARKER_KEY)?.as_bool()? {
        let inner = map.get("value")?;
        let handles = map.get("handles")?.as_array()?;
        Some((inner, handles))
    } else {
        None
    }
}

fn handle_from_value(v: &Value) -> TransferHandle {
    let bytes = v
        .as_array()
        .map(|arr| arr.iter().filter_map(|n| n.as_u64()).map(|n| n as u8).collect())
        .unwrap_or_default();
    TransferHandle(bytes)
}

/// A named handler for values that are transferable but not natively so
/// (spec §4.3 "Handler registry"). Probed in registration order; the
/// first match wins.
pub trait TransferHandler: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, value: &Value) -> bool;
    fn serialize(&self, value: &Value) -> Result<(Value, Vec<TransferHandle>)>;
    fn deserialize(&self, metadata: &Value) -> Result<Value>;
}

#[derive(Default, Clone)]
pub struct TransferRegistry {
    handlers: Vec<Arc<dyn TransferHandler>>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn TransferHandler>) {
        self.handlers.push(handler);
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn TransferHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    fn find_for(&self, value: &Value) -> Option<&Arc<dyn TransferHandler>> {
        self.handlers.iter().find(|h| h.can_handle(value))
    }
}

/// Result of rewriting an outgoing payload: the rewritten tree (markers
/// and handled values replaced with slot tokens), the ordered slot
/// descriptors, the raw values pulled out for `raw` slots, and the
/// native handles to hand the transport's transfer list.
pub struct RewriteOutcome {
    pub rewritten: Value,
    pub transfer_slots: Vec<TransferSlot>,
    pub transferred_values: Vec<Value>,
    pub handles: Vec<TransferHandle>,
}

/// Walk `value`, replacing transfer-marked or handler-matched nodes with
/// slot tokens (spec §4.2). Recurses into plain arrays and objects only;
/// anything else passes through untouched.
pub fn rewrite_outgoing(value: &Value, registry: &TransferRegistry) -> Result<RewriteOutcome> {
    let mut slots = Vec::new();
    let mut transferred_values = Vec::new();
    let mut handles = Vec::new();
    let rewritten = walk_out(value, registry, &mut slots, &mut transferred_values, &mut handles)?;
    Ok(RewriteOutcome {
        rewritten,
        transfer_slots: slots,
        transferred_values,
        handles,
    })
}

fn walk_out(
    value: &Value,
    registry: &TransferRegistry,
    slots: &mut Vec<TransferSlot>,
    transferred_values: &mut Vec<Value>,
    handles: &mut Vec<TransferHandle>,
) -> Result<Value> {
    if let Some((inner, raw_handles)) = as_marker(value) {
        let index = slots.len();
        slots.push(TransferSlot::Raw { metadata: Value::Null });
        transferred_values.push(inner.clone());
        for h in raw_handles {
            handles.push(handle_from_value(h));
        }
        return Ok(Value::String(transfer_slot_token(index)));
    }

    if let Some(handler) = registry.find_for(value) {
        let (metadata, native_handles) = handler.serialize(value)?;
        let index = slots.len();
        slots.push(TransferSlot::Handler {
            handler_name: handler.name().to_string(),
            metadata,
        });
        handles.extend(native_handles);
        return Ok(Value::String(transfer_slot_token(index)));
    }

    match value {
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| walk_out(v, registry, slots, transferred_values, handles))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), walk_out(v, registry, slots, transferred_values, handles)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Expand slot tokens back into their real values on receive (spec
/// §4.2): raw slots pull from the parallel `transferred_values`, handler
/// slots invoke the named handler's `deserialize`.
pub fn expand_incoming(
    value: &Value,
    slots: &[TransferSlot],
    transferred_values: &[Value],
    registry: &TransferRegistry,
) -> Result<Value> {
    match value {
        Value::String(s) => {
            if let Some(index) = parse_transfer_slot_token(s) {
                let slot = slots
                    .get(index)
                    .ok_or_else(|| anyhow!("unknown transfer slot {index}"))?;
                return match slot {
                    TransferSlot::Raw { .. } => transferred_values
                        .get(index)
                        .cloned()
                        .ok_or_else(|| anyhow!("missing transferred value for slot {index}")),
                    TransferSlot::Handler { handler_name, metadata } => registry
                        .by_name(handler_name)
                        .ok_or_else(|| anyhow!("no transfer handler registered: {handler_name}"))?
                        .deserialize(metadata),
                };
            }
            Ok(value.clone())
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| expand_incoming(v, slots, transferred_values, registry))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), expand_incoming(v, slots, transferred_values, registry)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_rejects_scalar() {
        let err = transfer(Value::from(1), vec![]).unwrap_err();
        assert!(err.to_string().contains("InvalidArgument"));
    }

    #[test]
    fn raw_transfer_round_trips_through_rewrite() {
        let buf = transfer(serde_json::json!({"n": 1}), vec![TransferHandle(vec![1, 2, 3])]).unwrap();
        let payload = serde_json::json!([buf]);
        let registry = TransferRegistry::new();
        let outcome = rewrite_outgoing(&payload, &registry).unwrap();
        assert_eq!(outcome.transfer_slots.len(), 1);
        assert_eq!(outcome.handles, vec![TransferHandle(vec![1, 2, 3])]);

        let restored = expand_incoming(
            &outcome.rewritten,
            &outcome.transfer_slots,
            &outcome.transferred_values,
            &registry,
        )
        .unwrap();
        assert_eq!(restored, serde_json::json!([{"n": 1}]));
    }

    struct UppercaseHandler;
    impl TransferHandler for UppercaseHandler {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn can_handle(&self, value: &Value) -> bool {
            value.as_object().map(|m| m.contains_key("__uc__")).unwrap_or(false)
        }
        fn serialize(&self, value: &Value) -> Result<(Value, Vec<TransferHandle>)> {
            Ok((value.get("__uc__").cloned().unwrap_or(Value::Null), vec![]))
        }
        fn deserialize(&self, metadata: &Value) -> Result<Value> {
            Ok(Value::String(metadata.as_str().unwrap_or("").to_uppercase()))
        }
    }

    #[test]
    fn handler_slot_round_trips() {
        let mut registry = TransferRegistry::new();
        registry.register(Arc::new(UppercaseHandler));
        let payload = serde_json::json!({"__uc__": "hi"});
        let outcome = rewrite_outgoing(&payload, &registry).unwrap();
        assert_eq!(outcome.transfer_slots.len(), 1);
        let restored =
            expand_incoming(&outcome.rewritten, &outcome.transfer_slots, &outcome.transferred_values, &registry)
                .unwrap();
        assert_eq!(restored, Value::String("HI".to_string()));
    }
}
