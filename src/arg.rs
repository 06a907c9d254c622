//! Handler-facing argument representation.
//!
//! A JSON `Value` cannot carry a live callable, so once the channel has
//! rewritten a `__callback__<id>` marker (spec §6) into a dispatch
//! function (spec §4.5 "request" dispatch), handlers see an [`ApiArg`]
//! rather than a bare `Value`. This mirrors `Arg` in the kkrpc Rust
//! interop reference (`other_examples/.../interop-rust-src-lib.rs.rs`).

use crate::error::RpcError;
use crate::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// A callback reachable from a handler: invoking it sends a `callback`
/// message back across the channel (spec §4.5).
pub type CallbackHandle = Arc<dyn Fn(Vec<Value>) -> BoxFuture<Result<(), RpcError>> + Send + Sync>;

#[derive(Clone)]
pub enum ApiArg {
    Value(Value),
    Callback(CallbackHandle),
}

impl ApiArg {
    /// The plain-JSON view of this argument, used for input validation
    /// (spec §4.4 "filter out already-restored callback arguments").
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            ApiArg::Value(v) => Some(v),
            ApiArg::Callback(_) => None,
        }
    }
}
