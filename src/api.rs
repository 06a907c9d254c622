//! Exposed API registry (SPEC_FULL §4.5 supplement).
//!
//! spec.md treats "the exposed API" as a given external object graph
//! reachable by dotted path. This is the concrete registry: method and
//! constructor handlers keyed by dotted path, plus a property store for
//! `get`/`set`, matching the shape of `RpcApi` in the kkrpc Rust interop
//! reference (`other_examples/.../interop-rust-src-lib.rs.rs`).

use crate::arg::ApiArg;
use crate::error::RpcError;
use crate::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type MethodHandler = Arc<dyn Fn(Vec<ApiArg>) -> BoxFuture<Result<Value, RpcError>> + Send + Sync>;

/// The user-supplied API surface a channel exposes to its remote peer.
#[derive(Default)]
pub struct ExposedApi {
    methods: HashMap<String, MethodHandler>,
    constructors: HashMap<String, MethodHandler>,
    properties: Mutex<HashMap<String, Value>>,
}

impl ExposedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method handler under a dotted path (e.g. `"math.add"`).
    pub fn method(mut self, path: impl Into<String>, handler: MethodHandler) -> Self {
        self.methods.insert(path.into(), handler);
        self
    }

    /// Register a constructor handler under a dotted path.
    pub fn constructor(mut self, path: impl Into<String>, handler: MethodHandler) -> Self {
        self.constructors.insert(path.into(), handler);
        self
    }

    /// Seed an initial property value reachable via `get`/`set`. Only
    /// ever called during builder construction, before the `ExposedApi`
    /// is shared behind an `Arc`, so a plain synchronous lock is safe
    /// here regardless of whether the caller is inside an async
    /// context (unlike `tokio::sync::Mutex::blocking_lock`, which
    /// panics if called from a thread already driving a runtime task).
    pub fn property(self, path: impl Into<String>, value: Value) -> Self {
        self.properties.lock().expect("property store lock poisoned").insert(path.into(), value);
        self
    }

    pub fn method_handler(&self, path: &str) -> Option<&MethodHandler> {
        self.methods.get(path)
    }

    pub fn constructor_handler(&self, path: &str) -> Option<&MethodHandler> {
        self.constructors.get(path)
    }

    /// Walk `path` against the property store and return the terminal
    /// value. Spec §4.5 "get": "`undefined` mid-path is an error" — for a
    /// flat dotted store this means the full joined path must exist.
    pub async fn get_property(&self, path: &[String]) -> Result<Value, RpcError> {
        let key = path.join(".");
        self.properties
            .lock()
            .expect("property store lock poisoned")
            .get(&key)
            .cloned()
            .ok_or_else(|| RpcError::Routing(format!("no such property: {key}")))
    }

    /// Walk to the parent of `path` and assign the final segment. Spec
    /// §8 "Setting a property at a path whose parent does not exist
    /// rejects with a routing error" — for the flat store this means any
    /// non-empty path is accepted (there is no nested parent to be
    /// missing); an empty path is a routing error.
    pub async fn set_property(&self, path: &[String], value: Value) -> Result<(), RpcError> {
        if path.is_empty() {
            return Err(RpcError::Routing("set requires a non-empty path".to_string()));
        }
        let key = path.join(".");
        self.properties.lock().expect("property store lock poisoned").insert(key, value);
        Ok(())
    }
}
