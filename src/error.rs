//! Error taxonomy (spec §7).
//!
//! Each custom kind carries a stable `name()` string so that type guards
//! (`is_rpc_timeout_error`, `is_rpc_validation_error`) work identically on
//! locally-raised errors and on errors reconstructed from the wire, per
//! spec §7 "User-visible behavior".

use crate::message::EnhancedError;
use serde::Serialize;
use thiserror::Error;

/// Validation phase at which an `RPCValidationError` was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Input,
    Output,
}

impl std::fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationPhase::Input => write!(f, "input"),
            ValidationPhase::Output => write!(f, "output"),
        }
    }
}

/// A single schema validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub message: String,
    pub path: Option<String>,
}

/// The error type surfaced to callers and handlers.
///
/// Variants mirror spec §7's taxonomy: validation failure, timeout,
/// remote-thrown error (enhanced-error round trip), routing failure,
/// transport failure, and channel destruction.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("validation failed for {method} ({phase}): {issues:?}")]
    Validation {
        method: String,
        phase: ValidationPhase,
        issues: Vec<ValidationIssue>,
    },

    #[error("call to {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("{0}")]
    Remote(EnhancedError),

    #[error("routing error: {0}")]
    Routing(String),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    #[error("channel destroyed")]
    ChannelDestroyed,
}

impl RpcError {
    /// The stable kind name, usable as a type-guard discriminant across
    /// the wire the way spec §7 requires.
    pub fn name(&self) -> &'static str {
        match self {
            RpcError::Validation { .. } => "RPCValidationError",
            RpcError::Timeout { .. } => "RPCTimeoutError",
            RpcError::Remote(_) => "RemoteError",
            RpcError::Routing(_) => "RoutingError",
            RpcError::Transport(_) => "TransportError",
            RpcError::ChannelDestroyed => "ChannelDestroyedError",
        }
    }
}

/// Type guard mirroring `isRPCTimeoutError`. Matches both a locally-raised
/// timeout and a timeout re-hydrated from a remote peer's response (spec
/// §7 "works the same whether the error was raised locally or arrived
/// over the wire").
pub fn is_rpc_timeout_error(err: &RpcError) -> bool {
    match err {
        RpcError::Timeout { .. } => true,
        RpcError::Remote(e) => e.name == "RPCTimeoutError",
        _ => false,
    }
}

/// Type guard mirroring `isRPCValidationError`.
pub fn is_rpc_validation_error(err: &RpcError) -> bool {
    match err {
        RpcError::Validation { .. } => true,
        RpcError::Remote(e) => e.name == "RPCValidationError",
        _ => false,
    }
}

/// Build the wire representation of an error a handler threw or the
/// channel raised locally (spec §4.5 "error responses", §7).
pub fn to_enhanced_error(err: &RpcError) -> EnhancedError {
    match err {
        RpcError::Remote(e) => e.clone(),
        RpcError::Validation { method, phase, issues } => {
            let mut e = EnhancedError::new(
                "RPCValidationError",
                format!("validation failed for {method} ({phase})"),
            );
            e.extra.insert("method".to_string(), serde_json::Value::String(method.clone()));
            e.extra.insert("phase".to_string(), serde_json::Value::String(phase.to_string()));
            e.extra.insert(
                "issues".to_string(),
                serde_json::to_value(issues).unwrap_or(serde_json::Value::Null),
            );
            e
        }
        RpcError::Timeout { method, timeout_ms } => {
            let mut e = EnhancedError::new(
                "RPCTimeoutError",
                format!("call to {method} timed out after {timeout_ms}ms"),
            );
            e.extra.insert("method".to_string(), serde_json::Value::String(method.clone()));
            e.extra.insert("timeoutMs".to_string(), serde_json::Value::from(*timeout_ms));
            e
        }
        RpcError::Routing(msg) => EnhancedError::new("RoutingError", msg.clone()),
        RpcError::Transport(err) => EnhancedError::new("TransportError", err.to_string()),
        RpcError::ChannelDestroyed => EnhancedError::new("ChannelDestroyedError", "channel destroyed"),
    }
}
