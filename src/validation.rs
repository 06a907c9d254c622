//! Validation layer (spec §4.4).
//!
//! A [`Validators`] tree mirrors the exposed API's dotted-path shape; each
//! leaf optionally carries an input and/or output [`Schema`]. Namespace
//! nodes (intermediate segments with neither) are skipped during lookup,
//! matching spec §4.4 "Lookup".

use crate::error::{RpcError, ValidationIssue, ValidationPhase};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of validating one value (spec §4.4 "Schema contract").
pub enum Outcome {
    /// Success, possibly with a coerced value.
    Valid(Value),
    Invalid(Vec<ValidationIssue>),
}

/// A standard-schema-shaped validator. May run synchronously or
/// asynchronously on the source side; this port always awaits it.
#[async_trait]
pub trait Schema: Send + Sync {
    async fn validate(&self, value: &Value) -> Outcome;
}

/// The input/output schema pair attached to one API leaf.
#[derive(Clone, Default)]
pub struct ValidatorEntry {
    pub input: Option<Arc<dyn Schema>>,
    pub output: Option<Arc<dyn Schema>>,
}

/// Nested map of dotted-path segments to [`ValidatorEntry`] leaves (spec
/// §4.4 "Validators tree").
#[derive(Default)]
pub struct Validators {
    children: HashMap<String, Validators>,
    entry: Option<ValidatorEntry>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a validator entry at a dotted method path, creating
    /// intermediate namespace nodes as needed.
    pub fn with_method(mut self, dotted_path: &str, entry: ValidatorEntry) -> Self {
        self.insert(dotted_path, entry);
        self
    }

    pub fn insert(&mut self, dotted_path: &str, entry: ValidatorEntry) {
        let mut node = self;
        for segment in dotted_path.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.entry = Some(entry);
    }

    /// Walk the tree following each path segment; return the first node
    /// that carries an entry. Namespace nodes return `None` (spec §4.4).
    pub fn lookup(&self, dotted_path: &str) -> Option<&ValidatorEntry> {
        let mut node = self;
        for segment in dotted_path.split('.') {
            node = node.children.get(segment)?;
        }
        node.entry.as_ref()
    }
}

/// Validate the positional arguments of a call as a tuple against the
/// method's input schema, if any (spec §4.4 "Input validation").
///
/// Already-restored callback arguments are callables by this point and
/// are not passed through the schema; callers filter them out before
/// invoking this (spec §4.4).
pub async fn validate_input(
    validators: &Validators,
    method: &str,
    args: &Value,
) -> Result<Value, RpcError> {
    validate_phase(validators, method, args, ValidationPhase::Input, |e| e.input.clone()).await
}

/// Validate a handler's return value against its output schema, if any
/// (spec §4.4 "Input validation" mirrored for output).
pub async fn validate_output(
    validators: &Validators,
    method: &str,
    result: &Value,
) -> Result<Value, RpcError> {
    validate_phase(validators, method, result, ValidationPhase::Output, |e| e.output.clone()).await
}

async fn validate_phase(
    validators: &Validators,
    method: &str,
    value: &Value,
    phase: ValidationPhase,
    pick: impl Fn(&ValidatorEntry) -> Option<Arc<dyn Schema>>,
) -> Result<Value, RpcError> {
    let Some(schema) = validators.lookup(method).and_then(pick) else {
        return Ok(value.clone());
    };
    match schema.validate(value).await {
        Outcome::Valid(coerced) => Ok(coerced),
        Outcome::Invalid(issues) => Err(RpcError::Validation {
            method: method.to_string(),
            phase,
            issues,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TupleOfNumbers(usize);

    #[async_trait]
    impl Schema for TupleOfNumbers {
        async fn validate(&self, value: &Value) -> Outcome {
            match value.as_array() {
                Some(arr) if arr.len() == self.0 && arr.iter().all(|v| v.is_number()) => {
                    Outcome::Valid(value.clone())
                }
                _ => Outcome::Invalid(vec![ValidationIssue {
                    message: format!("expected a tuple of {} numbers", self.0),
                    path: None,
                }]),
            }
        }
    }

    #[tokio::test]
    async fn namespace_nodes_are_skipped() {
        let validators = Validators::new().with_method(
            "math.add",
            ValidatorEntry {
                input: Some(Arc::new(TupleOfNumbers(2))),
                output: None,
            },
        );
        assert!(validators.lookup("math").is_none());
        assert!(validators.lookup("math.add").is_some());
    }

    #[tokio::test]
    async fn input_validation_rejects_bad_args() {
        let validators = Validators::new().with_method(
            "math.add",
            ValidatorEntry {
                input: Some(Arc::new(TupleOfNumbers(2))),
                output: None,
            },
        );
        let err = validate_input(&validators, "math.add", &serde_json::json!(["x", "y"]))
            .await
            .unwrap_err();
        match err {
            RpcError::Validation { phase, method, .. } => {
                assert_eq!(method, "math.add");
                assert!(matches!(phase, ValidationPhase::Input));
            }
            _ => panic!("expected validation error"),
        }
    }

    #[tokio::test]
    async fn missing_schema_passes_through() {
        let validators = Validators::new();
        let value = serde_json::json!([1, 2]);
        let result = validate_input(&validators, "math.add", &value).await.unwrap();
        assert_eq!(result, value);
    }
}
