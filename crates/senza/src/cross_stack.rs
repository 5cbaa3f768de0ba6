//! cross-stack references
//!
//! Component properties may point at resources or outputs of another,
//! independently deployed stack using
//! `{Stack: <name[-version]>, LogicalId: <identifier>}` objects at any
//! nesting depth. They are resolved into plain scalar values before the
//! owning component is expanded, so expansion functions only ever see final
//! values.
//!
//! Resolution order is the discovery order in the document, which keeps the
//! fragment output reproducible across runs given the same external state.
//! Results are never cached across compiler invocations.

use crate::cloud::{with_retries, ControlPlane};
use crate::error::CompileError;
use crate::value::Value;
use indexmap::IndexMap;

const LOOKUP_ATTEMPTS: usize = 3;

/// Resolve every cross-stack reference inside the given properties in place
pub fn resolve_all(
    properties: &mut IndexMap<String, Value>,
    control_plane: &dyn ControlPlane,
) -> Result<(), CompileError> {
    for value in properties.values_mut() {
        visit(value, control_plane)?;
    }
    Ok(())
}

fn visit(value: &mut Value, control_plane: &dyn ControlPlane) -> Result<(), CompileError> {
    match value {
        Value::Object(map) => {
            if let Some((stack, logical_id)) = as_reference(map) {
                let resolved = resolve_one(&stack, &logical_id, control_plane)?;
                *value = Value::String(resolved);
                return Ok(());
            }
            for child in map.values_mut() {
                visit(child, control_plane)?;
            }
        }
        Value::Array(values) => {
            for child in values {
                visit(child, control_plane)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn as_reference(map: &IndexMap<String, Value>) -> Option<(String, String)> {
    let stack = map.get("Stack")?.as_str()?;
    let logical_id = map.get("LogicalId")?.as_str()?;
    Some((stack.to_string(), logical_id.to_string()))
}

fn resolve_one(
    stack: &str,
    logical_id: &str,
    control_plane: &dyn ControlPlane,
) -> Result<String, CompileError> {
    tracing::debug!(stack, logical_id, "resolving cross-stack reference");
    let lookup = with_retries(LOOKUP_ATTEMPTS, || {
        control_plane.get_stack_output(stack, logical_id)
    });

    match lookup {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(CompileError::CrossStackResolution {
            stack: stack.to_string(),
            logical_id: logical_id.to_string(),
            reason: "stack does not expose this logical id".to_string(),
        }),
        // transient failures stay retryable for the caller
        Err(error) if error.retryable => Err(CompileError::External(error)),
        Err(error) => Err(CompileError::CrossStackResolution {
            stack: stack.to_string(),
            logical_id: logical_id.to_string(),
            reason: error.message,
        }),
    }
}
