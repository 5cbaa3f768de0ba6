//! compile-time error taxonomy
//!
//! Everything except [CompileError::External] is deterministic: the same
//! definition and arguments always fail the same way, and the message names
//! the offending component, parameter or path so the author can fix the
//! input document. Compilation aborts on the first error; partial templates
//! are never emitted.

use crate::cloud::ExternalServiceError;

#[derive(thiserror::Error, Debug)]
pub enum CompileError {
    #[error("template expression {expression:?} did not settle after {depth} substitution rounds")]
    TemplateRecursion { expression: String, depth: usize },

    #[error("undefined reference {path:?} in template expression")]
    UndefinedReference { path: String },

    #[error("reference {path:?} is not a scalar and cannot be embedded in a string")]
    NonScalarReference { path: String },

    #[error("parameter {name:?} was given more than once")]
    DuplicateParameter { name: String },

    #[error("missing parameter {name:?}, need: {expected:?}")]
    MissingParameter { name: String, expected: String },

    #[error("unrecognized keyword parameter {name:?}")]
    UnknownParameter { name: String },

    #[error("too many parameters given, need only: {expected:?}")]
    TooManyParameters { expected: String },

    #[error("positional parameters must not follow keyword parameters")]
    PositionalAfterNamed,

    #[error("component {component:?} has unknown type {type_name:?}")]
    UnknownComponentType {
        component: String,
        type_name: String,
    },

    #[error("component {component:?} references {target:?} which is declared after it")]
    ForwardReference { component: String, target: String },

    #[error("logical id {logical_id:?} is defined by both {first:?} and {second:?}")]
    LogicalIdConflict {
        logical_id: String,
        first: String,
        second: String,
    },

    #[error("cannot resolve logical id {logical_id:?} of stack {stack:?}: {reason}")]
    CrossStackResolution {
        stack: String,
        logical_id: String,
        reason: String,
    },

    #[error("auto scaling MetricType {metric:?} of component {component:?} is not supported")]
    UnsupportedMetricType { component: String, metric: String },

    #[error("component {component:?} requires property {property:?}")]
    MissingProperty { component: String, property: String },

    #[error("property {property:?} of component {component:?} is invalid: {reason}")]
    InvalidProperty {
        component: String,
        property: String,
        reason: String,
    },

    #[error("external service call failed")]
    External(#[from] ExternalServiceError),
}
