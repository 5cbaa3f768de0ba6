//! template expression evaluation
//!
//! Strings anywhere in a definition may embed `{{Path.To.Value}}`
//! placeholders. They are resolved against a read-only context exposing the
//! `SenzaInfo`, `SenzaComponents`, `Arguments` and `AccountInfo` sub-trees.
//!
//! Evaluation is recursive: a substituted value may itself contain further
//! placeholders and is re-scanned. Recursion is bounded by [MAX_DEPTH] so a
//! self-referential definition fails instead of diverging. Evaluation is a
//! pure function of (template, context).

use crate::error::CompileError;
use crate::value::Value;
use regex::Regex;
use std::sync::OnceLock;

/// Substitution rounds before a [CompileError::TemplateRecursion] is raised
pub const MAX_DEPTH: usize = 10;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

fn whole_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\{\{\s*([A-Za-z0-9_.]+)\s*\}\}$").expect("placeholder pattern is valid")
    })
}

/// The read-only lookup tree for one evaluation pass
///
/// Sections that are not available yet (e.g. `SenzaComponents` while the
/// `SenzaInfo` block itself is being evaluated) stay [Value::Null] and any
/// reference into them is an undefined reference.
#[derive(Debug, Clone, Default, derive_new::new)]
pub struct EvalContext {
    pub info: Value,
    pub components: Value,
    pub arguments: Value,
    pub account_info: Value,
}

impl EvalContext {
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        let section = match head {
            "SenzaInfo" => &self.info,
            "SenzaComponents" => &self.components,
            "Arguments" => &self.arguments,
            "AccountInfo" => &self.account_info,
            _ => return None,
        };

        match rest {
            None => Some(section),
            Some(rest) => section.lookup(rest),
        }
    }
}

/// Evaluate one template string
///
/// A string consisting of exactly one placeholder keeps the type of the
/// referenced value; placeholders embedded in a larger string require
/// scalar values and substitute their string form.
pub fn evaluate_str(template: &str, context: &EvalContext) -> Result<Value, CompileError> {
    let mut current = template.to_string();

    for _ in 0..MAX_DEPTH {
        if let Some(captures) = whole_placeholder_re().captures(&current) {
            let path = captures[1].to_string();
            let value = context
                .lookup(&path)
                .ok_or(CompileError::UndefinedReference { path })?
                .clone();
            match value {
                Value::String(inner) if placeholder_re().is_match(&inner) => {
                    current = inner;
                    continue;
                }
                other => return Ok(other),
            }
        }

        if !placeholder_re().is_match(&current) {
            return Ok(Value::String(current));
        }

        let mut failure = None;
        let next = placeholder_re()
            .replace_all(&current, |captures: &regex::Captures| {
                let path = captures[1].to_string();
                match context.lookup(&path).map(Value::scalar_to_string) {
                    Some(Some(text)) => text,
                    Some(None) => {
                        failure.get_or_insert(CompileError::NonScalarReference { path });
                        String::new()
                    }
                    None => {
                        failure.get_or_insert(CompileError::UndefinedReference { path });
                        String::new()
                    }
                }
            })
            .into_owned();

        if let Some(error) = failure {
            return Err(error);
        }
        current = next;
    }

    Err(CompileError::TemplateRecursion {
        expression: template.to_string(),
        depth: MAX_DEPTH,
    })
}

/// Evaluate every string inside a value tree
pub fn evaluate_value(value: &Value, context: &EvalContext) -> Result<Value, CompileError> {
    match value {
        Value::String(template) => evaluate_str(template, context),
        Value::Array(values) => values
            .iter()
            .map(|value| evaluate_value(value, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| Ok((key.clone(), evaluate_value(value, context)?)))
            .collect::<Result<_, CompileError>>(),
        other => Ok(other.clone()),
    }
}
