//! parameter resolution
//!
//! Merges positional command-line values, `name=value` pairs, an optional
//! parameter file and declared defaults into one ordered, fully named
//! parameter set. Resolution happens once, before any component expansion,
//! and the result is immutable.

use crate::definition::ParameterSpec;
use crate::error::CompileError;
use crate::templating::{evaluate_str, EvalContext};
use crate::value::Value;
use indexmap::IndexMap;

/// The fully resolved parameter set, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParameters {
    values: IndexMap<String, String>,
}

impl ResolvedParameters {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Split a raw argument list into positional values and `name=value` pairs
///
/// Only the first `=` splits, so values may contain `=`. Positional values
/// must come first; one following a named argument is an error.
pub fn split_arguments(raw: &[String]) -> Result<(Vec<String>, Vec<(String, String)>), CompileError> {
    let mut positional = Vec::new();
    let mut named = Vec::new();

    for argument in raw {
        match argument.split_once('=') {
            Some((name, value)) => named.push((name.to_string(), value.to_string())),
            None if !named.is_empty() => return Err(CompileError::PositionalAfterNamed),
            None => positional.push(argument.clone()),
        }
    }

    Ok((positional, named))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Source {
    Positional,
    Named,
    File,
}

/// Resolve all declared parameters
///
/// Positional values map to declarations left to right. Named pairs and
/// file entries assign by name; any parameter reached from two sources is a
/// hard error rather than a silent precedence rule. Whatever remains takes
/// its declared default, which may itself contain `AccountInfo` template
/// expressions.
pub fn resolve(
    declarations: &[ParameterSpec],
    positional: &[String],
    named: &[(String, String)],
    file: Option<&IndexMap<String, String>>,
    context: &EvalContext,
) -> Result<ResolvedParameters, CompileError> {
    let expected = || {
        declarations
            .iter()
            .map(|declaration| declaration.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    };

    if positional.len() > declarations.len() {
        return Err(CompileError::TooManyParameters {
            expected: expected(),
        });
    }

    let mut assigned: IndexMap<&str, (String, Source)> = IndexMap::new();
    for (declaration, value) in declarations.iter().zip(positional) {
        assigned.insert(declaration.name.as_str(), (value.clone(), Source::Positional));
    }

    let file_entries = file
        .map(|entries| {
            entries
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let by_name = named
        .iter()
        .cloned()
        .map(|pair| (pair, Source::Named))
        .chain(file_entries.into_iter().map(|pair| (pair, Source::File)));

    for ((name, value), source) in by_name {
        let declaration = declarations
            .iter()
            .find(|declaration| declaration.name == name)
            .ok_or(CompileError::UnknownParameter { name: name.clone() })?;
        if assigned.contains_key(declaration.name.as_str()) {
            return Err(CompileError::DuplicateParameter { name });
        }
        assigned.insert(declaration.name.as_str(), (value, source));
    }

    let mut values = IndexMap::with_capacity(declarations.len());
    for declaration in declarations {
        let value = match assigned.shift_remove(declaration.name.as_str()) {
            Some((value, _)) => value,
            None => match &declaration.default {
                Some(default) => default_value(&declaration.name, default, context)?,
                None => {
                    return Err(CompileError::MissingParameter {
                        name: declaration.name.clone(),
                        expected: expected(),
                    });
                }
            },
        };
        values.insert(declaration.name.clone(), value);
    }

    Ok(ResolvedParameters { values })
}

fn default_value(
    name: &str,
    default: &Value,
    context: &EvalContext,
) -> Result<String, CompileError> {
    let evaluated = match default {
        Value::String(template) => evaluate_str(template, context)?,
        other => other.clone(),
    };
    evaluated
        .scalar_to_string()
        .ok_or_else(|| CompileError::MissingParameter {
            name: name.to_string(),
            expected: name.to_string(),
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object;
    use pretty_assertions::assert_eq;

    fn declarations() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec {
                name: "a".into(),
                description: None,
                default: None,
            },
            ParameterSpec {
                name: "b".into(),
                description: None,
                default: Some(Value::from(1)),
            },
            ParameterSpec {
                name: "c".into(),
                description: None,
                default: Some(Value::from(2)),
            },
        ]
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn positional_fill_with_trailing_defaults() {
        let resolved = resolve(
            &declarations(),
            &strings(&["x"]),
            &[],
            None,
            &EvalContext::default(),
        )
        .unwrap();
        let collected: Vec<_> = resolved.iter().collect();
        assert_eq!(collected, vec![("a", "x"), ("b", "1"), ("c", "2")]);
    }

    #[test]
    fn named_value_splits_on_first_equals_only() {
        let (positional, named) = split_arguments(&strings(&["KEY=a=b"])).unwrap();
        assert!(positional.is_empty());
        assert_eq!(named, vec![("KEY".to_string(), "a=b".to_string())]);
    }

    #[test]
    fn positional_after_named_is_rejected() {
        let error = split_arguments(&strings(&["a=1", "x"])).unwrap_err();
        assert!(matches!(error, CompileError::PositionalAfterNamed));
    }

    #[test]
    fn positional_and_named_collision() {
        let error = resolve(
            &declarations(),
            &strings(&["x"]),
            &[("a".to_string(), "y".to_string())],
            None,
            &EvalContext::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::DuplicateParameter { name } if name == "a"
        ));
    }

    #[test]
    fn file_and_named_collision() {
        let mut file = IndexMap::new();
        file.insert("b".to_string(), "3".to_string());
        let error = resolve(
            &declarations(),
            &[],
            &[
                ("a".to_string(), "x".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
            Some(&file),
            &EvalContext::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::DuplicateParameter { name } if name == "b"
        ));
    }

    #[test]
    fn unknown_parameter_is_a_hard_error() {
        let error = resolve(
            &declarations(),
            &[],
            &[("nope".to_string(), "1".to_string())],
            None,
            &EvalContext::default(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::UnknownParameter { name } if name == "nope"
        ));
    }

    #[test]
    fn missing_parameter_names_it() {
        let error = resolve(&declarations(), &[], &[], None, &EvalContext::default()).unwrap_err();
        assert!(matches!(
            error,
            CompileError::MissingParameter { name, expected }
                if name == "a" && expected == "a b c"
        ));
    }

    #[test]
    fn too_many_positional_values() {
        let error = resolve(
            &declarations(),
            &strings(&["1", "2", "3", "4"]),
            &[],
            None,
            &EvalContext::default(),
        )
        .unwrap_err();
        assert!(matches!(error, CompileError::TooManyParameters { .. }));
    }

    #[test]
    fn defaults_may_reference_account_info() {
        let declarations = vec![ParameterSpec {
            name: "Domain".into(),
            description: None,
            default: Some(Value::from("{{AccountInfo.Domain}}")),
        }];
        let context = EvalContext {
            account_info: object! { "Domain" => "example.org" },
            ..Default::default()
        };
        let resolved = resolve(&declarations, &[], &[], None, &context).unwrap();
        assert_eq!(resolved.get("Domain"), Some("example.org"));
    }
}
