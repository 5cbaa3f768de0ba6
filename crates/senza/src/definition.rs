//! definition documents
//!
//! A definition is the root declarative document describing one deployable
//! application: a `SenzaInfo` metadata block, an ordered parameter list, an
//! ordered `SenzaComponents` list and any number of raw template sections
//! that bypass component expansion entirely.
//!
//! Ordering rules that make the format predictable:
//! - parameter declaration order defines positional argument mapping
//! - component declaration order is the dependency order: a component may
//!   reference every component declared before it and none declared after
//!
//! A [Definition] is built once per compiler invocation and never mutated;
//! expansion works on copies and produces fragments.

use crate::value::Value;
use indexmap::IndexMap;
use std::path::Path;

pub const INFO_KEY: &str = "SenzaInfo";
pub const COMPONENTS_KEY: &str = "SenzaComponents";

/// One declared parameter
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub description: Option<String>,
    pub default: Option<Value>,
}

/// One declared component
///
/// `name` becomes the logical-identifier prefix of everything the component
/// emits; `type_name` selects the expansion function.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub type_name: String,
    pub properties: IndexMap<String, Value>,
}

/// A parsed and validated definition document
#[derive(Debug)]
pub struct Definition {
    pub stack_name: String,
    pub operator_topic: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    pub components: Vec<ComponentSpec>,
    /// the full SenzaInfo mapping, kept for template expressions
    pub info: IndexMap<String, Value>,
    /// raw template sections merged verbatim into the output
    pub passthrough: IndexMap<String, Value>,
}

impl Definition {
    pub fn load_file(path: &Path) -> Result<Self, DefinitionError> {
        tracing::info!(path = %path.display(), "loading definition file");
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, DefinitionError> {
        let document: Value = serde_yaml::from_str(contents)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self, DefinitionError> {
        let Value::Object(mut root) = document else {
            return Err(DefinitionError::NotAMapping);
        };

        let info = match root.shift_remove(INFO_KEY) {
            Some(Value::Object(info)) => info,
            _ => return Err(DefinitionError::MissingSenzaInfo),
        };

        let stack_name = info
            .get("StackName")
            .and_then(Value::as_str)
            .ok_or(DefinitionError::MissingStackName)?
            .to_string();

        let operator_topic = info
            .get("OperatorTopicId")
            .and_then(Value::as_str)
            .map(str::to_string);

        let parameters = parse_parameters(info.get("Parameters"))?;

        let components = match root.shift_remove(COMPONENTS_KEY) {
            None => Vec::new(),
            Some(value) => parse_components(value)?,
        };

        let definition = Definition {
            stack_name,
            operator_topic,
            parameters,
            components,
            info,
            passthrough: root,
        };
        definition.validate()?;
        Ok(definition)
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = indexmap::IndexSet::new();
        for parameter in &self.parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(DefinitionError::DuplicateParameterName {
                    name: parameter.name.clone(),
                });
            }
        }

        // defaults must form a contiguous trailing run so positional
        // arguments stay unambiguous
        let mut defaults_started = false;
        for parameter in &self.parameters {
            if parameter.default.is_some() {
                defaults_started = true;
            } else if defaults_started {
                return Err(DefinitionError::NonContiguousDefault {
                    name: parameter.name.clone(),
                });
            }
        }

        let mut seen = indexmap::IndexSet::new();
        for component in &self.components {
            if !seen.insert(component.name.as_str()) {
                return Err(DefinitionError::DuplicateComponentName {
                    name: component.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Declared component names in declaration order
    pub fn component_names(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|component| component.name.clone())
            .collect()
    }
}

/// Split a single-key mapping into its name and body
fn single_entry(value: &Value) -> Option<(&String, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next()
}

fn parse_parameters(value: Option<&Value>) -> Result<Vec<ParameterSpec>, DefinitionError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let entries = value
        .as_array()
        .ok_or(DefinitionError::MalformedParameter { position: 0 })?;

    let mut parameters = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let (name, body) =
            single_entry(entry).ok_or(DefinitionError::MalformedParameter { position })?;
        parameters.push(ParameterSpec {
            name: name.clone(),
            description: body
                .get("Description")
                .and_then(Value::as_str)
                .map(str::to_string),
            default: body.get("Default").cloned(),
        });
    }
    Ok(parameters)
}

fn parse_components(value: Value) -> Result<Vec<ComponentSpec>, DefinitionError> {
    let Value::Array(entries) = value else {
        return Err(DefinitionError::MalformedComponent { position: 0 });
    };

    let mut components = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let (name, body) =
            single_entry(entry).ok_or(DefinitionError::MalformedComponent { position })?;
        let mut properties = body
            .as_object()
            .ok_or(DefinitionError::MalformedComponent { position })?
            .clone();
        let type_name = match properties.shift_remove("Type") {
            Some(Value::String(type_name)) => type_name,
            _ => {
                return Err(DefinitionError::MissingComponentType { name: name.clone() });
            }
        };
        components.push(ComponentSpec {
            name: name.clone(),
            type_name,
            properties,
        });
    }
    Ok(components)
}

#[derive(thiserror::Error, Debug)]
pub enum DefinitionError {
    #[error("cannot read definition file")]
    Io(#[from] std::io::Error),
    #[error("cannot parse definition document")]
    Yaml(#[from] serde_yaml::Error),
    #[error("definition document must be a mapping")]
    NotAMapping,
    #[error("SenzaInfo section is missing or not a mapping")]
    MissingSenzaInfo,
    #[error("SenzaInfo.StackName is missing or not a string")]
    MissingStackName,
    #[error("parameter declaration at position {position} must be a single-key mapping")]
    MalformedParameter { position: usize },
    #[error("component declaration at position {position} must be a single-key mapping")]
    MalformedComponent { position: usize },
    #[error("component {name:?} declares no Type")]
    MissingComponentType { name: String },
    #[error("parameter {name:?} is declared twice")]
    DuplicateParameterName { name: String },
    #[error("component {name:?} is declared twice")]
    DuplicateComponentName { name: String },
    #[error("parameter {name:?} must declare a default because an earlier parameter does")]
    NonContiguousDefault { name: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = "
SenzaInfo:
  StackName: hello
  Parameters:
    - ImageVersion:
        Description: Docker image version
SenzaComponents:
  - Configuration:
      Type: Senza::Configuration
  - AppServer:
      Type: Senza::AutoScalingGroup
      InstanceType: t2.micro
Resources:
  ExtraQueue:
    Type: AWS::SQS::Queue
";

    #[test]
    fn parses_sections() {
        let definition = Definition::from_str(MINIMAL).unwrap();
        assert_eq!(definition.stack_name, "hello");
        assert_eq!(definition.parameters.len(), 1);
        assert_eq!(definition.parameters[0].name, "ImageVersion");
        assert_eq!(
            definition.component_names(),
            vec!["Configuration", "AppServer"]
        );
        assert_eq!(definition.components[1].type_name, "Senza::AutoScalingGroup");
        assert!(definition.passthrough.contains_key("Resources"));
    }

    #[test]
    fn component_type_is_removed_from_properties() {
        let definition = Definition::from_str(MINIMAL).unwrap();
        let app_server = &definition.components[1];
        assert!(!app_server.properties.contains_key("Type"));
        assert!(app_server.properties.contains_key("InstanceType"));
    }

    #[test]
    fn duplicate_component_names_are_rejected() {
        let error = Definition::from_str(
            "
SenzaInfo: {StackName: hello}
SenzaComponents:
  - One: {Type: Senza::Configuration}
  - One: {Type: Senza::Configuration}
",
        )
        .unwrap_err();
        assert!(matches!(
            error,
            DefinitionError::DuplicateComponentName { name } if name == "One"
        ));
    }

    #[test]
    fn defaults_must_be_trailing() {
        let error = Definition::from_str(
            "
SenzaInfo:
  StackName: hello
  Parameters:
    - A: {Default: x}
    - B: {Description: no default}
",
        )
        .unwrap_err();
        assert!(matches!(
            error,
            DefinitionError::NonContiguousDefault { name } if name == "B"
        ));
    }

    #[test]
    fn missing_info_is_rejected() {
        let error = Definition::from_str("Resources: {}").unwrap_err();
        assert!(matches!(error, DefinitionError::MissingSenzaInfo));
    }
}
