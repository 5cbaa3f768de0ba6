//! definition compilation pipeline
//!
//! Turns a parsed [Definition] plus command-line arguments into one complete
//! output template. The stages run strictly in order:
//!
//! 1. resolve parameters (positional, named, file, defaults)
//! 2. evaluate the `SenzaInfo` block against `Arguments` and `AccountInfo`
//! 3. per component, in declaration order: evaluate its properties, resolve
//!    cross-stack references, expand it and merge the fragment
//! 4. merge the raw passthrough sections
//! 5. evaluate the assembled template once more with the full context
//!
//! Merging tracks which component owns each logical identifier, so two
//! components (or a component and a raw section) emitting the same id is a
//! hard error instead of a silent overwrite.

use crate::cloud::{AccountInfo, ControlPlane, MetadataSource};
use crate::components::{self, ExpandContext, Fragment};
use crate::cross_stack;
use crate::definition::{ComponentSpec, Definition};
use crate::error::CompileError;
use crate::params::{self, ResolvedParameters};
use crate::templating::{evaluate_value, EvalContext};
use crate::value::Value;
use indexmap::IndexMap;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Caller-supplied inputs of one compilation
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions<'a> {
    /// the stack version being deployed, e.g. `1` or `cd871`
    pub version: &'a str,
    /// raw parameter arguments, positional first, then `name=value`
    pub arguments: &'a [String],
    /// entries of a parameter file, already parsed
    pub parameter_file: Option<&'a IndexMap<String, String>>,
}

/// Result of one compilation
#[derive(Debug)]
pub struct CompiledStack {
    pub template: Value,
    pub parameters: ResolvedParameters,
}

/// Compile a definition into its output template
pub fn compile(
    definition: &Definition,
    options: &CompileOptions,
    account_info: &AccountInfo,
    control_plane: &dyn ControlPlane,
    metadata: &dyn MetadataSource,
) -> Result<CompiledStack, CompileError> {
    let account_value = account_info.to_value();

    let (positional, named) = params::split_arguments(options.arguments)?;
    let default_context = EvalContext {
        account_info: account_value.clone(),
        ..Default::default()
    };
    let parameters = params::resolve(
        &definition.parameters,
        &positional,
        &named,
        options.parameter_file,
        &default_context,
    )?;

    let arguments = arguments_value(options.version, account_info, &parameters);

    // first pass: the info block sees only Arguments and AccountInfo
    let info_context = EvalContext {
        arguments: arguments.clone(),
        account_info: account_value.clone(),
        ..Default::default()
    };
    let mut info_map = definition.info.clone();
    // declarations may carry unevaluated default templates; parameter
    // values are exposed through Arguments instead
    info_map.shift_remove("Parameters");
    let mut info = evaluate_value(&Value::Object(info_map), &info_context)?;
    if let Some(info) = info.as_object_mut() {
        info.insert("StackVersion".to_string(), Value::from(options.version));
    }

    let declared = definition.component_names();
    let mut expanded: Vec<String> = Vec::new();
    let mut components_value: IndexMap<String, Value> = IndexMap::new();
    let mut assembler = Assembler::default();

    for spec in &definition.components {
        let context = EvalContext::new(
            info.clone(),
            Value::Object(components_value.clone()),
            arguments.clone(),
            account_value.clone(),
        );
        let evaluated = evaluate_value(&Value::Object(spec.properties.clone()), &context)
            .map_err(|error| {
                if let CompileError::UndefinedReference { path } = &error {
                    if let Some(target) = forward_target(path, &declared, &expanded) {
                        return CompileError::ForwardReference {
                            component: spec.name.clone(),
                            target,
                        };
                    }
                }
                error
            })?;
        let mut properties = match evaluated {
            Value::Object(properties) => properties,
            _ => unreachable!("evaluating an object yields an object"),
        };
        cross_stack::resolve_all(&mut properties, control_plane)?;

        let expand_context = ExpandContext {
            info: &info,
            arguments: &arguments,
            account_info,
            operator_topic: definition.operator_topic.as_deref(),
            expanded: &expanded,
            declared: &declared,
            metadata,
        };
        let resolved_spec = ComponentSpec {
            name: spec.name.clone(),
            type_name: spec.type_name.clone(),
            properties: properties.clone(),
        };
        let fragment = components::expand(&resolved_spec, &expand_context)?;
        assembler.merge(fragment)?;

        let mut entry: IndexMap<String, Value> = IndexMap::new();
        entry.insert("Type".to_string(), Value::from(spec.type_name.clone()));
        entry.extend(properties);
        components_value.insert(spec.name.clone(), Value::Object(entry));
        expanded.push(spec.name.clone());
    }

    assembler.merge_passthrough(&definition.passthrough)?;
    assembler.add_info_mapping(&info, &parameters)?;

    let template = assemble(definition, &parameters, assembler, &info);

    // second pass: the full context, covering passthrough sections too
    let final_context = EvalContext::new(
        info,
        Value::Object(components_value),
        arguments,
        account_value,
    );
    let template = evaluate_value(&template, &final_context)?;

    Ok(CompiledStack {
        template,
        parameters,
    })
}

/// A `SenzaComponents` path that misses only because its component has not
/// been expanded yet is a declaration-order problem, not an unknown name
fn forward_target(path: &str, declared: &[String], expanded: &[String]) -> Option<String> {
    let rest = path.strip_prefix("SenzaComponents.")?;
    let name = rest.split('.').next()?;
    if declared.iter().any(|declared| declared == name)
        && !expanded.iter().any(|expanded| expanded == name)
    {
        return Some(name.to_string());
    }
    None
}

fn arguments_value(
    version: &str,
    account_info: &AccountInfo,
    parameters: &ResolvedParameters,
) -> Value {
    let mut map: IndexMap<String, Value> = IndexMap::new();
    map.insert("version".to_string(), Value::from(version));
    map.insert(
        "region".to_string(),
        Value::from(account_info.region.clone()),
    );
    for (name, value) in parameters.iter() {
        map.insert(name.to_string(), Value::from(value));
    }
    Value::Object(map)
}

/// Accumulates fragments and raw sections, tracking logical-id ownership
#[derive(Debug, Default)]
struct Assembler {
    resources: IndexMap<String, (String, Value)>,
    outputs: IndexMap<String, (String, Value)>,
    mappings: IndexMap<String, (String, Value)>,
    extra_sections: IndexMap<String, Value>,
}

/// Owner name used for everything coming from raw passthrough sections
const DEFINITION_OWNER: &str = "definition";

impl Assembler {
    fn merge(&mut self, fragment: Fragment) -> Result<(), CompileError> {
        let owner = fragment.component;
        for (logical_id, resource) in fragment.resources {
            Self::insert(&mut self.resources, logical_id, &owner, resource)?;
        }
        for (logical_id, output) in fragment.outputs {
            Self::insert(&mut self.outputs, logical_id, &owner, output)?;
        }
        for (name, mapping) in fragment.mappings {
            Self::merge_mapping(&mut self.mappings, name, &owner, mapping)?;
        }
        Ok(())
    }

    fn merge_passthrough(
        &mut self,
        passthrough: &IndexMap<String, Value>,
    ) -> Result<(), CompileError> {
        for (section, body) in passthrough {
            match (section.as_str(), body) {
                ("Resources", Value::Object(entries)) => {
                    for (logical_id, resource) in entries {
                        Self::insert(
                            &mut self.resources,
                            logical_id.clone(),
                            DEFINITION_OWNER,
                            resource.clone(),
                        )?;
                    }
                }
                ("Outputs", Value::Object(entries)) => {
                    for (logical_id, output) in entries {
                        Self::insert(
                            &mut self.outputs,
                            logical_id.clone(),
                            DEFINITION_OWNER,
                            output.clone(),
                        )?;
                    }
                }
                ("Mappings", Value::Object(entries)) => {
                    for (name, mapping) in entries {
                        Self::merge_mapping(
                            &mut self.mappings,
                            name.clone(),
                            DEFINITION_OWNER,
                            mapping.clone(),
                        )?;
                    }
                }
                _ => {
                    self.extra_sections.insert(section.clone(), body.clone());
                }
            }
        }
        Ok(())
    }

    /// `Mappings.Senza.Info` exposes stack identity and parameters to the
    /// running instances
    fn add_info_mapping(
        &mut self,
        info: &Value,
        parameters: &ResolvedParameters,
    ) -> Result<(), CompileError> {
        let mut entries: IndexMap<String, Value> = IndexMap::new();
        for key in ["StackName", "StackVersion"] {
            if let Some(value) = info.get(key) {
                entries.insert(key.to_string(), value.clone());
            }
        }
        for (name, value) in parameters.iter() {
            entries.insert(name.to_string(), Value::from(value));
        }
        let mut senza: IndexMap<String, Value> = IndexMap::new();
        senza.insert("Info".to_string(), Value::Object(entries));
        Self::merge_mapping(
            &mut self.mappings,
            "Senza".to_string(),
            "senza",
            Value::Object(senza),
        )
    }

    fn insert(
        section: &mut IndexMap<String, (String, Value)>,
        logical_id: String,
        owner: &str,
        value: Value,
    ) -> Result<(), CompileError> {
        if let Some((first, _)) = section.get(&logical_id) {
            return Err(CompileError::LogicalIdConflict {
                logical_id,
                first: first.clone(),
                second: owner.to_string(),
            });
        }
        section.insert(logical_id, (owner.to_string(), value));
        Ok(())
    }

    fn merge_mapping(
        mappings: &mut IndexMap<String, (String, Value)>,
        name: String,
        owner: &str,
        incoming: Value,
    ) -> Result<(), CompileError> {
        match mappings.get_mut(&name) {
            None => {
                mappings.insert(name, (owner.to_string(), incoming));
                Ok(())
            }
            Some((first, existing)) => {
                deep_merge(existing, incoming, &name, first, owner)
            }
        }
    }
}

/// Merge two mapping trees; two leaves under the same path conflict
fn deep_merge(
    existing: &mut Value,
    incoming: Value,
    path: &str,
    first: &str,
    second: &str,
) -> Result<(), CompileError> {
    match (existing, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                let child_path = format!("{path}.{key}");
                match existing.get_mut(&key) {
                    Some(child) => deep_merge(child, value, &child_path, first, second)?,
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        _ => Err(CompileError::LogicalIdConflict {
            logical_id: path.to_string(),
            first: first.to_string(),
            second: second.to_string(),
        }),
    }
}

fn assemble(
    definition: &Definition,
    parameters: &ResolvedParameters,
    assembler: Assembler,
    info: &Value,
) -> Value {
    let mut template: IndexMap<String, Value> = IndexMap::new();
    template.insert(
        "AWSTemplateFormatVersion".to_string(),
        Value::from(TEMPLATE_FORMAT_VERSION),
    );

    let description = info
        .get("Description")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| default_description(&definition.stack_name, parameters));
    template.insert("Description".to_string(), Value::from(description));

    let strip = |section: IndexMap<String, (String, Value)>| {
        section
            .into_iter()
            .map(|(key, (_, value))| (key, value))
            .collect::<IndexMap<String, Value>>()
    };

    template.insert(
        "Mappings".to_string(),
        Value::Object(strip(assembler.mappings)),
    );

    if !definition.parameters.is_empty() {
        let declarations: IndexMap<String, Value> = definition
            .parameters
            .iter()
            .map(|parameter| {
                let mut body: IndexMap<String, Value> = IndexMap::new();
                body.insert("Type".to_string(), Value::from("String"));
                if let Some(description) = &parameter.description {
                    body.insert("Description".to_string(), Value::from(description.clone()));
                }
                (parameter.name.clone(), Value::Object(body))
            })
            .collect();
        template.insert("Parameters".to_string(), Value::Object(declarations));
    }

    if !assembler.resources.is_empty() {
        template.insert(
            "Resources".to_string(),
            Value::Object(strip(assembler.resources)),
        );
    }
    if !assembler.outputs.is_empty() {
        template.insert(
            "Outputs".to_string(),
            Value::Object(strip(assembler.outputs)),
        );
    }
    for (section, body) in assembler.extra_sections {
        template.insert(section, body);
    }

    Value::Object(template)
}

/// `my-app` becomes `My App`, with given parameters appended
fn default_description(stack_name: &str, parameters: &ResolvedParameters) -> String {
    let title = stack_name
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    if parameters.is_empty() {
        return title;
    }
    let listed = parameters
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{title} ({listed})")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::{NullControlPlane, StaticMetadata};
    use crate::object;
    use pretty_assertions::assert_eq;

    fn compile_str(contents: &str, arguments: &[&str]) -> Result<Value, CompileError> {
        let definition = Definition::from_str(contents).unwrap();
        let arguments: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
        let options = CompileOptions {
            version: "1",
            arguments: &arguments,
            parameter_file: None,
        };
        compile(
            &definition,
            &options,
            &AccountInfo::for_region("eu-west-1"),
            &NullControlPlane,
            &StaticMetadata::default(),
        )
        .map(|compiled| compiled.template)
    }

    #[test]
    fn passthrough_only_definitions_survive_unchanged() {
        let template = compile_str(
            "
SenzaInfo: {StackName: plain-stack}
Resources:
  ExtraQueue:
    Type: AWS::SQS::Queue
",
            &[],
        )
        .unwrap();

        assert_eq!(
            template.lookup("AWSTemplateFormatVersion"),
            Some(&Value::from(TEMPLATE_FORMAT_VERSION))
        );
        assert_eq!(
            template.lookup("Description"),
            Some(&Value::from("Plain Stack"))
        );
        assert_eq!(
            template.lookup("Resources.ExtraQueue"),
            Some(&object! { "Type" => "AWS::SQS::Queue" })
        );
        assert_eq!(
            template.lookup("Mappings.Senza.Info.StackVersion"),
            Some(&Value::from("1"))
        );
    }

    #[test]
    fn logical_id_conflicts_name_both_owners() {
        let error = compile_str(
            "
SenzaInfo: {StackName: hello}
SenzaComponents:
  - AppLoadBalancer:
      Type: Senza::ElasticLoadBalancer
      HTTPPort: 8080
Resources:
  AppLoadBalancer:
    Type: AWS::SQS::Queue
",
            &[],
        )
        .unwrap_err();

        assert!(matches!(
            error,
            CompileError::LogicalIdConflict { logical_id, first, second }
                if logical_id == "AppLoadBalancer"
                    && first == "AppLoadBalancer"
                    && second == "definition"
        ));
    }

    #[test]
    fn info_templates_see_arguments() {
        let template = compile_str(
            "
SenzaInfo:
  StackName: hello
  Description: 'version {{Arguments.ImageVersion}}'
  Parameters:
    - ImageVersion: {Description: image}
",
            &["1.0"],
        )
        .unwrap();
        assert_eq!(
            template.lookup("Description"),
            Some(&Value::from("version 1.0"))
        );
        assert_eq!(
            template.lookup("Parameters.ImageVersion.Type"),
            Some(&Value::from("String"))
        );
        assert_eq!(
            template.lookup("Mappings.Senza.Info.ImageVersion"),
            Some(&Value::from("1.0"))
        );
    }

    #[test]
    fn mappings_from_components_and_definition_are_merged() {
        let template = compile_str(
            "
SenzaInfo: {StackName: hello}
SenzaComponents:
  - Configuration:
      Type: Senza::Configuration
      ServerSubnets:
        eu-west-1: [subnet-1]
Mappings:
  ServerSubnets:
    eu-central-1:
      Subnets: [subnet-2]
",
            &[],
        )
        .unwrap();

        assert_eq!(
            template.lookup("Mappings.ServerSubnets.eu-west-1.Subnets.0"),
            Some(&Value::from("subnet-1"))
        );
        assert_eq!(
            template.lookup("Mappings.ServerSubnets.eu-central-1.Subnets.0"),
            Some(&Value::from("subnet-2"))
        );
    }

    #[test]
    fn component_expressions_cannot_reach_later_components() {
        let error = compile_str(
            "
SenzaInfo: {StackName: hello}
SenzaComponents:
  - Configuration:
      Type: Senza::Configuration
      PublicPort: '{{SenzaComponents.AppLoadBalancer.HTTPPort}}'
  - AppLoadBalancer:
      Type: Senza::ElasticLoadBalancer
      HTTPPort: 8080
",
            &[],
        )
        .unwrap_err();

        assert!(matches!(
            error,
            CompileError::ForwardReference { component, target }
                if component == "Configuration" && target == "AppLoadBalancer"
        ));
    }

    #[test]
    fn conflicting_mapping_leaves_are_rejected() {
        let error = compile_str(
            "
SenzaInfo: {StackName: hello}
SenzaComponents:
  - Configuration:
      Type: Senza::Configuration
      ServerSubnets:
        eu-west-1: [subnet-1]
Mappings:
  ServerSubnets:
    eu-west-1:
      Subnets: [subnet-2]
",
            &[],
        )
        .unwrap_err();
        assert!(matches!(error, CompileError::LogicalIdConflict { .. }));
    }
}
