//! component registry and expansion
//!
//! A component is a named, typed unit of declarative configuration. The
//! closed [ComponentType] registry maps the declared `Type` string to an
//! expansion function; unknown types are rejected explicitly instead of
//! falling back silently.
//!
//! Expansion is strictly in declared order. The [ExpandContext] of a later
//! component sees everything its predecessors produced, which makes the
//! declared order a total, author-controlled dependency order rather than
//! an inferred graph. Expanders are pure: they read their properties and
//! the context and emit a [Fragment], they never edit the definition.

pub mod auto_scaling_group;
pub mod configuration;
pub mod load_balancer;

use crate::cloud::{AccountInfo, MetadataSource};
use crate::definition::ComponentSpec;
use crate::error::CompileError;
use crate::value::Value;
use indexmap::IndexMap;

/// The closed set of component types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Configuration,
    SubnetAutoConfiguration,
    AutoScalingGroup,
    ElasticLoadBalancer,
    WeightedDnsElasticLoadBalancer,
}

impl ComponentType {
    pub fn parse(component: &str, type_name: &str) -> Result<Self, CompileError> {
        match type_name {
            "Senza::Configuration" => Ok(Self::Configuration),
            "Senza::SubnetAutoConfiguration" => Ok(Self::SubnetAutoConfiguration),
            "Senza::AutoScalingGroup" => Ok(Self::AutoScalingGroup),
            "Senza::ElasticLoadBalancer" => Ok(Self::ElasticLoadBalancer),
            "Senza::WeightedDnsElasticLoadBalancer" => Ok(Self::WeightedDnsElasticLoadBalancer),
            _ => Err(CompileError::UnknownComponentType {
                component: component.to_string(),
                type_name: type_name.to_string(),
            }),
        }
    }
}

/// Partial template output of one component's expansion
///
/// Everything is keyed by logical identifier; collisions across fragments
/// are detected when fragments are merged into the output template.
#[derive(Debug, Default)]
pub struct Fragment {
    pub component: String,
    pub resources: IndexMap<String, Value>,
    pub outputs: IndexMap<String, Value>,
    pub mappings: IndexMap<String, Value>,
}

impl Fragment {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            ..Default::default()
        }
    }
}

/// Everything an expansion function may look at
pub struct ExpandContext<'a> {
    /// the evaluated `SenzaInfo` block
    pub info: &'a Value,
    /// resolved `Arguments` (region, version and all parameters)
    pub arguments: &'a Value,
    pub account_info: &'a AccountInfo,
    pub operator_topic: Option<&'a str>,
    /// names of components already expanded, in order
    pub expanded: &'a [String],
    /// all declared component names, in order
    pub declared: &'a [String],
    pub metadata: &'a dyn MetadataSource,
}

impl ExpandContext<'_> {
    pub fn stack_name(&self) -> &str {
        self.info
            .get("StackName")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn stack_version(&self) -> &str {
        self.info
            .get("StackVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The physical stack identifier, `<name>-<version>`
    pub fn stack_id(&self) -> String {
        format!("{}-{}", self.stack_name(), self.stack_version())
    }

    pub fn region(&self) -> &str {
        &self.account_info.region
    }

    /// Check a by-name reference from one component to another
    ///
    /// References to already-expanded components are fine; references to
    /// components declared later are forward references and fail. Names that
    /// are no component at all pass through untouched, they may refer to raw
    /// template resources.
    pub fn check_reference(&self, component: &str, target: &str) -> Result<(), CompileError> {
        if self.expanded.iter().any(|name| name == target) {
            return Ok(());
        }
        if self.declared.iter().any(|name| name == target) {
            return Err(CompileError::ForwardReference {
                component: component.to_string(),
                target: target.to_string(),
            });
        }
        Ok(())
    }
}

/// Expand one component into its fragment
pub fn expand(spec: &ComponentSpec, context: &ExpandContext) -> Result<Fragment, CompileError> {
    let component_type = ComponentType::parse(&spec.name, &spec.type_name)?;
    tracing::debug!(component = %spec.name, r#type = %spec.type_name, "expanding component");

    match component_type {
        ComponentType::Configuration => configuration::expand_configuration(spec, context),
        ComponentType::SubnetAutoConfiguration => {
            configuration::expand_subnet_auto_configuration(spec, context)
        }
        ComponentType::AutoScalingGroup => {
            auto_scaling_group::expand_auto_scaling_group(spec, context)
        }
        ComponentType::ElasticLoadBalancer => {
            load_balancer::expand_elastic_load_balancer(spec, context)
        }
        ComponentType::WeightedDnsElasticLoadBalancer => {
            load_balancer::expand_weighted_dns_load_balancer(spec, context)
        }
    }
}

pub(crate) fn require_str<'a>(
    properties: &'a IndexMap<String, Value>,
    component: &str,
    property: &str,
) -> Result<&'a str, CompileError> {
    properties
        .get(property)
        .and_then(Value::as_str)
        .ok_or_else(|| CompileError::MissingProperty {
            component: component.to_string(),
            property: property.to_string(),
        })
}

/// A property that must render as a scalar (port numbers etc. may be
/// written as integers or strings in YAML)
pub(crate) fn require_scalar(
    properties: &IndexMap<String, Value>,
    component: &str,
    property: &str,
) -> Result<String, CompileError> {
    properties
        .get(property)
        .and_then(Value::scalar_to_string)
        .ok_or_else(|| CompileError::MissingProperty {
            component: component.to_string(),
            property: property.to_string(),
        })
}

pub(crate) fn scalar_or(
    properties: &IndexMap<String, Value>,
    property: &str,
    default: &str,
) -> String {
    properties
        .get(property)
        .and_then(Value::scalar_to_string)
        .unwrap_or_else(|| default.to_string())
}

/// Resolve security group names through the metadata source
///
/// Entries that already look like ids (`sg-` prefix) and non-string entries
/// (references into the template) pass through untouched.
pub(crate) fn resolve_security_groups(
    groups: &Value,
    component: &str,
    context: &ExpandContext,
) -> Result<Value, CompileError> {
    let entries = groups
        .as_array()
        .ok_or_else(|| CompileError::InvalidProperty {
            component: component.to_string(),
            property: "SecurityGroups".to_string(),
            reason: "must be a list".to_string(),
        })?;

    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.as_str() {
            Some(id) if id.starts_with("sg-") => resolved.push(entry.clone()),
            Some(name) => {
                let id = context
                    .metadata
                    .security_group_id(context.region(), name)?
                    .ok_or_else(|| CompileError::InvalidProperty {
                        component: component.to_string(),
                        property: "SecurityGroups".to_string(),
                        reason: format!("security group {name:?} does not exist"),
                    })?;
                resolved.push(Value::String(id));
            }
            None => resolved.push(entry.clone()),
        }
    }
    Ok(Value::Array(resolved))
}

/// Standard tags carried by every taggable resource
pub(crate) fn stack_tags(context: &ExpandContext, propagate_at_launch: bool) -> Value {
    let tag = |key: &str, value: String| {
        let mut map = IndexMap::new();
        map.insert("Key".to_string(), Value::from(key));
        if propagate_at_launch {
            map.insert("PropagateAtLaunch".to_string(), Value::from(true));
        }
        map.insert("Value".to_string(), Value::from(value));
        Value::Object(map)
    };

    Value::Array(vec![
        tag("Name", context.stack_id()),
        tag("StackName", context.stack_name().to_string()),
        tag("StackVersion", context.stack_version().to_string()),
    ])
}
