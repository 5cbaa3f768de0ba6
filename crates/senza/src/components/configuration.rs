//! configuration components
//!
//! Both variants produce no visible resources. They only contribute the
//! region mappings (`ServerSubnets`, `LoadBalancerSubnets`, `Images`) that
//! later components address with `Fn::FindInMap`.

use super::{ExpandContext, Fragment};
use crate::definition::ComponentSpec;
use crate::error::CompileError;
use crate::object;
use crate::value::Value;
use indexmap::IndexMap;

/// `Senza::Configuration` - explicit subnet and image mappings
pub fn expand_configuration(
    spec: &ComponentSpec,
    _context: &ExpandContext,
) -> Result<Fragment, CompileError> {
    let mut fragment = Fragment::new(&spec.name);
    add_mappings(&mut fragment, &spec.properties);
    Ok(fragment)
}

/// `Senza::SubnetAutoConfiguration` - subnets and image from account metadata
///
/// Subnets of the current region are partitioned by purpose: DMZ subnets
/// carry load balancers, everything else carries servers. The most recent
/// machine image is published as `LatestImage`. Explicitly given properties
/// win over discovered ones.
pub fn expand_subnet_auto_configuration(
    spec: &ComponentSpec,
    context: &ExpandContext,
) -> Result<Fragment, CompileError> {
    let region = context.region();
    let mut properties = spec.properties.clone();

    if !properties.contains_key("ServerSubnets") || !properties.contains_key("LoadBalancerSubnets") {
        let subnets = context.metadata.subnets(region)?;
        let (dmz, server): (Vec<_>, Vec<_>) =
            subnets.into_iter().partition(|subnet| subnet.is_dmz());

        let ids = |subnets: Vec<crate::cloud::Subnet>| {
            Value::Array(
                subnets
                    .into_iter()
                    .map(|subnet| Value::from(subnet.id))
                    .collect(),
            )
        };

        properties
            .entry("ServerSubnets".to_string())
            .or_insert_with(|| object! { region => ids(server) });
        properties
            .entry("LoadBalancerSubnets".to_string())
            .or_insert_with(|| object! { region => ids(dmz) });
    }

    if let Some(ami) = context.metadata.latest_image(region)? {
        let images = properties
            .entry("Images".to_string())
            .or_insert_with(Value::empty_object);
        if let Some(images) = images.as_object_mut() {
            images
                .entry("LatestImage".to_string())
                .or_insert_with(|| object! { region => ami });
        }
    }

    let mut fragment = Fragment::new(&spec.name);
    add_mappings(&mut fragment, &properties);
    Ok(fragment)
}

fn add_mappings(fragment: &mut Fragment, properties: &IndexMap<String, Value>) {
    // ServerSubnets/LoadBalancerSubnets: region -> [ids]
    for section in ["ServerSubnets", "LoadBalancerSubnets"] {
        let Some(Value::Object(regions)) = properties.get(section) else {
            continue;
        };
        let mapping: Value = regions
            .iter()
            .map(|(region, subnets)| (region.clone(), object! { "Subnets" => subnets.clone() }))
            .collect();
        fragment.mappings.insert(section.to_string(), mapping);
    }

    // Images: name -> region -> ami, emitted as region -> name -> ami
    if let Some(Value::Object(images)) = properties.get("Images") {
        let mut by_region: IndexMap<String, Value> = IndexMap::new();
        for (name, regions) in images {
            let Some(regions) = regions.as_object() else {
                continue;
            };
            for (region, ami) in regions {
                by_region
                    .entry(region.clone())
                    .or_insert_with(Value::empty_object)
                    .as_object_mut()
                    .expect("entry was inserted as an object")
                    .insert(name.clone(), ami.clone());
            }
        }
        if !by_region.is_empty() {
            fragment
                .mappings
                .insert("Images".to_string(), Value::Object(by_region));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::{AccountInfo, StaticMetadata};
    use crate::{array, object};
    use pretty_assertions::assert_eq;

    fn spec(properties: Value) -> ComponentSpec {
        ComponentSpec {
            name: "Configuration".to_string(),
            type_name: "Senza::Configuration".to_string(),
            properties: properties.as_object().unwrap().clone(),
        }
    }

    fn context<'a>(
        account_info: &'a AccountInfo,
        metadata: &'a StaticMetadata,
        info: &'a Value,
        arguments: &'a Value,
    ) -> ExpandContext<'a> {
        ExpandContext {
            info,
            arguments,
            account_info,
            operator_topic: None,
            expanded: &[],
            declared: &[],
            metadata,
        }
    }

    #[test]
    fn explicit_subnets_become_mappings() {
        let account_info = AccountInfo::for_region("eu-west-1");
        let metadata = StaticMetadata::default();
        let info = object! { "StackName" => "hello", "StackVersion" => "1" };
        let arguments = Value::Null;
        let spec = spec(object! {
            "ServerSubnets" => object! { "eu-west-1" => array!["subnet-1"] },
            "Images" => object! {
                "AppImage" => object! { "eu-west-1" => "ami-123" },
            },
        });

        let fragment =
            expand_configuration(&spec, &context(&account_info, &metadata, &info, &arguments))
                .unwrap();

        assert!(fragment.resources.is_empty());
        assert_eq!(
            fragment.mappings["ServerSubnets"],
            object! { "eu-west-1" => object! { "Subnets" => array!["subnet-1"] } }
        );
        assert_eq!(
            fragment.mappings["Images"],
            object! { "eu-west-1" => object! { "AppImage" => "ami-123" } }
        );
    }

    #[test]
    fn auto_configuration_partitions_subnets() {
        let account_info = AccountInfo::for_region("eu-west-1");
        let metadata = StaticMetadata::default()
            .with_subnet("eu-west-1", "subnet-dmz", "dmz-eu-west-1a")
            .with_subnet("eu-west-1", "subnet-int", "internal-eu-west-1a")
            .with_image("eu-west-1", "ami-latest");
        let info = object! { "StackName" => "hello", "StackVersion" => "1" };
        let arguments = Value::Null;
        let spec = spec(object! {});

        let fragment = expand_subnet_auto_configuration(
            &spec,
            &context(&account_info, &metadata, &info, &arguments),
        )
        .unwrap();

        assert_eq!(
            fragment.mappings["ServerSubnets"],
            object! { "eu-west-1" => object! { "Subnets" => array!["subnet-int"] } }
        );
        assert_eq!(
            fragment.mappings["LoadBalancerSubnets"],
            object! { "eu-west-1" => object! { "Subnets" => array!["subnet-dmz"] } }
        );
        assert_eq!(
            fragment.mappings["Images"],
            object! { "eu-west-1" => object! { "LatestImage" => "ami-latest" } }
        );
    }
}
