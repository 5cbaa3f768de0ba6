//! load balancer components
//!
//! `Senza::ElasticLoadBalancer` expands into a classic load balancer plus
//! one DNS record set per configured domain. The weighted variant only adds
//! default domains (a weighted main domain and a per-version domain) and
//! then defers to the plain expansion.

use super::{
    require_scalar, resolve_security_groups, scalar_or, stack_tags, ExpandContext, Fragment,
};
use crate::definition::ComponentSpec;
use crate::error::CompileError;
use crate::value::Value;
use crate::{array, object};
use indexmap::IndexMap;

/// Physical load balancer names are limited to 32 characters
const MAX_NAME_LENGTH: usize = 32;

const RECORD_TTL: i64 = 20;

/// Properties consumed by the expansion itself; everything else passes
/// through to the resource verbatim
const CONSUMED_PROPERTIES: &[&str] = &[
    "HTTPPort",
    "HealthCheckPort",
    "HealthCheckPath",
    "HealthCheckProtocol",
    "SecurityGroups",
    "Scheme",
    "SSLCertificateId",
    "Domains",
    "MainDomain",
];

pub fn expand_elastic_load_balancer(
    spec: &ComponentSpec,
    context: &ExpandContext,
) -> Result<Fragment, CompileError> {
    let name = &spec.name;
    let properties = &spec.properties;
    let mut fragment = Fragment::new(name);

    let http_port = require_scalar(properties, name, "HTTPPort")?;
    let health_check_port = scalar_or(properties, "HealthCheckPort", &http_port);
    let health_check_path = scalar_or(properties, "HealthCheckPath", "/ui/");
    let health_check_protocol =
        scalar_or(properties, "HealthCheckProtocol", "HTTP").to_uppercase();
    if !["HTTP", "TCP", "UDP", "SSL"].contains(&health_check_protocol.as_str()) {
        return Err(CompileError::InvalidProperty {
            component: name.clone(),
            property: "HealthCheckProtocol".to_string(),
            reason: format!("{health_check_protocol:?} is not one of HTTP, TCP, UDP, SSL"),
        });
    }
    // only HTTP targets carry a path
    let health_check_target = if health_check_protocol == "HTTP" {
        format!("{health_check_protocol}:{health_check_port}{health_check_path}")
    } else {
        format!("{health_check_protocol}:{health_check_port}")
    };

    let listener = match properties.get("SSLCertificateId").and_then(Value::as_str) {
        Some(certificate) => object! {
            "PolicyNames" => Value::Array(Vec::new()),
            "SSLCertificateId" => certificate,
            "Protocol" => "HTTPS",
            "InstanceProtocol" => "HTTP",
            "InstancePort" => http_port.clone(),
            "LoadBalancerPort" => "443",
        },
        None => object! {
            "PolicyNames" => Value::Array(Vec::new()),
            "Protocol" => "HTTP",
            "InstanceProtocol" => "HTTP",
            "InstancePort" => http_port.clone(),
            "LoadBalancerPort" => "80",
        },
    };

    let mut resource: IndexMap<String, Value> = IndexMap::new();
    resource.insert(
        "LoadBalancerName".to_string(),
        Value::from(physical_name(context.stack_name(), context.stack_version())),
    );
    // exposure is opt-in, an unconfigured balancer stays internal
    resource.insert(
        "Scheme".to_string(),
        Value::from(scalar_or(properties, "Scheme", "internal")),
    );
    resource.insert(
        "Subnets".to_string(),
        object! {
            "Fn::FindInMap" => array![
                "LoadBalancerSubnets",
                object! { "Ref" => "AWS::Region" },
                "Subnets",
            ],
        },
    );
    if let Some(groups) = properties.get("SecurityGroups") {
        resource.insert(
            "SecurityGroups".to_string(),
            resolve_security_groups(groups, name, context)?,
        );
    }
    resource.insert(
        "HealthCheck".to_string(),
        object! {
            "HealthyThreshold" => "2",
            "UnhealthyThreshold" => "2",
            "Interval" => "10",
            "Timeout" => "5",
            "Target" => health_check_target,
        },
    );
    resource.insert("Listeners".to_string(), array![listener]);
    resource.insert("CrossZone".to_string(), Value::from("true"));
    resource.insert("Tags".to_string(), stack_tags(context, false));

    for (key, value) in properties {
        if !CONSUMED_PROPERTIES.contains(&key.as_str()) {
            resource.insert(key.clone(), value.clone());
        }
    }

    fragment.resources.insert(
        name.clone(),
        object! {
            "Type" => "AWS::ElasticLoadBalancing::LoadBalancer",
            "Properties" => Value::Object(resource),
        },
    );

    if let Some(domains) = properties.get("Domains") {
        let domains = domains
            .as_object()
            .ok_or_else(|| CompileError::InvalidProperty {
                component: name.clone(),
                property: "Domains".to_string(),
                reason: "must be a mapping of domain names".to_string(),
            })?;
        for (domain_name, domain) in domains {
            let record = expand_domain(name, domain_name, domain, context)?;
            fragment
                .resources
                .insert(format!("{name}{domain_name}"), record);
        }
    }

    Ok(fragment)
}

/// `Senza::WeightedDnsElasticLoadBalancer` - load balancer with generated
/// weighted DNS domains
///
/// `MainDomain` (weighted, shared by all versions of the application) and
/// `VersionDomain` (fixed, one per stack version) are filled in unless the
/// definition declares its own `Domains`.
pub fn expand_weighted_dns_load_balancer(
    spec: &ComponentSpec,
    context: &ExpandContext,
) -> Result<Fragment, CompileError> {
    let mut spec = spec.clone();

    if !spec.properties.contains_key("Domains") {
        let (subdomain, zone) = match spec.properties.get("MainDomain").and_then(Value::as_str) {
            Some(main_domain) => {
                let (subdomain, zone) =
                    main_domain
                        .split_once('.')
                        .ok_or_else(|| CompileError::InvalidProperty {
                            component: spec.name.clone(),
                            property: "MainDomain".to_string(),
                            reason: "must be a fully qualified domain name".to_string(),
                        })?;
                (subdomain.to_string(), zone.to_string())
            }
            None => {
                let zone = context.account_info.domain.clone().ok_or_else(|| {
                    CompileError::MissingProperty {
                        component: spec.name.clone(),
                        property: "MainDomain".to_string(),
                    }
                })?;
                (context.stack_name().to_string(), zone)
            }
        };

        spec.properties.insert(
            "Domains".to_string(),
            object! {
                "MainDomain" => object! {
                    "Type" => "weighted",
                    "Zone" => zone.clone(),
                    "Subdomain" => subdomain,
                },
                "VersionDomain" => object! {
                    "Type" => "standalone",
                    "Zone" => zone,
                    "Subdomain" => context.stack_id(),
                },
            },
        );
    }

    expand_elastic_load_balancer(&spec, context)
}

/// One domain entry becomes a CNAME record set pointing at the balancer
fn expand_domain(
    component: &str,
    domain_name: &str,
    domain: &Value,
    context: &ExpandContext,
) -> Result<Value, CompileError> {
    let entry = domain
        .as_object()
        .ok_or_else(|| CompileError::InvalidProperty {
            component: component.to_string(),
            property: format!("Domains.{domain_name}"),
            reason: "must be a mapping".to_string(),
        })?;

    let field = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::MissingProperty {
                component: component.to_string(),
                property: format!("Domains.{domain_name}.{key}"),
            })
    };
    let zone = field("Zone")?;
    let subdomain = field("Subdomain")?;
    let record_type = entry
        .get("Type")
        .and_then(Value::as_str)
        .unwrap_or("standalone");

    let mut record: IndexMap<String, Value> = IndexMap::new();
    record.insert("Type".to_string(), Value::from("CNAME"));
    record.insert("TTL".to_string(), Value::from(RECORD_TTL.to_string()));
    record.insert(
        "ResourceRecords".to_string(),
        array![object! {
            "Fn::GetAtt" => array![component, "DNSName"],
        }],
    );
    record.insert("Name".to_string(), Value::from(format!("{subdomain}.{zone}")));
    record.insert("HostedZoneName".to_string(), Value::from(format!("{zone}.")));

    match record_type {
        "standalone" => {}
        "weighted" => {
            // new stacks join the rotation with no traffic
            record.insert("Weight".to_string(), Value::from(0));
            record.insert("SetIdentifier".to_string(), Value::from(context.stack_id()));
        }
        other => {
            return Err(CompileError::InvalidProperty {
                component: component.to_string(),
                property: format!("Domains.{domain_name}.Type"),
                reason: format!("{other:?} is not one of weighted, standalone"),
            });
        }
    }

    Ok(object! {
        "Type" => "AWS::Route53::RecordSet",
        "Properties" => Value::Object(record),
    })
}

/// `<name>-<version>` with the name part truncated to fit the length limit
fn physical_name(stack_name: &str, version: &str) -> String {
    let budget = MAX_NAME_LENGTH.saturating_sub(version.len() + 1);
    // back off to a character boundary, names are not always ASCII
    let mut cut = budget.min(stack_name.len());
    while !stack_name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{version}", &stack_name[..cut])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::{AccountInfo, StaticMetadata};
    use pretty_assertions::assert_eq;

    fn spec(properties: Value) -> ComponentSpec {
        ComponentSpec {
            name: "AppLoadBalancer".to_string(),
            type_name: "Senza::ElasticLoadBalancer".to_string(),
            properties: properties.as_object().unwrap().clone(),
        }
    }

    struct Fixture {
        account_info: AccountInfo,
        metadata: StaticMetadata,
        info: Value,
    }

    impl Fixture {
        fn new() -> Self {
            let mut account_info = AccountInfo::for_region("eu-west-1");
            account_info.domain = Some("myteam.example.org".to_string());
            Self {
                account_info,
                metadata: StaticMetadata::default(),
                info: object! { "StackName" => "hello", "StackVersion" => "1" },
            }
        }

        fn context(&self) -> ExpandContext<'_> {
            ExpandContext {
                info: &self.info,
                arguments: &Value::Null,
                account_info: &self.account_info,
                operator_topic: None,
                expanded: &[],
                declared: &[],
                metadata: &self.metadata,
            }
        }
    }

    #[test]
    fn defaults_to_an_internal_scheme() {
        let fixture = Fixture::new();
        let fragment =
            expand_elastic_load_balancer(&spec(object! { "HTTPPort" => 8080 }), &fixture.context())
                .unwrap();

        let balancer = &fragment.resources["AppLoadBalancer"];
        assert_eq!(
            balancer.lookup("Properties.Scheme"),
            Some(&Value::from("internal"))
        );
        assert_eq!(
            balancer.lookup("Properties.LoadBalancerName"),
            Some(&Value::from("hello-1"))
        );
        assert_eq!(
            balancer.lookup("Properties.HealthCheck.Target"),
            Some(&Value::from("HTTP:8080/ui/"))
        );
        assert_eq!(
            balancer.lookup("Properties.Listeners.0.LoadBalancerPort"),
            Some(&Value::from("80"))
        );
    }

    #[test]
    fn certificate_switches_the_listener_to_https() {
        let fixture = Fixture::new();
        let fragment = expand_elastic_load_balancer(
            &spec(object! {
                "HTTPPort" => 8080,
                "SSLCertificateId" => "arn:aws:iam::123:server-certificate/cert",
            }),
            &fixture.context(),
        )
        .unwrap();

        let balancer = &fragment.resources["AppLoadBalancer"];
        assert_eq!(
            balancer.lookup("Properties.Listeners.0.Protocol"),
            Some(&Value::from("HTTPS"))
        );
        assert_eq!(
            balancer.lookup("Properties.Listeners.0.LoadBalancerPort"),
            Some(&Value::from("443"))
        );
    }

    #[test]
    fn tcp_health_check_has_no_path() {
        let fixture = Fixture::new();
        let fragment = expand_elastic_load_balancer(
            &spec(object! {
                "HTTPPort" => 8080,
                "HealthCheckProtocol" => "TCP",
            }),
            &fixture.context(),
        )
        .unwrap();

        let balancer = &fragment.resources["AppLoadBalancer"];
        assert_eq!(
            balancer.lookup("Properties.HealthCheck.Target"),
            Some(&Value::from("TCP:8080"))
        );
    }

    #[test]
    fn unknown_health_check_protocol_is_rejected() {
        let fixture = Fixture::new();
        let error = expand_elastic_load_balancer(
            &spec(object! {
                "HTTPPort" => 8080,
                "HealthCheckProtocol" => "GOPHER",
            }),
            &fixture.context(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::InvalidProperty { property, .. } if property == "HealthCheckProtocol"
        ));
    }

    #[test]
    fn long_stack_names_are_truncated() {
        assert_eq!(
            physical_name("a-very-long-application-stack-name", "42"),
            "a-very-long-application-stack-42"
        );
        assert_eq!(physical_name("short", "1"), "short-1");
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        // 20 two-byte characters, the 29-byte budget lands mid-character
        let name = "ä".repeat(20);
        assert_eq!(physical_name(&name, "12"), format!("{}-12", "ä".repeat(14)));
    }

    #[test]
    fn extra_properties_pass_through() {
        let fixture = Fixture::new();
        let fragment = expand_elastic_load_balancer(
            &spec(object! {
                "HTTPPort" => 8080,
                "ConnectionDrainingPolicy" => object! { "Enabled" => true },
            }),
            &fixture.context(),
        )
        .unwrap();

        let balancer = &fragment.resources["AppLoadBalancer"];
        assert_eq!(
            balancer.lookup("Properties.ConnectionDrainingPolicy.Enabled"),
            Some(&Value::from(true))
        );
    }

    #[test]
    fn weighted_variant_generates_both_domains() {
        let fixture = Fixture::new();
        let fragment = expand_weighted_dns_load_balancer(
            &spec(object! { "HTTPPort" => 8080 }),
            &fixture.context(),
        )
        .unwrap();

        let main = &fragment.resources["AppLoadBalancerMainDomain"];
        assert_eq!(
            main.lookup("Properties.Name"),
            Some(&Value::from("hello.myteam.example.org"))
        );
        assert_eq!(main.lookup("Properties.Weight"), Some(&Value::from(0)));
        assert_eq!(
            main.lookup("Properties.SetIdentifier"),
            Some(&Value::from("hello-1"))
        );

        let version = &fragment.resources["AppLoadBalancerVersionDomain"];
        assert_eq!(
            version.lookup("Properties.Name"),
            Some(&Value::from("hello-1.myteam.example.org"))
        );
        assert_eq!(version.lookup("Properties.Weight"), None);
        assert_eq!(
            version.lookup("Properties.HostedZoneName"),
            Some(&Value::from("myteam.example.org."))
        );
    }

    #[test]
    fn explicit_main_domain_overrides_the_account_zone() {
        let fixture = Fixture::new();
        let fragment = expand_weighted_dns_load_balancer(
            &spec(object! {
                "HTTPPort" => 8080,
                "MainDomain" => "api.other.example.org",
            }),
            &fixture.context(),
        )
        .unwrap();

        let main = &fragment.resources["AppLoadBalancerMainDomain"];
        assert_eq!(
            main.lookup("Properties.Name"),
            Some(&Value::from("api.other.example.org"))
        );
    }

    #[test]
    fn weighted_variant_without_any_zone_fails() {
        let mut fixture = Fixture::new();
        fixture.account_info.domain = None;
        let error = expand_weighted_dns_load_balancer(
            &spec(object! { "HTTPPort" => 8080 }),
            &fixture.context(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::MissingProperty { property, .. } if property == "MainDomain"
        ));
    }
}
