//! auto scaling group component
//!
//! Expands into a launch configuration plus an auto scaling group. When the
//! `AutoScaling` block declares a `MetricType`, paired scale-up/scale-down
//! policies and alarms are emitted as well; without it the group keeps a
//! fixed size and no alarms exist.

use super::{
    require_scalar, require_str, resolve_security_groups, scalar_or, stack_tags, ExpandContext,
    Fragment,
};
use crate::definition::ComponentSpec;
use crate::error::CompileError;
use crate::value::Value;
use crate::{array, object};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;

const DEFAULT_SCALING_ADJUSTMENT: &str = "1";
const DEFAULT_COOLDOWN: &str = "60";
const DEFAULT_STATISTIC: &str = "Average";
const DEFAULT_PERIOD: &str = "300";
const DEFAULT_EVALUATION_PERIODS: &str = "2";

/// A duration written as `H`/`M`/`S` components in descending order
///
/// The original spelling is preserved so `4h0m5s` renders as `PT4H0M5S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDuration {
    hours: Option<u64>,
    minutes: Option<u64>,
    seconds: Option<u64>,
}

impl SignalDuration {
    /// 15 minutes, the default signal timeout
    pub fn default_timeout() -> Self {
        Self {
            hours: None,
            minutes: Some(15),
            seconds: None,
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^(?:(\d+)[hH])?(?:(\d+)[mM])?(?:(\d+)[sS])?$")
                .expect("duration pattern is valid")
        });

        if input.is_empty() {
            return None;
        }
        let captures = re.captures(input)?;
        let group = |i| {
            captures
                .get(i)
                .map(|m| m.as_str().parse::<u64>().expect("digits only"))
        };
        Some(Self {
            hours: group(1),
            minutes: group(2),
            seconds: group(3),
        })
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours.unwrap_or(0) * 3600 + self.minutes.unwrap_or(0) * 60 + self.seconds.unwrap_or(0)
    }

    /// ISO 8601 duration as used by creation policies
    pub fn iso8601(&self) -> String {
        let mut rendered = String::from("PT");
        for (amount, unit) in [
            (self.hours, 'H'),
            (self.minutes, 'M'),
            (self.seconds, 'S'),
        ] {
            if let Some(amount) = amount {
                rendered.push_str(&amount.to_string());
                rendered.push(unit);
            }
        }
        rendered
    }
}

/// Parsed `SuccessRequires` property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRequirement {
    pub count: i64,
    pub timeout: SignalDuration,
}

impl Default for SuccessRequirement {
    fn default() -> Self {
        Self {
            count: 1,
            timeout: SignalDuration::default_timeout(),
        }
    }
}

/// Parse the `"<count> within <duration>"` / bare-count grammar
pub fn parse_success_requires(
    value: &Value,
    component: &str,
) -> Result<SuccessRequirement, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidProperty {
        component: component.to_string(),
        property: "SuccessRequires".to_string(),
        reason: reason.to_string(),
    };

    if let Some(count) = value.as_i64() {
        return Ok(SuccessRequirement {
            count,
            timeout: SignalDuration::default_timeout(),
        });
    }

    let text = value
        .as_str()
        .ok_or_else(|| invalid("expected a count or \"<count> within <duration>\""))?;
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let (count, timeout) = match tokens.as_slice() {
        [count] => (*count, SignalDuration::default_timeout()),
        [count, "within", duration] => {
            let timeout = SignalDuration::parse(duration)
                .ok_or_else(|| invalid("duration must be H/M/S components in descending order"))?;
            (*count, timeout)
        }
        _ => return Err(invalid("expected \"<count> within <duration>\"")),
    };

    let count = count
        .parse::<i64>()
        .map_err(|_| invalid("count must be an integer"))?;

    Ok(SuccessRequirement { count, timeout })
}

pub fn expand_auto_scaling_group(
    spec: &ComponentSpec,
    context: &ExpandContext,
) -> Result<Fragment, CompileError> {
    let name = &spec.name;
    let properties = &spec.properties;
    let mut fragment = Fragment::new(name);

    // launch configuration
    let config_name = format!("{name}Config");
    let mut launch: IndexMap<String, Value> = IndexMap::new();
    launch.insert(
        "InstanceType".to_string(),
        Value::from(require_scalar(properties, name, "InstanceType")?),
    );
    let image = require_str(properties, name, "Image")?;
    launch.insert(
        "ImageId".to_string(),
        object! {
            "Fn::FindInMap" => array!["Images", object! { "Ref" => "AWS::Region" }, image],
        },
    );
    launch.insert(
        "AssociatePublicIpAddress".to_string(),
        properties
            .get("AssociatePublicIpAddress")
            .cloned()
            .unwrap_or(Value::Boolean(false)),
    );
    if let Some(groups) = properties.get("SecurityGroups") {
        launch.insert(
            "SecurityGroups".to_string(),
            resolve_security_groups(groups, name, context)?,
        );
    }
    if let Some(profile) = properties.get("IamInstanceProfile") {
        launch.insert("IamInstanceProfile".to_string(), profile.clone());
    }
    if let Some(user_data) = properties.get("UserData") {
        launch.insert(
            "UserData".to_string(),
            object! { "Fn::Base64" => user_data.clone() },
        );
    }
    fragment.resources.insert(
        config_name.clone(),
        object! {
            "Type" => "AWS::AutoScaling::LaunchConfiguration",
            "Properties" => Value::Object(launch),
        },
    );

    // auto scaling group
    let mut group: IndexMap<String, Value> = IndexMap::new();
    group.insert(
        "LaunchConfigurationName".to_string(),
        object! { "Ref" => config_name },
    );
    group.insert(
        "VPCZoneIdentifier".to_string(),
        object! {
            "Fn::FindInMap" => array!["ServerSubnets", object! { "Ref" => "AWS::Region" }, "Subnets"],
        },
    );
    group.insert("Tags".to_string(), stack_tags(context, true));

    let mut default_health_check = "EC2";
    if let Some(load_balancer) = properties.get("ElasticLoadBalancer") {
        let targets = match load_balancer {
            Value::String(target) => vec![target.clone()],
            Value::Array(targets) => targets
                .iter()
                .map(|target| target.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| CompileError::InvalidProperty {
                    component: name.clone(),
                    property: "ElasticLoadBalancer".to_string(),
                    reason: "must be a component name or a list of names".to_string(),
                })?,
            _ => {
                return Err(CompileError::InvalidProperty {
                    component: name.clone(),
                    property: "ElasticLoadBalancer".to_string(),
                    reason: "must be a component name or a list of names".to_string(),
                });
            }
        };
        let refs = targets
            .iter()
            .map(|target| {
                context.check_reference(name, target)?;
                Ok(object! { "Ref" => target.as_str() })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        group.insert("LoadBalancerNames".to_string(), Value::Array(refs));
        // the load balancer knows better than plain instance state
        default_health_check = "ELB";
    }
    group.insert(
        "HealthCheckType".to_string(),
        Value::from(scalar_or(properties, "HealthCheckType", default_health_check)),
    );
    group.insert(
        "HealthCheckGracePeriod".to_string(),
        properties
            .get("HealthCheckGracePeriod")
            .cloned()
            .unwrap_or(Value::from(300)),
    );

    if let Some(topic) = context.operator_topic {
        group.insert(
            "NotificationConfiguration".to_string(),
            object! {
                "NotificationTypes" => array![
                    "autoscaling:EC2_INSTANCE_LAUNCH",
                    "autoscaling:EC2_INSTANCE_LAUNCH_ERROR",
                    "autoscaling:EC2_INSTANCE_TERMINATE",
                    "autoscaling:EC2_INSTANCE_TERMINATE_ERROR",
                ],
                "TopicARN" => topic,
            },
        );
    }

    let auto_scaling = properties.get("AutoScaling").and_then(Value::as_object);
    match auto_scaling {
        Some(scaling) => {
            for (target, source) in [("MinSize", "Minimum"), ("MaxSize", "Maximum")] {
                let value =
                    scaling
                        .get(source)
                        .cloned()
                        .ok_or_else(|| CompileError::MissingProperty {
                            component: name.clone(),
                            property: format!("AutoScaling.{source}"),
                        })?;
                group.insert(target.to_string(), value);
            }
            if let Some(metric) = scaling.get("MetricType") {
                expand_scaling_policies(&mut fragment, name, scaling, metric)?;
            }
        }
        None => {
            group.insert("MaxSize".to_string(), Value::from(1));
            group.insert("MinSize".to_string(), Value::from(1));
        }
    }

    let requirement = match properties
        .get("SuccessRequires")
        .or_else(|| auto_scaling.and_then(|scaling| scaling.get("SuccessRequires")))
    {
        Some(value) => parse_success_requires(value, name)?,
        None => SuccessRequirement::default(),
    };

    fragment.resources.insert(
        name.clone(),
        object! {
            "Type" => "AWS::AutoScaling::AutoScalingGroup",
            "CreationPolicy" => object! {
                "ResourceSignal" => object! {
                    "Count" => requirement.count.to_string(),
                    "Timeout" => requirement.timeout.iso8601(),
                },
            },
            "Properties" => Value::Object(group),
        },
    );

    Ok(fragment)
}

fn expand_scaling_policies(
    fragment: &mut Fragment,
    name: &str,
    scaling: &IndexMap<String, Value>,
    metric: &Value,
) -> Result<(), CompileError> {
    let metric_name = metric.as_str().unwrap_or_default();
    if !metric_name.eq_ignore_ascii_case("cpu") {
        return Err(CompileError::UnsupportedMetricType {
            component: name.to_string(),
            metric: metric_name.to_string(),
        });
    }

    let adjustment = scalar_or(scaling, "ScalingAdjustment", DEFAULT_SCALING_ADJUSTMENT);
    let cooldown = scalar_or(scaling, "Cooldown", DEFAULT_COOLDOWN);

    let policy = |adjustment: String| {
        object! {
            "Type" => "AWS::AutoScaling::ScalingPolicy",
            "Properties" => object! {
                "AdjustmentType" => "ChangeInCapacity",
                "ScalingAdjustment" => adjustment,
                "Cooldown" => cooldown.clone(),
                "AutoScalingGroupName" => object! { "Ref" => name },
            },
        }
    };
    fragment
        .resources
        .insert(format!("{name}ScaleUp"), policy(adjustment.clone()));
    fragment
        .resources
        .insert(format!("{name}ScaleDown"), policy(format!("-{adjustment}")));

    let period = scalar_or(scaling, "Period", DEFAULT_PERIOD);
    let evaluations = scalar_or(scaling, "EvaluationPeriods", DEFAULT_EVALUATION_PERIODS);
    let statistic = scalar_or(scaling, "Statistic", DEFAULT_STATISTIC);

    let alarm = |threshold: &Value, comparison: &str, description: String, action: String| {
        object! {
            "Type" => "AWS::CloudWatch::Alarm",
            "Properties" => object! {
                "MetricName" => "CPUUtilization",
                "Namespace" => "AWS/EC2",
                "Period" => period.clone(),
                "EvaluationPeriods" => evaluations.clone(),
                "Statistic" => statistic.clone(),
                "Threshold" => threshold.clone(),
                "ComparisonOperator" => comparison,
                "Dimensions" => array![object! {
                    "Name" => "AutoScalingGroupName",
                    "Value" => object! { "Ref" => name },
                }],
                "AlarmDescription" => description,
                "AlarmActions" => array![object! { "Ref" => action }],
            },
        }
    };

    if let Some(threshold) = scaling.get("ScaleUpThreshold") {
        let threshold_text = threshold.scalar_to_string().unwrap_or_default();
        fragment.resources.insert(
            format!("{name}CPUAlarmHigh"),
            alarm(
                threshold,
                "GreaterThanThreshold",
                format!("Scale-up if CPU > {threshold_text}% for {period} seconds"),
                format!("{name}ScaleUp"),
            ),
        );
    }
    if let Some(threshold) = scaling.get("ScaleDownThreshold") {
        let threshold_text = threshold.scalar_to_string().unwrap_or_default();
        fragment.resources.insert(
            format!("{name}CPUAlarmLow"),
            alarm(
                threshold,
                "LessThanThreshold",
                format!("Scale-down if CPU < {threshold_text}% for {period} seconds"),
                format!("{name}ScaleDown"),
            ),
        );
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::{AccountInfo, StaticMetadata};
    use pretty_assertions::assert_eq;

    fn spec(properties: Value) -> ComponentSpec {
        ComponentSpec {
            name: "AppServer".to_string(),
            type_name: "Senza::AutoScalingGroup".to_string(),
            properties: properties.as_object().unwrap().clone(),
        }
    }

    struct Fixture {
        account_info: AccountInfo,
        metadata: StaticMetadata,
        info: Value,
        declared: Vec<String>,
        expanded: Vec<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                account_info: AccountInfo::for_region("eu-west-1"),
                metadata: StaticMetadata::default().with_security_group(
                    "eu-west-1",
                    "app-sg",
                    "sg-42",
                ),
                info: object! { "StackName" => "hello", "StackVersion" => "1" },
                declared: vec!["AppLoadBalancer".to_string(), "AppServer".to_string()],
                expanded: vec!["AppLoadBalancer".to_string()],
            }
        }

        fn context(&self) -> ExpandContext<'_> {
            ExpandContext {
                info: &self.info,
                arguments: &Value::Null,
                account_info: &self.account_info,
                operator_topic: None,
                expanded: &self.expanded,
                declared: &self.declared,
                metadata: &self.metadata,
            }
        }
    }

    #[test]
    fn success_requires_with_duration() {
        let parsed = parse_success_requires(&Value::from("4 within 1h20m30s"), "C").unwrap();
        assert_eq!(parsed.count, 4);
        assert_eq!(parsed.timeout.total_seconds(), 4830);
        assert_eq!(parsed.timeout.iso8601(), "PT1H20M30S");
    }

    #[test]
    fn success_requires_bare_count() {
        let parsed = parse_success_requires(&Value::from("2"), "C").unwrap();
        assert_eq!(parsed.count, 2);
        assert_eq!(parsed.timeout.total_seconds(), 900);

        let parsed = parse_success_requires(&Value::from(7), "C").unwrap();
        assert_eq!(parsed.count, 7);
        assert_eq!(parsed.timeout.iso8601(), "PT15M");
    }

    #[test]
    fn success_requires_preserves_zero_components() {
        let parsed = parse_success_requires(&Value::from("1 within 4h0m5s"), "C").unwrap();
        assert_eq!(parsed.timeout.iso8601(), "PT4H0M5S");
    }

    #[test]
    fn success_requires_rejects_bad_grammar() {
        for input in ["1 in 5m", "1 within 5y", "1 within 5s4h", "1 within "] {
            let error = parse_success_requires(&Value::from(input), "C").unwrap_err();
            assert!(
                matches!(error, CompileError::InvalidProperty { .. }),
                "{input:?} must be rejected"
            );
        }
    }

    #[test]
    fn group_without_auto_scaling_is_fixed_size() {
        let fixture = Fixture::new();
        let fragment = expand_auto_scaling_group(
            &spec(object! { "InstanceType" => "t2.micro", "Image" => "LatestImage" }),
            &fixture.context(),
        )
        .unwrap();

        let group = &fragment.resources["AppServer"];
        assert_eq!(group.lookup("Properties.MinSize"), Some(&Value::from(1)));
        assert_eq!(group.lookup("Properties.MaxSize"), Some(&Value::from(1)));
        assert_eq!(
            group.lookup("CreationPolicy.ResourceSignal.Timeout"),
            Some(&Value::from("PT15M"))
        );
        assert!(!fragment.resources.contains_key("AppServerScaleUp"));
        assert!(!fragment.resources.contains_key("AppServerCPUAlarmHigh"));
    }

    #[test]
    fn metric_type_enables_policies_and_alarms() {
        let fixture = Fixture::new();
        let fragment = expand_auto_scaling_group(
            &spec(object! {
                "InstanceType" => "t2.micro",
                "Image" => "LatestImage",
                "AutoScaling" => object! {
                    "Minimum" => 2,
                    "Maximum" => 10,
                    "MetricType" => "CPU",
                    "ScaleUpThreshold" => 70,
                    "ScaleDownThreshold" => 40,
                },
            }),
            &fixture.context(),
        )
        .unwrap();

        let high = &fragment.resources["AppServerCPUAlarmHigh"];
        assert_eq!(
            high.lookup("Properties.Period"),
            Some(&Value::from("300"))
        );
        assert_eq!(
            high.lookup("Properties.Statistic"),
            Some(&Value::from("Average"))
        );
        let down = &fragment.resources["AppServerScaleDown"];
        assert_eq!(
            down.lookup("Properties.ScalingAdjustment"),
            Some(&Value::from("-1"))
        );
        let group = &fragment.resources["AppServer"];
        assert_eq!(group.lookup("Properties.MinSize"), Some(&Value::from(2)));
    }

    #[test]
    fn unsupported_metric_type_is_rejected() {
        let fixture = Fixture::new();
        let error = expand_auto_scaling_group(
            &spec(object! {
                "InstanceType" => "t2.micro",
                "Image" => "LatestImage",
                "AutoScaling" => object! {
                    "Minimum" => 1,
                    "Maximum" => 2,
                    "MetricType" => "Memory",
                },
            }),
            &fixture.context(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::UnsupportedMetricType { metric, .. } if metric == "Memory"
        ));
    }

    #[test]
    fn referencing_an_expanded_load_balancer_works() {
        let fixture = Fixture::new();
        let fragment = expand_auto_scaling_group(
            &spec(object! {
                "InstanceType" => "t2.micro",
                "Image" => "LatestImage",
                "ElasticLoadBalancer" => "AppLoadBalancer",
            }),
            &fixture.context(),
        )
        .unwrap();

        let group = &fragment.resources["AppServer"];
        assert_eq!(
            group.lookup("Properties.LoadBalancerNames.0.Ref"),
            Some(&Value::from("AppLoadBalancer"))
        );
        assert_eq!(
            group.lookup("Properties.HealthCheckType"),
            Some(&Value::from("ELB"))
        );
    }

    #[test]
    fn forward_reference_is_rejected() {
        let mut fixture = Fixture::new();
        fixture.declared = vec!["AppServer".to_string(), "LateBalancer".to_string()];
        fixture.expanded = vec![];
        let error = expand_auto_scaling_group(
            &spec(object! {
                "InstanceType" => "t2.micro",
                "Image" => "LatestImage",
                "ElasticLoadBalancer" => "LateBalancer",
            }),
            &fixture.context(),
        )
        .unwrap_err();
        assert!(matches!(
            error,
            CompileError::ForwardReference { component, target }
                if component == "AppServer" && target == "LateBalancer"
        ));
    }

    #[test]
    fn security_group_names_are_resolved() {
        let fixture = Fixture::new();
        let fragment = expand_auto_scaling_group(
            &spec(object! {
                "InstanceType" => "t2.micro",
                "Image" => "LatestImage",
                "SecurityGroups" => array!["sg-direct", "app-sg"],
            }),
            &fixture.context(),
        )
        .unwrap();

        let launch = &fragment.resources["AppServerConfig"];
        assert_eq!(
            launch.lookup("Properties.SecurityGroups"),
            Some(&array!["sg-direct", "sg-42"])
        );
    }
}
