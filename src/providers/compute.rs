use super::{SimulatedProvider, out_of_order};
use infragraph::{PropertySpec, PropertyType, Properties, Value};

/// Fargate CPU units and the memory sizes each allows
const FARGATE_SIZES: &[(i64, i64, i64)] = &[
    (256, 512, 2048),
    (512, 1024, 4096),
    (1024, 2048, 8192),
    (2048, 4096, 16384),
    (4096, 8192, 30720),
];

pub fn providers() -> Vec<SimulatedProvider> {
    vec![
        ecs_cluster(),
        iam_role(),
        task_definition(),
        fargate_service(),
        scalable_target(),
    ]
}

fn ecs_cluster() -> SimulatedProvider {
    SimulatedProvider::new("ecs_cluster", "cluster", "ecs")
        .property("vpc", PropertySpec::required(PropertyType::String).immutable())
        .property("cluster_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("container_insights", PropertySpec::optional(PropertyType::Bool))
        .outputs(|cluster| vec![("cluster_name", Value::from(cluster.name("cluster_name")))])
}

fn iam_role() -> SimulatedProvider {
    SimulatedProvider::new("iam_role", "role", "iam")
        .property("assumed_by", PropertySpec::required(PropertyType::String).immutable())
        .property("role_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("actions", PropertySpec::optional(PropertyType::List))
        .property("resources", PropertySpec::optional(PropertyType::List))
        .check(|properties| {
            if let Some(Value::List(actions)) = properties.get("actions")
                && let Some(bad) = actions
                    .iter()
                    .filter_map(Value::as_str)
                    .find(|a| !a.contains(':'))
            {
                anyhow::bail!("action '{bad}' is not of the form service:Action");
            }
            Ok(())
        })
        .outputs(|role| vec![("role_name", Value::from(role.name("role_name")))])
}

fn task_definition() -> SimulatedProvider {
    SimulatedProvider::new("task_definition", "taskdef", "ecs")
        .property("family", PropertySpec::optional(PropertyType::String).immutable())
        .property("cpu", PropertySpec::required(PropertyType::Integer))
        .property("memory_mib", PropertySpec::required(PropertyType::Integer))
        .property("image", PropertySpec::required(PropertyType::String))
        .property("container_name", PropertySpec::optional(PropertyType::String))
        .property("container_port", PropertySpec::optional(PropertyType::Integer))
        .property("task_role", PropertySpec::optional(PropertyType::String))
        .property("log_prefix", PropertySpec::optional(PropertyType::String))
        .check(check_fargate_size)
        .outputs(|task| vec![("family", Value::from(task.name("family")))])
}

fn check_fargate_size(properties: &Properties) -> anyhow::Result<()> {
    let (Some(cpu), Some(memory)) = (
        properties.get("cpu").and_then(Value::as_i64),
        properties.get("memory_mib").and_then(Value::as_i64),
    ) else {
        return Ok(());
    };
    let Some(&(_, min, max)) = FARGATE_SIZES.iter().find(|(c, ..)| *c == cpu) else {
        anyhow::bail!("cpu must be one of 256, 512, 1024, 2048, 4096; got {cpu}");
    };
    if !(min..=max).contains(&memory) {
        anyhow::bail!("memory_mib for cpu {cpu} must be between {min} and {max}; got {memory}");
    }
    Ok(())
}

fn fargate_service() -> SimulatedProvider {
    SimulatedProvider::new("fargate_service", "svc", "ecs")
        .property("cluster", PropertySpec::required(PropertyType::String).immutable())
        .property("service_name", PropertySpec::optional(PropertyType::String).immutable())
        .property("task_definition", PropertySpec::required(PropertyType::String))
        .property("desired_count", PropertySpec::required(PropertyType::Integer))
        .property("security_groups", PropertySpec::optional(PropertyType::List))
        .property("target_group", PropertySpec::optional(PropertyType::String))
        .property("assign_public_ip", PropertySpec::optional(PropertyType::Bool).immutable())
        .property("min_healthy_percent", PropertySpec::optional(PropertyType::Integer))
        .property("max_healthy_percent", PropertySpec::optional(PropertyType::Integer))
        .property("health_check_grace_secs", PropertySpec::optional(PropertyType::Integer))
        .property("platform_version", PropertySpec::optional(PropertyType::String))
        .check(|properties| {
            if properties
                .get("desired_count")
                .and_then(Value::as_i64)
                .is_some_and(|n| n < 0)
            {
                anyhow::bail!("desired_count cannot be negative");
            }
            if let Some((min, max)) =
                out_of_order(properties, "min_healthy_percent", "max_healthy_percent")
            {
                anyhow::bail!("min_healthy_percent ({min}) exceeds max_healthy_percent ({max})");
            }
            Ok(())
        })
        .outputs(|svc| vec![("service_name", Value::from(svc.name("service_name")))])
}

fn scalable_target() -> SimulatedProvider {
    SimulatedProvider::new("scalable_target", "scale", "application-autoscaling")
        .property("cluster", PropertySpec::required(PropertyType::String).immutable())
        .property("service", PropertySpec::required(PropertyType::String).immutable())
        .property("min_capacity", PropertySpec::required(PropertyType::Integer))
        .property("max_capacity", PropertySpec::required(PropertyType::Integer))
        .property("target_response_time", PropertySpec::optional(PropertyType::Float))
        .property("scale_in_cooldown_secs", PropertySpec::optional(PropertyType::Integer))
        .property("scale_out_cooldown_secs", PropertySpec::optional(PropertyType::Integer))
        .check(|properties| {
            if let Some((min, max)) = out_of_order(properties, "min_capacity", "max_capacity") {
                anyhow::bail!("min_capacity ({min}) exceeds max_capacity ({max})");
            }
            Ok(())
        })
        .outputs(|target| {
            let resource_id = format!(
                "service/{}/{}",
                target.name("cluster"),
                target.name("service")
            );
            vec![
                ("resource_id", Value::from(resource_id)),
                ("scalable_dimension", Value::from("ecs:service:DesiredCount")),
            ]
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragraph::Provider;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fargate_sizes() {
        let task = task_definition();
        let sized = |cpu: i64, memory: i64| {
            props(&[
                ("cpu", cpu.into()),
                ("memory_mib", memory.into()),
                ("image", "repo:latest".into()),
            ])
        };
        assert!(task.validate(&sized(256, 512)).is_ok());
        assert!(task.validate(&sized(256, 4096)).is_err());
        assert!(task.validate(&sized(300, 512)).is_err());

        // References are checked once resolved
        let mut deferred = sized(256, 512);
        deferred.insert("memory_mib".into(), Value::reference("sizing", "memory"));
        assert!(task.validate(&deferred).is_ok());
    }

    #[test]
    fn test_scaling_bounds() {
        let target = scalable_target();
        let base = |min: i64, max: i64| {
            props(&[
                ("cluster", "demo".into()),
                ("service", "web".into()),
                ("min_capacity", min.into()),
                ("max_capacity", max.into()),
            ])
        };
        assert!(target.validate(&base(3, 300)).is_ok());
        let err = target.validate(&base(10, 3)).unwrap_err();
        assert_eq!(err.to_string(), "min_capacity (10) exceeds max_capacity (3)");
    }

    #[test]
    fn test_role_actions() {
        let role = iam_role();
        let ok = props(&[
            ("assumed_by", "ecs-tasks.amazonaws.com".into()),
            ("actions", Value::from(vec!["ecr:GetAuthorizationToken"])),
        ]);
        assert!(role.validate(&ok).is_ok());

        let bad = props(&[
            ("assumed_by", "ecs-tasks.amazonaws.com".into()),
            ("actions", Value::from(vec!["everything"])),
        ]);
        assert!(role.validate(&bad).is_err());
    }
}
