use super::{SimulatedProvider, out_of_order};
use infragraph::{PropertySpec, PropertyType, Properties, Value};

pub fn providers() -> Vec<SimulatedProvider> {
    vec![vpc(), security_group(), load_balancer(), listener(), target_group()]
}

fn vpc() -> SimulatedProvider {
    SimulatedProvider::new("vpc", "vpc", "ec2")
        .property("cidr", PropertySpec::required(PropertyType::String).immutable())
        .property("max_azs", PropertySpec::optional(PropertyType::Integer).immutable())
        .property("nat_gateways", PropertySpec::optional(PropertyType::Integer))
        .check(check_vpc)
        .outputs(|vpc| {
            let azs = vpc.properties.get("max_azs").and_then(Value::as_i64).unwrap_or(2);
            let subnets = |tier: &str| {
                Value::List(
                    (0..azs)
                        .map(|az| Value::from(format!("subnet-{tier}{az}-{}", &vpc.handle[4..12])))
                        .collect(),
                )
            };
            vec![
                ("vpc_id", Value::from(vpc.handle)),
                ("public_subnets", subnets("pub")),
                ("private_subnets", subnets("priv")),
            ]
        })
}

fn check_vpc(properties: &Properties) -> anyhow::Result<()> {
    if let Some(cidr) = properties.get("cidr").and_then(Value::as_str) {
        parse_cidr(cidr)?;
    }
    if let Some(azs) = properties.get("max_azs").and_then(Value::as_i64)
        && !(1..=6).contains(&azs)
    {
        anyhow::bail!("max_azs must be between 1 and 6, got {azs}");
    }
    if let Some((nat, azs)) = out_of_order(properties, "nat_gateways", "max_azs") {
        anyhow::bail!("nat_gateways ({nat}) cannot exceed max_azs ({azs})");
    }
    Ok(())
}

/// Accept `a.b.c.d/n` with every octet and the prefix length in range
fn parse_cidr(cidr: &str) -> anyhow::Result<()> {
    let invalid = || anyhow::anyhow!("invalid cidr '{cidr}'");
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let octets: Vec<&str> = address.split('.').collect();
    if prefix > 32 || octets.len() != 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return Err(invalid());
    }
    Ok(())
}

fn security_group() -> SimulatedProvider {
    SimulatedProvider::new("security_group", "sg", "ec2")
        .property("vpc", PropertySpec::required(PropertyType::String).immutable())
        .property("description", PropertySpec::optional(PropertyType::String))
        .property("ingress_port", PropertySpec::optional(PropertyType::Integer))
        // CIDR or another group's id
        .property("ingress_source", PropertySpec::optional(PropertyType::String))
        .check(|properties| {
            if let Some(port) = properties.get("ingress_port").and_then(Value::as_i64)
                && !(1..=65535).contains(&port)
            {
                anyhow::bail!("ingress_port {port} is out of range");
            }
            Ok(())
        })
        .outputs(|sg| vec![("group_id", Value::from(sg.handle))])
}

fn load_balancer() -> SimulatedProvider {
    SimulatedProvider::new("load_balancer", "alb", "elasticloadbalancing")
        .property("vpc", PropertySpec::required(PropertyType::String).immutable())
        .property("security_group", PropertySpec::required(PropertyType::String))
        .property("internet_facing", PropertySpec::optional(PropertyType::Bool).immutable())
        .property("http2", PropertySpec::optional(PropertyType::Bool))
        .property("deletion_protection", PropertySpec::optional(PropertyType::Bool))
        .create_before_destroy()
        .outputs(|alb| {
            let scheme = match alb.properties.get("internet_facing").and_then(Value::as_bool) {
                Some(true) => "",
                _ => "internal-",
            };
            vec![
                ("dns_name", Value::from(format!("{scheme}{}.{}.elb.sim", alb.handle, super::REGION))),
                ("full_name", Value::from(format!("app/{}/{}", alb.id, &alb.handle[4..]))),
            ]
        })
}

fn listener() -> SimulatedProvider {
    SimulatedProvider::new("listener", "lsn", "elasticloadbalancing")
        .property("load_balancer", PropertySpec::required(PropertyType::String).immutable())
        .property("port", PropertySpec::required(PropertyType::Integer))
        .property("protocol", PropertySpec::optional(PropertyType::String))
        .property("target_group", PropertySpec::optional(PropertyType::String))
        .check(|properties| match properties.get("protocol").and_then(Value::as_str) {
            None | Some("HTTP" | "HTTPS") => Ok(()),
            Some(other) => anyhow::bail!("unsupported listener protocol '{other}'"),
        })
}

fn target_group() -> SimulatedProvider {
    SimulatedProvider::new("target_group", "tg", "elasticloadbalancing")
        .property("vpc", PropertySpec::required(PropertyType::String).immutable())
        .property("port", PropertySpec::required(PropertyType::Integer).immutable())
        .property("target_type", PropertySpec::optional(PropertyType::String).immutable())
        .property("health_check_path", PropertySpec::optional(PropertyType::String))
        .property("health_check_port", PropertySpec::optional(PropertyType::Integer))
        .property("healthy_http_codes", PropertySpec::optional(PropertyType::String))
        .property("unhealthy_threshold", PropertySpec::optional(PropertyType::Integer))
        .property("health_check_timeout_secs", PropertySpec::optional(PropertyType::Integer))
        .property("health_check_interval_secs", PropertySpec::optional(PropertyType::Integer))
        .property("stickiness_secs", PropertySpec::optional(PropertyType::Integer))
        .check(|properties| {
            if let Some((timeout, interval)) =
                out_of_order(properties, "health_check_timeout_secs", "health_check_interval_secs")
            {
                anyhow::bail!(
                    "health check timeout ({timeout}s) must not exceed the interval ({interval}s)"
                );
            }
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragraph::{ApplyRequest, ChangeKind, Provider};

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_cidr() {
        assert!(parse_cidr("10.0.0.0/18").is_ok());
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("10.0.0/18").is_err());
        assert!(parse_cidr("10.0.0.256/18").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn test_vpc_validation() {
        let vpc = vpc();
        assert!(vpc.validate(&props(&[("cidr", "10.0.0.0/18".into())])).is_ok());

        let err = vpc
            .validate(&props(&[
                ("cidr", "10.0.0.0/18".into()),
                ("max_azs", 2i64.into()),
                ("nat_gateways", 3i64.into()),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("cannot exceed max_azs"));

        let err = vpc.validate(&props(&[("cidr", "nope".into())])).unwrap_err();
        assert_eq!(err.to_string(), "invalid cidr 'nope'");
    }

    #[test]
    fn test_vpc_outputs_subnets_per_az() {
        let properties = props(&[("cidr", "10.0.0.0/18".into()), ("max_azs", 3i64.into())]);
        let applied = vpc()
            .apply(&ApplyRequest {
                resource_id: "main",
                kind: ChangeKind::Create,
                properties: &properties,
                previous: None,
            })
            .unwrap();
        let Value::List(subnets) = &applied.outputs["private_subnets"] else {
            panic!("private_subnets should be a list");
        };
        assert_eq!(subnets.len(), 3);
    }

    #[test]
    fn test_internal_load_balancer_dns() {
        let properties = props(&[
            ("vpc", "vpc-1".into()),
            ("security_group", "sg-1".into()),
            ("internet_facing", false.into()),
        ]);
        let applied = load_balancer()
            .apply(&ApplyRequest {
                resource_id: "web",
                kind: ChangeKind::Create,
                properties: &properties,
                previous: None,
            })
            .unwrap();
        let dns = applied.outputs["dns_name"].as_str().unwrap();
        assert!(dns.starts_with("internal-alb-"));
        assert!(dns.ends_with(".elb.sim"));
    }

    #[test]
    fn test_listener_protocol() {
        let base = props(&[("load_balancer", "alb-1".into()), ("port", 80i64.into())]);
        assert!(listener().validate(&base).is_ok());

        let mut udp = base.clone();
        udp.insert("protocol".into(), "UDP".into());
        assert!(listener().validate(&udp).is_err());
    }
}
