//! Simulated providers for the ECS/Fargate delivery stack
//!
//! Nothing here talks to a cloud. Each provider validates its properties
//! against a schema, derives a stable handle from the properties that
//! identify an instance, and reports plausible outputs, so stacks can be
//! planned, applied and destroyed end to end against local state.

mod compute;
mod delivery;
mod network;

use anyhow::bail;
use infragraph::{
    Applied, ApplyRequest, ChangeKind, PropertySpec, PropertyType, Properties, Provider,
    ProviderRegistry, Schema, StateRecord, Value,
};
use std::time::Duration;

/// Account and region baked into simulated ARNs
const ACCOUNT: &str = "000000000000";
const REGION: &str = "local-1";

/// Registry with every simulated kind
pub fn registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for provider in network::providers()
        .into_iter()
        .chain(compute::providers())
        .chain(delivery::providers())
    {
        registry.register(provider.kind, provider);
    }
    registry
}

/// A provisioned (or about to be provisioned) simulated instance
pub struct Instance<'a> {
    pub id: &'a str,
    pub handle: &'a str,
    pub properties: &'a Properties,
}

impl Instance<'_> {
    /// String property, falling back to the resource id
    pub fn name(&self, property: &str) -> String {
        self.properties
            .get(property)
            .and_then(Value::as_str)
            .unwrap_or(self.id)
            .to_string()
    }
}

type OutputFn = fn(&Instance<'_>) -> Vec<(&'static str, Value)>;
type CheckFn = fn(&Properties) -> anyhow::Result<()>;

/// Provider for one simulated kind
#[derive(Debug)]
pub struct SimulatedProvider {
    kind: &'static str,
    /// Handle prefix, e.g. `vpc` or `sg`
    prefix: &'static str,
    /// Service segment of the ARN
    service: &'static str,
    schema: Schema,
    create_before_destroy: bool,
    outputs: OutputFn,
    check: Option<CheckFn>,
}

impl SimulatedProvider {
    /// Provider whose schema already accepts `fail` and `latency_ms`
    pub fn new(kind: &'static str, prefix: &'static str, service: &'static str) -> Self {
        Self {
            kind,
            prefix,
            service,
            schema: Schema::new()
                .property("fail", PropertySpec::optional(PropertyType::Bool))
                .property("latency_ms", PropertySpec::optional(PropertyType::Integer)),
            create_before_destroy: false,
            outputs: |_| Vec::new(),
            check: None,
        }
    }

    pub fn property(mut self, name: &str, spec: PropertySpec) -> Self {
        self.schema = self.schema.property(name, spec);
        self
    }

    pub fn create_before_destroy(mut self) -> Self {
        self.create_before_destroy = true;
        self
    }

    /// Kind-specific outputs, in addition to `id` and `arn`
    pub fn outputs(mut self, outputs: OutputFn) -> Self {
        self.outputs = outputs;
        self
    }

    /// Extra validation beyond the schema
    pub fn check(mut self, check: CheckFn) -> Self {
        self.check = Some(check);
        self
    }

    /// Deterministic handle from kind, id and the identifying properties
    fn handle(&self, id: &str, properties: &Properties) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(b"\0");
        hasher.update(id.as_bytes());
        for (name, _) in self.schema.properties().filter(|(_, p)| p.immutable) {
            hasher.update(b"\0");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            if let Some(value) = properties.get(name) {
                hasher.update(value.to_string().as_bytes());
            }
        }
        let hex = hasher.finalize().to_hex();
        format!("{}-{}", self.prefix, &hex[..16])
    }

    fn arn(&self, handle: &str) -> String {
        format!("arn:sim:{}:{REGION}:{ACCOUNT}:{}/{handle}", self.service, self.kind)
    }

    fn simulate_latency(properties: &Properties) {
        if let Some(ms) = properties.get("latency_ms").and_then(Value::as_i64)
            && ms > 0
        {
            std::thread::sleep(Duration::from_millis(ms as u64));
        }
    }
}

impl Provider for SimulatedProvider {
    fn schema(&self) -> Option<&Schema> {
        Some(&self.schema)
    }

    fn validate(&self, properties: &Properties) -> anyhow::Result<()> {
        self.schema.validate(properties)?;
        match self.check {
            Some(check) => check(properties),
            None => Ok(()),
        }
    }

    fn create_before_destroy(&self) -> bool {
        self.create_before_destroy
    }

    fn apply(&self, request: &ApplyRequest<'_>) -> anyhow::Result<Applied> {
        let id = request.resource_id;
        let properties = request.properties;
        Self::simulate_latency(properties);

        if properties.get("fail").and_then(Value::as_bool) == Some(true) {
            bail!("{} {id}: simulated failure (fail = true)", self.kind);
        }

        let handle = self.handle(id, properties);
        let instance = Instance {
            id,
            handle: &handle,
            properties,
        };
        let mut applied = Applied::new(handle.clone())
            .with_output("id", handle.clone())
            .with_output("arn", self.arn(&handle));
        for (name, value) in (self.outputs)(&instance) {
            applied = applied.with_output(name, value);
        }

        let verb = match request.kind {
            ChangeKind::Create => "created",
            ChangeKind::Replace => "created replacement for",
            _ => "updated",
        };
        log::info!("{verb} {} {id} ({handle})", self.kind);
        Ok(applied)
    }

    fn destroy(&self, record: &StateRecord) -> anyhow::Result<()> {
        Self::simulate_latency(&record.properties);
        let handle = record.handle.as_deref().unwrap_or("<no handle>");
        log::info!("deleted {} {handle}", self.kind);
        Ok(())
    }
}

/// Both values are plain integers and `low` exceeds `high`
fn out_of_order(properties: &Properties, low: &str, high: &str) -> Option<(i64, i64)> {
    let lo = properties.get(low).and_then(Value::as_i64)?;
    let hi = properties.get(high).and_then(Value::as_i64)?;
    (lo > hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn apply(provider: &dyn Provider, id: &str, properties: &Properties) -> anyhow::Result<Applied> {
        provider.apply(&ApplyRequest {
            resource_id: id,
            kind: ChangeKind::Create,
            properties,
            previous: None,
        })
    }

    #[test]
    fn test_registry_covers_stack_kinds() {
        let registry = registry();
        let kinds: Vec<&str> = registry.kinds().collect();
        for kind in [
            "vpc",
            "security_group",
            "load_balancer",
            "listener",
            "target_group",
            "ecs_cluster",
            "iam_role",
            "task_definition",
            "fargate_service",
            "scalable_target",
            "ecr_repository",
            "code_repository",
            "build_project",
            "pipeline",
        ] {
            assert!(kinds.contains(&kind), "missing provider for {kind}");
        }
    }

    #[test]
    fn test_handle_is_stable_across_mutable_changes() {
        let registry = registry();
        let vpc = registry.resolve("vpc").unwrap();

        let base = props(&[("cidr", "10.0.0.0/18".into()), ("nat_gateways", 1i64.into())]);
        let scaled = props(&[("cidr", "10.0.0.0/18".into()), ("nat_gateways", 2i64.into())]);
        let moved = props(&[("cidr", "10.1.0.0/18".into()), ("nat_gateways", 1i64.into())]);

        let a = apply(vpc.as_ref(), "main", &base).unwrap();
        let b = apply(vpc.as_ref(), "main", &scaled).unwrap();
        let c = apply(vpc.as_ref(), "main", &moved).unwrap();
        let d = apply(vpc.as_ref(), "other", &base).unwrap();

        assert_eq!(a.handle, b.handle);
        assert_ne!(a.handle, c.handle);
        assert_ne!(a.handle, d.handle);
        assert!(a.handle.as_deref().unwrap().starts_with("vpc-"));
        assert_eq!(a.outputs["vpc_id"], a.outputs["id"]);
        assert!(a.outputs["arn"].as_str().unwrap().starts_with("arn:sim:ec2:"));
    }

    #[test]
    fn test_fail_property() {
        let registry = registry();
        let repo = registry.resolve("ecr_repository").unwrap();
        let err = apply(repo.as_ref(), "images", &props(&[("fail", true.into())])).unwrap_err();
        assert!(err.to_string().contains("simulated failure"));
        assert!(apply(repo.as_ref(), "images", &props(&[("fail", false.into())])).is_ok());
    }

    #[test]
    fn test_create_before_destroy_flags() {
        let registry = registry();
        assert!(registry.resolve("load_balancer").unwrap().create_before_destroy());
        assert!(!registry.resolve("vpc").unwrap().create_before_destroy());
    }

    #[test]
    fn test_out_of_order() {
        let p = props(&[("min", 5i64.into()), ("max", 3i64.into())]);
        assert_eq!(out_of_order(&p, "min", "max"), Some((5, 3)));
        let p = props(&[("min", 5i64.into()), ("max", Value::reference("x", "y"))]);
        assert_eq!(out_of_order(&p, "min", "max"), None);
    }
}
