//! Stack files - TOML declarations of a resource graph
//!
//! ```toml
//! name = "demo"
//!
//! [[resource]]
//! id = "vpc"
//! kind = "vpc"
//! [resource.properties]
//! cidr = "10.0.0.0/18"
//!
//! [[resource]]
//! id = "cluster"
//! kind = "ecs_cluster"
//! depends_on = ["roles"]
//! [resource.properties]
//! vpc = { ref = "vpc.vpc_id" }
//!
//! [outputs]
//! vpc_id = { ref = "vpc.vpc_id" }
//! ```
//!
//! Resources may be declared in any order.

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use infragraph::{Properties, Reference, ResourceGraph, ResourceSpec, StateRecord, Value};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StackFile {
    name: Option<String>,
    #[serde(default, rename = "resource")]
    resources: Vec<Declaration>,
    #[serde(default)]
    outputs: IndexMap<String, Reference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Declaration {
    id: String,
    kind: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    properties: Properties,
}

impl Declaration {
    /// Every resource this declaration needs in the graph first
    fn upstream(&self) -> impl Iterator<Item = &str> {
        self.properties
            .values()
            .flat_map(Value::references)
            .map(|r| r.resource.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
    }
}

/// A loaded stack
#[derive(Debug)]
pub struct Stack {
    pub name: String,
    pub graph: ResourceGraph,
    /// Named values exported after apply
    pub outputs: IndexMap<String, Reference>,
}

impl Stack {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read stack file {}", path.display()))?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("stack");
        Self::parse(&content, fallback)
            .with_context(|| format!("Invalid stack file {}", path.display()))
    }

    pub fn parse(content: &str, fallback_name: &str) -> Result<Self> {
        let file: StackFile = toml::from_str(content)?;
        let graph = build_graph(file.resources)?;

        for (name, reference) in &file.outputs {
            if !graph.contains(&reference.resource) {
                bail!("output '{name}' refers to undeclared resource '{}'", reference.resource);
            }
        }

        log::debug!("Loaded stack with {} resources", graph.len());
        Ok(Self {
            name: file.name.unwrap_or_else(|| fallback_name.to_string()),
            graph,
            outputs: file.outputs,
        })
    }

    /// Output values from recorded state; missing ones are omitted
    pub fn resolve_outputs(&self, records: &BTreeMap<String, StateRecord>) -> IndexMap<String, Value> {
        self.outputs
            .iter()
            .filter_map(|(name, r)| {
                let value = records.get(&r.resource)?.outputs.get(&r.attribute)?;
                Some((name.clone(), value.clone()))
            })
            .collect()
    }
}

/// Add declarations once everything they reference is in the graph
fn build_graph(declarations: Vec<Declaration>) -> Result<ResourceGraph> {
    let declared: HashSet<String> = declarations.iter().map(|d| d.id.clone()).collect();
    let mut graph = ResourceGraph::new();
    let mut pending = declarations;

    while !pending.is_empty() {
        // An undeclared target is let through so the graph reports it
        let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|d| {
            d.upstream()
                .all(|up| graph.contains(up) || !declared.contains(up))
        });

        if ready.is_empty() {
            let stuck = &blocked[0];
            let upstream = stuck
                .upstream()
                .find(|up| !graph.contains(up))
                .unwrap_or(stuck.id.as_str());
            return Err(infragraph::Error::CycleDetected {
                from: upstream.to_string(),
                to: stuck.id.clone(),
            })
            .with_context(|| format!("resource '{}'", stuck.id));
        }

        for declaration in ready {
            let id = declaration.id.clone();
            let mut spec = ResourceSpec::new(declaration.id, declaration.kind);
            spec.properties = declaration.properties;
            spec.depends_on = declaration.depends_on;
            graph
                .add(spec)
                .with_context(|| format!("resource '{id}'"))?;
        }
        pending = blocked;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infragraph::Error;

    const DEMO: &str = include_str!("../demos/ecs-fargate.toml");

    #[test]
    fn test_parse_with_forward_references() {
        let stack = Stack::parse(
            r#"
[[resource]]
id = "cluster"
kind = "ecs_cluster"
[resource.properties]
vpc = { ref = "vpc.vpc_id" }

[[resource]]
id = "vpc"
kind = "vpc"
[resource.properties]
cidr = "10.0.0.0/18"
max_azs = 2
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(stack.name, "inline");
        assert_eq!(stack.graph.topological_order().unwrap(), vec!["vpc", "cluster"]);
        let cluster = stack.graph.get("cluster").unwrap();
        assert_eq!(cluster.properties()["vpc"], Value::reference("vpc", "vpc_id"));
        assert_eq!(cluster.dependencies().collect::<Vec<_>>(), vec!["vpc"]);
    }

    #[test]
    fn test_explicit_depends_on() {
        let stack = Stack::parse(
            r#"
[[resource]]
id = "service"
kind = "fargate_service"
depends_on = ["listener"]

[[resource]]
id = "listener"
kind = "listener"
"#,
            "inline",
        )
        .unwrap();
        assert!(stack.graph.depends_on("service", "listener"));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Stack::parse(
            r#"
[[resource]]
id = "a"
kind = "vpc"
depends_on = ["b"]

[[resource]]
id = "b"
kind = "vpc"
[resource.properties]
x = { ref = "a.id" }
"#,
            "inline",
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = Stack::parse(
            r#"
[[resource]]
id = "cluster"
kind = "ecs_cluster"
[resource.properties]
vpc = { ref = "network.vpc_id" }
"#,
            "inline",
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnknownResource { id }) if id == "network"
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Stack::parse(
            r#"
[[resource]]
id = "vpc"
kind = "vpc"

[[resource]]
id = "vpc"
kind = "vpc"
"#,
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::DuplicateId { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Stack::parse(
            r#"
[[resource]]
id = "vpc"
type = "vpc"
"#,
            "inline",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_output_must_name_declared_resource() {
        let err = Stack::parse(
            r#"
[[resource]]
id = "vpc"
kind = "vpc"

[outputs]
dns = { ref = "alb.dns_name" }
"#,
            "inline",
        )
        .unwrap_err();
        assert!(err.to_string().contains("undeclared resource 'alb'"));
    }

    #[test]
    fn test_resolve_outputs() {
        let stack = Stack::parse(
            r#"
[[resource]]
id = "vpc"
kind = "vpc"

[outputs]
vpc_id = { ref = "vpc.vpc_id" }
missing = { ref = "vpc.nope" }
"#,
            "inline",
        )
        .unwrap();

        let mut outputs = Properties::new();
        outputs.insert("vpc_id".into(), Value::from("vpc-123"));
        let records = BTreeMap::from([(
            "vpc".to_string(),
            StateRecord::new("vpc", Properties::new()).with_outputs(outputs),
        )]);

        let resolved = stack.resolve_outputs(&records);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["vpc_id"], Value::from("vpc-123"));
    }

    #[test]
    fn test_demo_stack_is_valid() {
        let stack = Stack::parse(DEMO, "ecs-fargate").unwrap();
        assert_eq!(stack.name, "ecs-fargate");
        crate::providers::registry()
            .validate_graph(&stack.graph)
            .unwrap();

        let order = stack.graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("vpc") < pos("cluster"));
        assert!(pos("listener") < pos("web_service"));
        assert!(pos("web_service") < pos("web_scaling"));
        assert!(pos("web_service") < pos("pipeline"));
        assert!(stack.outputs.contains_key("load_balancer_dns"));
    }

    #[test]
    fn test_demo_stack_converges() {
        use infragraph::{
            EngineContext, ExecuteOptions, MemoryStateStore, NoProgress, StateStore, converge,
        };

        let registry = crate::providers::registry();
        let store = MemoryStateStore::new();
        let ctx = EngineContext::new(&registry, &store);
        let opts = ExecuteOptions::default().with_concurrency(4);

        let mut stack = Stack::parse(DEMO, "ecs-fargate").unwrap();
        let (plan, result) = converge(&ctx, &mut stack.graph, &opts, &mut NoProgress).unwrap();
        assert_eq!(plan.summary().create, stack.graph.len());
        assert!(result.is_success(), "{:?}", result.failures().collect::<Vec<_>>());

        let records = store.load().unwrap();
        assert_eq!(records.len(), stack.graph.len());
        let outputs = stack.resolve_outputs(&records);
        let dns = outputs["load_balancer_dns"].as_str().unwrap();
        assert!(dns.ends_with(".elb.sim"));

        // Unchanged declarations converge to nothing
        let mut again = Stack::parse(DEMO, "ecs-fargate").unwrap();
        let (plan, _) = converge(&ctx, &mut again.graph, &opts, &mut NoProgress).unwrap();
        assert!(!plan.has_changes());
    }
}
